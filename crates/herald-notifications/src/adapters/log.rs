//! Senders that only log.
//!
//! Used when no provider credentials are configured, so the full dispatch
//! pipeline can run locally without external services.

use async_trait::async_trait;
use tracing::info;

use super::{EmailSender, PushSender};
use crate::error::NotificationError;
use crate::types::{EmailOutcome, PushDelivery, PushOutcome, PushPayload};

#[derive(Debug, Default, Clone, Copy)]
pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn send_batch(
        &self,
        payload: &PushPayload,
        endpoints: &[String],
        _max_batch_size: usize,
    ) -> Result<Vec<PushDelivery>, NotificationError> {
        info!(
            channel = "push",
            endpoints = endpoints.len(),
            title = %payload.title,
            "Logged push batch"
        );
        Ok(endpoints
            .iter()
            .map(|endpoint| PushDelivery::new(endpoint.clone(), PushOutcome::Delivered))
            .collect())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(
        &self,
        address: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<EmailOutcome, NotificationError> {
        info!(
            channel = "email",
            to = %address,
            subject = %subject,
            bytes = html_body.len(),
            "Logged email"
        );
        Ok(EmailOutcome::Sent { message_id: None })
    }
}
