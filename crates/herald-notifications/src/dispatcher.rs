//! Fan-out dispatcher.
//!
//! One dispatch is a stateless read-then-send-then-write pass over the
//! recipient directory:
//!
//! 1. validate the request, then snapshot the enabled audience of every
//!    requested channel (a directory failure here aborts before any send);
//! 2. push endpoints are split into provider-sized batches and delivered with
//!    bounded concurrency, while emails are rendered and sent per recipient;
//! 3. endpoints the push provider reports as permanently invalid are disabled.
//!
//! Both channels run concurrently and are joined before counts are returned.
//! Per-recipient failures are counted, never propagated.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{EmailSender, PushSender};
use crate::directory::RecipientDirectory;
use crate::error::NotificationError;
use crate::templates::{
    BROADCAST_TEMPLATE, DIGEST_TEMPLATE, TEST_EMAIL_TEMPLATE, TemplateRenderer,
};
use crate::types::{
    Channel, DispatchResult, EmailOutcome, EmailRecipient, NotificationRequest, PushOutcome,
    PushPayload, RenderedEmail,
};

/// FCM multicast limit
pub const DEFAULT_PUSH_BATCH_SIZE: usize = 500;

const TEST_PUSH_TITLE: &str = "🧪 Test Notification";
const TEST_PUSH_BODY: &str = "This is a test push notification. Everything is working!";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum endpoints per push provider call
    pub push_batch_size: usize,
    /// Push batches in flight at once
    pub max_concurrent_batches: usize,
    /// Email sends in flight at once
    pub max_concurrent_emails: usize,
    /// Link rendered into email footers
    pub preferences_url: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            max_concurrent_batches: 4,
            max_concurrent_emails: 32,
            preferences_url: String::new(),
        }
    }
}

/// Split endpoints into consecutive batches of at most `batch_size`.
pub fn partition(endpoints: &[String], batch_size: usize) -> Vec<&[String]> {
    endpoints.chunks(batch_size.max(1)).collect()
}

#[derive(Debug, Default, Clone, Copy)]
struct PushTally {
    delivered: usize,
    disabled: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct EmailTally {
    sent: usize,
    failed: usize,
}

pub struct FanoutDispatcher {
    directory: Arc<dyn RecipientDirectory>,
    push: Arc<dyn PushSender>,
    email: Arc<dyn EmailSender>,
    templates: Arc<TemplateRenderer>,
    config: DispatcherConfig,
}

impl FanoutDispatcher {
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        push: Arc<dyn PushSender>,
        email: Arc<dyn EmailSender>,
        templates: Arc<TemplateRenderer>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            directory,
            push,
            email,
            templates,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Deliver one notification to every enabled recipient of the requested
    /// channels.
    #[instrument(skip_all, fields(title = %request.title, channels = ?request.channels))]
    pub async fn dispatch_to_audience(
        &self,
        request: &NotificationRequest,
    ) -> Result<DispatchResult, NotificationError> {
        request.validate()?;

        let push_audience = if request.wants(Channel::Push) {
            self.directory
                .list_enabled_push()
                .await
                .map_err(directory_unavailable)?
        } else {
            Vec::new()
        };
        let email_audience = if request.wants(Channel::Email) {
            self.directory
                .list_enabled_email()
                .await
                .map_err(directory_unavailable)?
        } else {
            Vec::new()
        };

        let emails = email_audience
            .iter()
            .map(|recipient| {
                let rendered = self.render_broadcast(request, recipient)?;
                Ok((recipient.address.clone(), rendered))
            })
            .collect::<Result<Vec<_>, NotificationError>>()?;

        let tokens: Vec<String> = push_audience
            .into_iter()
            .map(|recipient| recipient.endpoint_token)
            .collect();
        let payload = PushPayload::new(request.title.trim(), request.body.trim());

        let (push, email) = tokio::join!(
            self.fan_out_push(&payload, &tokens),
            self.fan_out_email(&emails),
        );

        let result = DispatchResult {
            push_success_count: push.delivered,
            push_failure_count: tokens.len() - push.delivered,
            push_disabled_count: push.disabled,
            email_success_count: email.sent,
            email_failure_count: email.failed,
        };

        info!(
            push_audience = tokens.len(),
            push_success = result.push_success_count,
            push_failure = result.push_failure_count,
            push_disabled = result.push_disabled_count,
            email_success = result.email_success_count,
            email_failure = result.email_failure_count,
            "Dispatch completed"
        );

        Ok(result)
    }

    /// Send the daily digest to every enabled email subscriber.
    #[instrument(skip_all)]
    pub async fn send_digest(&self) -> Result<DispatchResult, NotificationError> {
        let audience = self
            .directory
            .list_enabled_email()
            .await
            .map_err(directory_unavailable)?;

        let emails = audience
            .iter()
            .map(|recipient| {
                let name_suffix = recipient
                    .display_name
                    .as_deref()
                    .map(|name| format!(", {}", name))
                    .unwrap_or_default();
                let data = HashMap::from([
                    ("name_suffix".to_string(), serde_json::json!(name_suffix)),
                    (
                        "preferences_url".to_string(),
                        serde_json::json!(self.config.preferences_url),
                    ),
                ]);
                let rendered = self.templates.render(DIGEST_TEMPLATE, &data)?;
                Ok((recipient.address.clone(), rendered))
            })
            .collect::<Result<Vec<_>, NotificationError>>()?;

        let tally = self.fan_out_email(&emails).await;
        info!(
            subscribers = emails.len(),
            sent = tally.sent,
            failed = tally.failed,
            "Daily digest sent"
        );

        Ok(DispatchResult {
            email_success_count: tally.sent,
            email_failure_count: tally.failed,
            ..Default::default()
        })
    }

    /// Send the canned test push to a single endpoint.
    ///
    /// Never touches the directory, whatever the outcome.
    pub async fn send_test_push(&self, token: &str) -> Result<PushOutcome, NotificationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(NotificationError::InvalidRequest(
                "push token must not be empty".into(),
            ));
        }

        let timestamp_ms = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let payload = PushPayload::new(TEST_PUSH_TITLE, TEST_PUSH_BODY)
            .with_data("type", "test")
            .with_data("timestamp", timestamp_ms.to_string());

        let deliveries = self
            .push
            .send_batch(&payload, &[token.to_string()], 1)
            .await
            .map_err(|e| NotificationError::ChannelSendFailure(e.to_string()))?;

        let outcome = deliveries
            .into_iter()
            .find(|delivery| delivery.endpoint == token)
            .map(|delivery| delivery.outcome)
            .unwrap_or_else(|| PushOutcome::TransientError("no outcome reported".into()));

        debug!(outcome = ?outcome, "Test push finished");
        Ok(outcome)
    }

    /// Send the canned test email to a single address.
    pub async fn send_test_email(&self, address: &str) -> Result<EmailOutcome, NotificationError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(NotificationError::InvalidRequest(
                "email address must not be empty".into(),
            ));
        }

        let rendered = self.templates.render(TEST_EMAIL_TEMPLATE, &HashMap::new())?;
        let outcome = self
            .email
            .send(address, &rendered.subject, &rendered.html_body)
            .await
            .map_err(|e| NotificationError::ChannelSendFailure(e.to_string()))?;

        debug!(outcome = ?outcome, "Test email finished");
        Ok(outcome)
    }

    fn render_broadcast(
        &self,
        request: &NotificationRequest,
        recipient: &EmailRecipient,
    ) -> Result<RenderedEmail, NotificationError> {
        let greeting = recipient
            .display_name
            .as_deref()
            .map(|name| format!("Hi {},", name))
            .unwrap_or_default();
        let data = HashMap::from([
            ("title".to_string(), serde_json::json!(request.title.trim())),
            ("body".to_string(), serde_json::json!(request.body.trim())),
            ("greeting".to_string(), serde_json::json!(greeting)),
            (
                "preferences_url".to_string(),
                serde_json::json!(self.config.preferences_url),
            ),
        ]);
        self.templates.render(BROADCAST_TEMPLATE, &data)
    }

    async fn fan_out_push(&self, payload: &PushPayload, tokens: &[String]) -> PushTally {
        let batches = partition(tokens, self.config.push_batch_size);
        debug!(
            endpoints = tokens.len(),
            batches = batches.len(),
            "Fanning out push"
        );

        let deliveries: Vec<_> = batches
            .into_iter()
            .enumerate()
            .map(|(index, batch)| self.deliver_batch(payload, index, batch))
            .collect();

        stream::iter(deliveries)
            .buffer_unordered(self.config.max_concurrent_batches.max(1))
            .fold(PushTally::default(), |acc, tally| async move {
                PushTally {
                    delivered: acc.delivered + tally.delivered,
                    disabled: acc.disabled + tally.disabled,
                }
            })
            .await
    }

    async fn deliver_batch(&self, payload: &PushPayload, index: usize, batch: &[String]) -> PushTally {
        let deliveries = match self
            .push
            .send_batch(payload, batch, self.config.push_batch_size)
            .await
        {
            Ok(deliveries) => deliveries,
            Err(e) => {
                warn!(
                    batch = index,
                    size = batch.len(),
                    error = %e,
                    "Push batch failed, counting every endpoint as a transient failure"
                );
                return PushTally::default();
            }
        };

        // Count each endpoint of this batch once; ignore anything else the
        // provider reports.
        let members: HashSet<&str> = batch.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = HashSet::with_capacity(batch.len());
        let mut delivered = 0;
        let mut permanent: Vec<&str> = Vec::new();

        for delivery in &deliveries {
            let endpoint = delivery.endpoint.as_str();
            if !members.contains(endpoint) || !seen.insert(endpoint) {
                continue;
            }
            match &delivery.outcome {
                PushOutcome::Delivered => delivered += 1,
                PushOutcome::PermanentlyInvalid(reason) => {
                    debug!(endpoint, reason = %reason, "Push endpoint permanently invalid");
                    permanent.push(endpoint);
                }
                PushOutcome::TransientError(reason) => {
                    debug!(endpoint, reason = %reason, "Transient push failure");
                }
            }
        }

        let missing = batch.len() - seen.len();
        if missing > 0 {
            warn!(
                batch = index,
                missing, "Push provider omitted outcomes, counting them as transient failures"
            );
        }

        let now = OffsetDateTime::now_utc();
        let disables = join_all(
            permanent
                .iter()
                .map(|token| self.directory.set_push_enabled(token, false, now)),
        )
        .await;

        let mut disabled = 0;
        for (token, result) in permanent.iter().zip(disables) {
            match result {
                Ok(true) => disabled += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    endpoint = %token,
                    error = %e,
                    "Failed to disable invalid push endpoint"
                ),
            }
        }

        PushTally {
            delivered,
            disabled,
        }
    }

    async fn fan_out_email(&self, emails: &[(String, RenderedEmail)]) -> EmailTally {
        let sends: Vec<_> = emails
            .iter()
            .map(|(address, rendered)| self.deliver_email(address, rendered))
            .collect();

        stream::iter(sends)
            .buffer_unordered(self.config.max_concurrent_emails.max(1))
            .fold(EmailTally::default(), |acc, sent| async move {
                if sent {
                    EmailTally {
                        sent: acc.sent + 1,
                        ..acc
                    }
                } else {
                    EmailTally {
                        failed: acc.failed + 1,
                        ..acc
                    }
                }
            })
            .await
    }

    async fn deliver_email(&self, address: &str, rendered: &RenderedEmail) -> bool {
        match self
            .email
            .send(address, &rendered.subject, &rendered.html_body)
            .await
        {
            Ok(EmailOutcome::Sent { .. }) => true,
            Ok(EmailOutcome::Failed(reason)) => {
                warn!(to = %address, reason = %reason, "Email send failed");
                false
            }
            Err(e) => {
                warn!(to = %address, error = %e, "Email send failed");
                false
            }
        }
    }
}

/// Audience queries only ever fail as `DirectoryUnavailable`
pub(crate) fn directory_unavailable(error: NotificationError) -> NotificationError {
    match error {
        NotificationError::DirectoryUnavailable(_) => error,
        other => NotificationError::DirectoryUnavailable(other.to_string()),
    }
}
