pub mod email;
pub mod fcm;
pub mod fcm_auth;
pub mod log;

use async_trait::async_trait;

use crate::error::NotificationError;
use crate::types::{EmailOutcome, PushDelivery, PushPayload};

/// Push channel sender.
///
/// Implementations must return one [`PushDelivery`] per endpoint they
/// attempted and classify failures as permanent or transient. Each call is
/// expected to resolve within the adapter's own network timeout. An `Err`
/// means the whole batch could not be attempted.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_batch(
        &self,
        payload: &PushPayload,
        endpoints: &[String],
        max_batch_size: usize,
    ) -> Result<Vec<PushDelivery>, NotificationError>;
}

/// Email channel sender, one recipient per call.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(
        &self,
        address: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<EmailOutcome, NotificationError>;
}

pub use email::{EmailAdapter, EmailTransport};
pub use fcm::FcmPushAdapter;
pub use fcm_auth::{FcmCredentials, ServiceAccountKey, ServiceAccountTokenProvider};
pub use log::{LogEmailSender, LogPushSender};
