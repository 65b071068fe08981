use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::info;

use crate::directory::RecipientDirectory;
use crate::dispatcher::FanoutDispatcher;
use crate::error::NotificationError;
use crate::sweep::RetentionSweep;
use crate::types::{
    DispatchResult, EmailOutcome, EmailRecipient, NotificationRequest, PushOutcome, PushRecipient,
};

/// Operations exposed to API callers and the scheduler.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Deliver a notification to every enabled recipient of the requested channels
    async fn dispatch_to_audience(
        &self,
        request: NotificationRequest,
    ) -> Result<DispatchResult, NotificationError>;

    /// Send the canned test push to one endpoint
    async fn send_test_push(&self, token: &str) -> Result<PushOutcome, NotificationError>;

    /// Send the canned test email to one address
    async fn send_test_email(&self, address: &str) -> Result<EmailOutcome, NotificationError>;

    /// Send the digest to every enabled email subscriber
    async fn send_digest(&self) -> Result<DispatchResult, NotificationError>;

    /// Delete push recipients disabled for longer than `retention`
    async fn sweep_stale_recipients(
        &self,
        retention: time::Duration,
    ) -> Result<usize, NotificationError>;

    /// Register (or re-enable) a push endpoint
    async fn register_push(&self, token: &str) -> Result<PushRecipient, NotificationError>;

    /// Disable a push endpoint at the caller's request
    async fn unregister_push(&self, token: &str) -> Result<(), NotificationError>;

    /// Subscribe an email address
    async fn subscribe_email(
        &self,
        address: &str,
        display_name: Option<String>,
    ) -> Result<EmailRecipient, NotificationError>;
}

/// Default [`NotificationService`] wiring the dispatcher, the retention sweep
/// and direct directory registration together.
pub struct NotificationHub {
    directory: Arc<dyn RecipientDirectory>,
    dispatcher: FanoutDispatcher,
    sweep: RetentionSweep,
}

impl NotificationHub {
    pub fn new(directory: Arc<dyn RecipientDirectory>, dispatcher: FanoutDispatcher) -> Self {
        Self {
            sweep: RetentionSweep::new(directory.clone()),
            directory,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &FanoutDispatcher {
        &self.dispatcher
    }
}

#[async_trait]
impl NotificationService for NotificationHub {
    async fn dispatch_to_audience(
        &self,
        request: NotificationRequest,
    ) -> Result<DispatchResult, NotificationError> {
        self.dispatcher.dispatch_to_audience(&request).await
    }

    async fn send_test_push(&self, token: &str) -> Result<PushOutcome, NotificationError> {
        self.dispatcher.send_test_push(token).await
    }

    async fn send_test_email(&self, address: &str) -> Result<EmailOutcome, NotificationError> {
        self.dispatcher.send_test_email(address).await
    }

    async fn send_digest(&self) -> Result<DispatchResult, NotificationError> {
        self.dispatcher.send_digest().await
    }

    async fn sweep_stale_recipients(
        &self,
        retention: time::Duration,
    ) -> Result<usize, NotificationError> {
        self.sweep.sweep_stale_recipients(retention).await
    }

    async fn register_push(&self, token: &str) -> Result<PushRecipient, NotificationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(NotificationError::InvalidRequest(
                "push token must not be empty".into(),
            ));
        }
        let recipient = self
            .directory
            .upsert_push(token, OffsetDateTime::now_utc())
            .await?;
        info!("Push endpoint registered");
        Ok(recipient)
    }

    async fn unregister_push(&self, token: &str) -> Result<(), NotificationError> {
        let token = token.trim();
        if self.directory.get_push(token).await?.is_none() {
            return Err(NotificationError::RecipientNotFound(token.to_string()));
        }
        let changed = self
            .directory
            .set_push_enabled(token, false, OffsetDateTime::now_utc())
            .await?;
        info!(changed, "Push endpoint disabled");
        Ok(())
    }

    async fn subscribe_email(
        &self,
        address: &str,
        display_name: Option<String>,
    ) -> Result<EmailRecipient, NotificationError> {
        let address = address.trim();
        address.parse::<lettre::Address>().map_err(|e| {
            NotificationError::InvalidRequest(format!("invalid email address: {}", e))
        })?;

        let recipient = EmailRecipient::new(
            address,
            display_name.map(|name| name.trim().to_string()),
            OffsetDateTime::now_utc(),
        );
        self.directory.upsert_email(&recipient).await?;
        info!(to = %recipient.address, "Email subscription saved");
        Ok(recipient)
    }
}
