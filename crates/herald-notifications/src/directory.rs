use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::NotificationError;
use crate::types::{EmailRecipient, PushRecipient};

/// Storage trait for the recipient directory.
///
/// The directory is the only shared mutable state of the system. Reads are
/// snapshots: nothing prevents a recipient from unsubscribing between the
/// audience query and the send, and such a change is observed on the next
/// dispatch.
///
/// Implementations report backend failures as
/// [`NotificationError::DirectoryUnavailable`].
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// List every push recipient with `enabled = true`
    async fn list_enabled_push(&self) -> Result<Vec<PushRecipient>, NotificationError>;

    /// List every email recipient with `enabled = true`
    async fn list_enabled_email(&self) -> Result<Vec<EmailRecipient>, NotificationError>;

    /// Get a push recipient by token
    async fn get_push(&self, token: &str) -> Result<Option<PushRecipient>, NotificationError>;

    /// Register a push endpoint, or re-enable it if already known.
    /// Re-registration resets `created_at` and clears `disabled_at`.
    async fn upsert_push(&self, token: &str, at: OffsetDateTime)
        -> Result<PushRecipient, NotificationError>;

    /// Change the enabled flag of a push recipient.
    ///
    /// Disabling sets `disabled_at = at` only on the enabled -> disabled
    /// transition. Returns `true` when the flag actually changed and `false`
    /// when it already had the requested value or the token is unknown.
    async fn set_push_enabled(
        &self,
        token: &str,
        enabled: bool,
        at: OffsetDateTime,
    ) -> Result<bool, NotificationError>;

    /// Delete a push recipient. Returns whether a record was removed.
    async fn delete_push(&self, token: &str) -> Result<bool, NotificationError>;

    /// Tokens of disabled push recipients with `disabled_at < cutoff`
    async fn list_push_disabled_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<String>, NotificationError>;

    /// Subscribe an email address, overwriting a previous subscription
    async fn upsert_email(&self, recipient: &EmailRecipient) -> Result<(), NotificationError>;
}
