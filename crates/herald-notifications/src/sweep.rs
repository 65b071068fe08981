use std::sync::Arc;

use futures_util::future::join_all;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::directory::RecipientDirectory;
use crate::dispatcher::directory_unavailable;
use crate::error::NotificationError;

/// Default retention for disabled push recipients
pub const DEFAULT_RETENTION: Duration = Duration::days(30);

/// Deletes push recipients that have been disabled for longer than the
/// retention period.
pub struct RetentionSweep {
    directory: Arc<dyn RecipientDirectory>,
}

impl RetentionSweep {
    pub fn new(directory: Arc<dyn RecipientDirectory>) -> Self {
        Self { directory }
    }

    pub async fn sweep_stale_recipients(
        &self,
        retention: Duration,
    ) -> Result<usize, NotificationError> {
        self.sweep_at(OffsetDateTime::now_utc(), retention).await
    }

    /// Delete every disabled push recipient with `disabled_at < now - retention`.
    ///
    /// Listing failures abort the sweep; a failed delete is logged and left
    /// for the next run.
    pub async fn sweep_at(
        &self,
        now: OffsetDateTime,
        retention: Duration,
    ) -> Result<usize, NotificationError> {
        let cutoff = now - retention;
        let stale = self
            .directory
            .list_push_disabled_before(cutoff)
            .await
            .map_err(directory_unavailable)?;

        let results = join_all(stale.iter().map(|token| self.directory.delete_push(token))).await;

        let mut deleted = 0;
        for (token, result) in stale.iter().zip(results) {
            match result {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(endpoint = %token, error = %e, "Failed to delete stale push recipient"),
            }
        }

        info!(
            candidates = stale.len(),
            deleted,
            cutoff = %cutoff,
            "Cleaned up old subscriptions"
        );
        Ok(deleted)
    }
}
