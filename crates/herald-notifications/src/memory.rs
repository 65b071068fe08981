//! In-memory recipient directory.
//!
//! Used for local development and tests. Records live in two maps guarded by
//! a single async `RwLock`, so every mutation is atomic with respect to the
//! listing operations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::directory::RecipientDirectory;
use crate::error::NotificationError;
use crate::types::{EmailRecipient, PushRecipient};

#[derive(Debug, Default)]
struct Records {
    push: HashMap<String, PushRecipient>,
    email: HashMap<String, EmailRecipient>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    records: Arc<RwLock<Records>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace push recipients as-is, including disabled ones.
    pub async fn insert_push(&self, recipients: impl IntoIterator<Item = PushRecipient>) {
        let mut records = self.records.write().await;
        for recipient in recipients {
            records
                .push
                .insert(recipient.endpoint_token.clone(), recipient);
        }
    }

    /// Insert or replace email recipients as-is.
    pub async fn insert_email(&self, recipients: impl IntoIterator<Item = EmailRecipient>) {
        let mut records = self.records.write().await;
        for recipient in recipients {
            records.email.insert(recipient.address.clone(), recipient);
        }
    }

    /// All push recipients, enabled or not, sorted by token.
    pub async fn all_push(&self) -> Vec<PushRecipient> {
        let records = self.records.read().await;
        let mut all: Vec<_> = records.push.values().cloned().collect();
        all.sort_by(|a, b| a.endpoint_token.cmp(&b.endpoint_token));
        all
    }

    /// All email recipients, enabled or not, sorted by address.
    pub async fn all_email(&self) -> Vec<EmailRecipient> {
        let records = self.records.read().await;
        let mut all: Vec<_> = records.email.values().cloned().collect();
        all.sort_by(|a, b| a.address.cmp(&b.address));
        all
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryDirectory {
    async fn list_enabled_push(&self) -> Result<Vec<PushRecipient>, NotificationError> {
        let records = self.records.read().await;
        Ok(records
            .push
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn list_enabled_email(&self) -> Result<Vec<EmailRecipient>, NotificationError> {
        let records = self.records.read().await;
        Ok(records
            .email
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn get_push(&self, token: &str) -> Result<Option<PushRecipient>, NotificationError> {
        Ok(self.records.read().await.push.get(token).cloned())
    }

    async fn upsert_push(
        &self,
        token: &str,
        at: OffsetDateTime,
    ) -> Result<PushRecipient, NotificationError> {
        let recipient = PushRecipient::new(token, at);
        self.records
            .write()
            .await
            .push
            .insert(token.to_string(), recipient.clone());
        Ok(recipient)
    }

    async fn set_push_enabled(
        &self,
        token: &str,
        enabled: bool,
        at: OffsetDateTime,
    ) -> Result<bool, NotificationError> {
        let mut records = self.records.write().await;
        let Some(recipient) = records.push.get_mut(token) else {
            return Ok(false);
        };
        if recipient.enabled == enabled {
            return Ok(false);
        }
        recipient.enabled = enabled;
        recipient.disabled_at = if enabled { None } else { Some(at) };
        Ok(true)
    }

    async fn delete_push(&self, token: &str) -> Result<bool, NotificationError> {
        Ok(self.records.write().await.push.remove(token).is_some())
    }

    async fn list_push_disabled_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<String>, NotificationError> {
        let records = self.records.read().await;
        Ok(records
            .push
            .values()
            .filter(|r| !r.enabled && r.disabled_at.is_some_and(|at| at < cutoff))
            .map(|r| r.endpoint_token.clone())
            .collect())
    }

    async fn upsert_email(&self, recipient: &EmailRecipient) -> Result<(), NotificationError> {
        self.records
            .write()
            .await
            .email
            .insert(recipient.address.clone(), recipient.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[tokio::test]
    async fn test_disable_sets_timestamp_once() {
        let dir = InMemoryDirectory::new();
        let t0 = OffsetDateTime::now_utc();
        dir.upsert_push("tok-1", t0).await.unwrap();

        let t1 = t0 + Duration::minutes(5);
        assert!(dir.set_push_enabled("tok-1", false, t1).await.unwrap());

        // Second disable is not a transition and must not move disabled_at
        let t2 = t1 + Duration::minutes(5);
        assert!(!dir.set_push_enabled("tok-1", false, t2).await.unwrap());

        let stored = dir.get_push("tok-1").await.unwrap().unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.disabled_at, Some(t1));
    }

    #[tokio::test]
    async fn test_reregistration_clears_disabled_at() {
        let dir = InMemoryDirectory::new();
        let t0 = OffsetDateTime::now_utc();
        dir.upsert_push("tok-1", t0).await.unwrap();
        dir.set_push_enabled("tok-1", false, t0).await.unwrap();

        let t1 = t0 + Duration::days(1);
        let again = dir.upsert_push("tok-1", t1).await.unwrap();
        assert!(again.enabled);
        assert_eq!(again.created_at, t1);
        assert_eq!(again.disabled_at, None);
        assert_eq!(dir.list_enabled_push().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_a_transition() {
        let dir = InMemoryDirectory::new();
        let changed = dir
            .set_push_enabled("missing", false, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(!changed);
        assert!(!dir.delete_push("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_disabled_before_cutoff() {
        let dir = InMemoryDirectory::new();
        let now = OffsetDateTime::now_utc();
        for token in ["old", "recent", "live"] {
            dir.upsert_push(token, now - Duration::days(60)).await.unwrap();
        }
        dir.set_push_enabled("old", false, now - Duration::days(40))
            .await
            .unwrap();
        dir.set_push_enabled("recent", false, now - Duration::days(2))
            .await
            .unwrap();

        let stale = dir
            .list_push_disabled_before(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(stale, vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn test_email_upsert_overwrites() {
        let dir = InMemoryDirectory::new();
        let now = OffsetDateTime::now_utc();
        dir.upsert_email(&EmailRecipient::new("a@example.com", None, now))
            .await
            .unwrap();
        dir.upsert_email(&EmailRecipient::new(
            "a@example.com",
            Some("Ada".into()),
            now,
        ))
        .await
        .unwrap();

        let all = dir.all_email().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].display_name.as_deref(), Some("Ada"));
    }
}
