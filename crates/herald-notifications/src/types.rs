use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;

use crate::error::NotificationError;

/// Notification delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Push,
    Email,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Email => write!(f, "email"),
        }
    }
}

/// A registered push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRecipient {
    /// Opaque provider token, unique per recipient
    pub endpoint_token: String,

    pub enabled: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Set at the enabled -> disabled transition, cleared on re-registration
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub disabled_at: Option<OffsetDateTime>,
}

impl PushRecipient {
    pub fn new(endpoint_token: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            endpoint_token: endpoint_token.into(),
            enabled: true,
            created_at: now,
            disabled_at: None,
        }
    }
}

/// An email opt-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRecipient {
    pub address: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    pub enabled: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub subscribed_at: OffsetDateTime,
}

impl EmailRecipient {
    pub fn new(
        address: impl Into<String>,
        display_name: Option<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.filter(|n| !n.trim().is_empty()),
            enabled: true,
            subscribed_at: now,
        }
    }
}

/// One logical notification to deliver to the whole audience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub channels: BTreeSet<Channel>,
}

impl NotificationRequest {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        channels: impl IntoIterator<Item = Channel>,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            channels: channels.into_iter().collect(),
        }
    }

    pub fn validate(&self) -> Result<(), NotificationError> {
        if self.title.trim().is_empty() {
            return Err(NotificationError::InvalidRequest(
                "title must not be empty".into(),
            ));
        }
        if self.body.trim().is_empty() {
            return Err(NotificationError::InvalidRequest(
                "body must not be empty".into(),
            ));
        }
        if self.channels.is_empty() {
            return Err(NotificationError::InvalidRequest(
                "at least one channel is required".into(),
            ));
        }
        Ok(())
    }

    pub fn wants(&self, channel: Channel) -> bool {
        self.channels.contains(&channel)
    }
}

/// Payload handed to the push provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl PushPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Per-endpoint result reported by a push sender.
///
/// Only `PermanentlyInvalid` leads to the recipient being disabled; a
/// transient error leaves it eligible for the next dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    PermanentlyInvalid(String),
    TransientError(String),
}

impl PushOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, Self::PermanentlyInvalid(_))
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Delivered => None,
            Self::PermanentlyInvalid(reason) | Self::TransientError(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushDelivery {
    pub endpoint: String,
    pub outcome: PushOutcome,
}

impl PushDelivery {
    pub fn new(endpoint: impl Into<String>, outcome: PushOutcome) -> Self {
        Self {
            endpoint: endpoint.into(),
            outcome,
        }
    }
}

/// Result of a single email send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailOutcome {
    Sent { message_id: Option<String> },
    Failed(String),
}

impl EmailOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Rendered email content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
}

/// Aggregate counts of one dispatch call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub push_success_count: usize,
    pub push_failure_count: usize,
    /// Recipients that transitioned to disabled during this call
    pub push_disabled_count: usize,
    pub email_success_count: usize,
    pub email_failure_count: usize,
}
