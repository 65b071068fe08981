use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Recipient directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Channel send failed: {0}")]
    ChannelSendFailure(String),

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotificationError {
    /// Short machine-readable code used in API responses and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid-request",
            Self::DirectoryUnavailable(_) => "directory-unavailable",
            Self::ChannelSendFailure(_) => "channel-send-failure",
            Self::RecipientNotFound(_) => "not-found",
            Self::InvalidConfig(_) => "invalid-config",
            Self::Internal(_) => "internal",
        }
    }
}
