use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use herald_notifications::{
    Channel, DispatchResult, EmailOutcome, NotificationError, NotificationRequest,
    NotificationService, PushOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn NotificationService>,
    /// Retention used by `POST /admin/sweep`
    pub retention: time::Duration,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Body of `POST /sendToAllUsers`.
///
/// Accepts `message` for `body`, and the `sendPush` / `sendEmail` flags when
/// `channels` is absent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToAllUsersRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "message")]
    pub body: String,
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default)]
    pub send_push: bool,
    #[serde(default)]
    pub send_email: bool,
}

impl SendToAllUsersRequest {
    pub fn into_request(self) -> NotificationRequest {
        let channels = match self.channels {
            Some(channels) => channels,
            None => {
                let mut channels = Vec::new();
                if self.send_push {
                    channels.push(Channel::Push);
                }
                if self.send_email {
                    channels.push(Channel::Email);
                }
                channels
            }
        };
        NotificationRequest::new(self.title, self.body, channels)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: DispatchResult,
}

impl From<DispatchResult> for DispatchResponse {
    fn from(result: DispatchResult) -> Self {
        Self {
            success: true,
            result,
        }
    }
}

pub async fn send_to_all_users(
    State(state): State<AppState>,
    payload: Result<Json<SendToAllUsersRequest>, JsonRejection>,
) -> Result<Json<DispatchResponse>, ApiError> {
    let Json(payload) = payload?;
    let result = state
        .service
        .dispatch_to_audience(payload.into_request())
        .await?;
    Ok(Json(result.into()))
}

/// Body of `POST /sendTestNotification`
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestNotificationRequest {
    Push { token: String },
    Email { email: String },
}

pub async fn send_test_notification(
    State(state): State<AppState>,
    payload: Result<Json<TestNotificationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let message = match payload {
        TestNotificationRequest::Push { token } => {
            match state.service.send_test_push(&token).await? {
                PushOutcome::Delivered => "Test push notification sent",
                PushOutcome::PermanentlyInvalid(reason) | PushOutcome::TransientError(reason) => {
                    return Err(NotificationError::ChannelSendFailure(reason).into());
                }
            }
        }
        TestNotificationRequest::Email { email } => {
            match state.service.send_test_email(&email).await? {
                EmailOutcome::Sent { .. } => "Test email sent",
                EmailOutcome::Failed(reason) => {
                    return Err(NotificationError::ChannelSendFailure(reason).into());
                }
            }
        }
    };
    Ok(Json(json!({ "success": true, "message": message })))
}

#[derive(Debug, Deserialize)]
pub struct PushSubscriptionRequest {
    #[serde(default)]
    pub token: String,
}

pub async fn register_push(
    State(state): State<AppState>,
    payload: Result<Json<PushSubscriptionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let recipient = state.service.register_push(&payload.token).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "recipient": recipient })),
    ))
}

pub async fn unregister_push(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.unregister_push(&token).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct EmailSubscriptionRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn subscribe_email(
    State(state): State<AppState>,
    payload: Result<Json<EmailSubscriptionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let recipient = state
        .service
        .subscribe_email(&payload.email, payload.name)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "recipient": recipient })),
    ))
}

pub async fn run_sweep(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .service
        .sweep_stale_recipients(state.retention)
        .await?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

pub async fn run_digest(
    State(state): State<AppState>,
) -> Result<Json<DispatchResponse>, ApiError> {
    let result = state.service.send_digest().await?;
    Ok(Json(result.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_fields_map_to_channels() {
        let req: SendToAllUsersRequest = serde_json::from_value(json!({
            "title": "Hi",
            "message": "Hello",
            "sendPush": true,
            "sendEmail": false
        }))
        .unwrap();
        let request = req.into_request();
        assert_eq!(request.body, "Hello");
        assert!(request.wants(Channel::Push));
        assert!(!request.wants(Channel::Email));
    }

    #[test]
    fn test_channels_win_over_legacy_flags() {
        let req: SendToAllUsersRequest = serde_json::from_value(json!({
            "title": "Hi",
            "body": "Hello",
            "channels": ["email"],
            "sendPush": true
        }))
        .unwrap();
        let request = req.into_request();
        assert!(request.wants(Channel::Email));
        assert!(!request.wants(Channel::Push));
    }

    #[test]
    fn test_no_channels_fails_validation() {
        let req: SendToAllUsersRequest =
            serde_json::from_value(json!({ "title": "Hi", "body": "Hello" })).unwrap();
        assert!(req.into_request().validate().is_err());
    }

    #[test]
    fn test_test_notification_variants() {
        let push: TestNotificationRequest =
            serde_json::from_value(json!({ "type": "push", "token": "abc" })).unwrap();
        assert!(matches!(push, TestNotificationRequest::Push { token } if token == "abc"));

        let email: TestNotificationRequest =
            serde_json::from_value(json!({ "type": "email", "email": "a@example.com" })).unwrap();
        assert!(matches!(email, TestNotificationRequest::Email { .. }));

        assert!(
            serde_json::from_value::<TestNotificationRequest>(json!({ "type": "sms" })).is_err()
        );
    }

    #[test]
    fn test_dispatch_response_is_flat() {
        let body = serde_json::to_value(DispatchResponse::from(DispatchResult {
            push_success_count: 2,
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["pushSuccessCount"], 2);
        assert_eq!(body["emailFailureCount"], 0);
    }
}
