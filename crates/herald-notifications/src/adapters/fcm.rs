use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::debug;

use super::PushSender;
use super::fcm_auth::FcmCredentials;
use crate::error::NotificationError;
use crate::types::{PushDelivery, PushOutcome, PushPayload};

const FCM_API_URL: &str = "https://fcm.googleapis.com";

/// FCM error codes that mean the registration token will never work again.
/// `INVALID_ARGUMENT` is absent: FCM also returns it for payload problems
/// that would fail every token of the broadcast.
const PERMANENT_ERROR_CODES: &[&str] = &["UNREGISTERED", "SENDER_ID_MISMATCH"];

/// Push sender for the Firebase Cloud Messaging HTTP v1 API.
///
/// FCM v1 takes one token per request, so a batch is fanned out as
/// individual requests with at most `concurrency` in flight.
pub struct FcmPushAdapter {
    http_client: Client,
    base_url: String,
    project_id: String,
    credentials: FcmCredentials,
    concurrency: usize,
}

impl FcmPushAdapter {
    pub fn new(
        project_id: impl Into<String>,
        credentials: impl Into<FcmCredentials>,
        timeout: Duration,
        concurrency: usize,
    ) -> Result<Self, NotificationError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: FCM_API_URL.to_string(),
            project_id: project_id.into(),
            credentials: credentials.into(),
            concurrency: concurrency.max(1),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url.trim_end_matches('/'),
            self.project_id
        )
    }

    async fn deliver_one(
        &self,
        url: &str,
        bearer: &str,
        payload: &PushPayload,
        token: &str,
    ) -> PushDelivery {
        PushDelivery::new(token, self.send_one(url, bearer, payload, token).await)
    }

    async fn send_one(
        &self,
        url: &str,
        bearer: &str,
        payload: &PushPayload,
        token: &str,
    ) -> PushOutcome {
        let body = json!({
            "message": {
                "token": token,
                "notification": {
                    "title": payload.title,
                    "body": payload.body
                },
                "data": payload.data
            }
        });

        let response = match self
            .http_client
            .post(url)
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return PushOutcome::TransientError(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return PushOutcome::Delivered;
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        classify_error(status, &body)
    }
}

/// Map an FCM error response onto a permanent or transient outcome.
fn classify_error(status: StatusCode, body: &Value) -> PushOutcome {
    let error = &body["error"];
    let error_code = error["details"]
        .as_array()
        .and_then(|details| {
            details
                .iter()
                .find_map(|d| d["errorCode"].as_str())
        })
        .or_else(|| error["status"].as_str())
        .unwrap_or("UNKNOWN");
    let message = error["message"].as_str().unwrap_or("no error message");
    let reason = format!("{} {}: {}", status.as_u16(), error_code, message);

    if status == StatusCode::NOT_FOUND || PERMANENT_ERROR_CODES.contains(&error_code) {
        PushOutcome::PermanentlyInvalid(reason)
    } else {
        PushOutcome::TransientError(reason)
    }
}

#[async_trait]
impl PushSender for FcmPushAdapter {
    async fn send_batch(
        &self,
        payload: &PushPayload,
        endpoints: &[String],
        max_batch_size: usize,
    ) -> Result<Vec<PushDelivery>, NotificationError> {
        if endpoints.len() > max_batch_size {
            return Err(NotificationError::InvalidRequest(format!(
                "batch of {} exceeds provider limit {}",
                endpoints.len(),
                max_batch_size
            )));
        }

        let url = self.endpoint();
        let bearer = self.credentials.access_token().await?;
        debug!(endpoints = endpoints.len(), "Sending FCM batch");

        let sends: Vec<_> = endpoints
            .iter()
            .map(|token| self.deliver_one(&url, &bearer, payload, token))
            .collect();

        let deliveries = stream::iter(sends)
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fcm_auth::{ServiceAccountKey, ServiceAccountTokenProvider};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fcm_error(code: u16, status: &str, error_code: &str) -> Value {
        json!({
            "error": {
                "code": code,
                "message": "Requested entity was not found.",
                "status": status,
                "details": [{
                    "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                    "errorCode": error_code
                }]
            }
        })
    }

    #[test]
    fn test_classify_unregistered_is_permanent() {
        let outcome = classify_error(
            StatusCode::NOT_FOUND,
            &fcm_error(404, "NOT_FOUND", "UNREGISTERED"),
        );
        assert!(outcome.is_permanent_failure());
    }

    #[test]
    fn test_classify_unavailable_is_transient() {
        let outcome = classify_error(
            StatusCode::SERVICE_UNAVAILABLE,
            &fcm_error(503, "UNAVAILABLE", "UNAVAILABLE"),
        );
        assert!(matches!(outcome, PushOutcome::TransientError(_)));

        let outcome = classify_error(StatusCode::TOO_MANY_REQUESTS, &Value::Null);
        assert!(matches!(outcome, PushOutcome::TransientError(_)));
    }

    #[tokio::test]
    async fn test_send_batch_reports_each_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/demo/messages:send"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({"message": {"token": "dead"}})))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(fcm_error(404, "NOT_FOUND", "UNREGISTERED")),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/demo/messages:send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/demo/messages/1"
            })))
            .mount(&server)
            .await;

        let adapter = FcmPushAdapter::new("demo", "secret", Duration::from_secs(5), 4)
            .unwrap()
            .with_base_url(server.uri());

        let endpoints = vec!["live-1".to_string(), "dead".to_string(), "live-2".to_string()];
        let mut deliveries = adapter
            .send_batch(&PushPayload::new("Hi", "There"), &endpoints, 500)
            .await
            .unwrap();
        deliveries.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));

        assert_eq!(deliveries.len(), 3);
        assert!(deliveries[0].outcome.is_permanent_failure());
        assert_eq!(deliveries[0].endpoint, "dead");
        assert!(deliveries[1].outcome.is_delivered());
        assert!(deliveries[2].outcome.is_delivered());
    }

    #[test]
    fn test_classify_invalid_argument_is_transient() {
        let outcome = classify_error(
            StatusCode::BAD_REQUEST,
            &fcm_error(400, "INVALID_ARGUMENT", "INVALID_ARGUMENT"),
        );
        assert!(matches!(outcome, PushOutcome::TransientError(_)));

        let outcome = classify_error(
            StatusCode::FORBIDDEN,
            &fcm_error(403, "PERMISSION_DENIED", "SENDER_ID_MISMATCH"),
        );
        assert!(outcome.is_permanent_failure());
    }

    #[tokio::test]
    async fn test_rejected_payload_keeps_every_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/demo/messages:send"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "code": 400,
                    "message": "Message is too big",
                    "status": "INVALID_ARGUMENT",
                    "details": [{
                        "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                        "errorCode": "INVALID_ARGUMENT"
                    }]
                }
            })))
            .mount(&server)
            .await;

        let adapter = FcmPushAdapter::new("demo", "secret", Duration::from_secs(5), 8)
            .unwrap()
            .with_base_url(server.uri());

        let endpoints: Vec<String> = (0..50).map(|i| format!("tok-{i}")).collect();
        let payload = PushPayload::new("Release", "x".repeat(5000));
        let deliveries = adapter.send_batch(&payload, &endpoints, 500).await.unwrap();

        assert_eq!(deliveries.len(), 50);
        assert!(
            deliveries
                .iter()
                .all(|d| matches!(d.outcome, PushOutcome::TransientError(_)))
        );
    }

    #[tokio::test]
    async fn test_service_account_token_is_used_and_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.minted",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/demo/messages:send"))
            .and(header("authorization", "Bearer ya29.minted"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/demo/messages/1"
            })))
            .expect(4)
            .mount(&server)
            .await;

        let key = ServiceAccountKey::from_json(
            &json!({
                "client_email": "herald@demo.iam.gserviceaccount.com",
                "private_key": include_str!("../../tests/fixtures/service_account_key.pem"),
                "token_uri": format!("{}/token", server.uri()),
            })
            .to_string(),
        )
        .unwrap();
        let provider = ServiceAccountTokenProvider::new(&key, Duration::from_secs(5)).unwrap();
        let adapter = FcmPushAdapter::new("demo", provider, Duration::from_secs(5), 2)
            .unwrap()
            .with_base_url(server.uri());

        let payload = PushPayload::new("Hi", "There");
        for batch in [["a", "b"], ["c", "d"]] {
            let endpoints: Vec<String> = batch.iter().map(|t| t.to_string()).collect();
            let deliveries = adapter.send_batch(&payload, &endpoints, 500).await.unwrap();
            assert!(deliveries.iter().all(|d| d.outcome.is_delivered()));
        }
    }

    #[tokio::test]
    async fn test_failed_token_exchange_fails_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let key = ServiceAccountKey::from_json(
            &json!({
                "client_email": "herald@demo.iam.gserviceaccount.com",
                "private_key": include_str!("../../tests/fixtures/service_account_key.pem"),
                "token_uri": format!("{}/token", server.uri()),
            })
            .to_string(),
        )
        .unwrap();
        let provider = ServiceAccountTokenProvider::new(&key, Duration::from_secs(5)).unwrap();
        let adapter = FcmPushAdapter::new("demo", provider, Duration::from_secs(5), 2)
            .unwrap()
            .with_base_url(server.uri());

        let result = adapter
            .send_batch(&PushPayload::new("t", "b"), &["a".to_string()], 500)
            .await;
        assert!(matches!(result, Err(NotificationError::ChannelSendFailure(_))));
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected() {
        let adapter = FcmPushAdapter::new("demo", "secret", Duration::from_secs(1), 1).unwrap();
        let endpoints = vec!["a".to_string(), "b".to_string()];
        let result = adapter
            .send_batch(&PushPayload::new("t", "b"), &endpoints, 1)
            .await;
        assert!(matches!(result, Err(NotificationError::InvalidRequest(_))));
    }
}
