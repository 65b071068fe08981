use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use super::EmailSender;
use crate::error::NotificationError;
use crate::types::EmailOutcome;

const SENDGRID_API_URL: &str = "https://api.sendgrid.com";

/// Which backend delivers the mail
#[derive(Debug, Clone)]
pub enum EmailTransport {
    SendGrid {
        api_key: String,
        /// Override for the API origin, mostly for tests
        base_url: Option<String>,
    },
    Smtp {
        host: String,
        port: u16,
        username: Option<String>,
        password: Option<String>,
    },
}

enum Backend {
    SendGrid {
        client: Client,
        api_key: String,
        base_url: String,
    },
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
}

pub struct EmailAdapter {
    backend: Backend,
    from: Mailbox,
}

impl EmailAdapter {
    pub fn new(
        transport: EmailTransport,
        from: &str,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| NotificationError::InvalidConfig(format!("Invalid from: {}", e)))?;

        let backend = match transport {
            EmailTransport::SendGrid { api_key, base_url } => {
                let client = Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?;
                Backend::SendGrid {
                    client,
                    api_key,
                    base_url: base_url.unwrap_or_else(|| SENDGRID_API_URL.to_string()),
                }
            }
            EmailTransport::Smtp {
                host,
                port,
                username,
                password,
            } => {
                let mut mailer_builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
                    .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?
                    .port(port)
                    .timeout(Some(timeout));

                if let (Some(username), Some(password)) = (username, password) {
                    mailer_builder = mailer_builder.credentials(Credentials::new(username, password));
                }

                Backend::Smtp(mailer_builder.build())
            }
        };

        Ok(Self { backend, from })
    }

    async fn send_sendgrid(
        &self,
        client: &Client,
        api_key: &str,
        base_url: &str,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<EmailOutcome, NotificationError> {
        let body = json!({
            "personalizations": [{
                "to": [{"email": to}]
            }],
            "from": {"email": self.from.email.to_string()},
            "subject": subject,
            "content": [{
                "type": "text/html",
                "value": html_body
            }]
        });

        let response = match client
            .post(format!("{}/v3/mail/send", base_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(EmailOutcome::Failed(e.to_string())),
        };

        if response.status().is_success() {
            let message_id = response
                .headers()
                .get("x-message-id")
                .and_then(|v| v.to_str().ok())
                .map(String::from);

            Ok(EmailOutcome::Sent { message_id })
        } else {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            Ok(EmailOutcome::Failed(format!("SendGrid {}: {}", status, error)))
        }
    }

    async fn send_smtp(
        &self,
        mailer: &AsyncSmtpTransport<Tokio1Executor>,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<EmailOutcome, NotificationError> {
        let to: Mailbox = match to.parse() {
            Ok(mailbox) => mailbox,
            Err(e) => return Ok(EmailOutcome::Failed(format!("Invalid to: {}", e))),
        };

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| NotificationError::Internal(e.to_string()))?;

        match mailer.send(email).await {
            Ok(response) => Ok(EmailOutcome::Sent {
                message_id: Some(response.message().collect::<Vec<_>>().join(" ")),
            }),
            Err(e) => Ok(EmailOutcome::Failed(e.to_string())),
        }
    }
}

#[async_trait]
impl EmailSender for EmailAdapter {
    async fn send(
        &self,
        address: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<EmailOutcome, NotificationError> {
        debug!(to = %address, "Sending email");
        match &self.backend {
            Backend::SendGrid {
                client,
                api_key,
                base_url,
            } => {
                self.send_sendgrid(client, api_key, base_url, address, subject, html_body)
                    .await
            }
            Backend::Smtp(mailer) => self.send_smtp(mailer, address, subject, html_body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sendgrid(server: &MockServer) -> EmailAdapter {
        EmailAdapter::new(
            EmailTransport::SendGrid {
                api_key: "sg-key".into(),
                base_url: Some(server.uri()),
            },
            "noreply@example.com",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sendgrid_success_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .and(header("authorization", "Bearer sg-key"))
            .respond_with(ResponseTemplate::new(202).insert_header("x-message-id", "msg-1"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = sendgrid(&server)
            .send("user@example.com", "Hello", "<p>Hi</p>")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            EmailOutcome::Sent {
                message_id: Some("msg-1".into())
            }
        );
    }

    #[tokio::test]
    async fn test_sendgrid_rejection_is_a_failed_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad address"))
            .mount(&server)
            .await;

        let outcome = sendgrid(&server)
            .send("user@example.com", "Hello", "<p>Hi</p>")
            .await
            .unwrap();
        match outcome {
            EmailOutcome::Failed(reason) => assert!(reason.contains("bad address")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_from_is_config_error() {
        let result = EmailAdapter::new(
            EmailTransport::SendGrid {
                api_key: "k".into(),
                base_url: None,
            },
            "not an address",
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(NotificationError::InvalidConfig(_))));
    }
}
