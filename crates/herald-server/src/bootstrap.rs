//! Builds the notification service from configuration.

use std::sync::Arc;

use herald_db_postgres::PostgresRecipientDirectory;
use herald_notifications::{
    EmailAdapter, EmailSender, EmailTransport, FanoutDispatcher, FcmCredentials, FcmPushAdapter,
    InMemoryDirectory, LogEmailSender, LogPushSender, NotificationError, NotificationHub,
    NotificationService, PushSender, RecipientDirectory, ServiceAccountKey,
    ServiceAccountTokenProvider, TemplateRenderer,
};

use crate::config::{AppConfig, EmailConfig, EmailProvider, PushConfig, PushProvider, StorageBackend};

pub async fn build_directory(
    cfg: &AppConfig,
) -> Result<Arc<dyn RecipientDirectory>, NotificationError> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory recipient directory; recipients are lost on restart");
            Ok(Arc::new(InMemoryDirectory::new()))
        }
        StorageBackend::Postgres => {
            let directory =
                PostgresRecipientDirectory::connect(&cfg.storage.postgres.to_postgres_config())
                    .await?;
            tracing::info!("PostgreSQL recipient directory ready");
            Ok(Arc::new(directory))
        }
    }
}

pub fn build_push_sender(cfg: &PushConfig) -> Result<Arc<dyn PushSender>, NotificationError> {
    match cfg.provider {
        PushProvider::Log => Ok(Arc::new(LogPushSender)),
        PushProvider::Fcm => {
            let (credentials, key_project) = fcm_credentials(cfg)?;
            let Some(project_id) = cfg.project_id.clone().or(key_project) else {
                return Err(NotificationError::InvalidConfig(
                    "push.provider=fcm requires push.project_id".into(),
                ));
            };
            let mut adapter = FcmPushAdapter::new(
                project_id.clone(),
                credentials,
                cfg.request_timeout(),
                cfg.concurrency,
            )?;
            if let Some(base_url) = &cfg.base_url {
                adapter = adapter.with_base_url(base_url.clone());
            }
            tracing::info!(project_id = %project_id, "FCM push sender configured");
            Ok(Arc::new(adapter))
        }
    }
}

/// A service account key wins over a static token. Also returns the key's
/// project id, used when `push.project_id` is unset.
fn fcm_credentials(
    cfg: &PushConfig,
) -> Result<(FcmCredentials, Option<String>), NotificationError> {
    if let Some(path) = cfg.service_account_path.as_deref().filter(|p| !p.is_empty()) {
        let key = ServiceAccountKey::from_file(path)?;
        let provider = ServiceAccountTokenProvider::new(&key, cfg.request_timeout())?;
        tracing::info!(client_email = %key.client_email, "Minting FCM tokens from service account");
        return Ok((provider.into(), key.project_id));
    }
    match cfg.access_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => {
            tracing::warn!("Using a static FCM access token; it will expire");
            Ok((token.into(), None))
        }
        None => Err(NotificationError::InvalidConfig(
            "push.provider=fcm requires service_account_path or access_token".into(),
        )),
    }
}

pub fn build_email_sender(cfg: &EmailConfig) -> Result<Arc<dyn EmailSender>, NotificationError> {
    let transport = match cfg.provider {
        EmailProvider::Log => return Ok(Arc::new(LogEmailSender)),
        EmailProvider::Smtp => EmailTransport::Smtp {
            host: cfg.smtp_host.clone().unwrap_or_default(),
            port: cfg.smtp_port,
            username: cfg.smtp_username.clone(),
            password: cfg.smtp_password.clone(),
        },
        EmailProvider::Sendgrid => EmailTransport::SendGrid {
            api_key: cfg.api_key.clone().unwrap_or_default(),
            base_url: cfg.base_url.clone(),
        },
    };
    let adapter = EmailAdapter::new(transport, &cfg.from, cfg.request_timeout())?;
    tracing::info!(provider = ?cfg.provider, from = %cfg.from, "Email sender configured");
    Ok(Arc::new(adapter))
}

/// Assemble the directory, channel senders and dispatcher behind one service.
pub async fn build_service(
    cfg: &AppConfig,
) -> Result<Arc<dyn NotificationService>, NotificationError> {
    let directory = build_directory(cfg).await?;
    Ok(build_service_with(
        cfg,
        directory,
        build_push_sender(&cfg.push)?,
        build_email_sender(&cfg.email)?,
    ))
}

/// Same as [`build_service`] with explicit collaborators.
pub fn build_service_with(
    cfg: &AppConfig,
    directory: Arc<dyn RecipientDirectory>,
    push: Arc<dyn PushSender>,
    email: Arc<dyn EmailSender>,
) -> Arc<dyn NotificationService> {
    let dispatcher = FanoutDispatcher::new(
        directory.clone(),
        push,
        email,
        Arc::new(TemplateRenderer::with_defaults()),
        cfg.dispatcher_config(),
    );
    Arc::new(NotificationHub::new(directory, dispatcher))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcm_without_credentials_is_rejected() {
        let cfg = PushConfig {
            provider: PushProvider::Fcm,
            ..Default::default()
        };
        assert!(matches!(
            build_push_sender(&cfg),
            Err(NotificationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_fcm_project_comes_from_service_account_key() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("fcm.json");
        let key = serde_json::json!({
            "type": "service_account",
            "project_id": "from-key",
            "client_email": "herald@from-key.iam.gserviceaccount.com",
            "private_key": include_str!(
                "../tests/fixtures/service_account_key.pem"
            ),
        });
        std::fs::write(&key_path, key.to_string()).unwrap();

        let cfg = PushConfig {
            provider: PushProvider::Fcm,
            service_account_path: Some(key_path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        assert!(build_push_sender(&cfg).is_ok());

        let (_, project) = fcm_credentials(&cfg).unwrap();
        assert_eq!(project.as_deref(), Some("from-key"));
    }

    #[test]
    fn test_missing_service_account_file_is_rejected() {
        let cfg = PushConfig {
            provider: PushProvider::Fcm,
            project_id: Some("demo".into()),
            service_account_path: Some("/nonexistent/fcm.json".into()),
            ..Default::default()
        };
        assert!(matches!(
            build_push_sender(&cfg),
            Err(NotificationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sendgrid_sender_builds() {
        let cfg = EmailConfig {
            provider: EmailProvider::Sendgrid,
            api_key: Some("key".into()),
            ..Default::default()
        };
        assert!(build_email_sender(&cfg).is_ok());
    }

    #[tokio::test]
    async fn test_default_config_builds_in_memory_service() {
        let service = build_service(&AppConfig::default()).await.unwrap();
        let result = service.send_digest().await.unwrap();
        assert_eq!(result.email_success_count, 0);
    }
}
