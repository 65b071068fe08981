//! OAuth2 access tokens for the FCM HTTP v1 API.
//!
//! Tokens are either supplied as-is or minted from a Google service account
//! key: a signed JWT assertion is exchanged at the key's `token_uri` and the
//! resulting token is cached until shortly before it expires.

use std::path::Path;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::NotificationError;

pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Minted tokens are replaced this long before Google expires them
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// The fields Herald needs from a service account JSON key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, NotificationError> {
        serde_json::from_str(json).map_err(|e| {
            NotificationError::InvalidConfig(format!("invalid service account key: {e}"))
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NotificationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            NotificationError::InvalidConfig(format!(
                "cannot read service account key {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }
}

/// Where the FCM bearer token comes from.
pub enum FcmCredentials {
    /// A pre-issued token, used until the process restarts
    Static(String),
    ServiceAccount(ServiceAccountTokenProvider),
}

impl FcmCredentials {
    pub async fn access_token(&self) -> Result<String, NotificationError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ServiceAccount(provider) => provider.access_token().await,
        }
    }
}

impl From<String> for FcmCredentials {
    fn from(token: String) -> Self {
        Self::Static(token)
    }
}

impl From<&str> for FcmCredentials {
    fn from(token: &str) -> Self {
        Self::Static(token.to_string())
    }
}

impl From<ServiceAccountTokenProvider> for FcmCredentials {
    fn from(provider: ServiceAccountTokenProvider) -> Self {
        Self::ServiceAccount(provider)
    }
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Mints and caches access tokens for one service account.
pub struct ServiceAccountTokenProvider {
    client_email: String,
    token_uri: String,
    encoding_key: EncodingKey,
    http_client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    pub fn new(key: &ServiceAccountKey, timeout: Duration) -> Result<Self, NotificationError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            NotificationError::InvalidConfig(format!("invalid service account private key: {e}"))
        })?;
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client_email: key.client_email.clone(),
            token_uri: key.token_uri.clone(),
            encoding_key,
            http_client,
            cached: Mutex::new(None),
        })
    }

    /// A valid token, minting a new one when the cached token is due.
    ///
    /// Concurrent callers wait for a single exchange.
    pub async fn access_token(&self) -> Result<String, NotificationError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.token.clone());
        }

        let minted = self.mint().await?;
        let token = minted.token.clone();
        *cached = Some(minted);
        Ok(token)
    }

    fn assertion(&self) -> Result<String, NotificationError> {
        #[derive(Serialize)]
        struct Claims<'a> {
            iss: &'a str,
            scope: &'a str,
            aud: &'a str,
            iat: i64,
            exp: i64,
        }

        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: FCM_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| NotificationError::Internal(format!("cannot sign token assertion: {e}")))
    }

    async fn mint(&self) -> Result<CachedToken, NotificationError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let assertion = self.assertion()?;
        let response = self
            .http_client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| NotificationError::ChannelSendFailure(format!("token exchange: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::ChannelSendFailure(format!(
                "token exchange returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let payload: TokenResponse = response.json().await.map_err(|e| {
            NotificationError::ChannelSendFailure(format!("token exchange response: {e}"))
        })?;
        let lifetime = Duration::from_secs(payload.expires_in).saturating_sub(REFRESH_MARGIN);
        debug!(
            client_email = %self.client_email,
            expires_in = payload.expires_in,
            "Minted FCM access token"
        );

        Ok(CachedToken {
            token: payload.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}
