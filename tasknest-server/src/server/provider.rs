use std::collections::HashMap;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::warn;

use tasknest_shared::domain::DevicePlatform;

use super::config::PushConfig;

/// Android notification channel every reminder push targets.
pub const ANDROID_CHANNEL_ID: &str = "reminders";

const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Validity window of the signed assertion presented to the token endpoint.
const ASSERTION_TTL_SECS: i64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("assertion signing failed: {0}")]
    Signing(String),
    #[error("credential exchange failed: {0}")]
    Exchange(String),
}

/// Per-token delivery failure, classified for registry upkeep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// The provider no longer knows this token; its registry row is dead.
    Unregistered,
    /// Transient or unclassified failure; the token stays registered.
    Other(String),
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendFailure::Unregistered => f.write_str("token unregistered"),
            SendFailure::Other(msg) => f.write_str(msg),
        }
    }
}

/// One notification addressed to one device token.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub token: String,
    pub platform: DevicePlatform,
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

/// Seam to the external push infrastructure. The real implementation talks to
/// the messaging provider over HTTP; tests substitute a scripted recorder.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Exchanges the service credential for a short-lived bearer token.
    /// Called once per dispatch invocation; the bearer is reused for every
    /// send within that invocation.
    async fn exchange_credential(&self) -> Result<String, ProviderError>;

    /// Attempts delivery of one message. At most one attempt per call.
    async fn push(&self, bearer: &str, message: &OutboundMessage) -> Result<(), SendFailure>;
}

pub struct FcmProvider {
    http: reqwest::Client,
    project_id: String,
    client_email: String,
    private_key: String,
    token_uri: String,
    api_base: String,
}

impl FcmProvider {
    /// Builds the provider from config; incomplete credentials disable push
    /// rather than failing startup.
    pub fn from_config(push_cfg: &PushConfig) -> Option<Self> {
        if !push_cfg.enabled {
            return None;
        }
        let (Some(project_id), Some(client_email), Some(private_key)) = (
            push_cfg.project_id.clone(),
            push_cfg.client_email.clone(),
            push_cfg.private_key.clone(),
        ) else {
            warn!("push: incomplete service credentials; disabling push provider");
            return None;
        };
        if project_id.trim().is_empty() || client_email.trim().is_empty() {
            warn!("push: empty service identity; disabling push provider");
            return None;
        }

        Some(Self {
            http: reqwest::Client::new(),
            project_id,
            client_email,
            private_key,
            token_uri: push_cfg.token_uri.clone(),
            api_base: push_cfg.api_base.clone(),
        })
    }

    fn send_url(&self) -> String {
        format!(
            "{}/projects/{}/messages:send",
            self.api_base.trim_end_matches('/'),
            self.project_id
        )
    }
}

#[async_trait]
impl MessagingProvider for FcmProvider {
    async fn exchange_credential(&self) -> Result<String, ProviderError> {
        let now = chrono::Utc::now().timestamp();
        let claims = assertion_claims(&self.client_email, &self.token_uri, now);
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| ProviderError::Signing(e.to_string()))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| ProviderError::Signing(e.to_string()))?;

        let res = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Exchange(format!("status {status}: {body}")));
        }
        let token: TokenResponse = res
            .json()
            .await
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;
        Ok(token.access_token)
    }

    async fn push(&self, bearer: &str, message: &OutboundMessage) -> Result<(), SendFailure> {
        let envelope = envelope(message);
        let res = self
            .http
            .post(self.send_url())
            .bearer_auth(bearer)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| SendFailure::Other(e.to_string()))?;
        let status = res.status();
        if status.is_success() {
            return Ok(());
        }
        let body = res.text().await.unwrap_or_default();
        Err(classify_send_error(status.as_u16(), &body))
    }
}

/// Maps a provider error response onto the permanent/transient split that
/// drives registry cleanup.
fn classify_send_error(status: u16, body: &str) -> SendFailure {
    if status == 404 || body.contains("UNREGISTERED") || body.contains("NOT_FOUND") {
        SendFailure::Unregistered
    } else {
        SendFailure::Other(format!("status {status}: {body}"))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

fn assertion_claims<'a>(client_email: &'a str, token_uri: &'a str, now: i64) -> AssertionClaims<'a> {
    AssertionClaims {
        iss: client_email,
        scope: MESSAGING_SCOPE,
        aud: token_uri,
        iat: now,
        exp: now + ASSERTION_TTL_SECS,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct MessageEnvelope<'a> {
    message: ProviderMessage<'a>,
}

#[derive(Debug, Serialize)]
struct ProviderMessage<'a> {
    token: &'a str,
    notification: NotificationBlock<'a>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    data: &'a HashMap<String, String>,
    android: AndroidHints<'a>,
    apns: ApnsHints<'a>,
}

#[derive(Debug, Serialize)]
struct NotificationBlock<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct AndroidHints<'a> {
    priority: &'a str,
    notification: AndroidNotificationHints<'a>,
}

#[derive(Debug, Serialize)]
struct AndroidNotificationHints<'a> {
    channel_id: &'a str,
    sound: &'a str,
}

#[derive(Debug, Serialize)]
struct ApnsHints<'a> {
    payload: ApnsPayload<'a>,
}

#[derive(Debug, Serialize)]
struct ApnsPayload<'a> {
    aps: Aps<'a>,
}

#[derive(Debug, Serialize)]
struct Aps<'a> {
    sound: &'a str,
    badge: u32,
}

fn envelope<'a>(message: &'a OutboundMessage) -> MessageEnvelope<'a> {
    MessageEnvelope {
        message: ProviderMessage {
            token: &message.token,
            notification: NotificationBlock {
                title: &message.title,
                body: &message.body,
            },
            data: &message.data,
            android: AndroidHints {
                priority: "HIGH",
                notification: AndroidNotificationHints {
                    channel_id: ANDROID_CHANNEL_ID,
                    sound: "default",
                },
            },
            apns: ApnsHints {
                payload: ApnsPayload {
                    aps: Aps {
                        sound: "default",
                        badge: 1,
                    },
                },
            },
        },
    }
}
