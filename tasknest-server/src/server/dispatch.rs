use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use tasknest_shared::domain::DevicePlatform;

use crate::storage::{Store, StorageError};

use super::provider::{MessagingProvider, OutboundMessage, ProviderError, SendFailure};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no recipients given")]
    NoRecipients,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Outcome counters of one dispatch invocation.
///
/// `sent + failed == total_tokens` and `cleaned <= failed`: a permanently
/// dead token counts as a failure *and* as a cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub sent: usize,
    pub failed: usize,
    pub cleaned: usize,
    pub total_tokens: usize,
}

/// Delivers one message to every device of a set of users and prunes tokens
/// the provider reports as gone.
#[derive(Clone)]
pub struct DispatchService {
    provider: Arc<dyn MessagingProvider>,
}

impl DispatchService {
    pub fn new(provider: Arc<dyn MessagingProvider>) -> Self {
        Self { provider }
    }

    /// One delivery attempt per registered token of `user_ids`. Users without
    /// tokens contribute nothing; zero tokens overall short-circuits before
    /// any provider traffic, including the credential exchange.
    pub async fn send(
        &self,
        store: &Store,
        user_ids: &[String],
        title: &str,
        body: &str,
        data: Option<&HashMap<String, String>>,
    ) -> Result<DeliverySummary, DispatchError> {
        if user_ids.is_empty() {
            return Err(DispatchError::NoRecipients);
        }

        let tokens = store.list_device_tokens_for_users(user_ids).await?;
        let mut summary = DeliverySummary {
            total_tokens: tokens.len(),
            ..Default::default()
        };
        if tokens.is_empty() {
            debug!(users = user_ids.len(), "dispatch: no registered devices");
            return Ok(summary);
        }

        // One exchange, N sends.
        let bearer = self.provider.exchange_credential().await?;

        for row in tokens {
            let platform = DevicePlatform::from_str(&row.platform).unwrap_or_else(|_| {
                warn!(user_id = %row.user_id, platform = %row.platform, "unknown platform in registry");
                DevicePlatform::Web
            });
            let message = OutboundMessage {
                token: row.token.clone(),
                platform,
                title: title.to_string(),
                body: body.to_string(),
                data: data.cloned().unwrap_or_default(),
            };
            match self.provider.push(&bearer, &message).await {
                Ok(()) => {
                    summary.sent += 1;
                }
                Err(SendFailure::Unregistered) => {
                    summary.failed += 1;
                    info!(user_id = %row.user_id, "push: token unregistered; pruning");
                    match store.delete_device_token(&row.token).await {
                        Ok(_) => summary.cleaned += 1,
                        Err(e) => {
                            warn!(user_id = %row.user_id, error = %e, "push: failed to prune dead token");
                        }
                    }
                }
                Err(SendFailure::Other(msg)) => {
                    summary.failed += 1;
                    warn!(user_id = %row.user_id, error = %msg, "push: send attempt failed");
                }
            }
        }

        info!(
            sent = summary.sent,
            failed = summary.failed,
            cleaned = summary.cleaned,
            total = summary.total_tokens,
            "dispatch complete"
        );
        Ok(summary)
    }
}

/// Dispatch that never propagates: failures are logged and reported as an
/// empty summary. Used wherever a notification is a side effect of a domain
/// action that must not be blocked by delivery problems.
#[derive(Clone)]
pub struct BestEffortDispatch {
    dispatch: DispatchService,
    store: Store,
}

impl BestEffortDispatch {
    pub fn new(dispatch: DispatchService, store: Store) -> Self {
        Self { dispatch, store }
    }

    pub async fn send(
        &self,
        user_ids: &[String],
        title: &str,
        body: &str,
        data: Option<&HashMap<String, String>>,
    ) -> DeliverySummary {
        match self
            .dispatch
            .send(&self.store, user_ids, title, body, data)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "best-effort dispatch failed");
                DeliverySummary::default()
            }
        }
    }
}
