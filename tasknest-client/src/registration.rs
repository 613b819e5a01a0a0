//! Keeps the server-side token registry current for this device.
//!
//! Every failure in here degrades to "no push for this device": logged,
//! never surfaced to the user, never retried beyond the next app start.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use tasknest_shared::api::{self, DeviceRegisterReq};
use tasknest_shared::domain::DevicePlatform;

use crate::AppError;
use crate::bridge::{BridgeEvent, Capability, PermissionState, PushBridge};

/// How long to wait for the platform bridge before giving up silently.
const BRIDGE_READY_TIMEOUT: Duration = Duration::from_secs(2);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// In-process events surfaced to the UI layer.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The user tapped a notification; navigate to the task.
    OpenReminder { task_id: String, action: String },
}

/// Write access to the server token registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn upsert(
        &self,
        user_id: &str,
        token: &str,
        platform: DevicePlatform,
    ) -> Result<(), AppError>;

    async fn remove_all(&self, user_id: &str) -> Result<(), AppError>;
}

pub struct RestRegistry {
    server_url: String,
    household_id: String,
    bearer: String,
}

impl RestRegistry {
    pub fn new(server_url: String, household_id: String, bearer: String) -> Self {
        Self {
            server_url,
            household_id,
            bearer,
        }
    }
}

#[async_trait]
impl RegistryClient for RestRegistry {
    async fn upsert(
        &self,
        user_id: &str,
        token: &str,
        platform: DevicePlatform,
    ) -> Result<(), AppError> {
        api::rest::register_device(
            &self.server_url,
            &self.household_id,
            user_id,
            &self.bearer,
            &DeviceRegisterReq {
                token: token.to_string(),
                platform,
            },
        )
        .await
        .map_err(|e| AppError::Http(format!("token registration failed: {e}")))
    }

    async fn remove_all(&self, user_id: &str) -> Result<(), AppError> {
        api::rest::remove_devices(&self.server_url, &self.household_id, user_id, &self.bearer)
            .await
            .map_err(|e| AppError::Http(format!("token removal failed: {e}")))
    }
}

pub struct Registrar {
    capability: Capability,
    bridge: Arc<dyn PushBridge>,
    registry: Arc<dyn RegistryClient>,
    listeners_installed: AtomicBool,
    app_events: broadcast::Sender<AppEvent>,
    ready_timeout: Duration,
}

impl Registrar {
    pub fn new(
        capability: Capability,
        bridge: Arc<dyn PushBridge>,
        registry: Arc<dyn RegistryClient>,
    ) -> Self {
        Self::with_ready_timeout(capability, bridge, registry, BRIDGE_READY_TIMEOUT)
    }

    pub fn with_ready_timeout(
        capability: Capability,
        bridge: Arc<dyn PushBridge>,
        registry: Arc<dyn RegistryClient>,
        ready_timeout: Duration,
    ) -> Self {
        let (app_events, _) = broadcast::channel(16);
        Self {
            capability,
            bridge,
            registry,
            listeners_installed: AtomicBool::new(false),
            app_events,
            ready_timeout,
        }
    }

    pub fn app_events(&self) -> broadcast::Receiver<AppEvent> {
        self.app_events.subscribe()
    }

    /// Refreshes this device's registry entry. Runs on every app start and
    /// foreground; a host without push support, an unready bridge or a
    /// denied permission all make this a quiet no-op.
    pub async fn initialize(&self, user_id: &str) {
        if !self.capability.native {
            info!("push not supported on this host; skipping token registration");
            return;
        }

        if !self.wait_ready().await {
            info!("platform bridge not ready; skipping token registration");
            return;
        }

        if self.capability.platform == DevicePlatform::Android
            && let Err(e) = self.bridge.ensure_channel().await
        {
            warn!(error=%e, "failed to ensure notification channel");
        }

        let mut permission = self.bridge.permission().await;
        if permission == PermissionState::Undetermined {
            permission = self.bridge.request_permission().await;
        }
        if permission != PermissionState::Granted {
            info!("notification permission not granted; no token acquired");
            return;
        }

        self.install_listeners(user_id);

        // Always ask the platform for a fresh token: tokens rotate, and a
        // stale one is precisely the failure this refresh exists to prevent.
        if let Err(e) = self.bridge.request_token().await {
            warn!(error=%e, "push token request failed");
        }
    }

    /// Removes every registry row for the user (sign-out) and arms listener
    /// installation again for the next `initialize`.
    pub async fn remove_token(&self, user_id: &str) {
        if let Err(e) = self.registry.remove_all(user_id).await {
            warn!(error=%e, "failed to remove registered tokens");
        }
        self.listeners_installed.store(false, Ordering::SeqCst);
    }

    async fn wait_ready(&self) -> bool {
        let deadline = tokio::time::Instant::now() + self.ready_timeout;
        loop {
            if self.bridge.ready().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Exactly one listener set per process lifetime.
    fn install_listeners(&self, user_id: &str) {
        if self.listeners_installed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut rx = self.bridge.subscribe();
        let registry = self.registry.clone();
        let platform = self.capability.platform;
        let user = user_id.to_string();
        let app_events = self.app_events.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(BridgeEvent::TokenAcquired(token)) => {
                        match registry.upsert(&user, &token, platform).await {
                            Ok(()) => debug!("push token registered"),
                            Err(e) => warn!(error=%e, "push token registration failed"),
                        }
                    }
                    Ok(BridgeEvent::RegistrationError(msg)) => {
                        warn!(error=%msg, "platform token registration error");
                    }
                    Ok(BridgeEvent::ForegroundMessage { title, .. }) => {
                        debug!(%title, "push received in foreground");
                    }
                    Ok(BridgeEvent::NotificationTapped { payload }) => {
                        let Some(task_id) = payload.get("taskId") else {
                            debug!("tapped notification carried no task id");
                            continue;
                        };
                        let action = payload
                            .get("action")
                            .cloned()
                            .unwrap_or_else(|| "openReminder".to_string());
                        let _ = app_events.send(AppEvent::OpenReminder {
                            task_id: task_id.clone(),
                            action,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed=%n, "bridge event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
