//! Platform push/notification bridge.
//!
//! The bridge is the only place that touches the host notification stack.
//! A [`Capability`] descriptor is resolved once at startup and decides which
//! implementation is selected: [`DesktopBridge`] on hosts with notification
//! support, [`NullBridge`] everywhere else. Callers never probe the platform
//! themselves.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use tasknest_shared::domain::DevicePlatform;

use crate::AppError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("notification backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Undetermined,
}

/// Events the platform layer pushes back into the app.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    TokenAcquired(String),
    RegistrationError(String),
    ForegroundMessage { title: String, body: String },
    NotificationTapped { payload: HashMap<String, String> },
}

/// What the current host can do, resolved once at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub native: bool,
    pub platform: DevicePlatform,
}

impl Capability {
    /// Desktop builds always have a local notification stack; they register
    /// in the web token class.
    pub fn detect() -> Self {
        Capability {
            native: true,
            platform: DevicePlatform::Web,
        }
    }

    /// A host without any push support (CI, headless embeddings).
    pub fn none() -> Self {
        Capability {
            native: false,
            platform: DevicePlatform::Web,
        }
    }
}

/// One entry in the device-local notification store.
#[derive(Debug, Clone)]
pub struct LocalNotification {
    pub id: u32,
    pub fire_at: DateTime<Local>,
    pub title: String,
    pub body: String,
    pub payload: HashMap<String, String>,
}

#[async_trait]
pub trait PushBridge: Send + Sync {
    /// True once the platform messaging layer is usable.
    async fn ready(&self) -> bool;

    /// Idempotently creates the default notification channel (a no-op on
    /// hosts without channels).
    async fn ensure_channel(&self) -> Result<(), BridgeError>;

    async fn permission(&self) -> PermissionState;
    async fn request_permission(&self) -> PermissionState;

    /// Asks the platform for a fresh push token. The token arrives through
    /// [`BridgeEvent::TokenAcquired`], never as a cached return value.
    async fn request_token(&self) -> Result<(), BridgeError>;

    fn subscribe(&self) -> broadcast::Receiver<BridgeEvent>;

    /// Schedules (or replaces, by id) a local notification.
    async fn schedule(&self, notification: LocalNotification) -> Result<(), BridgeError>;

    /// Cancels a scheduled local notification; unknown ids are a no-op.
    async fn cancel(&self, id: u32) -> Result<(), BridgeError>;
}

pub fn select(capability: &Capability) -> Result<Arc<dyn PushBridge>, AppError> {
    if !capability.native {
        info!("no native push support; using null bridge");
        return Ok(Arc::new(NullBridge::new()));
    }
    let token_path = default_token_path()
        .ok_or_else(|| AppError::Config("could not determine data dir".into()))?;
    Ok(Arc::new(DesktopBridge::new(token_path)))
}

fn default_token_path() -> Option<PathBuf> {
    let pd = directories::ProjectDirs::from("dev", "tasknest", "tasknest")?;
    Some(pd.data_dir().join("push-token"))
}

/// Bridge for desktop hosts: local notifications through the OS notification
/// daemon, and a per-install token persisted on disk standing in for the
/// platform push service.
pub struct DesktopBridge {
    token_path: PathBuf,
    events: broadcast::Sender<BridgeEvent>,
    scheduled: Mutex<HashMap<u32, tokio::task::JoinHandle<()>>>,
}

impl DesktopBridge {
    pub fn new(token_path: PathBuf) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            token_path,
            events,
            scheduled: Mutex::new(HashMap::new()),
        }
    }

    fn load_or_create_token(&self) -> Result<String, BridgeError> {
        if let Ok(existing) = std::fs::read_to_string(&self.token_path) {
            let existing = existing.trim();
            if !existing.is_empty() {
                return Ok(existing.to_string());
            }
        }
        let token = uuid::Uuid::new_v4().simple().to_string();
        if let Some(parent) = self.token_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.token_path, &token)?;
        Ok(token)
    }
}

#[async_trait]
impl PushBridge for DesktopBridge {
    async fn ready(&self) -> bool {
        true
    }

    async fn ensure_channel(&self) -> Result<(), BridgeError> {
        // Channels are an Android concept; nothing to create here.
        Ok(())
    }

    async fn permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn request_permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn request_token(&self) -> Result<(), BridgeError> {
        match self.load_or_create_token() {
            Ok(token) => {
                let _ = self.events.send(BridgeEvent::TokenAcquired(token));
                Ok(())
            }
            Err(e) => {
                let _ = self
                    .events
                    .send(BridgeEvent::RegistrationError(e.to_string()));
                Err(e)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    async fn schedule(&self, notification: LocalNotification) -> Result<(), BridgeError> {
        let mut scheduled = self.scheduled.lock().await;
        // Same id replaces the pending entry
        if let Some(old) = scheduled.remove(&notification.id) {
            old.abort();
        }
        let delay = (notification.fire_at - Local::now())
            .to_std()
            .unwrap_or_default();
        debug!(
            id = notification.id,
            delay_secs = delay.as_secs(),
            "scheduling local notification"
        );
        let id = notification.id;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            show_notification(id, &notification.title, &notification.body).await;
        });
        scheduled.insert(id, handle);
        Ok(())
    }

    async fn cancel(&self, id: u32) -> Result<(), BridgeError> {
        let mut scheduled = self.scheduled.lock().await;
        if let Some(handle) = scheduled.remove(&id) {
            handle.abort();
            debug!(id, "canceled local notification");
        }
        Ok(())
    }
}

#[cfg(not(target_os = "windows"))]
async fn show_notification(id: u32, title: &str, body: &str) {
    let mut n = notify_rust::Notification::new();
    let res = n
        .appname("TaskNest")
        .summary(title)
        .body(body)
        .id(id)
        .show_async()
        .await;
    match res {
        Ok(_) => debug!(id, "local notification shown"),
        Err(e) => {
            warn!(error=%e, "notify backend failed; logging instead");
            info!("[REMINDER] {}: {}", title, body);
        }
    }
}

#[cfg(target_os = "windows")]
async fn show_notification(_id: u32, title: &str, body: &str) {
    info!("[REMINDER] {}: {}", title, body);
}

/// No-op bridge for hosts without push support. Everything silently degrades
/// to "no notifications for this device".
pub struct NullBridge {
    events: broadcast::Sender<BridgeEvent>,
}

impl NullBridge {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

impl Default for NullBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushBridge for NullBridge {
    async fn ready(&self) -> bool {
        false
    }

    async fn ensure_channel(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn permission(&self) -> PermissionState {
        PermissionState::Denied
    }

    async fn request_permission(&self) -> PermissionState {
        PermissionState::Denied
    }

    async fn request_token(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    async fn schedule(&self, notification: LocalNotification) -> Result<(), BridgeError> {
        debug!(id = notification.id, "null bridge: schedule ignored");
        Ok(())
    }

    async fn cancel(&self, _id: u32) -> Result<(), BridgeError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted bridge recording every interaction.
    pub struct FakeBridge {
        pub ready: bool,
        pub permission: std::sync::Mutex<PermissionState>,
        pub events: broadcast::Sender<BridgeEvent>,
        pub subscribe_calls: AtomicUsize,
        pub token_requests: AtomicUsize,
        pub scheduled: std::sync::Mutex<Vec<LocalNotification>>,
        pub canceled: std::sync::Mutex<Vec<u32>>,
    }

    impl FakeBridge {
        pub fn new(ready: bool, permission: PermissionState) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                ready,
                permission: std::sync::Mutex::new(permission),
                events,
                subscribe_calls: AtomicUsize::new(0),
                token_requests: AtomicUsize::new(0),
                scheduled: std::sync::Mutex::new(Vec::new()),
                canceled: std::sync::Mutex::new(Vec::new()),
            })
        }

        pub fn emit(&self, event: BridgeEvent) {
            let _ = self.events.send(event);
        }
    }

    #[async_trait]
    impl PushBridge for FakeBridge {
        async fn ready(&self) -> bool {
            self.ready
        }

        async fn ensure_channel(&self) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn permission(&self) -> PermissionState {
            *self.permission.lock().unwrap()
        }

        async fn request_permission(&self) -> PermissionState {
            let mut state = self.permission.lock().unwrap();
            if *state == PermissionState::Undetermined {
                *state = PermissionState::Granted;
            }
            *state
        }

        async fn request_token(&self) -> Result<(), BridgeError> {
            self.token_requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            self.events.subscribe()
        }

        async fn schedule(&self, notification: LocalNotification) -> Result<(), BridgeError> {
            self.scheduled.lock().unwrap().push(notification);
            Ok(())
        }

        async fn cancel(&self, id: u32) -> Result<(), BridgeError> {
            self.canceled.lock().unwrap().push(id);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_token_is_stable_across_requests() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = DesktopBridge::new(dir.path().join("push-token"));
        let first = bridge.load_or_create_token().unwrap();
        let second = bridge.load_or_create_token().unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn desktop_token_rotates_when_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("push-token");
        let bridge = DesktopBridge::new(path.clone());
        let first = bridge.load_or_create_token().unwrap();
        std::fs::remove_file(&path).unwrap();
        let second = bridge.load_or_create_token().unwrap();
        assert_ne!(first, second);
    }
}
