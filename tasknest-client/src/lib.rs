use std::sync::Arc;

use tracing::{info, warn};

pub mod bridge;
pub mod cli;
pub mod config;
pub mod login;
pub mod registration;
pub mod schedule;

pub use cli::{Cli, Command};
pub use config::{ClientConfig, load_config, resolve_config_path};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("keyring error: {0}")]
    Keyring(String),
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn keyring_entry(server_url: &str) -> Result<keyring::Entry, AppError> {
    let service = "tasknest-client";
    keyring::Entry::new(service, &crate::config::normalize_server_url(server_url))
        .map_err(|e| AppError::Keyring(e.to_string()))
}

fn read_token_from_keyring(server_url: &str) -> Result<String, AppError> {
    let entry = keyring_entry(server_url)?;
    entry
        .get_password()
        .map_err(|e| AppError::Keyring(e.to_string()))
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    init_tracing();

    if let Some(cmd) = &cli.command {
        match cmd {
            Command::Login { server, username } => {
                return login::login(server.clone(), username.clone(), cli.config.clone()).await;
            }
            Command::SignOut => {
                return login::sign_out(cli.config.clone()).await;
            }
        }
    }

    let (cfg_path, cfg) = ClientConfig::find_and_load(cli.config)?;
    info!(path=?cfg_path, "loaded config");

    let bearer = read_token_from_keyring(&cfg.server_url)?;

    // Capability descriptor is resolved exactly once per process and handed
    // to everything that needs it.
    let capability = bridge::Capability::detect();
    let push_bridge = bridge::select(&capability)?;

    let registry = Arc::new(registration::RestRegistry::new(
        config::normalize_server_url(&cfg.server_url),
        cfg.household_id.clone(),
        bearer,
    ));
    let registrar = registration::Registrar::new(capability, push_bridge.clone(), registry);
    registrar.initialize(&cfg.member_id).await;

    // Mirror the cached task list into device-local notifications.
    let scheduler = schedule::LocalScheduler::new(push_bridge.clone());
    match config::load_task_cache(&cfg.task_cache_path()?) {
        Ok(tasks) => {
            info!(count = tasks.len(), "scheduling local notifications from task cache");
            for task in &tasks {
                if task.completed {
                    scheduler.cancel(&task.id).await;
                    continue;
                }
                scheduler
                    .schedule_reminder(&task.id, &task.title, &task.details, task.due_date)
                    .await;
                scheduler
                    .schedule_advance(&task.id, &task.title, task.due_date, task.difficulty)
                    .await;
            }
        }
        Err(e) => {
            // A missing cache only means no local reminders yet.
            info!(error=%e, "no usable task cache; skipping local scheduling");
        }
    }

    // Surface notification taps until we are asked to stop.
    let mut app_events = registrar.app_events();
    let events_task = tokio::spawn(async move {
        loop {
            match app_events.recv().await {
                Ok(registration::AppEvent::OpenReminder { task_id, action }) => {
                    info!(%task_id, %action, "notification tapped; opening task");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed=%n, "app event subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received");
    events_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("listen SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("listen SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {
                info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown: received Ctrl+C");
    }
}
