use tasknest_server::{server, storage};
mod cli;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    use clap::Parser;
    let args = cli::Cli::parse();

    // Console-only logging with env-driven level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(true)
        .init();

    let config = match server::AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error=%e, "Failed to load config");
            std::process::exit(2);
        }
    };

    // Connect storage (SQLite via Diesel)
    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| "data/app.db".into());
    // Ensure data dir exists when using default
    if let Some(parent) = std::path::Path::new(&db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        let _ = std::fs::create_dir_all(parent);
    }
    let store = match storage::Store::connect_sqlite(&db_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error=%e, path=%db_path, "Failed to connect DB");
            std::process::exit(3);
        }
    };

    // Seed household members from config
    if let Err(e) = store.seed_from_config(&config.members).await {
        tracing::error!(error=%e, "Failed to seed DB");
        std::process::exit(4);
    }

    let provider = config
        .push
        .as_ref()
        .and_then(server::provider::FcmProvider::from_config)
        .map(|p| Arc::new(p) as Arc<dyn server::provider::MessagingProvider>);
    if provider.is_none() {
        tracing::warn!("push provider not configured; dispatch endpoints will answer 503");
    }

    if let Some(cli::Command::Scan) = args.command {
        run_scan_once(config, store, provider).await;
        return;
    }

    // Decide listen port: env PORT overrides config.listen_port, default 5151
    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .or(config.listen_port)
        .unwrap_or(5151);

    let state = server::AppState::new(config, store, provider);
    let app = server::router(state);

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind listener");

    let shutdown_token = tokio_util::sync::CancellationToken::new();
    let shutdown_token_for_server = shutdown_token.clone();

    // Graceful shutdown on SIGINT/SIGTERM with fallback timeout to force-close lingering connections
    let mut server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_token_for_server.cancelled_owned())
            .await
    });

    // Wait for OS signal; then trigger graceful, and if it hangs beyond timeout, force abort.
    shutdown_signal().await;
    tracing::info!("shutdown: initiating graceful stop");
    shutdown_token.cancel();
    match tokio::time::timeout(std::time::Duration::from_secs(3), &mut server_task).await {
        Ok(join_res) => match join_res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(%err, "server error"),
            Err(e) => tracing::error!(error=%e, "server task join error"),
        },
        Err(_) => {
            tracing::warn!("shutdown: forcing server abort due to timeout");
            server_task.abort();
        }
    }
}

async fn run_scan_once(
    config: server::AppConfig,
    store: storage::Store,
    provider: Option<Arc<dyn server::provider::MessagingProvider>>,
) {
    let Some(provider) = provider else {
        tracing::error!("scan requires configured push credentials");
        std::process::exit(5);
    };
    let dispatch = server::dispatch::DispatchService::new(provider);
    let tz = config.timezone();
    match server::scan::run(&store, &dispatch, tz).await {
        Ok(summary) => {
            let out = serde_json::json!({
                "success": true,
                "due_today_users": summary.due_today_users,
                "due_today_tasks": summary.due_today_tasks,
                "upcoming_users": summary.upcoming_users,
                "upcoming_tasks": summary.upcoming_tasks,
                "notifications_sent": summary.notifications_sent,
            });
            println!("{}", out);
        }
        Err(e) => {
            tracing::error!(error=%e, "due-task scan failed");
            std::process::exit(6);
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("listen SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("listen SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown: received Ctrl+C");
    }
}
