//! WP Synchro Migration Service
//! Web API Server

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wp_synchro_lib::api;
use wp_synchro_lib::db::{self, MySqlBackend, MySqlOptionStore};
use wp_synchro_lib::services::{AppState, LogNotifier, MigrationNotifier, SkipFilesSync, WebhookNotifier};
use wp_synchro_lib::settings::Settings;
use wp_synchro_lib::transport::HttpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wp_synchro=debug,wp_synchro_lib=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting WP Synchro server...");

    let settings = Settings::load().context("Failed to load settings")?;

    // 初始化数据库
    let pool = db::init_database(&settings)
        .await
        .context("Failed to initialize database")?;

    tracing::info!("Database initialized successfully");

    let transport = HttpTransport::new(
        Duration::from_secs(settings.request_timeout_secs),
        settings.remote_retries,
    )
    .context("Failed to build HTTP client")?;

    let notifier: Arc<dyn MigrationNotifier> = match &settings.webhook_url {
        Some(url) if !url.is_empty() => {
            tracing::info!("Migration results will be posted to {}", url);
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        _ => Arc::new(LogNotifier),
    };

    let port = settings.port;
    let state = AppState {
        settings: Arc::new(settings),
        store: Arc::new(MySqlOptionStore::new(pool.clone())),
        database: Arc::new(MySqlBackend::new(pool)),
        transport: Arc::new(transport),
        files: Arc::new(SkipFilesSync),
        notifier,
        run_guard: Arc::new(tokio::sync::Mutex::new(())),
    };

    let app = api::create_router(state);

    // 服务器监听地址
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Service available at http://{}/wpsynchro", addr);

    // 启动服务器
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
