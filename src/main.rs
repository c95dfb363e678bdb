//! Bibliotheque Server - library loan management
//!
//! Serves the REST API and runs the daily overdue-reminder sweep.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tokio::sync::watch;
use tower_http::{compression::CompressionLayer, cors::CorsLayer};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use bibliotheque_server::{
    api,
    config::{AppConfig, LoggingConfig},
    repository::{LoanStore, PgStore, Repository},
    services::{
        email,
        scheduler::{spawn_daily_sweep, DailySchedule},
        Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let _log_guard = init_tracing(&config.logging);

    tracing::info!("Starting Bibliotheque Server v{}", env!("CARGO_PKG_VERSION"));

    let store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    store.migrate().await.context("Failed to run database migrations")?;
    tracing::info!("Database migrations completed");

    let store = Arc::new(store);
    let repository = Repository::new(store.clone(), config.database.operation_timeout());

    let sender = email::sender_from_config(&config.email).context("Failed to set up email")?;
    let services = Services::new(repository.clone(), &config, sender);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = if config.reminders.enabled {
        let schedule = DailySchedule::new(config.reminders.hour, config.reminders.minute)
            .context("Invalid reminder schedule")?;
        Some(spawn_daily_sweep(services.reminders.clone(), schedule, shutdown_rx))
    } else {
        tracing::info!("Daily reminder sweep disabled");
        None
    };

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .server
                .client_url
                .parse::<HeaderValue>()
                .context("Invalid client URL")?,
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
        repository,
    };

    let app = api::router(state)
        .layer(CompressionLayer::new())
        .layer(cors);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            tracing::warn!("Reminder scheduler ended abnormally: {}", e);
        }
    }
    store.close().await;

    Ok(())
}

/// Console output (pretty or JSON) plus an optional daily-rolling log file
fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("bibliotheque_server={},tower_http=debug", logging.level).into()
        })
    };

    let console = if logging.format == "json" {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let (file, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "bibliotheque-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console.with_filter(filter()))
        .with(file)
        .init();

    guard
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
