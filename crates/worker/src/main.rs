use std::net::SocketAddr;
use std::sync::Arc;

use connector_db::store::PgResourceStore;
use connector_docker::DockerRuntime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connector_worker::config::WorkerConfig;
use connector_worker::router::build_app_router;
use connector_worker::state::AppState;
use connector_worker::worker::{ConnectorWorker, DEFAULT_EVICTION_INTERVAL};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "connector_worker=debug,connector_docker=debug,connector_container=info,tower_http=debug"
                    .into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().expect("Invalid worker configuration");
    tracing::info!(
        host = %config.host,
        port = config.port,
        staging_root = %config.staging_root.display(),
        mount_kind = ?config.mount_kind,
        max_concurrent_activities = config.max_concurrent_activities,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = connector_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    connector_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    connector_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Container runtime ---
    let runtime = DockerRuntime::connect().expect("Failed to connect to Docker daemon");
    runtime.ping().await.expect("Docker daemon is not reachable");
    tracing::info!("Docker daemon reachable");

    // --- Worker ---
    let worker = Arc::new(ConnectorWorker::from_config(
        &config,
        Arc::new(PgResourceStore::new(pool)),
        Arc::new(runtime),
    ));
    let eviction_handle = worker.spawn_cache_eviction(DEFAULT_EVICTION_INTERVAL);
    tracing::info!("Connector worker started");

    // --- Router ---
    let state = AppState {
        worker: Arc::clone(&worker),
    };
    let app = build_app_router(state, config.request_timeout);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting run trigger server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting runs, draining worker");

    worker.shutdown(config.shutdown_timeout).await;

    let _ = tokio::time::timeout(config.shutdown_timeout, eviction_handle).await;
    tracing::info!("Dispatch cache eviction stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
