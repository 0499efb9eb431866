//! scrollcap-api - HTTP API server for scrollcap

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use governor::{Quota, RateLimiter};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use scrollcap_api::{AppState, GlobalRateLimiter};
use scrollcap_capture::{CaptureConfig, ChromiumEngine};
use scrollcap_core::{defaults, ArtifactStore, JobStore};
use scrollcap_store::{
    connect, FilesystemArtifacts, RedisJobStore, RedisLockManager, RedisNotifier,
    RedisSubscription,
};
use scrollcap_worker::{Dispatcher, WorkerConfig};

const HELP_STR: &str = "\
USAGE: scrollcap-api <command>
COMMANDS:
    help: Displays this message
    run: Runs the server
    clearcache: Clears all cached jobs and deletes their videos
";

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so IDs sort chronologically — useful for
/// log correlation and debugging production incidents.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    match std::env::args().nth(1).as_deref() {
        None | Some("run") => run().await,
        Some("clearcache") => clear_cache().await,
        _ => {
            print!("{HELP_STR}");
            Ok(())
        }
    }
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "scrollcap_api=debug,scrollcap_worker=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("scrollcap-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
        None
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

async fn run() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    // Configuration from environment
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| defaults::REDIS_URL.to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);
    let storage_path = std::env::var("VIDEO_STORAGE_PATH")
        .unwrap_or_else(|_| defaults::VIDEO_STORAGE_PATH.to_string());

    // Connect to the store
    info!("Connecting to Redis...");
    let conn = connect(&redis_url).await?;
    let store: Arc<dyn JobStore> = Arc::new(RedisJobStore::new(conn.clone()));
    let locks = Arc::new(RedisLockManager::new(conn.clone()));
    let notifier = Arc::new(RedisNotifier::new(conn));

    // Artifact storage
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(FilesystemArtifacts::new(&storage_path));
    tokio::fs::create_dir_all(&storage_path).await?;
    artifacts
        .validate()
        .await
        .map_err(|e| anyhow::anyhow!("artifact storage unusable: {e}"))?;
    info!("Artifact storage initialized at {}", storage_path);

    // Launch the capture engine. Failure here is fatal: without an engine
    // the dispatcher must not accept work.
    let engine = Arc::new(ChromiumEngine::launch(CaptureConfig::from_env()).await?);

    // Dispatcher
    let worker_config = WorkerConfig::from_env();
    let worker_enabled = worker_config.enabled;
    let dispatcher = Dispatcher::new(
        store.clone(),
        locks.clone(),
        engine,
        artifacts.clone(),
        worker_config,
    );

    let worker_handle = if worker_enabled {
        info!("Starting dispatcher...");
        let subscription = RedisSubscription::connect(&redis_url).await?;
        Some(dispatcher.start(Box::new(subscription)))
    } else {
        info!("Dispatcher disabled via WORKER_ENABLED=false");
        None
    };

    // Rate limiting
    let rate_limit_enabled: bool = std::env::var("RATE_LIMIT_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);
    let rate_limit_requests: u64 = std::env::var("RATE_LIMIT_REQUESTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::RATE_LIMIT_REQUESTS);
    let rate_limit_period_secs: u64 = std::env::var("RATE_LIMIT_PERIOD_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::RATE_LIMIT_PERIOD_SECS);

    let rate_limiter: Option<Arc<GlobalRateLimiter>> = if rate_limit_enabled {
        let per_second =
            (rate_limit_requests as f64 / rate_limit_period_secs as f64).ceil() as u32;
        let quota = Quota::per_second(NonZeroU32::new(per_second.max(1)).unwrap())
            .allow_burst(NonZeroU32::new(rate_limit_requests.max(1) as u32).unwrap());
        Some(Arc::new(RateLimiter::direct(quota)))
    } else {
        None
    };
    info!(
        enabled = rate_limit_enabled,
        requests = rate_limit_requests,
        period_secs = rate_limit_period_secs,
        "Rate limiting configured"
    );

    // CORS from environment, mirroring the store of allowed origins
    let cors = match std::env::var("CORS_ALLOW_ORIGINS") {
        Ok(origins) if origins != "*" => {
            let list: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(list))
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers(tower_http::cors::Any)
        }
        _ => CorsLayer::permissive(),
    };

    let state = AppState {
        store,
        locks,
        notifier,
        artifacts,
        rate_limiter,
        dispatcher: Some(dispatcher),
    };

    let app = scrollcap_api::router(state)
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7));

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = worker_handle {
        handle.shutdown().await.ok();
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    info!("Shutdown signal received");
}

/// `clearcache` subcommand: delete every job document and stored video.
async fn clear_cache() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| defaults::REDIS_URL.to_string());
    let storage_path = std::env::var("VIDEO_STORAGE_PATH")
        .unwrap_or_else(|_| defaults::VIDEO_STORAGE_PATH.to_string());

    let conn = connect(&redis_url).await?;
    let store = RedisJobStore::new(conn);
    let artifacts = FilesystemArtifacts::new(&storage_path);

    let jobs = store.clear().await?;
    let dirs = artifacts.clear().await?;

    println!("Deleted {jobs} cached jobs and {dirs} video directories");
    Ok(())
}
