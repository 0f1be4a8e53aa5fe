use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use renamer_api::router::build_app_router;
use renamer_api::state::AppState;
use renamer_events::{HistoryStore, NoopHistory, ProgressBus, RedisHistory};
use renamer_pipeline::{HttpSuggester, JobRunner};
use renamer_storage::{S3Config, S3Store};
use renamer_worker::config::WorkerConfig;
use renamer_worker::consumer::QueueConsumer;
use renamer_worker::queue::{SqsConfig, SqsQueue};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "renamer_worker=debug,renamer_pipeline=debug,renamer_events=info,tower_http=info";

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        queue_url = %config.queue_url,
        input_bucket = %config.input_bucket,
        output_bucket = %config.output_bucket,
        concurrency = ?config.concurrency,
        "Loaded worker configuration",
    );

    // --- Object stores ---
    let images = Arc::new(
        S3Store::connect(S3Config {
            bucket: config.input_bucket.clone(),
            region: config.aws_region.clone(),
            endpoint: config.s3_endpoint.clone(),
        })
        .await,
    );
    let manifests = Arc::new(
        S3Store::connect(S3Config {
            bucket: config.output_bucket.clone(),
            region: config.aws_region.clone(),
            endpoint: config.s3_endpoint.clone(),
        })
        .await,
    );

    // --- Progress bus ---
    let history: Arc<dyn HistoryStore> = match &config.redis_url {
        Some(url) => match RedisHistory::connect(url, config.history).await {
            Ok(store) => {
                tracing::info!("Progress history backed by Redis");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, progress history disabled");
                Arc::new(NoopHistory)
            }
        },
        None => {
            tracing::info!("REDIS_URL not set, progress history disabled");
            Arc::new(NoopHistory)
        }
    };
    let bus = Arc::new(ProgressBus::new(history).with_replay_limit(config.history.max_events));

    // --- Job runner ---
    let suggester = Arc::new(HttpSuggester::new(config.suggester_config()));
    let runner = Arc::new(JobRunner::new(
        images,
        manifests,
        suggester,
        Arc::clone(&bus),
        config.runner_config(),
    ));

    // --- Queue consumer ---
    let queue = Arc::new(
        SqsQueue::connect(SqsConfig {
            region: config.aws_region.clone(),
            queue_url: config.queue_url.clone(),
            dead_letter_url: config.dead_letter_queue_url.clone(),
            endpoint: config.sqs_endpoint.clone(),
        })
        .await,
    );
    let consumer = QueueConsumer::new(queue, runner, config.consumer_config());

    let cancel = CancellationToken::new();
    let consumer_cancel = cancel.clone();
    let consumer_handle = tokio::spawn(async move {
        consumer.run(consumer_cancel).await;
    });

    // --- Progress API ---
    let api_handle = if config.progress_api_enabled {
        let addr = SocketAddr::new(
            config.api.host.parse().context("Invalid HOST address")?,
            config.api.port,
        );
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {addr}"))?;
        tracing::info!(%addr, "Progress API listening");

        let app = build_app_router(AppState::new(Arc::clone(&bus), config.api.clone()));
        let api_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { api_cancel.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Progress API server error");
            }
        }))
    } else {
        tracing::info!("Progress API disabled");
        None
    };

    shutdown_signal().await;
    cancel.cancel();

    // --- Drain ---
    tracing::info!(
        timeout_secs = config.shutdown_timeout.as_secs(),
        "Waiting for in-flight work to finish",
    );
    let drain = async {
        let _ = consumer_handle.await;
        if let Some(handle) = api_handle {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        tracing::warn!("Shutdown timeout elapsed, abandoning in-flight work");
    } else {
        tracing::info!("Graceful shutdown complete");
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
