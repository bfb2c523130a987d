use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue};
use progression_backend::config::Config;
use progression_backend::events;
use progression_backend::generation::{GenerationTrigger, SynthesisPipeline};
use progression_backend::logging::{init_tracing, LogConfig};
use progression_backend::progression::ProgressionEngine;
use progression_backend::routes::build_router;
use progression_backend::services::llm_provider::LlmProvider;
use progression_backend::state::AppState;
use progression_backend::store::Store;
use progression_backend::workers::content_generation::GenerationQueue;
use progression_backend::workers::WorkerManager;
use tokio::sync::broadcast;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

const HSTS_HEADER: &str = "max-age=31536000; includeSubDomains";

fn fatal(message: &str, error: impl std::fmt::Display) -> ! {
    tracing::error!(error = %error, "{message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    init_tracing(&LogConfig::from(&config));
    tracing::info!("Starting progression-backend");

    if let Err(e) = LlmProvider::validate_config(&config.llm) {
        fatal("Invalid generator configuration", e);
    }

    let store = match Store::open(&config.sled_path) {
        Ok(store) => Arc::new(store),
        Err(e) => fatal("Failed to open sled database", e),
    };
    if let Err(e) = store.run_migrations() {
        fatal("Failed to run migrations", e);
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(8);
    let invalidations = events::invalidation_bus();

    let (queue, receiver) = if config.worker.generation_enabled {
        let (queue, receiver) = GenerationQueue::channel(config.worker.queue_capacity);
        (queue, Some(receiver))
    } else {
        (GenerationQueue::disabled(), None)
    };

    let engine = Arc::new(ProgressionEngine::new(
        store.clone(),
        config.progression.clone(),
        queue,
        invalidations.clone(),
    ));

    let worker_handle = receiver.map(|receiver| {
        let pipeline = SynthesisPipeline::new(
            store.clone(),
            Arc::new(LlmProvider::new(&config.llm)),
            Duration::from_secs(config.llm.timeout_secs),
        );
        let trigger = Arc::new(GenerationTrigger::new(
            store.clone(),
            pipeline,
            &config.progression,
        ));
        let worker_manager =
            WorkerManager::new(trigger, receiver, shutdown_tx.subscribe(), &config.worker);
        tokio::spawn(worker_manager.start())
    });

    let state = AppState::new(
        store.clone(),
        engine,
        invalidations,
        &config,
        shutdown_tx.clone(),
    );

    let cors_layer = build_cors_layer(&config);

    let app = build_router(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("strict-transport-security"),
            HeaderValue::from_static(HSTS_HEADER),
        ));

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(%addr, "Listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => fatal("Failed to bind TCP listener", e),
    };

    let server_future = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()));

    if let Err(e) = server_future.await {
        tracing::error!(error = %e, "HTTP server crashed");
    }

    // 等待生成任务在 drain 窗口内提交，panic 仅记录
    let _ = shutdown_tx.send(());
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Generation worker panicked");
        }
    }

    tracing::info!("Flushing store before exit");
    if let Err(e) = store.flush() {
        tracing::error!(error = %e, "Failed to flush store before exit");
    }
    tracing::info!("Shutdown complete");
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origin.trim() == "*" {
        // 通配符模式仅用于开发环境，通配符与 credentials 互斥
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_credentials(false)
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
            .allow_methods(Any);
    }

    match config.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
            .allow_methods(Any),
        Err(e) => fatal(
            &format!("Invalid CORS_ORIGIN '{}'", config.cors_origin),
            e,
        ),
    }
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
