use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

use progression_backend::config::{Config, LLMConfig, ProgressionConfig, WorkerConfig};
use progression_backend::events;
use progression_backend::generation::{GenerationTrigger, SynthesisPipeline};
use progression_backend::progression::ProgressionEngine;
use progression_backend::routes::build_router;
use progression_backend::services::llm_provider::LlmProvider;
use progression_backend::state::AppState;
use progression_backend::store::Store;
use progression_backend::workers::content_generation::{
    GenerationJob, GenerationQueue, GenerationWorker,
};

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<Store>,
    pub config: Config,
    pub jobs: mpsc::Receiver<GenerationJob>,
    _temp_dir: TempDir,
}

impl TestApp {
    /// Worker over the same store, driven inline by the test.
    pub fn generation_worker(&self) -> GenerationWorker {
        let pipeline = SynthesisPipeline::new(
            self.store.clone(),
            Arc::new(LlmProvider::new(&self.config.llm)),
            Duration::from_secs(5),
        );
        let trigger = GenerationTrigger::new(self.store.clone(), pipeline, &self.config.progression);
        GenerationWorker::new(Arc::new(trigger), 1)
    }
}

pub fn test_config(sled_path: String, progression: ProgressionConfig) -> Config {
    // 直接构造 Config，避免使用 set_var 造成多线程测试环境变量竞态
    Config {
        host: std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
        port: 3000,
        log_level: "info".to_string(),
        enable_file_logs: false,
        log_dir: "./logs".to_string(),
        sled_path,
        jwt_secret: format!("integration-test-jwt-secret-{}", uuid::Uuid::new_v4()),
        admin_jwt_secret: format!("integration-test-admin-secret-{}", uuid::Uuid::new_v4()),
        cors_origin: "http://localhost:5173".to_string(),
        worker: WorkerConfig {
            generation_enabled: true,
            queue_capacity: 16,
            concurrency: 1,
        },
        llm: LLMConfig {
            enabled: true,
            mock: true,
            api_url: String::new(),
            api_key: String::new(),
            model: "mock".to_string(),
            max_tokens: 1000,
            timeout_secs: 5,
        },
        progression,
    }
}

pub async fn spawn_with_progression(progression: ProgressionConfig) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let sled_path = temp_dir.path().join("progression-test.sled");
    let config = test_config(sled_path.to_string_lossy().to_string(), progression);

    let store = Arc::new(Store::open(&config.sled_path).expect("open store"));
    store.run_migrations().expect("run migrations");

    let invalidations = events::invalidation_bus();
    let (queue, jobs) = GenerationQueue::channel(config.worker.queue_capacity);
    let engine = Arc::new(ProgressionEngine::new(
        store.clone(),
        config.progression.clone(),
        queue,
        invalidations.clone(),
    ));
    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    let state = AppState::new(store.clone(), engine, invalidations, &config, shutdown_tx);
    let app = build_router(state.clone());

    TestApp {
        app,
        state,
        store,
        config,
        jobs,
        _temp_dir: temp_dir,
    }
}

pub async fn spawn_test_app() -> TestApp {
    spawn_with_progression(ProgressionConfig::default()).await
}
