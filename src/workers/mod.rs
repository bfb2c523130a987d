pub mod content_generation;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::config::WorkerConfig;
use crate::generation::GenerationTrigger;

use content_generation::{GenerationJob, GenerationWorker};

/// Upper bound for one generation batch, external call included.
const WORKER_TIMEOUT: Duration = Duration::from_secs(300);

/// Drain period on shutdown to let in-flight batches commit.
#[cfg(test)]
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the background side of the service.
pub struct WorkerManager {
    trigger: Arc<GenerationTrigger>,
    receiver: mpsc::Receiver<GenerationJob>,
    shutdown_rx: broadcast::Receiver<()>,
    config: WorkerConfig,
}

impl WorkerManager {
    pub fn new(
        trigger: Arc<GenerationTrigger>,
        receiver: mpsc::Receiver<GenerationJob>,
        shutdown_rx: broadcast::Receiver<()>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            trigger,
            receiver,
            shutdown_rx,
            config: config.clone(),
        }
    }

    pub async fn start(self) {
        if !self.config.generation_enabled {
            tracing::info!("Content generation worker disabled; skipping startup");
            return;
        }
        tracing::info!(
            concurrency = self.config.concurrency,
            queue_capacity = self.config.queue_capacity,
            "Worker manager started"
        );
        GenerationWorker::new(self.trigger, self.config.concurrency)
            .run(self.receiver, self.shutdown_rx)
            .await;
    }
}
