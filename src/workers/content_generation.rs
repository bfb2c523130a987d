use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::generation::{GenerationTrigger, TriggerOutcome};

use super::{DRAIN_TIMEOUT, WORKER_TIMEOUT};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationJob {
    pub user_id: String,
    pub course_id: u64,
}

/// Producer side of the generation queue. Never blocks: a full or closed
/// queue drops the job, and the next qualifying answer enqueues it again.
#[derive(Debug, Clone)]
pub struct GenerationQueue {
    sender: Option<mpsc::Sender<GenerationJob>>,
}

impl GenerationQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<GenerationJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn enqueue(&self, job: GenerationJob) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(user_id = %job.user_id, course_id = job.course_id, "Generation queue full, job dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::debug!(user_id = %job.user_id, course_id = job.course_id, "Generation queue closed, job dropped");
                false
            }
        }
    }
}

type JobLocks = Arc<Mutex<HashMap<(String, u64), Arc<Mutex<()>>>>>;

/// Consumer side: runs jobs as detached tasks bounded by a semaphore, with at
/// most one batch in flight per (user, course).
pub struct GenerationWorker {
    trigger: Arc<GenerationTrigger>,
    permits: Arc<Semaphore>,
    locks: JobLocks,
    job_timeout: Duration,
}

impl GenerationWorker {
    pub fn new(trigger: Arc<GenerationTrigger>, concurrency: usize) -> Self {
        Self {
            trigger,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            locks: Arc::new(Mutex::new(HashMap::new())),
            job_timeout: WORKER_TIMEOUT,
        }
    }

    pub async fn run(
        self,
        mut receiver: mpsc::Receiver<GenerationJob>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        tracing::info!("Generation worker started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                job = receiver.recv() => match job {
                    Some(job) => self.dispatch(job, &mut tasks).await,
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Generation task panicked");
                    }
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "Generation worker draining");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = tasks.len(), "Drain timed out, aborting generation tasks");
            tasks.abort_all();
        }
        tracing::info!("Generation worker stopped");
    }

    async fn job_lock(&self, job: &GenerationJob) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        if locks.len() > 1000 {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks
            .entry((job.user_id.clone(), job.course_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn dispatch(&self, job: GenerationJob, tasks: &mut JoinSet<()>) {
        let lock = self.job_lock(&job).await;
        let Ok(guard) = lock.try_lock_owned() else {
            tracing::debug!(user_id = %job.user_id, course_id = job.course_id, "Generation already running, job skipped");
            return;
        };

        let trigger = self.trigger.clone();
        let permits = self.permits.clone();
        let timeout = self.job_timeout;
        tasks.spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            process(&trigger, &job, timeout).await;
        });
    }

    /// Runs one job inline under the same per-pair guard. Returns `None` when
    /// another batch for the pair is in flight or the job failed.
    pub async fn process_now(&self, job: &GenerationJob) -> Option<TriggerOutcome> {
        let lock = self.job_lock(job).await;
        let _guard = lock.try_lock_owned().ok()?;
        let _permit = self.permits.clone().acquire_owned().await.ok()?;
        process(&self.trigger, job, self.job_timeout).await
    }
}

async fn process(
    trigger: &GenerationTrigger,
    job: &GenerationJob,
    timeout: Duration,
) -> Option<TriggerOutcome> {
    match tokio::time::timeout(timeout, trigger.run(job)).await {
        Ok(Ok(outcome)) => {
            match &outcome {
                TriggerOutcome::Sufficient { pending } => {
                    tracing::debug!(user_id = %job.user_id, course_id = job.course_id, pending, "Enough pending lessons")
                }
                TriggerOutcome::Generated { unit_id, lesson_ids } => tracing::info!(
                    user_id = %job.user_id,
                    course_id = job.course_id,
                    unit_id,
                    lessons = lesson_ids.len(),
                    "Generation batch complete"
                ),
            }
            Some(outcome)
        }
        Ok(Err(e)) => {
            tracing::warn!(user_id = %job.user_id, course_id = job.course_id, error = %e, "Content generation failed");
            None
        }
        Err(_) => {
            tracing::warn!(
                user_id = %job.user_id,
                course_id = job.course_id,
                timeout_secs = timeout.as_secs(),
                "Content generation timed out"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::*;
    use crate::config::{LLMConfig, ProgressionConfig};
    use crate::generation::SynthesisPipeline;
    use crate::services::llm_provider::LlmProvider;
    use crate::store::Store;

    fn worker(store: Arc<Store>) -> GenerationWorker {
        let llm = LLMConfig {
            enabled: true,
            mock: true,
            api_url: String::new(),
            api_key: String::new(),
            model: "mock".to_string(),
            max_tokens: 100,
            timeout_secs: 1,
        };
        let pipeline = SynthesisPipeline::new(
            store.clone(),
            Arc::new(LlmProvider::new(&llm)),
            Duration::from_secs(5),
        );
        let trigger = GenerationTrigger::new(store, pipeline, &ProgressionConfig::default());
        GenerationWorker::new(Arc::new(trigger), 2)
    }

    #[test]
    fn full_queue_drops_jobs() {
        let (queue, _rx) = GenerationQueue::channel(1);
        let job = GenerationJob {
            user_id: "u1".to_string(),
            course_id: 1,
        };
        assert!(queue.enqueue(job.clone()));
        assert!(!queue.enqueue(job));
    }

    #[test]
    fn disabled_queue_accepts_nothing() {
        assert!(!GenerationQueue::disabled().enqueue(GenerationJob {
            user_id: "u1".to_string(),
            course_id: 1,
        }));
    }

    #[tokio::test]
    async fn in_flight_pair_is_skipped() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("worker-lock").to_str().unwrap()).unwrap());
        let worker = worker(store);
        let job = GenerationJob {
            user_id: "u1".to_string(),
            course_id: 7,
        };

        let lock = worker.job_lock(&job).await;
        let _held = lock.try_lock_owned().unwrap();
        assert_eq!(worker.process_now(&job).await, None);
    }

    #[tokio::test]
    async fn worker_drains_queue_and_stops_on_shutdown() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("worker-run").to_str().unwrap()).unwrap());
        let course = store.create_course("English", "/en.png", true).unwrap();
        store.set_active_course("u1", course.id, 10, Utc::now()).unwrap();

        let (queue, rx) = GenerationQueue::channel(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(worker(store.clone()).run(rx, shutdown_rx));

        assert!(queue.enqueue(GenerationJob {
            user_id: "u1".to_string(),
            course_id: course.id,
        }));

        for _ in 0..100 {
            if store.list_units(course.id).unwrap().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.list_units(course.id).unwrap().len(), 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
