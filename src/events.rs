use serde::Serialize;
use tokio::sync::broadcast;

/// Views whose cached rendering depends on a learner's progress.
pub const PROGRESS_VIEWS: [&str; 4] = ["/learn", "/lesson", "/quests", "/leaderboard"];

const BUS_CAPACITY: usize = 256;

/// Tells presentation layers which of one learner's views are stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewInvalidation {
    pub user_id: String,
    pub views: Vec<String>,
}

impl ViewInvalidation {
    pub fn after_answer(user_id: &str, lesson_id: u64) -> Self {
        let mut views: Vec<String> = PROGRESS_VIEWS.iter().map(|v| v.to_string()).collect();
        views.push(format!("/lesson/{lesson_id}"));
        Self {
            user_id: user_id.to_string(),
            views,
        }
    }

    /// Points and hearts both moved; the shop shows them too.
    pub fn after_refill(user_id: &str) -> Self {
        let mut views: Vec<String> = PROGRESS_VIEWS.iter().map(|v| v.to_string()).collect();
        views.push("/shop".to_string());
        Self {
            user_id: user_id.to_string(),
            views,
        }
    }
}

pub type InvalidationSender = broadcast::Sender<ViewInvalidation>;

pub fn invalidation_bus() -> InvalidationSender {
    broadcast::channel(BUS_CAPACITY).0
}

/// Publishing never fails the caller; no subscribers just means nobody is listening.
pub fn publish(bus: &InvalidationSender, event: ViewInvalidation) {
    let user_id = event.user_id.clone();
    match bus.send(event) {
        Ok(receivers) => tracing::debug!(user_id = %user_id, receivers, "Views invalidated"),
        Err(_) => tracing::trace!(user_id = %user_id, "No invalidation subscribers"),
    }
}
