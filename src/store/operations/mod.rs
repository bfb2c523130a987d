pub mod content;
pub mod performance;
pub mod progress;
pub mod subscriptions;
