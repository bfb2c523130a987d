pub mod advancement;
pub mod level;
pub mod orchestrator;
pub mod quests;
pub mod streak;
pub mod weak_topics;

use thiserror::Error;

use crate::store::StoreError;

pub use orchestrator::{CompletionOutcome, MissOutcome, ProgressionEngine, RefillOutcome};

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: entity={entity}, key={key}")]
    NotFound { entity: String, key: String },
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl ProgressError {
    pub fn not_found(entity: &str, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<StoreError> for ProgressError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity, key } => Self::NotFound { entity, key },
            other => Self::Store(other),
        }
    }
}
