pub mod prompt;
pub mod synthesis;
pub mod trigger;

use thiserror::Error;

use crate::services::llm_provider::LlmError;
use crate::store::StoreError;

pub use prompt::GenerationRequest;
pub use synthesis::SynthesisPipeline;
pub use trigger::{GenerationTrigger, TriggerOutcome};

/// Background-path failures. Terminal for one invocation only; the next
/// qualifying answer triggers generation again.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("malformed generator output: {0}")]
    Malformed(String),
    #[error("content generator failed: {0}")]
    Generator(#[from] LlmError),
    #[error("generated batch not persisted: {0}")]
    Transaction(#[from] StoreError),
    #[error("missing generation context: {0}")]
    MissingContext(String),
}
