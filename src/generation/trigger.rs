use std::sync::Arc;

use crate::config::ProgressionConfig;
use crate::generation::prompt::GenerationRequest;
use crate::generation::synthesis::SynthesisPipeline;
use crate::generation::GenerationError;
use crate::progression::{level, weak_topics};
use crate::store::operations::content::UnitDraft;
use crate::store::Store;
use crate::workers::content_generation::GenerationJob;

pub const DEFAULT_THEME: &str = "General English";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Enough unfinished material; nothing generated.
    Sufficient { pending: usize },
    Generated { unit_id: u64, lesson_ids: Vec<u64> },
}

/// Decides whether a learner's active course needs a fresh unit and, if so,
/// runs one synthesis batch into a brand-new unit.
pub struct GenerationTrigger {
    store: Arc<Store>,
    pipeline: SynthesisPipeline,
    pending_threshold: usize,
    weak_topic_window: usize,
}

impl GenerationTrigger {
    pub fn new(store: Arc<Store>, pipeline: SynthesisPipeline, config: &ProgressionConfig) -> Self {
        Self {
            store,
            pipeline,
            pending_threshold: config.pending_lesson_threshold,
            weak_topic_window: config.weak_topic_window,
        }
    }

    pub async fn run(&self, job: &GenerationJob) -> Result<TriggerOutcome, GenerationError> {
        let progress = self
            .store
            .get_user_progress(&job.user_id)?
            .ok_or_else(|| GenerationError::MissingContext(format!("no progress for user {}", job.user_id)))?;
        if self.store.get_course(job.course_id)?.is_none() {
            return Err(GenerationError::MissingContext(format!(
                "course {} does not exist",
                job.course_id
            )));
        }

        let pending = self.store.count_pending_lessons(&job.user_id, job.course_id)?;
        if pending >= self.pending_threshold {
            return Ok(TriggerOutcome::Sufficient { pending });
        }

        let current_level = level::canonical(&progress.proficiency_level);
        let recent = self
            .store
            .recent_performance_records(&job.user_id, self.weak_topic_window)?;
        let weak_tags = weak_topics::detect_weak_tags(&recent);
        let theme = self
            .store
            .latest_unit(job.course_id)?
            .map(|unit| unit.subject.unwrap_or(unit.title))
            .unwrap_or_else(|| DEFAULT_THEME.to_string());
        let unit_number = self.store.next_unit_order(job.course_id)?;

        let unit = UnitDraft {
            title: format!("Level {} - Unit {unit_number}", level::band_of(&current_level)),
            description: Some(format!("Generated content for level {current_level}")),
            subject: Some(theme.clone()),
            proficiency_level: Some(current_level.clone()),
            order: None,
            lessons: Vec::new(),
        };

        tracing::info!(
            user_id = %job.user_id,
            course_id = job.course_id,
            pending,
            level = %current_level,
            theme = %theme,
            weak_tags = weak_tags.len(),
            "Generating new unit"
        );

        let request = GenerationRequest::new(&current_level, &theme, weak_tags);
        let inserted = self
            .pipeline
            .run(job.course_id, &unit, &request)
            .await?;

        Ok(TriggerOutcome::Generated {
            unit_id: inserted.unit_id,
            lesson_ids: inserted.lesson_ids,
        })
    }
}
