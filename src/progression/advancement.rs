use std::collections::HashMap;

use crate::config::ProgressionConfig;
use crate::progression::level;
use crate::store::operations::performance::AnswerTally;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvancementRules {
    pub perfect_lessons: usize,
    pub fast_lessons: usize,
    pub fast_seconds_per_challenge: f64,
}

impl From<&ProgressionConfig> for AdvancementRules {
    fn from(config: &ProgressionConfig) -> Self {
        Self {
            perfect_lessons: config.advance_perfect_lessons,
            fast_lessons: config.advance_fast_lessons,
            fast_seconds_per_challenge: config.fast_seconds_per_challenge,
        }
    }
}

/// A lesson at the learner's current level, by its challenge ids.
#[derive(Debug, Clone)]
pub struct LessonEvidence {
    pub lesson_id: u64,
    pub challenge_ids: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Assessment {
    pub perfect: usize,
    pub fast: usize,
}

impl Assessment {
    pub fn qualifies(&self, rules: &AdvancementRules) -> bool {
        self.perfect >= rules.perfect_lessons && self.fast >= rules.fast_lessons
    }
}

/// Counts lessons answered with a clean history (every challenge answered
/// correctly at least once and never incorrectly) and, of those, the ones
/// whose mean time per timed correct answer is under the fast threshold.
/// Answers without a reported duration never count towards speed; a lesson
/// with no timed answer at all is not fast.
pub fn assess(
    lessons: &[LessonEvidence],
    tallies: &HashMap<u64, AnswerTally>,
    rules: &AdvancementRules,
) -> Assessment {
    let mut assessment = Assessment::default();
    for lesson in lessons {
        if lesson.challenge_ids.is_empty() {
            continue;
        }
        let mut timed = 0u64;
        let mut seconds = 0u64;
        let perfect = lesson.challenge_ids.iter().all(|id| match tallies.get(id) {
            Some(t) if t.correct > 0 && t.incorrect == 0 => {
                timed += t.timed_correct as u64;
                seconds += t.correct_seconds;
                true
            }
            _ => false,
        });
        if !perfect {
            continue;
        }
        assessment.perfect += 1;
        if timed > 0 && (seconds as f64 / timed as f64) < rules.fast_seconds_per_challenge {
            assessment.fast += 1;
        }
    }
    assessment
}

/// The level one rung above `current` when the assessment qualifies.
/// Never lower than `current`; saturates at the top of the ladder.
pub fn advance(current: &str, assessment: &Assessment, rules: &AdvancementRules) -> Option<String> {
    if !assessment.qualifies(rules) {
        return None;
    }
    // next_level climbs X.3 to the following band's .1 rather than holding at X.3
    let next = level::next_level(current);
    (level::to_tenths(level::decode(&next)) > level::to_tenths(level::decode(current))).then_some(next)
}
