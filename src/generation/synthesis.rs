use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::generation::prompt::{GenerationRequest, CHALLENGE_SEQUENCE, LESSONS_PER_BATCH};
use crate::generation::GenerationError;
use crate::progression::level;
use crate::services::llm_provider::{ContentGenerator, LlmError};
use crate::store::operations::content::{
    ChallengeDraft, ChallengeType, InsertedUnit, LessonDraft, OptionDraft, UnitDraft,
};
use crate::store::Store;

const DEFAULT_ESTIMATED_TIME_SECS: u32 = 30;

// Wire shape the generator is asked to produce.

#[derive(Debug, Deserialize)]
struct GeneratedBatch {
    lessons: Option<Vec<GeneratedLesson>>,
}

#[derive(Debug, Deserialize)]
struct GeneratedLesson {
    title: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    challenges: Vec<GeneratedChallenge>,
}

#[derive(Debug, Deserialize)]
struct GeneratedChallenge {
    #[serde(rename = "type")]
    kind: ChallengeType,
    question: String,
    #[serde(default)]
    level: Option<String>,
    #[serde(default, alias = "skillType")]
    skill_type: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, rename = "estimatedTimeSeconds")]
    estimated_time_seconds: Option<u32>,
    #[serde(default, alias = "choices")]
    options: Vec<GeneratedOption>,
}

#[derive(Debug, Deserialize)]
struct GeneratedOption {
    text: String,
    #[serde(default)]
    correct: bool,
    #[serde(default, rename = "matchGroup")]
    match_group: Option<u32>,
}

/// Drops markdown fences and any prose around the outermost JSON object.
pub fn strip_wrapping(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Parses generator output into lesson drafts. Anything but exactly
/// four lessons is malformed, as is a single-answer challenge whose options
/// do not mark exactly one correct answer. Levels are normalized onto the
/// ladder, with `fallback_level` filling gaps.
pub fn parse_batch(raw: &str, fallback_level: &str) -> Result<Vec<LessonDraft>, GenerationError> {
    let json = strip_wrapping(raw)
        .ok_or_else(|| GenerationError::Malformed("no JSON object in response".to_string()))?;
    let batch: GeneratedBatch = serde_json::from_str(json)
        .map_err(|e| GenerationError::Malformed(format!("invalid JSON: {e}")))?;
    let lessons = batch
        .lessons
        .ok_or_else(|| GenerationError::Malformed("missing lessons array".to_string()))?;
    if lessons.len() != LESSONS_PER_BATCH {
        return Err(GenerationError::Malformed(format!(
            "expected {LESSONS_PER_BATCH} lessons, got {}",
            lessons.len()
        )));
    }

    let fallback_level = level::canonical(fallback_level);
    lessons
        .into_iter()
        .map(|lesson| into_lesson_draft(lesson, &fallback_level))
        .collect()
}

fn check_answer_key(lesson: &str, challenge: &GeneratedChallenge) -> Result<(), GenerationError> {
    if !challenge.kind.is_single_answer() || challenge.options.is_empty() {
        return Ok(());
    }
    let correct = challenge.options.iter().filter(|o| o.correct).count();
    if correct != 1 {
        return Err(GenerationError::Malformed(format!(
            "{} challenge in lesson {lesson:?} has {correct} correct options",
            challenge.kind.as_str()
        )));
    }
    Ok(())
}

fn into_lesson_draft(
    lesson: GeneratedLesson,
    fallback_level: &str,
) -> Result<LessonDraft, GenerationError> {
    if lesson.challenges.len() != CHALLENGE_SEQUENCE.len() {
        tracing::warn!(
            title = %lesson.title,
            challenges = lesson.challenges.len(),
            expected = CHALLENGE_SEQUENCE.len(),
            "Generated lesson has unexpected challenge count"
        );
    }

    let lesson_level = lesson
        .level
        .as_deref()
        .map(level::canonical)
        .unwrap_or_else(|| fallback_level.to_string());

    for challenge in &lesson.challenges {
        check_answer_key(&lesson.title, challenge)?;
    }

    let challenges = lesson
        .challenges
        .into_iter()
        .enumerate()
        .map(|(index, challenge)| {
            let options = if challenge.options.is_empty() {
                // no options: the expected answer is the prompt itself
                vec![OptionDraft {
                    text: challenge.question.clone(),
                    correct: true,
                    match_group: None,
                    image_src: None,
                    audio_src: None,
                }]
            } else {
                challenge
                    .options
                    .into_iter()
                    .map(|o| OptionDraft {
                        text: o.text,
                        correct: o.correct,
                        match_group: o.match_group,
                        image_src: None,
                        audio_src: None,
                    })
                    .collect()
            };
            ChallengeDraft {
                kind: challenge.kind,
                question: challenge.question,
                order: Some(index as u32 + 1),
                proficiency_level: Some(
                    challenge
                        .level
                        .as_deref()
                        .map(level::canonical)
                        .unwrap_or_else(|| lesson_level.clone()),
                ),
                skill_type: challenge.skill_type,
                tags: challenge.tags,
                estimated_time_seconds: Some(
                    challenge
                        .estimated_time_seconds
                        .unwrap_or(DEFAULT_ESTIMATED_TIME_SECS),
                ),
                options,
            }
        })
        .collect();

    Ok(LessonDraft {
        title: lesson.title,
        subject: lesson.subject,
        proficiency_level: Some(lesson_level),
        tags: lesson.tags,
        order: None,
        challenges,
    })
}

/// One generation batch: external call, validation, transactional write.
pub struct SynthesisPipeline {
    store: Arc<Store>,
    generator: Arc<dyn ContentGenerator>,
    timeout: Duration,
}

impl SynthesisPipeline {
    pub fn new(store: Arc<Store>, generator: Arc<dyn ContentGenerator>, timeout: Duration) -> Self {
        Self {
            store,
            generator,
            timeout,
        }
    }

    pub async fn run(
        &self,
        course_id: u64,
        unit: &UnitDraft,
        request: &GenerationRequest,
    ) -> Result<InsertedUnit, GenerationError> {
        let raw = tokio::time::timeout(self.timeout, self.generator.generate(request))
            .await
            .map_err(|_| GenerationError::Generator(LlmError::Timeout))??;

        let lessons = parse_batch(&raw, &request.proficiency_level)?;
        let inserted = self
            .store
            .persist_generated_content(course_id, unit, &lessons)?;

        tracing::info!(
            course_id,
            unit_id = inserted.unit_id,
            lessons = inserted.lesson_ids.len(),
            level = %request.proficiency_level,
            "Generated content persisted"
        );
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tempfile::tempdir;

    use super::*;
    use crate::services::llm_provider::mock_batch_json;

    struct Canned(String);

    #[async_trait]
    impl ContentGenerator for Canned {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    fn batch_with_lessons(n: usize) -> String {
        let mut value: serde_json::Value =
            serde_json::from_str(&mock_batch_json("A2.1", "Travel")).unwrap();
        let lessons = value["lessons"].as_array_mut().unwrap();
        lessons.truncate(n);
        value.to_string()
    }

    #[test]
    fn strips_fences_and_prose() {
        let raw = "Sure! ```json\n{\"lessons\": []}\n``` hope it helps";
        assert_eq!(strip_wrapping(raw), Some("{\"lessons\": []}"));
        assert_eq!(strip_wrapping("no json here"), None);
    }

    #[test]
    fn parses_a_well_formed_batch() {
        let lessons = parse_batch(&mock_batch_json("B1.2", "Work"), "B1.2").unwrap();
        assert_eq!(lessons.len(), 4);
        for lesson in &lessons {
            assert_eq!(lesson.challenges.len(), 8);
            assert_eq!(lesson.proficiency_level.as_deref(), Some("B1.2"));
            let kinds: Vec<_> = lesson.challenges.iter().map(|c| c.kind).collect();
            assert_eq!(kinds, CHALLENGE_SEQUENCE.to_vec());
        }
    }

    #[test]
    fn wrong_lesson_count_is_malformed() {
        let err = parse_batch(&batch_with_lessons(3), "A2.1").unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(ref m) if m.contains("got 3")));
    }

    #[test]
    fn missing_lessons_is_malformed() {
        let err = parse_batch("{\"units\": []}", "A1.1").unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[test]
    fn choices_alias_invalid_levels_and_empty_options() {
        let raw = r#"{"lessons": [
            {"title": "a", "level": "A1.9", "challenges": [
                {"type": "SELECT", "question": "pick", "choices": [{"text": "x", "correct": true}]},
                {"type": "SPEAK", "question": "hello", "level": "Z1.1"}
            ]},
            {"title": "b", "challenges": []},
            {"title": "c", "challenges": []},
            {"title": "d", "challenges": []}
        ]}"#;
        let lessons = parse_batch(raw, "B1.1").unwrap();
        assert_eq!(lessons[0].proficiency_level.as_deref(), Some("A1.3"));
        assert_eq!(lessons[1].proficiency_level.as_deref(), Some("B1.1"));

        let select = &lessons[0].challenges[0];
        assert_eq!(select.options.len(), 1);
        assert_eq!(select.options[0].text, "x");
        assert_eq!(select.estimated_time_seconds, Some(30));

        let speak = &lessons[0].challenges[1];
        assert_eq!(speak.proficiency_level.as_deref(), Some("A1.1"));
        assert_eq!(speak.options.len(), 1);
        assert_eq!(speak.options[0].text, "hello");
        assert!(speak.options[0].correct);
        assert_eq!(speak.order, Some(2));
    }

    #[test]
    fn single_answer_challenges_need_exactly_one_correct_option() {
        let batch = |options: &str| {
            format!(
                r#"{{"lessons": [
                    {{"title": "a", "challenges": [{{"type": "SELECT", "question": "q", "options": {options}}}]}},
                    {{"title": "b", "challenges": []}},
                    {{"title": "c", "challenges": []}},
                    {{"title": "d", "challenges": []}}
                ]}}"#
            )
        };

        let none = batch(r#"[{"text": "x"}, {"text": "y"}]"#);
        assert!(matches!(parse_batch(&none, "A1.1"), Err(GenerationError::Malformed(_))));

        let two = batch(r#"[{"text": "x", "correct": true}, {"text": "y", "correct": true}]"#);
        let err = parse_batch(&two, "A1.1").unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(ref m) if m.contains("2 correct")));

        let one = batch(r#"[{"text": "x", "correct": true}, {"text": "y"}]"#);
        assert!(parse_batch(&one, "A1.1").is_ok());
    }

    #[test]
    fn matching_challenges_carry_grouped_pairs() {
        let raw = r#"{"lessons": [
            {"title": "a", "challenges": [{"type": "MATCH", "question": "pair up", "options": [
                {"text": "cat", "correct": true, "matchGroup": 1},
                {"text": "gato", "correct": true, "matchGroup": 1}
            ]}]},
            {"title": "b", "challenges": []},
            {"title": "c", "challenges": []},
            {"title": "d", "challenges": []}
        ]}"#;
        let lessons = parse_batch(raw, "A1.1").unwrap();
        assert_eq!(lessons[0].challenges[0].options.len(), 2);
    }

    #[tokio::test]
    async fn malformed_batch_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("synth").to_str().unwrap()).unwrap());
        let course = store.create_course("English", "/en.png", true).unwrap();
        let pipeline = SynthesisPipeline::new(
            store.clone(),
            Arc::new(Canned(batch_with_lessons(3))),
            Duration::from_secs(5),
        );

        let unit = UnitDraft {
            title: "Level A2 - Unit 1".to_string(),
            ..UnitDraft::default()
        };
        let err = pipeline
            .run(course.id, &unit, &GenerationRequest::new("A2.1", "Travel", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
        assert!(store.units.is_empty());
        assert!(store.lessons.is_empty());
        assert!(store.challenges.is_empty());
        assert!(store.challenge_options.is_empty());
        assert!(store.content_index.is_empty());
    }

    #[tokio::test]
    async fn well_formed_batch_is_persisted() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("synth-ok").to_str().unwrap()).unwrap());
        let course = store.create_course("English", "/en.png", true).unwrap();
        let pipeline = SynthesisPipeline::new(
            store.clone(),
            Arc::new(Canned(format!("```json\n{}\n```", mock_batch_json("A2.1", "Travel")))),
            Duration::from_secs(5),
        );
        let unit = UnitDraft {
            title: "Level A2 - Unit 1".to_string(),
            ..UnitDraft::default()
        };

        let inserted = pipeline
            .run(course.id, &unit, &GenerationRequest::new("A2.1", "Travel", vec![]))
            .await
            .unwrap();
        assert_eq!(inserted.lesson_ids.len(), 4);
        assert_eq!(store.challenges.len(), 32);
    }
}
