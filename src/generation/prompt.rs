use crate::store::operations::content::ChallengeType;

pub const LESSONS_PER_BATCH: usize = 4;

/// Exercise sequence every generated lesson follows.
pub const CHALLENGE_SEQUENCE: [ChallengeType; 8] = [
    ChallengeType::Select,
    ChallengeType::Assist,
    ChallengeType::Speak,
    ChallengeType::Select,
    ChallengeType::Translate,
    ChallengeType::FillInBlank,
    ChallengeType::Speak,
    ChallengeType::Match,
];

pub const LEVEL_LADDER: &str =
    "A1.1, A1.2, A1.3, A2.1, A2.2, A2.3, B1.1, B1.2, B1.3, B2.1, B2.2, B2.3, C1.1, C1.2, C1.3";

/// One request to the content generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub proficiency_level: String,
    pub theme: String,
    pub weak_tags: Vec<String>,
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(proficiency_level: &str, theme: &str, weak_tags: Vec<String>) -> Self {
        let prompt = build_prompt(proficiency_level, theme, &weak_tags);
        Self {
            proficiency_level: proficiency_level.to_string(),
            theme: theme.to_string(),
            weak_tags,
            prompt,
        }
    }
}

fn sequence_line() -> String {
    CHALLENGE_SEQUENCE
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn build_prompt(level: &str, theme: &str, weak_tags: &[String]) -> String {
    let weak_section = if weak_tags.is_empty() {
        "No weak areas identified yet.".to_string()
    } else {
        format!(
            "Topics the learner struggles with (reinforce them): {}",
            weak_tags.join(", ")
        )
    };

    format!(
        r#"You are an English teacher who designs exercises on the CEFR scale.

Generate exactly {lessons} English lessons for a learner currently at level {level}.
Each lesson has one coherent theme and exactly {count} challenges in this order:
{sequence}

Learner context:
- Current level: {level}
- Use ONLY these levels: {ladder}. Never invent others such as A1.4.
- {weak_section}
- Unit theme: {theme}

Challenge level rules:
- SELECT and ASSIST: current level +/- 0.1
- SPEAK and MATCH: current level +0.1 to +0.3
- FILL_IN_BLANK and TRANSLATE: current level

Content rules:
- TRANSLATE asks for a translation into English.
- FILL_IN_BLANK always blanks a single word.
- SPEAK always includes one option {{ "text": "expected answer", "correct": true }}.
- MATCH always has 4 pairs (8 options) with matchGroup 1 to 4.
- SELECT and ASSIST have 4 options with exactly one correct; vary its position.

Return ONLY valid JSON in this shape, with no prose, markdown or backticks:
{{
  "lessons": [
    {{
      "title": "lesson title",
      "subject": "central theme",
      "level": "{level}",
      "tags": ["tag1", "tag2"],
      "challenges": [
        {{
          "type": "SELECT",
          "question": "...",
          "level": "{level}",
          "skill_type": "vocabulary",
          "tags": ["food"],
          "estimatedTimeSeconds": 20,
          "options": [
            {{ "text": "...", "correct": false }},
            {{ "text": "...", "correct": true }}
          ]
        }}
      ]
    }}
  ]
}}"#,
        lessons = LESSONS_PER_BATCH,
        count = CHALLENGE_SEQUENCE.len(),
        sequence = sequence_line(),
        ladder = LEVEL_LADDER,
    )
}
