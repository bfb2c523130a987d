use chrono::{Duration, NaiveDate, Utc};

use progression_backend::store::operations::content::{
    ChallengeDraft, ChallengeType, CourseDraft, LessonDraft, OptionDraft, UnitDraft,
};
use progression_backend::store::operations::progress::UserProgress;
use progression_backend::store::Store;

pub struct SeededCourse {
    pub course_id: u64,
    pub lesson_ids: Vec<u64>,
    /// Challenge ids per lesson, in lesson order.
    pub challenge_ids: Vec<Vec<u64>>,
}

impl SeededCourse {
    pub fn first_challenge(&self) -> u64 {
        self.challenge_ids[0][0]
    }
}

fn select_challenge(n: usize, level: &str, tag: &str) -> ChallengeDraft {
    ChallengeDraft {
        kind: ChallengeType::Select,
        question: format!("question {n}"),
        order: None,
        proficiency_level: Some(level.to_string()),
        skill_type: Some("vocabulary".to_string()),
        tags: vec![tag.to_string()],
        estimated_time_seconds: None,
        options: vec![
            OptionDraft {
                text: format!("right {n}"),
                correct: true,
                match_group: None,
                image_src: None,
                audio_src: None,
            },
            OptionDraft {
                text: format!("wrong {n}"),
                correct: false,
                match_group: None,
                image_src: None,
                audio_src: None,
            },
        ],
    }
}

/// One unit of `lessons` lessons with `challenges` SELECT challenges each,
/// every row tagged with `level`.
pub fn seed_course(
    store: &Store,
    lessons: usize,
    challenges: usize,
    level: &str,
    proficiency_track: bool,
) -> SeededCourse {
    let draft = CourseDraft {
        title: Some("English".to_string()),
        image_src: Some("/en.svg".to_string()),
        proficiency_track: Some(proficiency_track),
        units: vec![UnitDraft {
            title: "Unit 1".to_string(),
            subject: Some("Travel".to_string()),
            proficiency_level: Some(level.to_string()),
            order: Some(1),
            lessons: (0..lessons)
                .map(|l| LessonDraft {
                    title: format!("Lesson {}", l + 1),
                    subject: Some("Travel".to_string()),
                    proficiency_level: Some(level.to_string()),
                    tags: vec!["travel".to_string()],
                    order: Some(l as u32 + 1),
                    challenges: (0..challenges)
                        .map(|c| select_challenge(l * challenges + c, level, &format!("tag-{c}")))
                        .collect(),
                })
                .collect(),
            ..UnitDraft::default()
        }],
    };

    let summary = store.import_course_tree(None, &draft).expect("import course");
    let lesson_ids = summary.units[0].lesson_ids.clone();
    let challenge_ids = lesson_ids
        .iter()
        .map(|id| {
            store
                .list_challenges(*id)
                .expect("list challenges")
                .into_iter()
                .map(|c| c.id)
                .collect()
        })
        .collect();

    SeededCourse {
        course_id: summary.course_id,
        lesson_ids,
        challenge_ids,
    }
}

/// Rewrites the learner's row to simulate history the HTTP surface can't create.
pub fn set_progress(
    store: &Store,
    user_id: &str,
    update: impl FnOnce(&mut UserProgress),
) -> UserProgress {
    let mut progress = store
        .get_user_progress(user_id)
        .expect("read progress")
        .expect("progress exists");
    update(&mut progress);
    store.put_user_progress(&progress).expect("write progress");
    progress
}

pub fn days_ago(days: i64) -> NaiveDate {
    (Utc::now() - Duration::days(days)).date_naive()
}
