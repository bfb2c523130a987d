use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use crate::store::keys;
use crate::store::operations::progress::{ChallengeProgress, UserProgress};
use crate::store::{map_tx_error, Store, StoreError};

/// 导入数据未给出排序值时使用的默认位置（排在末尾）
pub const DEFAULT_IMPORT_ORDER: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeType {
    Select,
    Assist,
    Speak,
    Translate,
    FillInBlank,
    ListenAndType,
    Match,
}

impl ChallengeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Assist => "ASSIST",
            Self::Speak => "SPEAK",
            Self::Translate => "TRANSLATE",
            Self::FillInBlank => "FILL_IN_BLANK",
            Self::ListenAndType => "LISTEN_AND_TYPE",
            Self::Match => "MATCH",
        }
    }

    /// Matching exercises carry grouped pairs instead of a single correct option.
    pub fn is_single_answer(self) -> bool {
        !matches!(self, Self::Match)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: u64,
    pub title: String,
    pub image_src: String,
    /// Answers in tracked courses feed performance history and level advancement.
    pub proficiency_track: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: u64,
    pub course_id: u64,
    pub title: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub proficiency_level: Option<String>,
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: u64,
    pub unit_id: u64,
    pub title: String,
    pub subject: Option<String>,
    pub proficiency_level: Option<String>,
    pub tags: Vec<String>,
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: u64,
    pub lesson_id: u64,
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    pub question: String,
    pub order: u32,
    pub proficiency_level: Option<String>,
    pub skill_type: Option<String>,
    pub tags: Vec<String>,
    pub estimated_time_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeOption {
    pub id: u64,
    pub challenge_id: u64,
    pub text: String,
    pub correct: bool,
    pub image_src: Option<String>,
    pub audio_src: Option<String>,
    pub match_group: Option<u32>,
}

// ── Drafts: content not yet persisted (bulk import, generated batches) ──

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDraft {
    pub title: Option<String>,
    pub image_src: Option<String>,
    pub proficiency_track: Option<bool>,
    #[serde(default)]
    pub units: Vec<UnitDraft>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub proficiency_level: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub lessons: Vec<LessonDraft>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDraft {
    pub title: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub proficiency_level: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub challenges: Vec<ChallengeDraft>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDraft {
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    pub question: String,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub proficiency_level: Option<String>,
    #[serde(default)]
    pub skill_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub estimated_time_seconds: Option<u32>,
    #[serde(default)]
    pub options: Vec<OptionDraft>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionDraft {
    pub text: String,
    #[serde(default)]
    pub correct: bool,
    #[serde(default)]
    pub match_group: Option<u32>,
    #[serde(default)]
    pub image_src: Option<String>,
    #[serde(default)]
    pub audio_src: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertedUnit {
    pub unit_id: u64,
    pub lesson_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub course_id: u64,
    pub units: Vec<InsertedUnit>,
}

#[derive(Debug, Clone)]
pub struct ChallengeAncestry {
    pub challenge: Challenge,
    pub unit_id: u64,
    pub course_id: u64,
}

// ── Read models for the catalog ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitTree {
    #[serde(flatten)]
    pub unit: Unit,
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseTree {
    #[serde(flatten)]
    pub course: Course,
    pub units: Vec<UnitTree>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDetail {
    #[serde(flatten)]
    pub challenge: Challenge,
    pub options: Vec<ChallengeOption>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDetail {
    #[serde(flatten)]
    pub lesson: Lesson,
    pub challenges: Vec<ChallengeDetail>,
}

const DEFAULT_ESTIMATED_TIME_SECS: u32 = 30;

/// Rows staged for one all-or-nothing write across the content trees.
#[derive(Default)]
struct ContentBatch {
    /// Existing course the rows hang off; it must still exist at commit.
    parent_course: Option<u64>,
    courses: Vec<(String, Vec<u8>)>,
    units: Vec<(String, Vec<u8>)>,
    lessons: Vec<(String, Vec<u8>)>,
    challenges: Vec<(String, Vec<u8>)>,
    options: Vec<(String, Vec<u8>)>,
    edges: Vec<String>,
}

/// Keys under one course, collected for a cascading delete.
#[derive(Default)]
struct CourseSubtree {
    unit_keys: Vec<String>,
    lesson_keys: Vec<String>,
    challenge_keys: Vec<String>,
    option_keys: Vec<String>,
    edges: Vec<String>,
    challenge_ids: HashSet<u64>,
}

struct RemovedCounts {
    units: usize,
    lessons: usize,
    challenges: usize,
}

impl Store {
    pub fn create_course(
        &self,
        title: &str,
        image_src: &str,
        proficiency_track: bool,
    ) -> Result<Course, StoreError> {
        let course = Course {
            id: self.next_id()?,
            title: title.to_string(),
            image_src: image_src.to_string(),
            proficiency_track,
            created_at: Utc::now(),
        };
        self.courses.insert(
            keys::content_key(course.id).as_bytes(),
            Self::serialize(&course)?,
        )?;
        Ok(course)
    }

    pub fn get_course(&self, course_id: u64) -> Result<Option<Course>, StoreError> {
        self.get_content(&self.courses, course_id)
    }

    pub fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let mut courses = Vec::new();
        for item in self.courses.iter() {
            let (_, value) = item?;
            courses.push(Self::deserialize::<Course>(&value)?);
        }
        Ok(courses)
    }

    pub fn get_unit(&self, unit_id: u64) -> Result<Option<Unit>, StoreError> {
        self.get_content(&self.units, unit_id)
    }

    pub fn get_lesson(&self, lesson_id: u64) -> Result<Option<Lesson>, StoreError> {
        self.get_content(&self.lessons, lesson_id)
    }

    pub fn get_challenge(&self, challenge_id: u64) -> Result<Option<Challenge>, StoreError> {
        self.get_content(&self.challenges, challenge_id)
    }

    pub fn list_units(&self, course_id: u64) -> Result<Vec<Unit>, StoreError> {
        let mut units: Vec<Unit> =
            self.list_children(&keys::course_units_prefix(course_id), &self.units)?;
        units.sort_by_key(|u| (u.order, u.id));
        Ok(units)
    }

    pub fn list_lessons(&self, unit_id: u64) -> Result<Vec<Lesson>, StoreError> {
        let mut lessons: Vec<Lesson> =
            self.list_children(&keys::unit_lessons_prefix(unit_id), &self.lessons)?;
        lessons.sort_by_key(|l| (l.order, l.id));
        Ok(lessons)
    }

    pub fn list_challenges(&self, lesson_id: u64) -> Result<Vec<Challenge>, StoreError> {
        let mut challenges: Vec<Challenge> =
            self.list_children(&keys::lesson_challenges_prefix(lesson_id), &self.challenges)?;
        challenges.sort_by_key(|c| (c.order, c.id));
        Ok(challenges)
    }

    pub fn list_options(&self, challenge_id: u64) -> Result<Vec<ChallengeOption>, StoreError> {
        self.list_children(
            &keys::challenge_options_prefix(challenge_id),
            &self.challenge_options,
        )
    }

    /// Lessons of every unit in the course, in unit then lesson order.
    pub fn list_course_lessons(&self, course_id: u64) -> Result<Vec<Lesson>, StoreError> {
        let mut lessons = Vec::new();
        for unit in self.list_units(course_id)? {
            lessons.extend(self.list_lessons(unit.id)?);
        }
        Ok(lessons)
    }

    pub fn get_course_tree(&self, course_id: u64) -> Result<Option<CourseTree>, StoreError> {
        let Some(course) = self.get_course(course_id)? else {
            return Ok(None);
        };
        let units = self
            .list_units(course_id)?
            .into_iter()
            .map(|unit| {
                let lessons = self.list_lessons(unit.id)?;
                Ok(UnitTree { unit, lessons })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(Some(CourseTree { course, units }))
    }

    pub fn get_lesson_detail(&self, lesson_id: u64) -> Result<Option<LessonDetail>, StoreError> {
        let Some(lesson) = self.get_lesson(lesson_id)? else {
            return Ok(None);
        };
        let mut challenges = Vec::new();
        for challenge in self.list_challenges(lesson_id)? {
            let mut options = self.list_options(challenge.id)?;
            options.sort_by_key(|o| o.id);
            challenges.push(ChallengeDetail { challenge, options });
        }
        Ok(Some(LessonDetail { lesson, challenges }))
    }

    pub fn get_challenge_ancestry(
        &self,
        challenge_id: u64,
    ) -> Result<Option<ChallengeAncestry>, StoreError> {
        let Some(challenge) = self.get_challenge(challenge_id)? else {
            return Ok(None);
        };
        let lesson = self
            .get_lesson(challenge.lesson_id)?
            .ok_or_else(|| StoreError::not_found("lesson", challenge.lesson_id))?;
        let unit = self
            .get_unit(lesson.unit_id)?
            .ok_or_else(|| StoreError::not_found("unit", lesson.unit_id))?;
        Ok(Some(ChallengeAncestry {
            challenge,
            unit_id: unit.id,
            course_id: unit.course_id,
        }))
    }

    pub fn latest_unit(&self, course_id: u64) -> Result<Option<Unit>, StoreError> {
        Ok(self.list_units(course_id)?.into_iter().last())
    }

    pub fn next_unit_order(&self, course_id: u64) -> Result<u32, StoreError> {
        Ok(self
            .list_units(course_id)?
            .iter()
            .map(|u| u.order)
            .max()
            .unwrap_or(0)
            + 1)
    }

    /// 统计课程中仍有未完成挑战的课时数（课时至少含一个挑战）
    pub fn count_pending_lessons(&self, user_id: &str, course_id: u64) -> Result<usize, StoreError> {
        let completed = self.completed_challenge_ids(user_id)?;
        let mut pending = 0usize;
        for lesson in self.list_course_lessons(course_id)? {
            let challenges = self.list_challenges(lesson.id)?;
            if challenges.iter().any(|c| !completed.contains(&c.id)) {
                pending += 1;
            }
        }
        Ok(pending)
    }

    /// Imports a whole course tree in one transaction. With `course_id` set the
    /// units are appended to that course, otherwise a new course is created.
    pub fn import_course_tree(
        &self,
        course_id: Option<u64>,
        draft: &CourseDraft,
    ) -> Result<ImportSummary, StoreError> {
        if draft.units.is_empty() {
            return Err(StoreError::Validation(
                "course import requires at least one unit".to_string(),
            ));
        }

        let mut batch = ContentBatch::default();
        let course_id = match course_id {
            Some(id) => {
                if self.get_course(id)?.is_none() {
                    return Err(StoreError::not_found("course", id));
                }
                batch.parent_course = Some(id);
                id
            }
            None => {
                let course = Course {
                    id: self.next_id()?,
                    title: draft
                        .title
                        .clone()
                        .unwrap_or_else(|| "Imported course".to_string()),
                    image_src: draft
                        .image_src
                        .clone()
                        .unwrap_or_else(|| "/course-default.png".to_string()),
                    proficiency_track: draft.proficiency_track.unwrap_or(true),
                    created_at: Utc::now(),
                };
                batch
                    .courses
                    .push((keys::content_key(course.id), Self::serialize(&course)?));
                course.id
            }
        };

        let mut units = Vec::with_capacity(draft.units.len());
        for unit in &draft.units {
            let order = unit.order.unwrap_or(DEFAULT_IMPORT_ORDER);
            let lesson_orders = unit
                .lessons
                .iter()
                .map(|l| l.order.unwrap_or(DEFAULT_IMPORT_ORDER))
                .collect::<Vec<_>>();
            units.push(self.stage_unit(&mut batch, course_id, unit, order, &lesson_orders)?);
        }

        self.apply_content_batch(&batch)?;
        tracing::info!(course_id, units = units.len(), "Course tree imported");
        Ok(ImportSummary { course_id, units })
    }

    /// Persists a generated batch as a new unit at the next ordering, its
    /// lessons at 1..n, challenges at 1..n and their options, all or nothing.
    /// Fails with `NotFound` when the course is gone by commit time.
    pub fn persist_generated_content(
        &self,
        course_id: u64,
        unit: &UnitDraft,
        lessons: &[LessonDraft],
    ) -> Result<InsertedUnit, StoreError> {
        if self.get_course(course_id)?.is_none() {
            return Err(StoreError::not_found("course", course_id));
        }

        let mut batch = ContentBatch {
            parent_course: Some(course_id),
            ..ContentBatch::default()
        };
        let order = self.next_unit_order(course_id)?;
        let lesson_orders = (1..=lessons.len() as u32).collect::<Vec<_>>();
        let with_lessons = UnitDraft {
            lessons: lessons.to_vec(),
            ..unit.clone()
        };
        let inserted =
            self.stage_unit(&mut batch, course_id, &with_lessons, order, &lesson_orders)?;

        self.apply_content_batch(&batch)?;
        Ok(inserted)
    }

    /// Removes the course with its whole owning subtree, plus the completion
    /// rows that point at its challenges. Learners whose active course it was
    /// keep their progress with no active course.
    pub fn delete_course(&self, course_id: u64) -> Result<(), StoreError> {
        if self.get_course(course_id)?.is_none() {
            return Err(StoreError::not_found("course", course_id));
        }

        let removed = self.remove_course_subtree(course_id, true)?;
        // A batch that committed between collecting and removing is swept
        // here; once the course row is gone no further batch can commit.
        let swept = self.remove_course_subtree(course_id, false)?;
        if swept.units > 0 {
            tracing::warn!(course_id, units = swept.units, "Swept units written during course delete");
        }

        tracing::info!(
            course_id,
            units = removed.units + swept.units,
            lessons = removed.lessons + swept.lessons,
            challenges = removed.challenges + swept.challenges,
            "Course deleted"
        );
        Ok(())
    }

    fn collect_subtree(&self, course_id: u64) -> Result<CourseSubtree, StoreError> {
        let mut subtree = CourseSubtree::default();
        for unit in self.list_units(course_id)? {
            subtree.unit_keys.push(keys::content_key(unit.id));
            subtree.edges.push(keys::course_unit_edge(course_id, unit.id));
            for lesson in self.list_lessons(unit.id)? {
                subtree.lesson_keys.push(keys::content_key(lesson.id));
                subtree.edges.push(keys::unit_lesson_edge(unit.id, lesson.id));
                for challenge in self.list_challenges(lesson.id)? {
                    subtree.challenge_ids.insert(challenge.id);
                    subtree.challenge_keys.push(keys::content_key(challenge.id));
                    subtree
                        .edges
                        .push(keys::lesson_challenge_edge(lesson.id, challenge.id));
                    for option in self.list_options(challenge.id)? {
                        subtree.option_keys.push(keys::content_key(option.id));
                        subtree
                            .edges
                            .push(keys::challenge_option_edge(challenge.id, option.id));
                    }
                }
            }
        }
        Ok(subtree)
    }

    /// One transaction removing everything currently under the course, and
    /// the course row itself when `with_course` is set.
    fn remove_course_subtree(
        &self,
        course_id: u64,
        with_course: bool,
    ) -> Result<RemovedCounts, StoreError> {
        let subtree = self.collect_subtree(course_id)?;
        let counts = RemovedCounts {
            units: subtree.unit_keys.len(),
            lessons: subtree.lesson_keys.len(),
            challenges: subtree.challenge_keys.len(),
        };
        if !with_course && subtree.unit_keys.is_empty() {
            return Ok(counts);
        }

        let mut progress_keys = Vec::new();
        if !subtree.challenge_ids.is_empty() {
            for item in self.challenge_progress.iter() {
                let (key, value) = item?;
                let row: ChallengeProgress = Self::deserialize(&value)?;
                if subtree.challenge_ids.contains(&row.challenge_id) {
                    progress_keys.push(key.to_vec());
                }
            }
        }

        let mut detached_learners = Vec::new();
        if with_course {
            for item in self.user_progress.iter() {
                let (key, value) = item?;
                let mut progress: UserProgress = Self::deserialize(&value)?;
                if progress.active_course_id == Some(course_id) {
                    progress.active_course_id = None;
                    progress.updated_at = Utc::now();
                    detached_learners.push((key.to_vec(), Self::serialize(&progress)?));
                }
            }
        }

        let course_key = keys::content_key(course_id);
        (
            &self.courses,
            &self.units,
            &self.lessons,
            &self.challenges,
            &self.challenge_options,
            &self.content_index,
            &self.challenge_progress,
            &self.user_progress,
        )
            .transaction(
                |(tx_courses, tx_units, tx_lessons, tx_challenges, tx_options, tx_index, tx_cp, tx_up)| {
                    if with_course {
                        tx_courses.remove(course_key.as_bytes())?;
                    }
                    for key in &subtree.unit_keys {
                        tx_units.remove(key.as_bytes())?;
                    }
                    for key in &subtree.lesson_keys {
                        tx_lessons.remove(key.as_bytes())?;
                    }
                    for key in &subtree.challenge_keys {
                        tx_challenges.remove(key.as_bytes())?;
                    }
                    for key in &subtree.option_keys {
                        tx_options.remove(key.as_bytes())?;
                    }
                    for edge in &subtree.edges {
                        tx_index.remove(edge.as_bytes())?;
                    }
                    for key in &progress_keys {
                        tx_cp.remove(key.as_slice())?;
                    }
                    for (key, bytes) in &detached_learners {
                        tx_up.insert(key.as_slice(), bytes.as_slice())?;
                    }
                    Ok(())
                },
            )
            .map_err(map_tx_error::<StoreError>)?;
        Ok(counts)
    }

    fn get_content<T: serde::de::DeserializeOwned>(
        &self,
        tree: &sled::Tree,
        id: u64,
    ) -> Result<Option<T>, StoreError> {
        match tree.get(keys::content_key(id).as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    fn list_children<T: serde::de::DeserializeOwned>(
        &self,
        prefix: &str,
        tree: &sled::Tree,
    ) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for item in self.content_index.scan_prefix(prefix.as_bytes()) {
            let (edge, _) = item?;
            let Some(child_id) = keys::parse_edge_child(&edge) else {
                tracing::warn!(edge = %String::from_utf8_lossy(&edge), "Malformed content edge");
                continue;
            };
            if let Some(child) = self.get_content(tree, child_id)? {
                out.push(child);
            }
        }
        Ok(out)
    }

    fn stage_unit(
        &self,
        batch: &mut ContentBatch,
        course_id: u64,
        draft: &UnitDraft,
        order: u32,
        lesson_orders: &[u32],
    ) -> Result<InsertedUnit, StoreError> {
        let unit = Unit {
            id: self.next_id()?,
            course_id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            subject: draft.subject.clone(),
            proficiency_level: draft.proficiency_level.clone(),
            order,
        };
        batch
            .units
            .push((keys::content_key(unit.id), Self::serialize(&unit)?));
        batch.edges.push(keys::course_unit_edge(course_id, unit.id));

        let mut lesson_ids = Vec::with_capacity(draft.lessons.len());
        for (lesson, order) in draft.lessons.iter().zip(lesson_orders) {
            lesson_ids.push(self.stage_lesson(batch, unit.id, lesson, *order)?);
        }

        Ok(InsertedUnit {
            unit_id: unit.id,
            lesson_ids,
        })
    }

    fn stage_lesson(
        &self,
        batch: &mut ContentBatch,
        unit_id: u64,
        draft: &LessonDraft,
        order: u32,
    ) -> Result<u64, StoreError> {
        let lesson = Lesson {
            id: self.next_id()?,
            unit_id,
            title: draft.title.clone(),
            subject: draft.subject.clone(),
            proficiency_level: draft.proficiency_level.clone(),
            tags: draft.tags.clone(),
            order,
        };
        batch
            .lessons
            .push((keys::content_key(lesson.id), Self::serialize(&lesson)?));
        batch.edges.push(keys::unit_lesson_edge(unit_id, lesson.id));

        for (position, challenge) in draft.challenges.iter().enumerate() {
            let order = challenge.order.unwrap_or(position as u32 + 1);
            self.stage_challenge(batch, lesson.id, challenge, order)?;
        }
        Ok(lesson.id)
    }

    fn stage_challenge(
        &self,
        batch: &mut ContentBatch,
        lesson_id: u64,
        draft: &ChallengeDraft,
        order: u32,
    ) -> Result<u64, StoreError> {
        let challenge = Challenge {
            id: self.next_id()?,
            lesson_id,
            kind: draft.kind,
            question: draft.question.clone(),
            order,
            proficiency_level: draft.proficiency_level.clone(),
            skill_type: draft.skill_type.clone(),
            tags: draft.tags.clone(),
            estimated_time_seconds: draft
                .estimated_time_seconds
                .unwrap_or(DEFAULT_ESTIMATED_TIME_SECS),
        };
        batch
            .challenges
            .push((keys::content_key(challenge.id), Self::serialize(&challenge)?));
        batch
            .edges
            .push(keys::lesson_challenge_edge(lesson_id, challenge.id));

        for draft_option in &draft.options {
            let option = ChallengeOption {
                id: self.next_id()?,
                challenge_id: challenge.id,
                text: draft_option.text.clone(),
                correct: draft_option.correct,
                image_src: draft_option.image_src.clone(),
                audio_src: draft_option.audio_src.clone(),
                match_group: draft_option.match_group,
            };
            batch
                .options
                .push((keys::content_key(option.id), Self::serialize(&option)?));
            batch
                .edges
                .push(keys::challenge_option_edge(challenge.id, option.id));
        }
        Ok(challenge.id)
    }

    fn apply_content_batch(&self, batch: &ContentBatch) -> Result<(), StoreError> {
        (
            &self.courses,
            &self.units,
            &self.lessons,
            &self.challenges,
            &self.challenge_options,
            &self.content_index,
        )
            .transaction(
                |(tx_courses, tx_units, tx_lessons, tx_challenges, tx_options, tx_index)| {
                    if let Some(course_id) = batch.parent_course {
                        if tx_courses.get(keys::content_key(course_id).as_bytes())?.is_none() {
                            return Err(ConflictableTransactionError::Abort(
                                StoreError::not_found("course", course_id),
                            ));
                        }
                    }
                    for (key, bytes) in &batch.courses {
                        tx_courses.insert(key.as_bytes(), bytes.as_slice())?;
                    }
                    for (key, bytes) in &batch.units {
                        tx_units.insert(key.as_bytes(), bytes.as_slice())?;
                    }
                    for (key, bytes) in &batch.lessons {
                        tx_lessons.insert(key.as_bytes(), bytes.as_slice())?;
                    }
                    for (key, bytes) in &batch.challenges {
                        tx_challenges.insert(key.as_bytes(), bytes.as_slice())?;
                    }
                    for (key, bytes) in &batch.options {
                        tx_options.insert(key.as_bytes(), bytes.as_slice())?;
                    }
                    for edge in &batch.edges {
                        tx_index.insert(edge.as_bytes(), &b""[..])?;
                    }
                    Ok(())
                },
            )
            .map_err(map_tx_error::<StoreError>)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn open_store(name: &str) -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join(name).to_str().unwrap()).unwrap();
        (dir, store)
    }

    fn select(question: &str) -> ChallengeDraft {
        ChallengeDraft {
            kind: ChallengeType::Select,
            question: question.to_string(),
            order: None,
            proficiency_level: Some("A1.1".to_string()),
            skill_type: None,
            tags: vec!["food".to_string()],
            estimated_time_seconds: None,
            options: vec![
                OptionDraft {
                    text: "yes".to_string(),
                    correct: true,
                    match_group: None,
                    image_src: None,
                    audio_src: None,
                },
                OptionDraft {
                    text: "no".to_string(),
                    correct: false,
                    match_group: None,
                    image_src: None,
                    audio_src: None,
                },
            ],
        }
    }

    fn lesson(title: &str, challenges: usize) -> LessonDraft {
        LessonDraft {
            title: title.to_string(),
            challenges: (0..challenges).map(|i| select(&format!("q{i}"))).collect(),
            ..LessonDraft::default()
        }
    }

    #[test]
    fn import_builds_ordered_tree() {
        let (_dir, store) = open_store("content-import");
        let draft = CourseDraft {
            title: Some("English".to_string()),
            image_src: None,
            proficiency_track: None,
            units: vec![
                UnitDraft {
                    title: "Second".to_string(),
                    order: Some(2),
                    lessons: vec![lesson("b", 1)],
                    ..UnitDraft::default()
                },
                UnitDraft {
                    title: "First".to_string(),
                    order: Some(1),
                    lessons: vec![lesson("a", 2)],
                    ..UnitDraft::default()
                },
            ],
        };

        let summary = store.import_course_tree(None, &draft).unwrap();
        let course = store.get_course(summary.course_id).unwrap().unwrap();
        assert!(course.proficiency_track);

        let units = store.list_units(summary.course_id).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].title, "First");

        let lessons = store.list_lessons(units[0].id).unwrap();
        assert_eq!(lessons[0].order, DEFAULT_IMPORT_ORDER);
        let challenges = store.list_challenges(lessons[0].id).unwrap();
        assert_eq!(challenges.len(), 2);
        assert_eq!(challenges[0].order, 1);
        assert_eq!(challenges[0].estimated_time_seconds, 30);
        assert_eq!(store.list_options(challenges[0].id).unwrap().len(), 2);
    }

    #[test]
    fn course_tree_and_lesson_detail_follow_ordering() {
        let (_dir, store) = open_store("content-tree");
        let draft = CourseDraft {
            title: Some("English".to_string()),
            image_src: None,
            proficiency_track: Some(false),
            units: vec![UnitDraft {
                title: "Only".to_string(),
                order: Some(1),
                lessons: vec![lesson("b", 3), lesson("a", 1)],
                ..UnitDraft::default()
            }],
        };
        let summary = store.import_course_tree(None, &draft).unwrap();

        let tree = store.get_course_tree(summary.course_id).unwrap().unwrap();
        assert!(!tree.course.proficiency_track);
        assert_eq!(tree.units.len(), 1);
        assert_eq!(tree.units[0].lessons.len(), 2);

        let first = &tree.units[0].lessons[0];
        let detail = store.get_lesson_detail(first.id).unwrap().unwrap();
        assert_eq!(detail.challenges.len(), 3);
        let orders: Vec<u32> = detail.challenges.iter().map(|c| c.challenge.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert!(detail.challenges.iter().all(|c| !c.options.is_empty()));

        assert!(store.get_course_tree(9_999).unwrap().is_none());
        assert!(store.get_lesson_detail(9_999).unwrap().is_none());
    }

    #[test]
    fn import_without_units_is_rejected() {
        let (_dir, store) = open_store("content-empty");
        let draft = CourseDraft {
            title: None,
            image_src: None,
            proficiency_track: None,
            units: vec![],
        };
        let err = store.import_course_tree(None, &draft).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(store.list_courses().unwrap().is_empty());
    }

    #[test]
    fn generated_unit_gets_next_order_and_sequential_lessons() {
        let (_dir, store) = open_store("content-generated");
        let course = store.create_course("English", "/en.png", true).unwrap();
        let unit = UnitDraft {
            title: "Level A1 - Unit 1".to_string(),
            ..UnitDraft::default()
        };

        let first = store
            .persist_generated_content(course.id, &unit, &[lesson("l1", 8), lesson("l2", 8)])
            .unwrap();
        let second = store
            .persist_generated_content(course.id, &unit, &[lesson("l3", 8)])
            .unwrap();
        assert_ne!(first.unit_id, second.unit_id);

        let units = store.list_units(course.id).unwrap();
        assert_eq!(units.iter().map(|u| u.order).collect::<Vec<_>>(), vec![1, 2]);
        let lessons = store.list_lessons(first.unit_id).unwrap();
        assert_eq!(lessons.iter().map(|l| l.order).collect::<Vec<_>>(), vec![1, 2]);
        let orders: Vec<u32> = store
            .list_challenges(lessons[0].id)
            .unwrap()
            .iter()
            .map(|c| c.order)
            .collect();
        assert_eq!(orders, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn pending_lessons_ignore_completed_and_empty_lessons() {
        let (_dir, store) = open_store("content-pending");
        let course = store.create_course("English", "/en.png", true).unwrap();
        let inserted = store
            .persist_generated_content(
                course.id,
                &UnitDraft {
                    title: "u".to_string(),
                    ..UnitDraft::default()
                },
                &[lesson("done", 1), lesson("open", 2), lesson("empty", 0)],
            )
            .unwrap();
        assert_eq!(store.count_pending_lessons("u1", course.id).unwrap(), 2);

        let done = store.list_challenges(inserted.lesson_ids[0]).unwrap();
        store.upsert_challenge_completion("u1", done[0].id).unwrap();
        assert_eq!(store.count_pending_lessons("u1", course.id).unwrap(), 1);
    }

    #[test]
    fn delete_course_cascades_subtree() {
        let (_dir, store) = open_store("content-delete");
        let course = store.create_course("English", "/en.png", true).unwrap();
        let inserted = store
            .persist_generated_content(
                course.id,
                &UnitDraft {
                    title: "u".to_string(),
                    ..UnitDraft::default()
                },
                &[lesson("l", 2)],
            )
            .unwrap();
        let challenge_id = store.list_challenges(inserted.lesson_ids[0]).unwrap()[0].id;
        store.upsert_challenge_completion("u1", challenge_id).unwrap();

        store.delete_course(course.id).unwrap();

        assert!(store.get_course(course.id).unwrap().is_none());
        assert!(store.get_unit(inserted.unit_id).unwrap().is_none());
        assert!(store.get_challenge(challenge_id).unwrap().is_none());
        assert!(store.content_index.is_empty());
        assert!(store.challenge_options.is_empty());
        assert!(store
            .get_challenge_progress("u1", challenge_id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn generated_content_for_a_deleted_course_is_rejected() {
        let (_dir, store) = open_store("content-gone");
        let course = store.create_course("English", "/en.png", true).unwrap();
        let unit = UnitDraft {
            title: "u".to_string(),
            ..UnitDraft::default()
        };

        // staged against a live course, committed after it was removed
        let mut batch = ContentBatch {
            parent_course: Some(course.id),
            ..ContentBatch::default()
        };
        store
            .stage_unit(&mut batch, course.id, &unit, 1, &[])
            .unwrap();
        store.delete_course(course.id).unwrap();

        let err = store.apply_content_batch(&batch).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.units.is_empty());
        assert!(store.content_index.is_empty());

        let err = store
            .persist_generated_content(course.id, &unit, &[lesson("l", 1)])
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn delete_racing_generation_leaves_no_orphans() {
        let (_dir, store) = open_store("content-race");
        let unit = UnitDraft {
            title: "u".to_string(),
            ..UnitDraft::default()
        };

        for _ in 0..100 {
            let course = store.create_course("English", "/en.png", true).unwrap();
            let barrier = std::sync::Barrier::new(2);
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    // losing the race to the delete is a clean NotFound
                    let _ = store.persist_generated_content(course.id, &unit, &[lesson("l", 2)]);
                });
                scope.spawn(|| {
                    barrier.wait();
                    store.delete_course(course.id).unwrap();
                });
            });

            assert!(store.get_course(course.id).unwrap().is_none());
            assert!(store.units.is_empty());
            assert!(store.lessons.is_empty());
            assert!(store.challenges.is_empty());
            assert!(store.content_index.is_empty());
        }
    }
}
