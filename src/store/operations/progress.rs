use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::progression::level;
use crate::store::keys;
use crate::store::{Store, StoreError};

/// Per-learner progression state. Exactly one row per learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_id: String,
    pub active_course_id: Option<u64>,
    pub hearts: u32,
    pub points: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<NaiveDate>,
    pub proficiency_level: String,
    pub proficiency_float: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProgress {
    pub fn new(user_id: &str, max_hearts: u32, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            active_course_id: None,
            hearts: max_hearts,
            points: 0,
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
            proficiency_level: level::encode(level::MIN_LEVEL),
            proficiency_float: level::MIN_LEVEL,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A row exists once the learner has completed the challenge at least once;
/// later completions of the same challenge are practice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeProgress {
    pub user_id: String,
    pub challenge_id: u64,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl Store {
    pub fn get_user_progress(&self, user_id: &str) -> Result<Option<UserProgress>, StoreError> {
        let key = keys::user_progress_key(user_id)?;
        match self.user_progress.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_user_progress(&self, progress: &UserProgress) -> Result<(), StoreError> {
        let key = keys::user_progress_key(&progress.user_id)?;
        self.user_progress
            .insert(key.as_bytes(), Self::serialize(progress)?)?;
        Ok(())
    }

    /// Points the learner at a course, creating their progress row on first use.
    pub fn set_active_course(
        &self,
        user_id: &str,
        course_id: u64,
        max_hearts: u32,
        now: DateTime<Utc>,
    ) -> Result<UserProgress, StoreError> {
        if self.get_course(course_id)?.is_none() {
            return Err(StoreError::not_found("course", course_id));
        }
        let key = keys::user_progress_key(user_id)?;

        let updated = self.user_progress.update_and_fetch(key.as_bytes(), |old| {
            let mut progress = old
                .and_then(|raw| serde_json::from_slice::<UserProgress>(raw).ok())
                .unwrap_or_else(|| UserProgress::new(user_id, max_hearts, now));
            progress.active_course_id = Some(course_id);
            progress.updated_at = now;
            serde_json::to_vec(&progress).ok()
        })?;

        match updated {
            Some(raw) => Self::deserialize(&raw),
            None => Err(StoreError::not_found("user_progress", user_id)),
        }
    }

    /// Highest point totals first; ties go to the lower user id.
    pub fn top_progress_by_points(&self, limit: usize) -> Result<Vec<UserProgress>, StoreError> {
        let mut rows = Vec::new();
        for item in self.user_progress.iter() {
            let (_, value) = item?;
            rows.push(Self::deserialize::<UserProgress>(&value)?);
        }
        rows.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.user_id.cmp(&b.user_id)));
        rows.truncate(limit);
        Ok(rows)
    }

    pub fn get_challenge_progress(
        &self,
        user_id: &str,
        challenge_id: u64,
    ) -> Result<Option<ChallengeProgress>, StoreError> {
        let key = keys::challenge_progress_key(user_id, challenge_id)?;
        match self.challenge_progress.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Marks a challenge completed outside the progression transaction.
    #[cfg(test)]
    pub fn upsert_challenge_completion(
        &self,
        user_id: &str,
        challenge_id: u64,
    ) -> Result<ChallengeProgress, StoreError> {
        let key = keys::challenge_progress_key(user_id, challenge_id)?;
        let row = ChallengeProgress {
            user_id: user_id.to_string(),
            challenge_id,
            completed: true,
            updated_at: Utc::now(),
        };
        self.challenge_progress
            .insert(key.as_bytes(), Self::serialize(&row)?)?;
        Ok(row)
    }

    pub fn completed_challenge_ids(&self, user_id: &str) -> Result<HashSet<u64>, StoreError> {
        let prefix = keys::challenge_progress_prefix(user_id)?;
        let mut ids = HashSet::new();
        for item in self.challenge_progress.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            let row: ChallengeProgress = Self::deserialize(&value)?;
            if row.completed {
                ids.insert(row.challenge_id);
            }
        }
        Ok(ids)
    }
}
