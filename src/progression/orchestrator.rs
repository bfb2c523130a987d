use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use crate::config::ProgressionConfig;
use crate::constants::LEADERBOARD_SIZE;
use crate::events::{self, InvalidationSender, ViewInvalidation};
use crate::progression::advancement::{self, AdvancementRules, LessonEvidence};
use crate::progression::streak::{self, StreakState};
use crate::progression::quests::{self, QuestProgress};
use crate::progression::{level, weak_topics, ProgressError};
use crate::store::keys;
use crate::store::operations::content::ChallengeAncestry;
use crate::store::operations::performance::PerformanceRecord;
use crate::store::operations::progress::{ChallengeProgress, UserProgress};
use crate::store::{map_tx_error, Store};
use crate::workers::content_generation::{GenerationJob, GenerationQueue};

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Completed(UserProgress),
    /// Blocked: no hearts left, not practice, no entitlement. Nothing was written.
    OutOfHearts,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MissOutcome {
    HeartLost(UserProgress),
    /// Already-completed challenge; mistakes in practice are free.
    Practice(UserProgress),
    Unlimited(UserProgress),
    OutOfHearts,
}

/// What presentation layers read about a learner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub active_course_id: Option<u64>,
    pub hearts: u32,
    pub points: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<NaiveDate>,
    pub proficiency_level: String,
    pub streak: StreakState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingLessons {
    pub lessons_pending: usize,
    pub proficiency_level: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefillOutcome {
    Refilled(UserProgress),
    /// Hearts already at the maximum; nothing was charged.
    HeartsFull,
    NotEnoughPoints,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub points: u64,
    pub proficiency_level: String,
}

/// Outcome computed inside the progress transaction.
enum Applied {
    Blocked,
    Written(UserProgress),
}

pub struct ProgressionEngine {
    store: Arc<Store>,
    config: ProgressionConfig,
    queue: GenerationQueue,
    invalidations: InvalidationSender,
}

impl ProgressionEngine {
    pub fn new(
        store: Arc<Store>,
        config: ProgressionConfig,
        queue: GenerationQueue,
        invalidations: InvalidationSender,
    ) -> Self {
        Self {
            store,
            config,
            queue,
            invalidations,
        }
    }

    pub fn config(&self) -> &ProgressionConfig {
        &self.config
    }

    /// Records a correct answer.
    ///
    /// Streak, hearts, points and the completion row are written in one
    /// transaction. History, advancement, the generation trigger and the view
    /// invalidation follow the commit and never change its outcome.
    pub fn complete_challenge(
        &self,
        user_id: &str,
        challenge_id: u64,
        time_spent_seconds: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome, ProgressError> {
        let ancestry = self.resolve_challenge(user_id, challenge_id)?;
        let unlimited = self.store.has_unlimited_hearts(user_id, now)?;
        let today = now.date_naive();
        let progress_key = keys::user_progress_key(user_id)?;
        let completion_key = keys::challenge_progress_key(user_id, challenge_id)?;
        let max_hearts = self.config.max_hearts;
        let points = self.config.points_per_challenge;

        let applied = (&self.store.user_progress, &self.store.challenge_progress)
            .transaction(|(tx_progress, tx_completions)| {
                let raw = tx_progress.get(progress_key.as_bytes())?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(ProgressError::not_found(
                        "user_progress",
                        user_id,
                    ))
                })?;
                let mut progress = Store::tx_deserialize::<UserProgress, ProgressError>(&raw)?;
                let practice = tx_completions.get(completion_key.as_bytes())?.is_some();

                if progress.hearts == 0 && !practice && !unlimited {
                    return Ok(Applied::Blocked);
                }

                let new_streak =
                    streak::next_streak(progress.current_streak, progress.last_activity_date, today);

                let completion = ChallengeProgress {
                    user_id: user_id.to_string(),
                    challenge_id,
                    completed: true,
                    updated_at: now,
                };
                tx_completions.insert(
                    completion_key.as_bytes(),
                    Store::tx_serialize::<_, ProgressError>(&completion)?,
                )?;

                if practice {
                    progress.hearts = progress.hearts.saturating_add(1).min(max_hearts);
                }
                progress.points = progress.points.saturating_add(points);
                progress.current_streak = new_streak;
                progress.longest_streak = progress.longest_streak.max(new_streak);
                // a last activity dated after today is kept so the date never moves back
                progress.last_activity_date = Some(
                    progress
                        .last_activity_date
                        .map_or(today, |last| last.max(today)),
                );
                progress.updated_at = now;

                tx_progress.insert(
                    progress_key.as_bytes(),
                    Store::tx_serialize::<_, ProgressError>(&progress)?,
                )?;
                Ok(Applied::Written(progress))
            })
            .map_err(map_tx_error::<ProgressError>)?;

        let mut progress = match applied {
            Applied::Blocked => {
                tracing::info!(user_id, challenge_id, "Completion blocked: out of hearts");
                return Ok(CompletionOutcome::OutOfHearts);
            }
            Applied::Written(progress) => progress,
        };

        if self.tracks_proficiency(ancestry.course_id) {
            self.record_answer(user_id, &ancestry, true, time_spent_seconds, now);
            match self.advance_if_eligible(user_id, ancestry.course_id) {
                Ok(Some(next)) => {
                    progress.proficiency_float = level::decode(&next);
                    progress.proficiency_level = next;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(user_id, course_id = ancestry.course_id, error = %e, "Advancement check failed");
                }
            }
        }

        if let Some(course_id) = progress.active_course_id {
            self.queue.enqueue(GenerationJob {
                user_id: user_id.to_string(),
                course_id,
            });
        }

        events::publish(
            &self.invalidations,
            ViewInvalidation::after_answer(user_id, ancestry.challenge.lesson_id),
        );

        tracing::debug!(
            user_id,
            challenge_id,
            streak = progress.current_streak,
            hearts = progress.hearts,
            "Challenge completed"
        );
        Ok(CompletionOutcome::Completed(progress))
    }

    /// Records an incorrect answer. Streak and points are untouched.
    pub fn record_incorrect_answer(
        &self,
        user_id: &str,
        challenge_id: u64,
        time_spent_seconds: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<MissOutcome, ProgressError> {
        let ancestry = self.resolve_challenge(user_id, challenge_id)?;
        let unlimited = self.store.has_unlimited_hearts(user_id, now)?;
        let progress_key = keys::user_progress_key(user_id)?;
        let completion_key = keys::challenge_progress_key(user_id, challenge_id)?;

        let outcome = (&self.store.user_progress, &self.store.challenge_progress)
            .transaction(|(tx_progress, tx_completions)| {
                let raw = tx_progress.get(progress_key.as_bytes())?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(ProgressError::not_found(
                        "user_progress",
                        user_id,
                    ))
                })?;
                let mut progress = Store::tx_deserialize::<UserProgress, ProgressError>(&raw)?;

                if tx_completions.get(completion_key.as_bytes())?.is_some() {
                    return Ok(MissOutcome::Practice(progress));
                }
                if unlimited {
                    return Ok(MissOutcome::Unlimited(progress));
                }
                if progress.hearts == 0 {
                    return Ok(MissOutcome::OutOfHearts);
                }

                progress.hearts -= 1;
                progress.updated_at = now;
                tx_progress.insert(
                    progress_key.as_bytes(),
                    Store::tx_serialize::<_, ProgressError>(&progress)?,
                )?;
                Ok(MissOutcome::HeartLost(progress))
            })
            .map_err(map_tx_error::<ProgressError>)?;

        if matches!(outcome, MissOutcome::OutOfHearts) {
            return Ok(outcome);
        }

        if self.tracks_proficiency(ancestry.course_id) {
            self.record_answer(user_id, &ancestry, false, time_spent_seconds, now);
        }
        if let MissOutcome::HeartLost(_) = outcome {
            events::publish(
                &self.invalidations,
                ViewInvalidation::after_answer(user_id, ancestry.challenge.lesson_id),
            );
        }
        Ok(outcome)
    }

    /// Spends the refill price to restore hearts to the maximum, in one
    /// transaction so concurrent answers never lose a point or a heart.
    pub fn refill_hearts(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RefillOutcome, ProgressError> {
        if user_id.is_empty() {
            return Err(ProgressError::Unauthorized);
        }
        let progress_key = keys::user_progress_key(user_id)?;
        let max_hearts = self.config.max_hearts;
        let price = self.config.points_to_refill;

        let outcome = self
            .store
            .user_progress
            .transaction(|tx| {
                let raw = tx.get(progress_key.as_bytes())?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(ProgressError::not_found(
                        "user_progress",
                        user_id,
                    ))
                })?;
                let mut progress = Store::tx_deserialize::<UserProgress, ProgressError>(&raw)?;
                if progress.hearts >= max_hearts {
                    return Ok(RefillOutcome::HeartsFull);
                }
                if progress.points < price {
                    return Ok(RefillOutcome::NotEnoughPoints);
                }

                progress.hearts = max_hearts;
                progress.points -= price;
                progress.updated_at = now;
                tx.insert(
                    progress_key.as_bytes(),
                    Store::tx_serialize::<_, ProgressError>(&progress)?,
                )?;
                Ok(RefillOutcome::Refilled(progress))
            })
            .map_err(map_tx_error::<ProgressError>)?;

        match &outcome {
            RefillOutcome::Refilled(progress) => {
                tracing::info!(user_id, points = progress.points, "Hearts refilled");
                events::publish(&self.invalidations, ViewInvalidation::after_refill(user_id));
            }
            refused => tracing::debug!(user_id, outcome = ?refused, "Heart refill refused"),
        }
        Ok(outcome)
    }

    pub fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, ProgressError> {
        Ok(self
            .store
            .top_progress_by_points(LEADERBOARD_SIZE)?
            .into_iter()
            .enumerate()
            .map(|(i, progress)| LeaderboardEntry {
                rank: i + 1,
                user_id: progress.user_id,
                points: progress.points,
                proficiency_level: progress.proficiency_level,
            })
            .collect())
    }

    pub fn quests(&self, user_id: &str) -> Result<Vec<QuestProgress>, ProgressError> {
        let progress = self.require_progress(user_id)?;
        Ok(quests::quest_progress(progress.points))
    }

    pub fn select_active_course(
        &self,
        user_id: &str,
        course_id: u64,
        now: DateTime<Utc>,
    ) -> Result<UserProgress, ProgressError> {
        if user_id.is_empty() {
            return Err(ProgressError::Unauthorized);
        }
        let progress = self
            .store
            .set_active_course(user_id, course_id, self.config.max_hearts, now)?;
        tracing::info!(user_id, course_id, "Active course selected");
        Ok(progress)
    }

    pub fn progress_view(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<ProgressView, ProgressError> {
        let progress = self.require_progress(user_id)?;
        Ok(ProgressView {
            active_course_id: progress.active_course_id,
            hearts: progress.hearts,
            points: progress.points,
            current_streak: progress.current_streak,
            longest_streak: progress.longest_streak,
            last_activity_date: progress.last_activity_date,
            streak: streak::streak_state(progress.current_streak, progress.last_activity_date, today),
            proficiency_level: progress.proficiency_level,
        })
    }

    pub fn pending_lessons(&self, user_id: &str) -> Result<PendingLessons, ProgressError> {
        let progress = self.require_progress(user_id)?;
        let lessons_pending = match progress.active_course_id {
            Some(course_id) => self.store.count_pending_lessons(user_id, course_id)?,
            None => 0,
        };
        Ok(PendingLessons {
            lessons_pending,
            proficiency_level: progress.proficiency_level,
        })
    }

    pub fn weak_topics(&self, user_id: &str) -> Result<Vec<String>, ProgressError> {
        if user_id.is_empty() {
            return Err(ProgressError::Unauthorized);
        }
        let records = self
            .store
            .recent_performance_records(user_id, self.config.weak_topic_window)?;
        Ok(weak_topics::detect_weak_tags(&records))
    }

    /// Raises the learner one rung when the lessons at their current level
    /// clear both thresholds. Returns the new label when it moved.
    pub fn advance_if_eligible(
        &self,
        user_id: &str,
        course_id: u64,
    ) -> Result<Option<String>, ProgressError> {
        let Some(progress) = self.store.get_user_progress(user_id)? else {
            return Ok(None);
        };
        let rules = AdvancementRules::from(&self.config);
        let current = progress.proficiency_level;

        let mut evidence = Vec::new();
        for lesson in self.store.list_course_lessons(course_id)? {
            let at_level = lesson
                .proficiency_level
                .as_deref()
                .is_some_and(|l| level::same_level(l, &current));
            if !at_level {
                continue;
            }
            let challenge_ids = self
                .store
                .list_challenges(lesson.id)?
                .into_iter()
                .map(|c| c.id)
                .collect();
            evidence.push(LessonEvidence {
                lesson_id: lesson.id,
                challenge_ids,
            });
        }
        if evidence.len() < rules.perfect_lessons {
            return Ok(None);
        }

        let tallies = self.store.answer_tallies(
            user_id,
            evidence.iter().flat_map(|e| e.challenge_ids.iter().copied()),
        )?;
        let assessment = advancement::assess(&evidence, &tallies, &rules);
        let Some(next) = advancement::advance(&current, &assessment, &rules) else {
            return Ok(None);
        };

        let key = keys::user_progress_key(user_id)?;
        let next_tenths = level::to_tenths(level::decode(&next));
        let raised = self
            .store
            .user_progress
            .transaction(|tx| {
                let Some(raw) = tx.get(key.as_bytes())? else {
                    return Ok(false);
                };
                let mut stored = Store::tx_deserialize::<UserProgress, ProgressError>(&raw)?;
                if level::to_tenths(level::decode(&stored.proficiency_level)) >= next_tenths {
                    return Ok(false);
                }
                stored.proficiency_level = next.clone();
                stored.proficiency_float = level::decode(&next);
                stored.updated_at = Utc::now();
                tx.insert(
                    key.as_bytes(),
                    Store::tx_serialize::<_, ProgressError>(&stored)?,
                )?;
                Ok(true)
            })
            .map_err(map_tx_error::<ProgressError>)?;

        if !raised {
            return Ok(None);
        }
        tracing::info!(
            user_id,
            course_id,
            from = %current,
            to = %next,
            perfect = assessment.perfect,
            fast = assessment.fast,
            "Proficiency advanced"
        );
        Ok(Some(next))
    }

    fn resolve_challenge(
        &self,
        user_id: &str,
        challenge_id: u64,
    ) -> Result<ChallengeAncestry, ProgressError> {
        if user_id.is_empty() {
            return Err(ProgressError::Unauthorized);
        }
        self.store
            .get_challenge_ancestry(challenge_id)?
            .ok_or_else(|| ProgressError::not_found("challenge", challenge_id))
    }

    fn require_progress(&self, user_id: &str) -> Result<UserProgress, ProgressError> {
        if user_id.is_empty() {
            return Err(ProgressError::Unauthorized);
        }
        self.store
            .get_user_progress(user_id)?
            .ok_or_else(|| ProgressError::not_found("user_progress", user_id))
    }

    fn tracks_proficiency(&self, course_id: u64) -> bool {
        match self.store.get_course(course_id) {
            Ok(course) => course.is_some_and(|c| c.proficiency_track),
            Err(e) => {
                tracing::warn!(course_id, error = %e, "Course lookup failed; skipping history");
                false
            }
        }
    }

    /// History is appended after the progress commit; a failed append is logged
    /// and the answer still counts.
    fn record_answer(
        &self,
        user_id: &str,
        ancestry: &ChallengeAncestry,
        correct: bool,
        time_spent_seconds: Option<u32>,
        now: DateTime<Utc>,
    ) {
        let record = PerformanceRecord::new(
            user_id,
            ancestry.challenge.id,
            correct,
            time_spent_seconds,
            ancestry.challenge.tags.clone(),
            now,
        );
        if let Err(e) = self.store.append_performance_record(&record) {
            tracing::error!(user_id, challenge_id = ancestry.challenge.id, error = %e, "Failed to append performance record");
        }
    }
}
