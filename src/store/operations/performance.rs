use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use crate::store::keys;
use crate::store::{map_tx_error, Store, StoreError};

/// Append-only answer history. References a challenge without owning it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub id: String,
    pub user_id: String,
    pub challenge_id: u64,
    pub correct: bool,
    /// `None` when the client did not report a duration.
    #[serde(default)]
    pub time_spent_seconds: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PerformanceRecord {
    pub fn new(
        user_id: &str,
        challenge_id: u64,
        correct: bool,
        time_spent_seconds: Option<u32>,
        tags: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            challenge_id,
            correct,
            time_spent_seconds,
            tags,
            created_at,
        }
    }
}

/// Running per-(user, challenge) summary of the history, kept beside it so
/// advancement reads a handful of rows instead of the whole log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerTally {
    pub correct: u32,
    pub incorrect: u32,
    /// Correct answers that came with a duration.
    pub timed_correct: u32,
    pub correct_seconds: u64,
}

impl AnswerTally {
    pub fn record(&mut self, correct: bool, time_spent_seconds: Option<u32>) {
        if !correct {
            self.incorrect = self.incorrect.saturating_add(1);
            return;
        }
        self.correct = self.correct.saturating_add(1);
        if let Some(secs) = time_spent_seconds {
            self.timed_correct = self.timed_correct.saturating_add(1);
            self.correct_seconds = self.correct_seconds.saturating_add(secs as u64);
        }
    }
}

impl Store {
    /// Appends the record and folds it into the challenge tally in one
    /// transaction. A record id seen before is a conflict.
    pub fn append_performance_record(&self, record: &PerformanceRecord) -> Result<(), StoreError> {
        let key = keys::performance_record_key(
            &record.user_id,
            record.created_at.timestamp_millis(),
            &record.id,
        )?;
        let tally_key = keys::answer_tally_key(&record.user_id, record.challenge_id)?;
        let bytes = Self::serialize(record)?;

        (&self.performance_records, &self.answer_tallies)
            .transaction(|(tx_records, tx_tallies)| {
                if tx_records.get(key.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(StoreError::Conflict {
                        entity: "performance_record".to_string(),
                        key: key.clone(),
                    }));
                }
                tx_records.insert(key.as_bytes(), bytes.as_slice())?;

                let mut tally = match tx_tallies.get(tally_key.as_bytes())? {
                    Some(raw) => Self::tx_deserialize::<AnswerTally, StoreError>(&raw)?,
                    None => AnswerTally::default(),
                };
                tally.record(record.correct, record.time_spent_seconds);
                tx_tallies.insert(
                    tally_key.as_bytes(),
                    Self::tx_serialize::<_, StoreError>(&tally)?,
                )?;
                Ok(())
            })
            .map_err(map_tx_error::<StoreError>)
    }

    /// Tallies for the given challenges; challenges never answered are absent.
    pub fn answer_tallies(
        &self,
        user_id: &str,
        challenge_ids: impl IntoIterator<Item = u64>,
    ) -> Result<HashMap<u64, AnswerTally>, StoreError> {
        let mut out = HashMap::new();
        for challenge_id in challenge_ids {
            let key = keys::answer_tally_key(user_id, challenge_id)?;
            if let Some(raw) = self.answer_tallies.get(key.as_bytes())? {
                out.insert(challenge_id, Self::deserialize(&raw)?);
            }
        }
        Ok(out)
    }

    /// Newest first, at most `limit` rows.
    pub fn recent_performance_records(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<PerformanceRecord>, StoreError> {
        let prefix = keys::performance_record_prefix(user_id)?;
        let mut out = Vec::with_capacity(limit.min(256));
        for item in self.performance_records.scan_prefix(prefix.as_bytes()) {
            if out.len() >= limit {
                break;
            }
            let (_, value) = item?;
            out.push(Self::deserialize(&value)?);
        }
        Ok(out)
    }

    #[cfg(test)]
    pub fn all_performance_records(
        &self,
        user_id: &str,
    ) -> Result<Vec<PerformanceRecord>, StoreError> {
        self.recent_performance_records(user_id, usize::MAX)
    }
}
