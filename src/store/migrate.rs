use std::collections::HashMap;

use crate::progression::level;
use crate::store::keys;
use crate::store::operations::performance::{AnswerTally, PerformanceRecord};
use crate::store::operations::progress::UserProgress;
use crate::store::{Store, StoreError};

const VERSION_KEY: &str = "_meta:version";

type MigrationFn = fn(&Store) -> Result<(), StoreError>;

fn migrations() -> Vec<(&'static str, MigrationFn)> {
    vec![
        ("001_initial", m001_initial),
        ("002_rederive_proficiency_float", m002_rederive_proficiency_float),
        ("003_rebuild_answer_tallies", m003_rebuild_answer_tallies),
    ]
}

/// 执行所有未应用的迁移。
///
/// 每个迁移必须幂等：进程可能在迁移完成后、版本写入前中断，重启时会再次执行。
/// 版本号只增不减。
pub fn run(store: &Store) -> Result<(), StoreError> {
    let current = get_current_version(store)?;

    for (index, (name, func)) in migrations().iter().enumerate() {
        let version = (index + 1) as u32;
        if version > current {
            tracing::info!(version, name, "Running migration");
            func(store)?;
            set_version(store, version)?;
            tracing::info!(version, name, "Migration complete");
        } else {
            tracing::debug!(version, name, "Migration already applied, skipping");
        }
    }

    Ok(())
}

pub fn get_current_version(store: &Store) -> Result<u32, StoreError> {
    match store.config_versions.get(VERSION_KEY.as_bytes())? {
        Some(raw) => {
            let bytes: [u8; 4] = raw.as_ref().try_into().map_err(|_| StoreError::Migration {
                version: 0,
                message: format!("corrupt version marker ({} bytes)", raw.len()),
            })?;
            Ok(u32::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

pub fn set_version(store: &Store, version: u32) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    if version < current {
        return Err(StoreError::Migration {
            version,
            message: format!("Refuse to downgrade from {current} to {version}"),
        });
    }

    store
        .config_versions
        .insert(VERSION_KEY.as_bytes(), &version.to_be_bytes())?;
    Ok(())
}

fn m001_initial(_store: &Store) -> Result<(), StoreError> {
    Ok(())
}

/// The label is authoritative; rows whose float drifted from it are rewritten.
fn m002_rederive_proficiency_float(store: &Store) -> Result<(), StoreError> {
    let mut repaired = 0usize;
    for item in store.user_progress.iter() {
        let (key, value) = item?;
        let mut progress: UserProgress = Store::deserialize(&value)?;
        let derived = level::decode(&progress.proficiency_level);
        if level::to_tenths(derived) != level::to_tenths(progress.proficiency_float)
            || level::encode(derived) != progress.proficiency_level
        {
            progress.proficiency_float = derived;
            progress.proficiency_level = level::encode(derived);
            store
                .user_progress
                .insert(key, Store::serialize(&progress)?)?;
            repaired += 1;
        }
    }
    if repaired > 0 {
        tracing::warn!(repaired, "Re-derived drifted proficiency values");
    }
    Ok(())
}

/// Tallies are derived data: rebuilt from scratch out of the history.
fn m003_rebuild_answer_tallies(store: &Store) -> Result<(), StoreError> {
    let mut tallies: HashMap<(String, u64), AnswerTally> = HashMap::new();
    for item in store.performance_records.iter() {
        let (_, value) = item?;
        let record: PerformanceRecord = Store::deserialize(&value)?;
        tallies
            .entry((record.user_id, record.challenge_id))
            .or_default()
            .record(record.correct, record.time_spent_seconds);
    }

    store.answer_tallies.clear()?;
    for ((user_id, challenge_id), tally) in &tallies {
        let key = keys::answer_tally_key(user_id, *challenge_id)?;
        store
            .answer_tallies
            .insert(key.as_bytes(), Store::serialize(tally)?)?;
    }
    tracing::info!(tallies = tallies.len(), "Answer tallies rebuilt");
    Ok(())
}
