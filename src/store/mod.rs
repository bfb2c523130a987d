pub mod keys;
pub mod migrate;
pub mod operations;
pub mod trees;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Db;
use thiserror::Error;

#[derive(Debug)]
pub struct Store {
    db: Db,
    pub courses: sled::Tree,
    pub units: sled::Tree,
    pub lessons: sled::Tree,
    pub challenges: sled::Tree,
    pub challenge_options: sled::Tree,
    pub content_index: sled::Tree,
    pub user_progress: sled::Tree,
    pub challenge_progress: sled::Tree,
    pub performance_records: sled::Tree,
    pub answer_tallies: sled::Tree,
    pub subscriptions: sled::Tree,
    pub config_versions: sled::Tree,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: entity={entity}, key={key}")]
    NotFound { entity: String, key: String },
    #[error("conflict: entity={entity}, key={key}")]
    Conflict { entity: String, key: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("migration error at version {version}: {message}")]
    Migration { version: u32, message: String },
}

impl StoreError {
    pub fn not_found(entity: &str, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            key: key.to_string(),
        }
    }
}

impl Store {
    pub fn open(sled_path: &str) -> Result<Self, StoreError> {
        let db = sled::open(sled_path)?;
        let courses = db.open_tree(trees::COURSES)?;
        let units = db.open_tree(trees::UNITS)?;
        let lessons = db.open_tree(trees::LESSONS)?;
        let challenges = db.open_tree(trees::CHALLENGES)?;
        let challenge_options = db.open_tree(trees::CHALLENGE_OPTIONS)?;
        let content_index = db.open_tree(trees::CONTENT_INDEX)?;
        let user_progress = db.open_tree(trees::USER_PROGRESS)?;
        let challenge_progress = db.open_tree(trees::CHALLENGE_PROGRESS)?;
        let performance_records = db.open_tree(trees::PERFORMANCE_RECORDS)?;
        let answer_tallies = db.open_tree(trees::ANSWER_TALLIES)?;
        let subscriptions = db.open_tree(trees::SUBSCRIPTIONS)?;
        let config_versions = db.open_tree(trees::CONFIG_VERSIONS)?;

        Ok(Self {
            db,
            courses,
            units,
            lessons,
            challenges,
            challenge_options,
            content_index,
            user_progress,
            challenge_progress,
            performance_records,
            answer_tallies,
            subscriptions,
            config_versions,
        })
    }

    pub fn run_migrations(&self) -> Result<(), StoreError> {
        migrate::run(self)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn raw_db(&self) -> &Db {
        &self.db
    }

    /// 由 sled 分配的全局唯一、单调递增 ID；并发写入（批量导入、内容生成）之间不会冲突
    pub fn next_id(&self) -> Result<u64, StoreError> {
        Ok(self.db.generate_id()?)
    }

    pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(value)?)
    }

    pub(crate) fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Deserialize inside a sled transaction closure, aborting on bad bytes.
    pub(crate) fn tx_deserialize<T: DeserializeOwned, E: From<StoreError>>(
        bytes: &[u8],
    ) -> Result<T, ConflictableTransactionError<E>> {
        serde_json::from_slice(bytes)
            .map_err(|e| ConflictableTransactionError::Abort(E::from(StoreError::Serialization(e))))
    }

    pub(crate) fn tx_serialize<T: Serialize, E: From<StoreError>>(
        value: &T,
    ) -> Result<Vec<u8>, ConflictableTransactionError<E>> {
        serde_json::to_vec(value)
            .map_err(|e| ConflictableTransactionError::Abort(E::from(StoreError::Serialization(e))))
    }
}

/// Flatten a sled transaction error into the caller's error type.
pub(crate) fn map_tx_error<E: From<StoreError>>(error: TransactionError<E>) -> E {
    match error {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(storage_error) => E::from(StoreError::Sled(storage_error)),
    }
}
