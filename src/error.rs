//! Error types for claimsweep.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("request not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A second open primary for the same target was rejected at enqueue time.
    #[error("target {target_id} already has an open primary request")]
    DuplicatePrimary { target_id: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// SQLSTATE `lock_not_available`, raised by `FOR UPDATE NOWAIT`.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Whether a database error means another session holds a row we tried to
/// lock without waiting.
pub(crate) fn is_lock_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(LOCK_NOT_AVAILABLE),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_not_lock_conflicts() {
        assert!(!is_lock_conflict(&sqlx::Error::RowNotFound));
        assert!(!is_lock_conflict(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn duplicate_primary_names_the_target() {
        let err = Error::DuplicatePrimary {
            target_id: "sheet-42".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "target sheet-42 already has an open primary request"
        );
    }
}
