//! Registry error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from registry operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A stored row could not be decoded back into a bag.
    #[error("Corrupt registry record for bag '{id}': {reason}")]
    CorruptRecord { id: String, reason: String },

    /// A compare-and-set state transition found the row already changed.
    #[error("Conflicting update for bag '{id}': state changed underneath the transition")]
    ConflictingUpdate { id: String },
}
