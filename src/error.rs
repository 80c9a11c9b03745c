use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ArchiveError {
    #[error("no curatorial record matches {0}")]
    IdentityNotFound(String),

    #[error("{query} matches {count} curatorial records")]
    IdentityAmbiguous { query: String, count: usize },

    #[error("{key} belongs to {found}, row names {given}")]
    IdentityMismatch {
        key: String,
        found: String,
        given: String,
    },

    #[error("invalid staging row: {0}")]
    InvalidRow(String),

    #[error("cannot plan archive path: {0}")]
    Planning(String),

    #[error("destination already exists with different content: {0}")]
    MoveConflict(String),

    #[error("filesystem error: {0}")]
    Io(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("catalog notification failed: {0}")]
    Notify(String),

    #[error("ledger write failed: {0}")]
    Ledger(String),

    #[error("missing config file specimen-archiver.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("curatorial database error: {0}")]
    Database(String),

    #[error("Google Sheets request failed: {0}")]
    SheetsHttp(String),

    #[error("Google Sheets returned status {status}: {message}")]
    SheetsStatus { status: u16, message: String },

    #[error("another run holds the lock at {0}")]
    LockHeld(PathBuf),
}

impl ArchiveError {
    pub fn kind(&self) -> &'static str {
        match self {
            ArchiveError::IdentityNotFound(_) => "identity_not_found",
            ArchiveError::IdentityAmbiguous { .. } => "identity_ambiguous",
            ArchiveError::IdentityMismatch { .. } => "identity_mismatch",
            ArchiveError::InvalidRow(_) => "invalid_row",
            ArchiveError::Planning(_) => "planning_error",
            ArchiveError::MoveConflict(_) => "move_conflict",
            ArchiveError::Io(_) => "io_failure",
            ArchiveError::Upload(_) => "upload_failure",
            ArchiveError::Notify(_) => "notify_failure",
            ArchiveError::Ledger(_) => "ledger_failure",
            ArchiveError::MissingConfig
            | ArchiveError::ConfigRead(_)
            | ArchiveError::ConfigParse(_)
            | ArchiveError::MissingEnv(_) => "config_error",
            ArchiveError::Database(_) => "database_error",
            ArchiveError::SheetsHttp(_) | ArchiveError::SheetsStatus { .. } => "sheets_error",
            ArchiveError::LockHeld(_) => "lock_held",
        }
    }

    /// Errors a later run may clear without anyone editing the staging row.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArchiveError::Upload(_)
                | ArchiveError::Notify(_)
                | ArchiveError::Ledger(_)
                | ArchiveError::Database(_)
                | ArchiveError::SheetsHttp(_)
                | ArchiveError::SheetsStatus { .. }
        )
    }
}
