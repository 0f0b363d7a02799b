use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Dataset unavailable at '{source_path}': {reason}")]
    DataUnavailable { source_path: String, reason: String },

    #[error("Schema mismatch: {detail}")]
    SchemaMismatch { detail: String },

    #[error("Unknown case id '{case_id}'")]
    UnknownCaseId { case_id: String },

    #[error("Invalid filter: {detail}")]
    InvalidFilter { detail: String },

    #[error("Row {row} is outside the current queue (len {len})")]
    RowOutOfRange { row: usize, len: usize },

    #[error("Invalid config: {detail}")]
    InvalidConfig { detail: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AuditError {
    /// Errors that end the session: the dataset itself is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuditError::DataUnavailable { .. }
                | AuditError::SchemaMismatch { .. }
                | AuditError::Database(_)
        )
    }

    pub(crate) fn schema(detail: impl Into<String>) -> Self {
        AuditError::SchemaMismatch { detail: detail.into() }
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
