use thiserror::Error;

/// Errors raised by the load pipeline.
///
/// Data-quality findings are never reported through this type; validators
/// return them as [`crate::validate::ValidationIssue`] values instead.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upsert precondition failed: {0}")]
    UpsertPrecondition(String),

    #[error("Dataset is missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoadError {
    pub fn config(message: impl Into<String>) -> Self {
        LoadError::Config(message.into())
    }

    pub fn invalid_identifier(name: &str, reason: impl Into<String>) -> Self {
        LoadError::InvalidIdentifier {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// True for cancellation and deadline errors, which callers usually
    /// surface differently from database failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, LoadError::Cancelled | LoadError::DeadlineExceeded)
    }
}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_lists_names() {
        let err = LoadError::MissingColumns(vec!["id".to_string(), "amount".to_string()]);
        assert_eq!(
            err.to_string(),
            "Dataset is missing required column(s): id, amount"
        );
    }

    #[test]
    fn cancellation_variants_are_flagged() {
        assert!(LoadError::Cancelled.is_cancellation());
        assert!(LoadError::DeadlineExceeded.is_cancellation());
        assert!(!LoadError::config("bad").is_cancellation());
    }
}
