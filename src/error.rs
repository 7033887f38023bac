use thiserror::Error;

#[derive(Error, Debug)]
pub enum BizqlError {
    /// Missing or unusable configuration: absent files, bad JSON, or an
    /// entity/attribute with no physical mapping. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration that parsed but breaks a model rule.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A vocabulary phrase with no resolvable mapping. Callers usually
    /// recover from this one.
    #[error("Term not found: {0}")]
    TermNotFound(String),

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BizqlError {
    /// True for errors that abort a compile outright.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BizqlError::TermNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, BizqlError>;
