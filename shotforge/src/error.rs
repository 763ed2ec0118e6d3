//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A remote collaborator failed (network, 5xx, rate limit). Retried by the worker.
    #[error("{service} request failed: {message}")]
    Remote { service: String, message: String },

    /// The job cannot succeed no matter how often it is retried.
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// The caller no longer holds the lease on this job.
    #[error("Lease lost for job {job_id}")]
    LeaseLost { job_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn remote(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Remote {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn lease_lost(job_id: impl Into<String>) -> Self {
        Self::LeaseLost {
            job_id: job_id.into(),
        }
    }

    /// Whether retrying the failed job is pointless.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_) | Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_classification() {
        assert!(Error::permanent("campaign gone").is_permanent());
        assert!(Error::validation("bad payload").is_permanent());
        assert!(!Error::remote("storage", "503").is_permanent());
        assert!(!Error::lease_lost("job-1").is_permanent());
    }

    #[test]
    fn test_remote_display() {
        let err = Error::remote("prompt", "HTTP 502");
        assert_eq!(err.to_string(), "prompt request failed: HTTP 502");
    }
}
