// src/error.rs

use thiserror::Error;

/// Errors raised by the survey core. The shell (`pipeline`, `output`, `main`)
/// wraps these in `anyhow` with context.
#[derive(Error, Debug)]
pub enum BpsError {
    /// Unexpected header or body shape in one release. Fatal for that file only.
    #[error("malformed release {release}: {reason}")]
    Format { release: String, reason: String },

    /// The requested release was never published.
    #[error("release {release} is not available")]
    NotFound { release: String },

    /// A documented invariant was violated. Always fatal for the run.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Month 0 (or > 12) reached the run-rate projection.
    #[error("cannot project from month {0}")]
    InvalidMonth(u32),

    #[error("invalid release request: {0}")]
    InvalidRelease(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl BpsError {
    pub fn format(release: impl ToString, reason: impl Into<String>) -> Self {
        BpsError::Format {
            release: release.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(release: impl ToString) -> Self {
        BpsError::NotFound {
            release: release.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BpsError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, BpsError>;
