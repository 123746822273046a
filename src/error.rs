// src/error.rs

use std::path::PathBuf;

use thiserror::Error;

/// Failures that callers (and the binaries) need to tell apart. Everything
/// else travels as a plain `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("link pairing failed for `{entity}`: {reason}")]
    Pairing { entity: String, reason: String },

    #[error("GET {url} returned status {status}")]
    Fetch { url: String, status: u16 },

    #[error("file {} doesn't exist, please run the main program first", .0.display())]
    MissingPrerequisite(PathBuf),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn pairing(entity: &str, reason: impl Into<String>) -> Self {
        Error::Pairing {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }

    /// Configuration-class failures abort the whole run; the binaries map
    /// them to a distinct exit code.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Pairing { .. } | Error::MissingPrerequisite(_)
        )
    }
}

/// Exit code for a top-level failure: 2 for configuration-class errors, 1
/// otherwise.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(e) if e.is_configuration() => 2,
        _ => 1,
    }
}
