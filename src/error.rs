//! Fatal setup errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::capture::{CaptureError, FilterError};
use crate::decoder::DecoderError;
use crate::srtp::{KeyError, PolicyError, SuiteError};

/// Anything that stops the decoder before the first frame.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Suite(#[from] SuiteError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("key not provided")]
    KeyNotProvided,
    #[error("key provided but no security services requested")]
    UnexpectedKey,
    #[error("setting ROC (-r) requires -s <ssrc>")]
    RocWithoutSsrc,
    #[error("set debug module ({0}) failed: no such module")]
    UnknownDebugModule(String),
    #[error("invalid SSRC '{0}'")]
    InvalidSsrc(String),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("failed to load config file {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },
    #[error(transparent)]
    Decoder(#[from] DecoderError),
}

impl ConfigError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::Filter(_) => 2,
            _ => 1,
        }
    }
}
