//! Error taxonomy shared across the benchlab crates.
//!
//! Only genuinely fatal conditions are errors. A parameter point failing a
//! benchmark's validity predicate is ordinary control flow (the scheduler
//! skips the group or stops the point's remaining repetitions) and never
//! surfaces here.

use std::path::PathBuf;

use thiserror::Error;

/// Canonical error type for campaign configuration and execution.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// Fatal misconfiguration: double configuration, constants/variables name
    /// collision, multi-valued fetch parameter in a bridged campaign, or an
    /// unsupported feature combination.
    #[error("configuration error: {0}")]
    Config(String),

    /// A command exited with a status that was not in the ignore policy.
    /// The captured output is kept so callers can log partial results.
    #[error("command `{command}` exited with status {code}")]
    Execution {
        command: String,
        code: i32,
        output: String,
    },

    /// A result file could not be parsed while resuming.
    #[error("malformed result file {path}: {reason}")]
    ResultFile { path: PathBuf, reason: String },

    /// A staged-benchmark phase was invoked without a required argument.
    #[error("missing required arguments in {step}(): {}", missing.join(", "))]
    MissingStepArg { step: String, missing: Vec<String> },

    /// The debug escape hatch ran; the campaign stops without collecting
    /// results. Non-continuable by design.
    #[error("debug session finished, campaign aborted")]
    DebugSessionDone,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CampaignError>;

impl CampaignError {
    pub fn config(msg: impl Into<String>) -> Self {
        CampaignError::Config(msg.into())
    }
}
