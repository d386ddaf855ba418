//! The closed error taxonomy the build orchestration engine can raise.
//!
//! `EbError` plays the role Cargo's `CargoError`/`CargoResultExt` pairing
//! plays in the teacher: call sites attach human context with
//! `anyhow::Context` as errors propagate, while code that needs to match on
//! *kind* (the orchestrator deciding whether a failure is recoverable, a
//! regtest deciding whether to continue) downcasts to this enum via
//! `anyhow::Error::downcast_ref`.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::ModuleId;

pub type EbResult<T> = std::result::Result<T, anyhow::Error>;

#[derive(Debug, Error)]
pub enum EbError {
    #[error("failed to parse easyconfig {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("easyconfig {name} is invalid: {reason}")]
    ValidationError { name: String, reason: String },

    #[error("template variable(s) left unresolved in {name}: {vars:?}")]
    TemplateUnresolved { name: String, vars: Vec<String> },

    #[error("missing dependencies: {0:?}")]
    MissingDependencies(Vec<ModuleId>),

    #[error("dependency cycle detected: {0:?}")]
    CycleDetected(Vec<ModuleId>),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch { path: PathBuf, expected: String, actual: String },

    #[error("no checksum provided for {path}")]
    MissingChecksum { path: PathBuf },

    #[error("failed to fetch {name} from any configured source: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("failed to apply patch {patch} to {target}: {reason}")]
    PatchFailed { patch: String, target: PathBuf, reason: String },

    #[error("command `{command}` failed with exit code {exit_code:?}")]
    CommandFailed { command: String, exit_code: Option<i32> },

    #[error("command `{command}` exceeded its timeout")]
    TimeoutExceeded { command: String },

    #[error("sanity check failed for {name}: {reason}")]
    SanityCheckFailed { name: String, reason: String },

    #[error("modules tool error: {0}")]
    ModuleToolError(String),

    #[error("module conflict: {0}")]
    ModuleConflict(String),

    #[error("install lock held for {module_id}")]
    LockHeld { module_id: ModuleId },

    #[error("I/O failure at {path}: {reason}")]
    IOFailed { path: PathBuf, reason: String },

    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl EbError {
    /// Whether this kind of failure can be "skipped over" in a regtest run
    /// rather than aborting the whole invocation (see §7 propagation rules).
    pub fn is_recoverable_in_regtest(&self) -> bool {
        !matches!(self, EbError::CycleDetected(_) | EbError::Cancelled(_))
    }
}
