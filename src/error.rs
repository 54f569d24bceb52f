// src/error.rs

//! Error types shared across the porg library

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the porg core
#[derive(Error, Debug)]
pub enum Error {
    /// A package, record or file was not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid caller-supplied input (bad prefix, bad flag combination, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Recipe grammar violation
    #[error("parse error at line {line}, column {column}: {reason}")]
    ParseError {
        line: usize,
        column: usize,
        reason: String,
    },

    /// Dependency cycle; `path` names the nodes on the cycle
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// No recipe exists for the named package
    #[error("no recipe found for package '{0}'")]
    MissingRecipe(String),

    /// Every source entry was tried and none verified
    #[error("no valid source for '{0}': all entries exhausted")]
    NoValidSource(String),

    /// Downloaded file did not match its declared checksum
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Detached signature verification failed
    #[error("signature verification failed for {0}")]
    SignatureInvalid(String),

    /// Archive extraction failed
    #[error("extract failed: {0}")]
    ExtractFailed(String),

    /// Patch application failed
    #[error("patch failed: {0}")]
    PatchFailed(String),

    /// A hook exited non-zero
    #[error("hook '{stage}' failed with exit code {code}")]
    HookFailed { stage: String, code: i32 },

    /// The build command block failed
    #[error("build failed for {package}: {reason}")]
    BuildFailed { package: String, reason: String },

    /// The install command block failed
    #[error("install failed for {package}: {reason}")]
    InstallFailed { package: String, reason: String },

    /// Packaging (tar/compress) failed
    #[error("packaging failed: {0}")]
    PackageFailed(String),

    /// The requested isolation primitive is unavailable
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// The installed DB lock could not be acquired within the retry budget
    #[error("installed DB is locked (lock dir: {0})")]
    DbLocked(PathBuf),

    /// The installed DB file is not valid JSON of the expected shape
    #[error("installed DB is corrupt: {0}")]
    DbCorrupt(String),

    /// Removal refused because installed packages still depend on the target
    #[error("cannot remove '{package}': {} dependent(s): {}", dependents.len(), dependents.join(", "))]
    HasDependents {
        package: String,
        dependents: Vec<String>,
    },

    /// Network or transfer failure
    #[error("download failed: {0}")]
    DownloadError(String),

    /// Generic I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Operation requires privileges the process lacks
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The run was interrupted (SIGINT/SIGTERM)
    #[error("interrupted during {0}")]
    Interrupted(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            Error::PermissionDenied(e.to_string())
        } else {
            Error::IoError(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DbCorrupt(e.to_string())
    }
}

impl Error {
    /// Process exit code for this error per the CLI contract
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Interrupted(_) => 130,
            Error::HasDependents { .. } | Error::NotFound(_) => 1,
            _ => 2,
        }
    }
}
