//! Error types for the patchport core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Marker errors
// ---------------------------------------------------------------------------

/// Structural errors in a file's start/end marker pairs.
///
/// Any of these is fatal for the affected file: the file is skipped and
/// reported, the batch continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkerError {
    /// An end marker appeared with no open region.
    #[error("end marker on line {0} has no matching start")]
    UnexpectedEnd(usize),

    /// A start marker appeared while a previous region was still open.
    #[error("start marker on line {line} while region opened on line {open_line} is unclosed")]
    NestedStart {
        line: usize,
        open_line: usize,
    },

    /// The file ended with an open region.
    #[error("start marker on line {0} is never closed")]
    UnclosedStart(usize),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Record errors
// ---------------------------------------------------------------------------

/// Errors from the runtime / error record persistence layer.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record file does not exist yet (run discovery first).
    #[error("runtime record not found at '{0}' — run discovery first")]
    NotInitialized(String),

    /// The record file could not be parsed.
    #[error("record parse error in '{path}': {detail}")]
    ParseError {
        path: String,
        detail: String,
    },

    /// Generic I/O error.
    #[error("record I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// VCS errors
// ---------------------------------------------------------------------------

/// Errors from the container-repository collaborator (git2).
#[derive(Debug, Error)]
pub enum VcsError {
    /// The container path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// The configured baseline ref could not be resolved.
    #[error("baseline ref not found: {0}")]
    RefNotFound(String),

    /// The file does not exist at the baseline ref.
    #[error("'{path}' not found at baseline ref '{reference}'")]
    PathNotFound {
        reference: String,
        path: String,
    },

    /// The blob at the baseline ref is not valid UTF-8 text.
    #[error("'{0}' at the baseline ref is not UTF-8 text")]
    NotText(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// Generic I/O wrapper.
    #[error("vcs I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

/// Errors from tree walking during discovery and extraction.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A configured root directory is missing.
    #[error("directory not found: {0}")]
    RootNotFound(String),

    /// A walked path could not be made relative to its root.
    #[error("'{path}' is not under root '{root}'")]
    OutsideRoot {
        root: String,
        path: String,
    },

    /// Generic I/O error during the walk.
    #[error("discovery I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
