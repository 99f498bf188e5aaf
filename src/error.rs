//! Crate-wide error kinds.
//!
//! Filesystem and subprocess plumbing return [`color_eyre::Result`] with rich
//! `.context()` chains, the same as throughout this crate. This enum exists
//! only at the boundaries that need to dispatch on *which kind* of failure
//! occurred — cache checks treat some kinds as a recoverable miss, `main`
//! uses the kind to pick an exit code.

use thiserror::Error;

/// One of the six error kinds named by the build engine's contract.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem or subprocess-spawn failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Recipe source failed to load or compile.
    #[error("failed to load recipe source: {message}")]
    Parse { message: String },

    /// A recipe body reported failure, or a subprocess exited non-zero.
    #[error("target {target} failed to build")]
    Exec { target: String },

    /// Hashing a dependency or output failed.
    #[error("failed to hash {path}: {source}")]
    Hash { path: String, source: std::io::Error },

    /// Trace codec failure: bad magic, bad version, or corrupted content.
    #[error("corrupt trace: {message}")]
    Trace { message: String },

    /// Allocation failure. Never constructed in safe Rust; kept so the enum
    /// is a faithful superset of the spec's error-kind taxonomy.
    #[error("out of memory")]
    Memory,
}

pub type Result<T> = std::result::Result<T, Error>;
