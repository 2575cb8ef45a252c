use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for all Keel operations.
#[derive(Debug, Error, Diagnostic)]
pub enum KeelError {
    /// Dependency resolution failed (unresolvable root, missing modules, etc.).
    #[error("Dependency resolution failed: {message}")]
    Resolution { message: String },

    /// A selected component is refused by a reject constraint.
    #[error("Rejected selection: {message}")]
    #[diagnostic(help("Loosen the reject constraint or pin an accepted version"))]
    RejectedSelection { message: String },

    /// The conflict resolver could not choose between competing components.
    #[error("Conflict resolution failed: {message}")]
    ConflictResolution { message: String },

    /// Component metadata could not be obtained.
    #[error("Metadata error: {message}")]
    Metadata { message: String },

    /// Catch-all for miscellaneous errors.
    #[error("{message}")]
    Generic { message: String },
}

/// Convenience alias for `miette::Result<T>`.
pub type KeelResult<T> = miette::Result<T>;
