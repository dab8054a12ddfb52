//! The error type shared by every component of the core: preparation, the transformer family,
//! the pipeline loop, the trim worker and the run controller all return [`Error`].

/// Errors that can surface anywhere in the transfer pipeline core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A statement failed against one of the connections (source or a destination).
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A precondition the caller is responsible for was violated, e.g. requesting replicated
    /// mode preparation without any destination connections. These are programming errors with
    /// no recovery path, not data errors.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Settings/config-level problem, surfaced before any database work begins.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The run was interrupted (SIGINT). Routed through the same teardown path as any other
    /// pipeline error.
    #[error("interrupted")]
    Interrupted,
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;
