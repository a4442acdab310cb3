use thiserror::Error;

/// Result of any operation performed inside an atomic section.
///
/// The `Err` arm never describes a domain outcome (a missing key, a full
/// reservation table): those travel inside `Ok` as `bool`/`Option`. An
/// `Err` means the section cannot commit and its effects are discarded.
pub type StmResult<T> = Result<T, StmError>;

/// Reasons an atomic section did not commit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StmError {
    /// A concurrent section committed a write that invalidates what this
    /// section read, or a cell it touched was retired.
    #[error("section conflicted with a concurrent commit")]
    Conflict,

    /// Client logic asked for the section to be thrown away.
    #[error("section was cancelled by the caller")]
    Cancelled,

    /// An allocation made on behalf of the section failed.
    #[error("allocation failed inside the section")]
    ResourceExhausted,

    /// The section body panicked; the section was rolled back.
    #[error("section body panicked: {0}")]
    Panicked(String),

    /// `try_atomically` gave up after the configured number of attempts.
    #[error("section did not commit after {attempts} attempts")]
    RetryLimit { attempts: u64 },
}

impl StmError {
    /// Whether re-running the section from the start may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StmError::Conflict | StmError::Cancelled | StmError::ResourceExhausted
        )
    }
}

impl From<std::collections::TryReserveError> for StmError {
    fn from(_: std::collections::TryReserveError) -> Self {
        StmError::ResourceExhausted
    }
}

// Test:
