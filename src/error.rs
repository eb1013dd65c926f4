use std::fmt;
use thiserror::Error;

/// Errors reported by the hazard table and the structures built on it.
///
/// Contention is never an error: a failed compare-and-swap is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HazardError {
    #[error("Hazard slot index out of range: {index} >= {slots}")]
    SlotOutOfRange { index: usize, slots: usize },
    #[error("Null pointer passed to the hazard table")]
    NullPointer,
    /// Every record belongs to a live handle.
    #[error("Every hazard record is in use (max_threads = {max_threads})")]
    TableFull { max_threads: usize },
    #[error("Hazard table has too few slots per thread: need {required}, have {available}")]
    TooFewSlots { required: usize, available: usize },
    #[error("Invalid hazard table configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type HazardResult<T> = Result<T, HazardError>;

/// An insertion that could not claim a hazard record. Carries the item back.
#[derive(Error)]
#[error("insert rejected: {kind}")]
pub struct InsertError<T> {
    item: T,
    kind: HazardError,
}

impl<T> InsertError<T> {
    pub(crate) fn new(item: T, kind: HazardError) -> Self {
        InsertError { item, kind }
    }

    pub fn kind(&self) -> HazardError {
        self.kind
    }

    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Debug for InsertError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InsertError").field("kind", &self.kind).finish()
    }
}
