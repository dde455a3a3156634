//! Final accept/drop decision for an acquired record

use std::fmt;

use crate::crawler::Record;

/// Why a record was not emitted. Expected outcome, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// None of the record's images could be stored
    NoImages,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NoImages => write!(f, "no images"),
        }
    }
}

/// Outcome of [`complete`]
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Emit(Record),
    Drop(DropReason),
}

/// Emit a record only if it carries at least one stored image
pub fn complete(record: Record) -> Completion {
    if record.image_paths.is_empty() {
        Completion::Drop(DropReason::NoImages)
    } else {
        Completion::Emit(record)
    }
}
