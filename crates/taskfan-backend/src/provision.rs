//! Outcome of idempotent create operations.

use std::fmt;

/// Result of creating a queue or table that may already exist.
///
/// Another run of the same job may provision concurrently, so finding the
/// resource in place is a success, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

impl Provisioned {
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created)
    }
}

impl fmt::Display for Provisioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::AlreadyExists => f.write_str("already-exists"),
        }
    }
}
