//! Serializable identifiers and scheduling attributes shared across gates.

use serde::{Deserialize, Serialize};

/// Identifier assigned to a task on submission, unique per scheduler.
pub type TaskId = u64;

/// Admission priority used when a scheduler has priority ordering enabled.
///
/// Variants are declared lowest first so the derived `Ord` ranks
/// `Critical > High > Normal > Low`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Ahead of normal work.
    High,
    /// Admitted before everything else.
    Critical,
}
