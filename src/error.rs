use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the matching engine. Harness-level failures (database,
/// I/O) stay on `anyhow` at the call sites.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Hard failure: the computed batch violated an allocation invariant.
    /// Carries one diagnostic line per offending viewer; nothing is committed.
    #[error("allocation validation failed:\n{}", .0.join("\n"))]
    Validation(Vec<String>),

    /// A historical record matched none of the known shapes.
    #[error("unnormalizable history record: {0}")]
    CorruptHistory(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("participant {participant} is not in group {group}")]
    ParticipantNotInGroup { participant: Uuid, group: String },

    /// Optimistic-lock conflict on the closing-party record. Retryable; the
    /// caller re-fetches and retries exactly once before giving up.
    #[error("closing party for cohort {0} was modified concurrently")]
    ConcurrentModification(String),
}
