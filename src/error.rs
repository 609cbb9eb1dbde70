// =============================================================================
// Error taxonomy — maps the five error classes of the error-handling design
// onto one typed enum so callers can branch on *kind*, not on message text.
// =============================================================================

use thiserror::Error;

/// Outcome of one stage of the per-epoch sync state machine, or of a
/// reconciliation-worker iteration.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient RPC / network failure — already retried up to `RETRY_MAX`
    /// by the caller before this variant is constructed.
    #[error("transient failure: {0:#}")]
    Transient(#[source] anyhow::Error),

    /// Data validation failed at a named stage; the epoch is marked FAILED
    /// and retried on a later reconciliation pass, not within this one.
    #[error("validation failed at {stage}: {message}")]
    Validation { stage: &'static str, message: String },

    /// Lock busy or unique-key collision — a competing actor owns the epoch.
    /// Treated as SUCCESS(skip), not propagated as a real error.
    #[error("concurrency conflict: {reason}")]
    Concurrency { reason: &'static str },

    /// The trader missed its send window. Logged, never retried.
    #[error("send window missed: {reason}")]
    SendWindowMissed { reason: String },

    /// Unrecoverable: malformed configuration, cannot reach the database,
    /// missing contract ABI. The process should exit non-zero.
    #[error("fatal: {0:#}")]
    Fatal(#[source] anyhow::Error),
}

impl SyncError {
    /// True for the two outcomes a reconciliation worker should treat as
    /// "this epoch is handled for now, move on" rather than surface loudly.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Stage tag recorded on the failed-epoch row, when applicable.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Validation { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_is_skip_not_fatal() {
        let e = SyncError::Concurrency { reason: "locked" };
        assert!(e.is_skip());
        assert!(!e.is_fatal());
    }

    #[test]
    fn validation_carries_stage() {
        let e = SyncError::Validation {
            stage: "VALIDATE",
            message: "price change > 20%".into(),
        };
        assert_eq!(e.stage(), Some("VALIDATE"));
    }
}
