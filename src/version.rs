// src/version.rs
//! Version controller: monotonic nonce handling for optimistic concurrency.
//!
//! The checks here are advisory; the ledger is the final arbiter and rejects
//! any commitment whose nonce is not exactly `current + 1`. The controller's
//! job is to fail fast locally and to reconcile state after a ledger
//! rejection so the caller sees the nonce it must retry against.

use crate::error::StoreError;
use crate::ledger::LedgerAdapter;
use crate::models::payload::DocIdHash;

/// Proposes the next nonce for a document currently at `current`.
pub fn propose_nonce(current: u64) -> Result<u64, StoreError> {
    current.checked_add(1).ok_or(StoreError::NonceOverflow)
}

/// Validates a proposed nonce against the current one.
///
/// Accepts only `proposed == current + 1`; anything else is a
/// [`StoreError::Conflict`].
pub fn validate(proposed: u64, current: u64) -> Result<(), StoreError> {
    let expected = propose_nonce(current)?;
    if proposed == expected {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            current_nonce: current,
            proposed_nonce: proposed,
        })
    }
}

/// Builds the conflict error surfaced after a ledger nonce rejection.
///
/// Re-fetches the commitment so the error carries the nonce the document is
/// actually at, which is what the caller needs for its retry.
pub async fn reconcile_conflict<L: LedgerAdapter + ?Sized>(
    ledger: &L,
    doc_id_hash: DocIdHash,
    proposed_nonce: u64,
) -> StoreError {
    match ledger.get_commitment(doc_id_hash).await {
        Ok(commitment) => StoreError::Conflict {
            current_nonce: commitment.nonce,
            proposed_nonce,
        },
        Err(err) => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_propose_increments() {
        assert_eq!(propose_nonce(0).unwrap(), 1);
        assert_eq!(propose_nonce(41).unwrap(), 42);
    }

    #[test]
    fn test_propose_rejects_overflow() {
        assert!(matches!(
            propose_nonce(u64::MAX),
            Err(StoreError::NonceOverflow)
        ));
    }

    #[test]
    fn test_validate_accepts_exact_successor() {
        assert!(validate(1, 0).is_ok());
        assert!(validate(8, 7).is_ok());
    }

    #[test]
    fn test_validate_rejects_gaps_and_replays() {
        // Replay of the current nonce.
        assert!(matches!(
            validate(7, 7),
            Err(StoreError::Conflict {
                current_nonce: 7,
                proposed_nonce: 7
            })
        ));
        // Skipped a version.
        assert!(matches!(validate(9, 7), Err(StoreError::Conflict { .. })));
        // Stale proposal.
        assert!(matches!(validate(3, 7), Err(StoreError::Conflict { .. })));
    }
}
