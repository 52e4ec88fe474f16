//! error types for dark-market
//!
//! cryptographic and format errors abort the operation before any state is
//! written. lifecycle and authorization errors are returned to the caller
//! as-is; nothing in the core retries.

use thiserror::Error;

use crate::bet::Side;
use crate::correlator::{ComputationOffset, ComputationState};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // === crypto / format errors ===
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid nonce length: expected {expected} bytes, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("invalid public key: key agreement was not contributory")]
    InvalidPublicKey,

    #[error("malformed receipt: {0}")]
    MalformedReceipt(String),

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("decrypted value does not fit in 64 bits")]
    ValueOutOfRange,

    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),

    #[error("invalid prediction {0}: must be 0 or 1")]
    InvalidPrediction(u8),

    // === market lifecycle ===
    #[error("question too long: {len} bytes, max {max}")]
    QuestionTooLong { len: usize, max: usize },

    #[error("end time {end_time} is not after current time {now}")]
    InvalidEndTime { end_time: u64, now: u64 },

    #[error("market {0} not found")]
    MarketNotFound(u64),

    #[error("market {0} already exists")]
    MarketExists(u64),

    #[error("market has already ended")]
    MarketEnded,

    #[error("market has not ended yet")]
    MarketNotEnded,

    #[error("market is already resolved")]
    MarketAlreadyResolved,

    #[error("market is not resolved")]
    MarketNotResolved,

    #[error("market resolution already in flight (offset {0})")]
    ResolutionPending(ComputationOffset),

    #[error("market {market_id} still has {pending} bet(s) in flight")]
    BetsPending { market_id: u64, pending: u64 },

    #[error("market is voided, only refunds are possible")]
    MarketVoided,

    #[error("market is not voided")]
    MarketNotVoided,

    #[error("market resolution has not failed")]
    MarketNotFailed,

    #[error("outcome {declared:?} was already declared, cannot resolve as {requested:?}")]
    OutcomeMismatch { declared: Side, requested: Side },

    #[error("bet {bet_id} not found in market {market_id}")]
    BetNotFound { market_id: u64, bet_id: u64 },

    #[error("unauthorized")]
    Unauthorized,

    #[error("bet has already been claimed")]
    BetAlreadyClaimed,

    #[error("no bets on the winning side")]
    NoWinningBets,

    // === computation correlation ===
    #[error("computation {0} aborted: {1}")]
    ComputationAborted(ComputationOffset, String),

    #[error("unknown computation offset {0}")]
    UnknownComputation(ComputationOffset),

    #[error("computation offset {0} already in use")]
    DuplicateOffset(ComputationOffset),

    #[error("invalid computation transition for {offset}: {from:?} -> {to:?}")]
    InvalidTransition {
        offset: ComputationOffset,
        from: ComputationState,
        to: ComputationState,
    },

    #[error("computation {0} does not match the expected kind")]
    ComputationKindMismatch(ComputationOffset),

    // === config ===
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// failure of the payout circuit itself; rerunning it over the same
    /// stored bets gives the same error
    pub fn is_circuit_failure(&self) -> bool {
        matches!(
            self,
            Self::ArithmeticOverflow(_) | Self::MalformedCiphertext(_) | Self::ValueOutOfRange
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_failures() {
        assert!(Error::ArithmeticOverflow("total pool").is_circuit_failure());
        assert!(Error::MalformedCiphertext("prediction".into()).is_circuit_failure());
        assert!(!Error::NoWinningBets.is_circuit_failure());
        assert!(!Error::BetNotFound { market_id: 1, bet_id: 0 }.is_circuit_failure());
    }
}
