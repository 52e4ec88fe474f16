//! # dark-market
//!
//! confidential bets for prediction markets. a bettor encrypts amount and
//! side under a key only they and the computation network share; the ledger
//! stores ciphertexts and correlates asynchronous computations; the network
//! aggregates pools over ciphertexts and reveals nothing but the totals.
//!
//! ## data flow
//!
//! ```text
//!   bettor                      ledger                     network
//!   ──────                      ──────                     ───────
//!   ephemeral x25519 ──┐
//!   network pk ────────┴─> shared secret
//!        │ rescue ctr
//!        ▼
//!   [amount, side] ct ────> place_bet ── offset ──────────> place_bet
//!                             (Queued)                        │
//!                                                             │ receipt @ nonce+1
//!   decode_receipt <──────── complete_place_bet <─────────────┘
//!
//!   creator ─────────────> resolve_market ── offset ──────> resolve
//!                             (Resolving)                     │ sum a_i, sum a_i·w_i
//!                          complete_resolution <──────────────┘ ratio = total·1e6/winning
//!                             (Resolved)
//!   bettor ──────────────> claim ─────────────────────────> payout(a_i, ratio)
//! ```
//!
//! ## security properties
//!
//! - amounts and sides never leave the bettor in the clear
//! - every encryption uses a fresh ephemeral key and a fresh random nonce
//! - shared secrets and cipher keys are zeroized on drop
//! - only total pool, winning pool and payout ratio are ever published
//! - a computation callback is applied at most once
//!
//! ## usage
//!
//! ```rust,ignore
//! use dark_market::{bet::{encode_bet, BetInput}, cluster::LocalCluster, ComputationNetwork};
//!
//! let cluster = LocalCluster::generate();
//! let input = BetInput::new(market_id, 5_000_000_000, 1, 0)?;
//! let (data, secrets) = encode_bet(&input, &cluster.public_key())?;
//!
//! let offset = ledger.generate_offset();
//! ledger.place_bet(market_id, bettor, data.to_submission(offset), now)?;
//! let receipt = ledger.complete_place_bet(offset, &cluster)?;
//! let opened = secrets.open_receipt(&receipt, &cluster.public_key())?;
//! ```

pub mod bet;
pub mod cipher;
pub mod cluster;
pub mod config;
pub mod correlator;
pub mod error;
pub mod field;
pub mod keys;
pub mod ledger;
pub mod nonce;
pub mod payout;
pub mod rescue;

pub use bet::{
    decode_bet, decode_receipt, encode_bet, BetEncoder, BetInput, BetReceipt, BetSecrets,
    EncryptedBetData, EncryptedReceipt, PlaceBetSubmission, Side,
};
pub use cipher::{CiphertextField, RescueCipher};
pub use cluster::{ComputationNetwork, LocalCluster};
pub use config::{NetworkConfig, ZeroWinnerPolicy};
pub use correlator::{ComputationOffset, ComputationState, Correlator};
pub use error::{Error, Result};
pub use keys::{
    derive_shared_secret, generate_ephemeral_keypair, EphemeralKeyPair, NetworkKeyPair,
    NetworkPublicKey, PrivateKey, PublicKey, SharedSecret,
};
pub use ledger::{AccountId, Ledger, MarketRequest, MarketStatus, ResolveRequest};
pub use nonce::{Nonce, NonceManager};
pub use payout::{ResolutionResult, PAYOUT_SCALE};
