//! computation network boundary
//!
//! [`ComputationNetwork`] is the interface the ledger drives when a queued
//! computation executes. [`LocalCluster`] is an in-process implementation:
//! it holds the network key pair, rebuilds each bettor's keystream from the
//! published ephemeral key, and evaluates the payout circuit on the masked
//! ciphertexts. tests and the cli simulation run against it; a deployment
//! plugs its own transport in behind the trait.

use rand::Rng;
use rand_core::OsRng;
use rayon::prelude::*;

use crate::bet::{BetReceipt, EncryptedBetData, EncryptedReceipt, Side};
use crate::cipher::RescueCipher;
use crate::field::Fe;
use crate::keys::{NetworkKeyPair, NetworkPublicKey};
use crate::payout::{self, MaskedBet, ResolutionResult};
use crate::{Error, Result};

/// operations the network performs on stored ciphertexts
pub trait ComputationNetwork: Send + Sync {
    fn public_key(&self) -> NetworkPublicKey;

    /// validate a bet and return its receipt encrypted for the bettor
    fn place_bet(&self, bet_id: u64, bet: &EncryptedBetData) -> Result<EncryptedReceipt>;

    /// aggregate all bets of a market, revealing only the totals
    fn resolve(
        &self,
        market_id: u64,
        bets: &[EncryptedBetData],
        winning_side: Side,
    ) -> Result<ResolutionResult>;

    /// payout owed to one bet under a published resolution
    fn payout(&self, bet: &EncryptedBetData, resolution: &ResolutionResult) -> Result<u64>;

    /// stake of one bet, for voided markets
    fn refund(&self, bet: &EncryptedBetData) -> Result<u64>;
}

/// single-process computation network
pub struct LocalCluster {
    keypair: NetworkKeyPair,
}

impl LocalCluster {
    pub fn new(keypair: NetworkKeyPair) -> Self {
        Self { keypair }
    }

    /// cluster with a fresh network key
    pub fn generate() -> Self {
        Self::new(NetworkKeyPair::generate())
    }

    fn mask(&self, bet: &EncryptedBetData) -> Result<MaskedBet> {
        let shared = self
            .keypair
            .private_key
            .diffie_hellman(&bet.ephemeral_public_key)?;
        let ks = RescueCipher::new(&shared).keystream(&bet.nonce, 2);
        Ok(MaskedBet {
            ciphertext: [
                Fe::from_bytes(&bet.ciphertext_amount)?,
                Fe::from_bytes(&bet.ciphertext_prediction)?,
            ],
            mask: [ks[0], ks[1]],
        })
    }

    fn open(&self, bet: &EncryptedBetData) -> Result<(u64, Side)> {
        let opened = self.mask(bet)?.open();
        if !payout::is_boolean(opened.prediction) {
            return Err(Error::MalformedCiphertext("prediction is not boolean".into()));
        }
        Ok((opened.amount.to_u64()?, Side::from(opened.prediction == Fe::ONE)))
    }

    /// uniform value in `[0, modulus)`, or the full range when modulus is 0
    pub fn random_u64(&self, modulus: u64) -> u64 {
        if modulus == 0 {
            OsRng.gen()
        } else {
            OsRng.gen_range(0..modulus)
        }
    }

    /// fair coin flip, e.g. for tie-breaking
    pub fn random_side(&self) -> Side {
        Side::from(OsRng.gen::<bool>())
    }
}

impl ComputationNetwork for LocalCluster {
    fn public_key(&self) -> NetworkPublicKey {
        self.keypair.public_key
    }

    fn place_bet(&self, bet_id: u64, bet: &EncryptedBetData) -> Result<EncryptedReceipt> {
        let (amount, prediction) = self.open(bet)?;
        let shared = self
            .keypair
            .private_key
            .diffie_hellman(&bet.ephemeral_public_key)?;
        let receipt = BetReceipt {
            bet_id,
            amount,
            prediction,
        };
        Ok(EncryptedReceipt::seal(&shared, &bet.nonce, &receipt))
    }

    fn resolve(
        &self,
        market_id: u64,
        bets: &[EncryptedBetData],
        winning_side: Side,
    ) -> Result<ResolutionResult> {
        let masked = bets
            .par_iter()
            .map(|b| self.mask(b))
            .collect::<Result<Vec<_>>>()?;
        let totals = payout::aggregate_masked(&masked, winning_side)?;
        tracing::info!(
            market_id,
            bets = bets.len(),
            total_pool = totals.total_pool,
            winning_pool = totals.winning_pool,
            "resolution aggregated"
        );
        ResolutionResult::from_totals(market_id, winning_side, totals)
    }

    fn payout(&self, bet: &EncryptedBetData, resolution: &ResolutionResult) -> Result<u64> {
        let (amount, prediction) = self.open(bet)?;
        resolution.payout(amount, prediction)
    }

    fn refund(&self, bet: &EncryptedBetData) -> Result<u64> {
        Ok(self.open(bet)?.0)
    }
}
