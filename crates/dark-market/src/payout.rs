//! payout aggregation
//!
//! the circuit the network evaluates at resolution time, written over the
//! same field as the cipher so it can run on masked or secret-shared
//! inputs. `aggregate` is the clear-text reference a test harness runs.
//!
//! ```text
//! total   = sum a_i
//! winning = sum a_i * w_i        w_i = p_i (yes) | 1 - p_i (no)
//! ratio   = floor(total * 1e6 / winning)
//! payout  = floor(a_i * ratio / 1e6)     per bet, at claim time
//! ```
//!
//! only total, winning and ratio are ever revealed. all integer math is
//! fixed point so every node gets bit-identical results.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::bet::Side;
use crate::field::Fe;
use crate::{Error, Result};

/// fixed-point scale of the payout ratio
pub const PAYOUT_SCALE: u64 = 1_000_000;

/// `floor(total * 1e6 / winning)`
pub fn payout_ratio(total_pool: u64, winning_pool: u64) -> Result<u64> {
    if winning_pool == 0 {
        return Err(Error::NoWinningBets);
    }
    let ratio = (total_pool as u128 * PAYOUT_SCALE as u128) / winning_pool as u128;
    u64::try_from(ratio).map_err(|_| Error::ArithmeticOverflow("payout ratio"))
}

/// `floor(amount * ratio / 1e6)`
pub fn payout_for(amount: u64, ratio: u64) -> Result<u64> {
    let payout = (amount as u128 * ratio as u128) / PAYOUT_SCALE as u128;
    u64::try_from(payout).map_err(|_| Error::ArithmeticOverflow("payout"))
}

/// one bet's inputs as the circuit sees them, wiped on drop
#[derive(Clone, Debug, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct OpenedBet {
    pub amount: Fe,
    pub prediction: Fe,
}

impl OpenedBet {
    pub fn new(amount: u64, prediction: Side) -> Self {
        Self {
            amount: Fe::from(amount),
            prediction: Fe::from(prediction.as_u8() as u64),
        }
    }
}

/// one bet as ciphertext plus the keystream that masks it
///
/// the mask recovers the plaintext, so it is wiped on drop like the
/// keystream it was taken from.
#[derive(Clone, Debug, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MaskedBet {
    pub ciphertext: [Fe; 2],
    pub mask: [Fe; 2],
}

impl MaskedBet {
    /// strip the masks, `c - ks` in the field
    pub fn open(&self) -> OpenedBet {
        OpenedBet {
            amount: self.ciphertext[0] - self.mask[0],
            prediction: self.ciphertext[1] - self.mask[1],
        }
    }
}

/// revealed pool sizes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolTotals {
    pub total_pool: u64,
    pub winning_pool: u64,
}

fn winning_weight(prediction: Fe, side: Side) -> Fe {
    match side {
        Side::Yes => prediction,
        Side::No => Fe::ONE - prediction,
    }
}

/// p * (p - 1) == 0
pub fn is_boolean(p: Fe) -> bool {
    (p * (p - Fe::ONE)).is_zero()
}

/// pool totals over opened bets, reveals only the two sums
pub fn aggregate(bets: &[OpenedBet], winning_side: Side) -> Result<PoolTotals> {
    let mut total = Fe::ZERO;
    let mut winning = Fe::ZERO;
    for bet in bets {
        if !is_boolean(bet.prediction) {
            return Err(Error::MalformedCiphertext("prediction is not boolean".into()));
        }
        total += bet.amount;
        winning += bet.amount * winning_weight(bet.prediction, winning_side);
    }

    Ok(PoolTotals {
        total_pool: total
            .to_u64()
            .map_err(|_| Error::ArithmeticOverflow("total pool"))?,
        winning_pool: winning
            .to_u64()
            .map_err(|_| Error::ArithmeticOverflow("winning pool"))?,
    })
}

/// same circuit over ciphertexts: masks are subtracted in the field
pub fn aggregate_masked(bets: &[MaskedBet], winning_side: Side) -> Result<PoolTotals> {
    let opened: Vec<OpenedBet> = bets.iter().map(MaskedBet::open).collect();
    aggregate(&opened, winning_side)
}

/// public resolution of one market
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolutionResult {
    pub market_id: u64,
    pub winning_side: Side,
    pub total_pool: u64,
    pub winning_pool: u64,
    /// scaled by [`PAYOUT_SCALE`]
    pub payout_ratio: u64,
}

impl ResolutionResult {
    /// build from totals; fails with `NoWinningBets` if nobody won
    pub fn from_totals(market_id: u64, winning_side: Side, totals: PoolTotals) -> Result<Self> {
        Ok(Self {
            market_id,
            winning_side,
            total_pool: totals.total_pool,
            winning_pool: totals.winning_pool,
            payout_ratio: payout_ratio(totals.total_pool, totals.winning_pool)?,
        })
    }

    /// payout owed to one bet, zero for the losing side
    pub fn payout(&self, amount: u64, prediction: Side) -> Result<u64> {
        if prediction == self.winning_side {
            payout_for(amount, self.payout_ratio)
        } else {
            Ok(0)
        }
    }
}

/// run the full resolution circuit over opened bets
pub fn resolve(market_id: u64, bets: &[OpenedBet], winning_side: Side) -> Result<ResolutionResult> {
    ResolutionResult::from_totals(market_id, winning_side, aggregate(bets, winning_side)?)
}
