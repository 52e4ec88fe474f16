//! market, bet and resolution records
//!
//! ```text
//! Open ──(end_time)──> ended ──resolve_market──> Resolving ──ok─────────────> Resolved
//!                        ▲                           │
//!                        └─────── network error ─────┤
//!                                                    ├── no winners, fail ──> Failed
//!                                                    └── no winners, refund,
//!                                                        circuit failure
//!                                                        or timed out ──────> Voided
//!
//! Failed ──resolve_market, same side──> Resolving
//! Failed ──void_market────────────────> Voided
//! ```
//!
//! bet placement and resolution are two-phase. the request registers a
//! computation under its offset; the matching `complete_*` call executes it
//! against the network and applies the result exactly once. records live
//! under namespaced [`StorageKey`]s.
//!
//! lock order is market entry, then correlator entry, then record tables.
//! finished computations are pruned by [`Ledger::expire_stale`] once they
//! are older than `retention_secs`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};

use crate::bet::{EncryptedBetData, EncryptedReceipt, PlaceBetSubmission, Side};
use crate::cluster::ComputationNetwork;
use crate::config::{NetworkConfig, ZeroWinnerPolicy};
use crate::correlator::{ComputationOffset, ComputationState, Correlator};
use crate::payout::ResolutionResult;
use crate::{Error, Result};

/// max question length in bytes
pub const MAX_QUESTION_BYTES: usize = 200;

/// account identity of a creator or bettor
pub type AccountId = [u8; 32];

/// `"{namespace}:{tag}:{id:020}"`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn market(namespace: &str, market_id: u64) -> Self {
        Self(format!("{}:market:{:020}", namespace, market_id))
    }

    pub fn bet(namespace: &str, market_id: u64, bet_id: u64) -> Self {
        Self(format!("{}:bet:{:020}:{:020}", namespace, market_id, bet_id))
    }

    pub fn resolution(namespace: &str, market_id: u64) -> Self {
        Self(format!("{}:resolution:{:020}", namespace, market_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// fixed-width address for backends keyed by hash
    pub fn address(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarketStatus {
    /// takes bets before end_time, resolvable after
    Open,
    Resolving(ComputationOffset),
    Resolved,
    /// nobody bet on the declared side; the declaration stands
    Failed { winning_side: Side },
    /// stakes are refundable
    Voided,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Market {
    pub market_id: u64,
    pub creator: AccountId,
    pub question: String,
    pub end_time_unix: u64,
    pub status: MarketStatus,
    /// stored bets; also the next bet id
    pub total_bets: u64,
    /// bets queued but not yet stored
    pub pending_bets: u64,
}

impl Market {
    pub fn has_ended(&self, now: u64) -> bool {
        now >= self.end_time_unix
    }
}

/// stored bet, ciphertext only
#[derive(Debug)]
pub struct Bet {
    pub market_id: u64,
    pub bet_id: u64,
    pub bettor: AccountId,
    pub data: EncryptedBetData,
    pub placed_at_unix: u64,
    claimed: AtomicBool,
}

impl Bet {
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    fn mark_claimed(&self) -> Result<()> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::BetAlreadyClaimed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketRequest {
    pub market_id: u64,
    pub question: String,
    pub end_time_unix: u64,
}

impl MarketRequest {
    pub fn validate(&self, now: u64) -> Result<()> {
        if self.question.len() > MAX_QUESTION_BYTES {
            return Err(Error::QuestionTooLong {
                len: self.question.len(),
                max: MAX_QUESTION_BYTES,
            });
        }
        if self.end_time_unix <= now {
            return Err(Error::InvalidEndTime {
                end_time: self.end_time_unix,
                now,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolveRequest {
    pub computation_offset: ComputationOffset,
    /// 0 = no, 1 = yes
    pub winning_side: u8,
}

/// published outcome of a market, written once
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolutionRecord {
    pub market_id: u64,
    pub winning_side: Side,
    pub total_pool: u64,
    pub winning_pool: u64,
    pub payout_ratio: u64,
    pub resolved_at_unix: u64,
}

impl ResolutionRecord {
    fn new(result: &ResolutionResult, resolved_at_unix: u64) -> Self {
        Self {
            market_id: result.market_id,
            winning_side: result.winning_side,
            total_pool: result.total_pool,
            winning_pool: result.winning_pool,
            payout_ratio: result.payout_ratio,
            resolved_at_unix,
        }
    }

    pub fn result(&self) -> ResolutionResult {
        ResolutionResult {
            market_id: self.market_id,
            winning_side: self.winning_side,
            total_pool: self.total_pool,
            winning_pool: self.winning_pool,
            payout_ratio: self.payout_ratio,
        }
    }
}

/// request side of a ledger computation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComputationKind {
    PlaceBet {
        market_id: u64,
        bettor: AccountId,
        bet: EncryptedBetData,
        submitted_at: u64,
    },
    ResolveMarket {
        market_id: u64,
        winning_side: Side,
    },
}

impl ComputationKind {
    pub fn market_id(&self) -> u64 {
        match self {
            Self::PlaceBet { market_id, .. } | Self::ResolveMarket { market_id, .. } => *market_id,
        }
    }
}

/// result side of a ledger computation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComputationOutput {
    BetStored { bet_id: u64, receipt: EncryptedReceipt },
    Resolved(ResolutionRecord),
}

pub struct Ledger {
    config: Arc<NetworkConfig>,
    computations: Correlator<ComputationKind, ComputationOutput>,
    markets: RwLock<HashMap<StorageKey, Arc<Mutex<Market>>>>,
    bets: RwLock<HashMap<StorageKey, Arc<Bet>>>,
    resolutions: RwLock<HashMap<StorageKey, ResolutionRecord>>,
}

impl Ledger {
    pub fn new(config: Arc<NetworkConfig>) -> Self {
        let computations = Correlator::new(config.offset_generator());
        Self {
            config,
            computations,
            markets: RwLock::new(HashMap::new()),
            bets: RwLock::new(HashMap::new()),
            resolutions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// fresh offset for a client to put in its request
    pub fn generate_offset(&self) -> ComputationOffset {
        self.computations.generate_offset()
    }

    fn market_entry(&self, market_id: u64) -> Result<Arc<Mutex<Market>>> {
        self.markets
            .read()
            .get(&StorageKey::market(self.namespace(), market_id))
            .cloned()
            .ok_or(Error::MarketNotFound(market_id))
    }

    pub fn market(&self, market_id: u64) -> Result<Market> {
        Ok(self.market_entry(market_id)?.lock().clone())
    }

    pub fn bet(&self, market_id: u64, bet_id: u64) -> Result<Arc<Bet>> {
        self.bets
            .read()
            .get(&StorageKey::bet(self.namespace(), market_id, bet_id))
            .cloned()
            .ok_or(Error::BetNotFound { market_id, bet_id })
    }

    pub fn resolution(&self, market_id: u64) -> Option<ResolutionRecord> {
        self.resolutions
            .read()
            .get(&StorageKey::resolution(self.namespace(), market_id))
            .copied()
    }

    pub fn poll(&self, offset: ComputationOffset) -> Result<Option<ComputationOutput>> {
        self.computations.poll(offset)
    }

    pub fn computation_state(&self, offset: ComputationOffset) -> Result<ComputationState> {
        self.computations.state(offset)
    }

    pub fn in_flight(&self) -> usize {
        self.computations.in_flight()
    }

    pub fn create_market(
        &self,
        creator: AccountId,
        request: MarketRequest,
        now: u64,
    ) -> Result<StorageKey> {
        request.validate(now)?;

        let key = StorageKey::market(self.namespace(), request.market_id);
        let mut markets = self.markets.write();
        if markets.contains_key(&key) {
            return Err(Error::MarketExists(request.market_id));
        }
        markets.insert(
            key.clone(),
            Arc::new(Mutex::new(Market {
                market_id: request.market_id,
                creator,
                question: request.question,
                end_time_unix: request.end_time_unix,
                status: MarketStatus::Open,
                total_bets: 0,
                pending_bets: 0,
            })),
        );

        tracing::info!(
            market_id = request.market_id,
            end_time = request.end_time_unix,
            "market created"
        );
        Ok(key)
    }

    /// accept an encrypted bet and queue its computation
    ///
    /// only lengths are checked here; the ciphertext is opaque to the ledger.
    pub fn place_bet(
        &self,
        market_id: u64,
        bettor: AccountId,
        submission: PlaceBetSubmission,
        now: u64,
    ) -> Result<ComputationOffset> {
        let bet = EncryptedBetData::from_submission(&submission)?;
        let entry = self.market_entry(market_id)?;
        let mut market = entry.lock();

        match market.status {
            MarketStatus::Open if !market.has_ended(now) => {}
            MarketStatus::Open | MarketStatus::Resolving(_) | MarketStatus::Failed { .. } => {
                return Err(Error::MarketEnded)
            }
            MarketStatus::Resolved => return Err(Error::MarketAlreadyResolved),
            MarketStatus::Voided => return Err(Error::MarketVoided),
        }

        let offset = submission.computation_offset;
        self.computations.register(
            offset,
            ComputationKind::PlaceBet {
                market_id,
                bettor,
                bet,
                submitted_at: now,
            },
            now,
        )?;
        market.pending_bets += 1;

        tracing::debug!(market_id, %offset, "bet queued");
        Ok(offset)
    }

    /// execute a queued bet, store it and hand back the bettor's receipt
    pub fn complete_place_bet(
        &self,
        offset: ComputationOffset,
        network: &dyn ComputationNetwork,
    ) -> Result<EncryptedReceipt> {
        let (market_id, bettor, bet, submitted_at) = match self.computations.request(offset)? {
            ComputationKind::PlaceBet {
                market_id,
                bettor,
                bet,
                submitted_at,
            } => (market_id, bettor, bet, submitted_at),
            ComputationKind::ResolveMarket { .. } => {
                return Err(Error::ComputationKindMismatch(offset))
            }
        };

        let entry = self.market_entry(market_id)?;
        let mut market = entry.lock();
        self.computations.begin(offset)?;

        let bet_id = market.total_bets;
        let stored = match market.status {
            MarketStatus::Open => network.place_bet(bet_id, &bet),
            MarketStatus::Resolving(_) | MarketStatus::Failed { .. } => Err(Error::MarketEnded),
            MarketStatus::Resolved => Err(Error::MarketAlreadyResolved),
            MarketStatus::Voided => Err(Error::MarketVoided),
        };
        let receipt = match stored {
            Ok(receipt) => receipt,
            Err(e) => {
                self.computations.abort(offset, e.to_string())?;
                market.pending_bets = market.pending_bets.saturating_sub(1);
                return Err(e);
            }
        };

        self.computations.complete(
            offset,
            ComputationOutput::BetStored {
                bet_id,
                receipt: receipt.clone(),
            },
        )?;
        market.pending_bets = market.pending_bets.saturating_sub(1);
        market.total_bets += 1;

        self.bets.write().insert(
            StorageKey::bet(self.namespace(), market_id, bet_id),
            Arc::new(Bet {
                market_id,
                bet_id,
                bettor,
                data: bet,
                placed_at_unix: submitted_at,
                claimed: AtomicBool::new(false),
            }),
        );

        tracing::info!(market_id, bet_id, %offset, "bet stored");
        Ok(receipt)
    }

    /// creator declares the outcome and queues the aggregation
    ///
    /// after a failed resolution only the side already declared may be
    /// resolved again.
    pub fn resolve_market(
        &self,
        market_id: u64,
        caller: AccountId,
        request: ResolveRequest,
        now: u64,
    ) -> Result<ComputationOffset> {
        let entry = self.market_entry(market_id)?;
        let mut market = entry.lock();

        if market.creator != caller {
            return Err(Error::Unauthorized);
        }
        let winning_side = Side::try_from(request.winning_side)?;
        match market.status {
            MarketStatus::Open => {}
            MarketStatus::Failed { winning_side: declared } if declared == winning_side => {}
            MarketStatus::Failed { winning_side: declared } => {
                return Err(Error::OutcomeMismatch {
                    declared,
                    requested: winning_side,
                })
            }
            MarketStatus::Resolving(pending) => return Err(Error::ResolutionPending(pending)),
            MarketStatus::Resolved => return Err(Error::MarketAlreadyResolved),
            MarketStatus::Voided => return Err(Error::MarketVoided),
        }
        if !market.has_ended(now) {
            return Err(Error::MarketNotEnded);
        }
        if market.pending_bets > 0 {
            return Err(Error::BetsPending {
                market_id,
                pending: market.pending_bets,
            });
        }

        let offset = request.computation_offset;
        self.computations.register(
            offset,
            ComputationKind::ResolveMarket {
                market_id,
                winning_side,
            },
            now,
        )?;
        market.status = MarketStatus::Resolving(offset);

        tracing::info!(market_id, %offset, ?winning_side, "resolution queued");
        Ok(offset)
    }

    fn stored_bets(&self, market: &Market) -> Result<Vec<EncryptedBetData>> {
        let bets = self.bets.read();
        (0..market.total_bets)
            .map(|bet_id| {
                bets.get(&StorageKey::bet(self.namespace(), market.market_id, bet_id))
                    .map(|b| b.data.clone())
                    .ok_or(Error::BetNotFound {
                        market_id: market.market_id,
                        bet_id,
                    })
            })
            .collect()
    }

    /// run the aggregation and write the resolution record
    ///
    /// with no winning bets the error is returned and the zero-winner policy
    /// decides whether the market is marked failed or voided. a circuit
    /// failure voids the market; any other error leaves it resolvable.
    pub fn complete_resolution(
        &self,
        offset: ComputationOffset,
        network: &dyn ComputationNetwork,
        now: u64,
    ) -> Result<ResolutionRecord> {
        let (market_id, winning_side) = match self.computations.request(offset)? {
            ComputationKind::ResolveMarket {
                market_id,
                winning_side,
            } => (market_id, winning_side),
            ComputationKind::PlaceBet { .. } => return Err(Error::ComputationKindMismatch(offset)),
        };

        let entry = self.market_entry(market_id)?;
        let mut market = entry.lock();
        self.computations.begin(offset)?;

        let outcome = self
            .stored_bets(&market)
            .and_then(|bets| network.resolve(market_id, &bets, winning_side));
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.computations.abort(offset, e.to_string())?;
                market.status = match (&e, self.config.zero_winner_policy) {
                    (Error::NoWinningBets, ZeroWinnerPolicy::Fail) => {
                        MarketStatus::Failed { winning_side }
                    }
                    (Error::NoWinningBets, ZeroWinnerPolicy::Refund) => MarketStatus::Voided,
                    (e, _) if e.is_circuit_failure() => MarketStatus::Voided,
                    _ => MarketStatus::Open,
                };
                tracing::warn!(
                    market_id,
                    %offset,
                    error = %e,
                    status = ?market.status,
                    "resolution failed"
                );
                return Err(e);
            }
        };

        let record = ResolutionRecord::new(&result, now);
        {
            let mut resolutions = self.resolutions.write();
            let key = StorageKey::resolution(self.namespace(), market_id);
            if resolutions.contains_key(&key) {
                self.computations.abort(offset, "already resolved")?;
                return Err(Error::MarketAlreadyResolved);
            }
            self.computations
                .complete(offset, ComputationOutput::Resolved(record))?;
            resolutions.insert(key, record);
        }
        market.status = MarketStatus::Resolved;

        tracing::info!(
            market_id,
            %offset,
            total_pool = record.total_pool,
            winning_pool = record.winning_pool,
            payout_ratio = record.payout_ratio,
            "market resolved"
        );
        Ok(record)
    }

    fn owned_bet(&self, market_id: u64, bet_id: u64, caller: &AccountId) -> Result<Arc<Bet>> {
        let bet = self.bet(market_id, bet_id)?;
        if &bet.bettor != caller {
            return Err(Error::Unauthorized);
        }
        if bet.is_claimed() {
            return Err(Error::BetAlreadyClaimed);
        }
        Ok(bet)
    }

    /// payout owed to a bet on a resolved market, paid once
    ///
    /// losing bets claim zero, which still consumes the claim.
    pub fn claim(
        &self,
        market_id: u64,
        bet_id: u64,
        caller: AccountId,
        network: &dyn ComputationNetwork,
    ) -> Result<u64> {
        let status = self.market_entry(market_id)?.lock().status;
        let record = match status {
            MarketStatus::Resolved => self
                .resolution(market_id)
                .ok_or(Error::MarketNotResolved)?,
            MarketStatus::Voided => return Err(Error::MarketVoided),
            MarketStatus::Open | MarketStatus::Resolving(_) | MarketStatus::Failed { .. } => {
                return Err(Error::MarketNotResolved)
            }
        };

        let bet = self.owned_bet(market_id, bet_id, &caller)?;
        let payout = network.payout(&bet.data, &record.result())?;
        bet.mark_claimed()?;

        tracing::info!(market_id, bet_id, "claim paid");
        Ok(payout)
    }

    /// creator gives up on a failed market so its stakes become refundable
    pub fn void_market(&self, market_id: u64, caller: AccountId) -> Result<()> {
        let entry = self.market_entry(market_id)?;
        let mut market = entry.lock();

        if market.creator != caller {
            return Err(Error::Unauthorized);
        }
        match market.status {
            MarketStatus::Failed { .. } => {}
            MarketStatus::Open => return Err(Error::MarketNotFailed),
            MarketStatus::Resolving(pending) => return Err(Error::ResolutionPending(pending)),
            MarketStatus::Resolved => return Err(Error::MarketAlreadyResolved),
            MarketStatus::Voided => return Err(Error::MarketVoided),
        }
        market.status = MarketStatus::Voided;

        tracing::info!(market_id, "market voided by creator");
        Ok(())
    }

    /// stake of a bet on a voided market, returned once
    pub fn refund(
        &self,
        market_id: u64,
        bet_id: u64,
        caller: AccountId,
        network: &dyn ComputationNetwork,
    ) -> Result<u64> {
        if self.market_entry(market_id)?.lock().status != MarketStatus::Voided {
            return Err(Error::MarketNotVoided);
        }

        let bet = self.owned_bet(market_id, bet_id, &caller)?;
        let stake = network.refund(&bet.data)?;
        bet.mark_claimed()?;

        tracing::info!(market_id, bet_id, "stake refunded");
        Ok(stake)
    }

    /// abort computations pending longer than `max_pending_secs` and drop
    /// finished ones older than `retention_secs`
    ///
    /// a market whose resolution timed out is voided.
    pub fn expire_stale(&self, now: u64) -> Vec<ComputationOffset> {
        let expired = self
            .computations
            .expire_stale(now, self.config.max_pending_secs);

        for (offset, kind) in &expired {
            let Ok(entry) = self.market_entry(kind.market_id()) else {
                continue;
            };
            let mut market = entry.lock();
            match kind {
                ComputationKind::PlaceBet { .. } => {
                    market.pending_bets = market.pending_bets.saturating_sub(1);
                }
                ComputationKind::ResolveMarket { market_id, .. } => {
                    if market.status == MarketStatus::Resolving(*offset) {
                        market.status = MarketStatus::Voided;
                        tracing::warn!(market_id, %offset, "resolution timed out, market voided");
                    }
                }
            }
        }

        self.computations.prune(now, self.config.retention_secs);
        expired.into_iter().map(|(offset, _)| offset).collect()
    }

    /// computations still held by the correlator, finished ones included
    pub fn tracked_computations(&self) -> usize {
        self.computations.len()
    }
}
