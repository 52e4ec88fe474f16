//! computation request correlation
//!
//! submitting a computation returns an offset immediately; the result
//! arrives later through a callback. the correlator is the table joining
//! the two:
//!
//! ```text
//! Queued ──begin──> Executing ──complete──> Completed
//!    │                  │
//!    └──────abort───────┴──────────────────> Aborted
//! ```
//!
//! Completed and Aborted are terminal. transitions take the entry's own
//! lock, so a callback can only ever be applied once. terminal entries stay
//! pollable until [`Correlator::prune`] drops them.

use core::fmt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use rand::Rng;

use crate::{Error, Result};

/// identifier of one in-flight computation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputationOffset(pub u64);

impl fmt::Display for ComputationOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// source of computation offsets
pub trait OffsetGenerator: Send + Sync {
    fn next_offset(&self) -> ComputationOffset;
}

/// `millis * 1000 + rand[0, 999]`
///
/// collision-free only inside one process and below 1000 submissions per
/// millisecond; the per-process guard bumps any candidate that is not
/// strictly above the last one issued. use [`NodeCounterOffsets`] when
/// several instances submit concurrently.
#[derive(Debug, Default)]
pub struct TimeRandomOffsets {
    last: AtomicU64,
}

impl TimeRandomOffsets {
    pub fn new() -> Self {
        Self::default()
    }
}

/// raw time+random offset for a given millisecond timestamp
pub fn time_random_offset<R: Rng + ?Sized>(now_millis: u64, rng: &mut R) -> u64 {
    now_millis
        .saturating_mul(1000)
        .saturating_add(rng.gen_range(0..1000))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl OffsetGenerator for TimeRandomOffsets {
    fn next_offset(&self) -> ComputationOffset {
        let candidate = time_random_offset(now_millis(), &mut rand::thread_rng());
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(last.wrapping_add(1));
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return ComputationOffset(next),
                Err(actual) => last = actual,
            }
        }
    }
}

/// `node_id (16 bits) || counter (48 bits)` for multi-instance deployments
#[derive(Debug)]
pub struct NodeCounterOffsets {
    node_id: u16,
    counter: AtomicU64,
}

impl NodeCounterOffsets {
    const COUNTER_BITS: u32 = 48;
    const COUNTER_MASK: u64 = (1 << Self::COUNTER_BITS) - 1;

    pub fn new(node_id: u16) -> Self {
        Self {
            node_id,
            counter: AtomicU64::new(0),
        }
    }
}

impl OffsetGenerator for NodeCounterOffsets {
    fn next_offset(&self) -> ComputationOffset {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) & Self::COUNTER_MASK;
        ComputationOffset(((self.node_id as u64) << Self::COUNTER_BITS) | n)
    }
}

/// lifecycle of a computation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComputationState {
    Queued,
    Executing,
    Completed,
    Aborted,
}

impl ComputationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

struct Entry<Q, R> {
    request: Q,
    state: ComputationState,
    result: Option<R>,
    abort_reason: Option<String>,
    submitted_at: u64,
}

/// offset -> {state, result} table
pub struct Correlator<Q, R> {
    offsets: Box<dyn OffsetGenerator>,
    entries: RwLock<HashMap<ComputationOffset, Arc<Mutex<Entry<Q, R>>>>>,
}

impl<Q: Clone, R: Clone> Correlator<Q, R> {
    pub fn new(offsets: Box<dyn OffsetGenerator>) -> Self {
        Self {
            offsets,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// next offset from the configured generator, not yet registered
    pub fn generate_offset(&self) -> ComputationOffset {
        self.offsets.next_offset()
    }

    /// register `request` under a caller-chosen offset
    pub fn register(&self, offset: ComputationOffset, request: Q, now: u64) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&offset) {
            return Err(Error::DuplicateOffset(offset));
        }
        entries.insert(
            offset,
            Arc::new(Mutex::new(Entry {
                request,
                state: ComputationState::Queued,
                result: None,
                abort_reason: None,
                submitted_at: now,
            })),
        );
        tracing::debug!(%offset, "computation queued");
        Ok(())
    }

    /// register `request` under a freshly generated offset
    pub fn submit(&self, request: Q, now: u64) -> Result<ComputationOffset> {
        let offset = self.generate_offset();
        self.register(offset, request, now)?;
        Ok(offset)
    }

    fn entry(&self, offset: ComputationOffset) -> Result<Arc<Mutex<Entry<Q, R>>>> {
        self.entries
            .read()
            .get(&offset)
            .cloned()
            .ok_or(Error::UnknownComputation(offset))
    }

    /// Queued -> Executing, hands the request to the executor
    pub fn begin(&self, offset: ComputationOffset) -> Result<Q> {
        let entry = self.entry(offset)?;
        let mut e = entry.lock();
        if e.state != ComputationState::Queued {
            return Err(Error::InvalidTransition {
                offset,
                from: e.state,
                to: ComputationState::Executing,
            });
        }
        e.state = ComputationState::Executing;
        Ok(e.request.clone())
    }

    /// Executing -> Completed, exactly once
    pub fn complete(&self, offset: ComputationOffset, result: R) -> Result<()> {
        let entry = self.entry(offset)?;
        let mut e = entry.lock();
        if e.state != ComputationState::Executing {
            return Err(Error::InvalidTransition {
                offset,
                from: e.state,
                to: ComputationState::Completed,
            });
        }
        e.state = ComputationState::Completed;
        e.result = Some(result);
        tracing::debug!(%offset, "computation completed");
        Ok(())
    }

    /// Queued | Executing -> Aborted
    pub fn abort(&self, offset: ComputationOffset, reason: impl Into<String>) -> Result<()> {
        let entry = self.entry(offset)?;
        let mut e = entry.lock();
        if e.state.is_terminal() {
            return Err(Error::InvalidTransition {
                offset,
                from: e.state,
                to: ComputationState::Aborted,
            });
        }
        let reason = reason.into();
        tracing::warn!(%offset, %reason, "computation aborted");
        e.state = ComputationState::Aborted;
        e.abort_reason = Some(reason);
        Ok(())
    }

    pub fn state(&self, offset: ComputationOffset) -> Result<ComputationState> {
        Ok(self.entry(offset)?.lock().state)
    }

    pub fn request(&self, offset: ComputationOffset) -> Result<Q> {
        Ok(self.entry(offset)?.lock().request.clone())
    }

    /// `Some(result)` once completed, `None` while pending
    ///
    /// an aborted computation is an error, never an empty result.
    pub fn poll(&self, offset: ComputationOffset) -> Result<Option<R>> {
        let entry = self.entry(offset)?;
        let e = entry.lock();
        match e.state {
            ComputationState::Queued | ComputationState::Executing => Ok(None),
            ComputationState::Completed => Ok(e.result.clone()),
            ComputationState::Aborted => Err(Error::ComputationAborted(
                offset,
                e.abort_reason.clone().unwrap_or_default(),
            )),
        }
    }

    /// abort everything pending for longer than `max_pending` seconds
    pub fn expire_stale(&self, now: u64, max_pending: u64) -> Vec<(ComputationOffset, Q)> {
        let entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(o, e)| (*o, e.clone()))
            .collect();

        let mut expired = Vec::new();
        for (offset, entry) in entries {
            let mut e = entry.lock();
            if !e.state.is_terminal() && now.saturating_sub(e.submitted_at) > max_pending {
                tracing::warn!(%offset, "computation timed out");
                e.state = ComputationState::Aborted;
                e.abort_reason = Some("timed out".into());
                expired.push((offset, e.request.clone()));
            }
        }
        expired
    }

    /// drop terminal entries submitted more than `retention` seconds ago
    ///
    /// pending entries are never dropped. returns how many were removed.
    pub fn prune(&self, now: u64, retention: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| {
            let e = entry.lock();
            !(e.state.is_terminal() && now.saturating_sub(e.submitted_at) > retention)
        });
        let pruned = before - entries.len();
        if pruned > 0 {
            tracing::debug!(pruned, remaining = entries.len(), "pruned finished computations");
        }
        pruned
    }

    /// entries held, terminal ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// computations not yet in a terminal state
    pub fn in_flight(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| !e.lock().state.is_terminal())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn correlator() -> Correlator<&'static str, u64> {
        Correlator::new(Box::new(TimeRandomOffsets::new()))
    }

    #[test]
    fn test_offsets_unique_in_tight_window() {
        let gen = TimeRandomOffsets::new();
        let offsets: HashSet<_> = (0..10_000).map(|_| gen.next_offset()).collect();
        assert_eq!(offsets.len(), 10_000);
    }

    #[test]
    fn test_offsets_unique_across_threads() {
        let gen = TimeRandomOffsets::new();
        let all: Vec<ComputationOffset> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| (0..2_500).map(|_| gen.next_offset()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 10_000);
    }

    #[test]
    fn test_time_random_offset_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let o = time_random_offset(1_700_000_000_000, &mut rng);
            assert!((1_700_000_000_000_000..1_700_000_000_001_000).contains(&o));
        }
    }

    #[test]
    fn test_node_counter_offsets() {
        let a = NodeCounterOffsets::new(1);
        let b = NodeCounterOffsets::new(2);
        let x = a.next_offset();
        let y = b.next_offset();
        assert_ne!(x, y);
        assert_eq!(x.0 >> 48, 1);
        assert_eq!(a.next_offset().0, x.0 + 1);
    }

    #[test]
    fn test_lifecycle() {
        let c = correlator();
        let offset = c.submit("resolve", 100).unwrap();
        assert_eq!(c.state(offset).unwrap(), ComputationState::Queued);
        assert_eq!(c.poll(offset).unwrap(), None);

        assert_eq!(c.begin(offset).unwrap(), "resolve");
        assert_eq!(c.in_flight(), 1);
        c.complete(offset, 42).unwrap();

        assert_eq!(c.poll(offset).unwrap(), Some(42));
        assert_eq!(c.in_flight(), 0);
    }

    #[test]
    fn test_callback_applied_once() {
        let c = correlator();
        let offset = c.submit("bet", 0).unwrap();
        c.begin(offset).unwrap();
        c.complete(offset, 1).unwrap();

        let err = c.complete(offset, 2).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(c.poll(offset).unwrap(), Some(1));
    }

    #[test]
    fn test_complete_requires_executing() {
        let c = correlator();
        let offset = c.submit("bet", 0).unwrap();
        assert!(c.complete(offset, 1).is_err());
    }

    #[test]
    fn test_aborted_is_error() {
        let c = correlator();
        let offset = c.submit("bet", 0).unwrap();
        c.begin(offset).unwrap();
        c.abort(offset, "cluster unavailable").unwrap();

        assert!(matches!(c.poll(offset), Err(Error::ComputationAborted(o, _)) if o == offset));
        assert!(c.complete(offset, 5).is_err());
        assert!(c.abort(offset, "again").is_err());
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let c = correlator();
        let offset = ComputationOffset(7);
        c.register(offset, "a", 0).unwrap();
        assert_eq!(c.register(offset, "b", 0).unwrap_err(), Error::DuplicateOffset(offset));
        assert_eq!(
            c.state(ComputationOffset(8)).unwrap_err(),
            Error::UnknownComputation(ComputationOffset(8))
        );
    }

    #[test]
    fn test_expire_stale() {
        let c = correlator();
        let old = c.submit("old", 0).unwrap();
        let fresh = c.submit("fresh", 1_000).unwrap();
        c.begin(old).unwrap();

        let expired = c.expire_stale(1_100, 600);
        assert_eq!(expired, vec![(old, "old")]);
        assert_eq!(c.state(old).unwrap(), ComputationState::Aborted);
        assert_eq!(c.state(fresh).unwrap(), ComputationState::Queued);
    }

    #[test]
    fn test_prune_terminal() {
        let c = correlator();
        let done = c.submit("done", 0).unwrap();
        let failed = c.submit("failed", 0).unwrap();
        let pending = c.submit("pending", 0).unwrap();
        let recent = c.submit("recent", 900).unwrap();
        c.begin(done).unwrap();
        c.complete(done, 1).unwrap();
        c.abort(failed, "bad input").unwrap();
        c.begin(recent).unwrap();
        c.complete(recent, 2).unwrap();
        assert_eq!(c.len(), 4);

        assert_eq!(c.prune(1_000, 100), 2);
        assert_eq!(c.len(), 2);
        assert_eq!(c.poll(done).unwrap_err(), Error::UnknownComputation(done));
        assert_eq!(c.poll(recent).unwrap(), Some(2));
        assert_eq!(c.state(pending).unwrap(), ComputationState::Queued);
        assert_eq!(c.in_flight(), 1);

        assert_eq!(c.prune(1_000, 100), 0);
    }

    #[test]
    fn test_concurrent_completion_single_winner() {
        let c = correlator();
        let offset = c.submit("race", 0).unwrap();
        c.begin(offset).unwrap();

        let wins: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8u64)
                .map(|i| {
                    let c = &c;
                    s.spawn(move || c.complete(offset, i).is_ok() as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(wins, 1);
    }
}
