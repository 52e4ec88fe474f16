//! nonce generation
//!
//! nonces are 128 bits from the os csprng. key material is fresh per bet, so
//! a (shared secret, nonce) collision requires two identical 128-bit draws:
//! the guarantee is probabilistic (~2^-64 after 2^32 draws), not absolute.
//! within one manager, the most recent issued nonces are remembered and a
//! repeat draw is discarded and redrawn. the window is bounded; older
//! nonces fall out of it first.

use core::fmt;
use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};

use crate::field::Fe;
use crate::{Error, Result};

/// nonce width in bytes
pub const NONCE_BYTES: usize = 16;

/// 128-bit nonce
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_BYTES]);

impl Nonce {
    pub fn from_bytes(bytes: [u8; NONCE_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; NONCE_BYTES] = bytes.try_into().map_err(|_| Error::InvalidNonceLength {
            expected: NONCE_BYTES,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn from_u128(v: u128) -> Self {
        Self(v.to_le_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_BYTES] {
        &self.0
    }

    pub fn to_u128(&self) -> u128 {
        u128::from_le_bytes(self.0)
    }

    /// nonce used for the network's response to a request at `self`
    pub fn successor(&self) -> Nonce {
        Nonce::from_u128(self.to_u128().wrapping_add(1))
    }

    /// nonce as a single field element (fits, 128 < 252 bits)
    pub fn to_field(&self) -> Fe {
        Fe::from(self.to_u128())
    }

    /// fresh nonce straight from the os rng
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

/// nonces remembered per manager unless configured otherwise
pub const DEFAULT_NONCE_WINDOW: usize = 1 << 16;

#[derive(Default)]
struct Issued {
    seen: HashSet<Nonce>,
    order: VecDeque<Nonce>,
}

/// hands out nonces and refuses to repeat one still in its window
pub struct NonceManager {
    window: usize,
    issued: Mutex<Issued>,
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::with_window(DEFAULT_NONCE_WINDOW)
    }
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// remember at most `window` nonces (at least one)
    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(1),
            issued: Mutex::new(Issued::default()),
        }
    }

    pub fn next_nonce(&self) -> Nonce {
        let mut issued = self.issued.lock();
        let nonce = loop {
            let nonce = Nonce::random();
            if issued.seen.insert(nonce) {
                break nonce;
            }
            tracing::warn!("nonce collision from os rng, redrawing");
        };
        issued.order.push_back(nonce);
        if issued.order.len() > self.window {
            if let Some(oldest) = issued.order.pop_front() {
                issued.seen.remove(&oldest);
            }
        }
        nonce
    }

    /// nonces currently remembered, never more than the window
    pub fn issued(&self) -> usize {
        self.issued.lock().seen.len()
    }

    /// forget every issued nonce, e.g. after the network key rotates
    pub fn clear(&self) {
        let mut issued = self.issued.lock();
        issued.seen.clear();
        issued.order.clear();
    }
}
