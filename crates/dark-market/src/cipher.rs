//! rescue cipher: keyed rescue permutation in counter mode
//!
//! ```text
//! key    = rescue_hash(lo128(shared), hi128(shared))        5 elements
//! block  = P([nonce, ctr, 0, 0, 0] + key) + key             even-mansour
//! c_j    = m_j + ks_j  (mod l)
//! ```
//!
//! encryption is a field addition, so the network can strip or combine
//! masks with the same arithmetic the payout circuit uses.

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::field::{Fe, FIELD_BYTES};
use crate::keys::{SharedSecret, KEY_BYTES};
use crate::nonce::{Nonce, NONCE_BYTES};
use crate::rescue::{self, WIDTH};
use crate::{Error, Result};

/// one ciphertext field on the wire
pub type CiphertextField = [u8; FIELD_BYTES];

/// cipher instance bound to one shared secret
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RescueCipher {
    key: [Fe; WIDTH],
}

impl RescueCipher {
    pub fn new(secret: &SharedSecret) -> Self {
        Self::from_key_bytes(secret.as_bytes())
    }

    pub fn from_key_bytes(secret: &[u8; KEY_BYTES]) -> Self {
        let mut lo = [0u8; 16];
        let mut hi = [0u8; 16];
        lo.copy_from_slice(&secret[..16]);
        hi.copy_from_slice(&secret[16..]);

        let mut limbs = [
            Fe::from(u128::from_le_bytes(lo)),
            Fe::from(u128::from_le_bytes(hi)),
        ];
        let key = rescue::hash(&limbs);

        lo.zeroize();
        hi.zeroize();
        limbs.zeroize();
        Self { key }
    }

    fn block(&self, nonce: &Nonce, counter: u64) -> [Fe; WIDTH] {
        let mut state = [Fe::ZERO; WIDTH];
        state[0] = nonce.to_field();
        state[1] = Fe::from(counter);
        for (s, k) in state.iter_mut().zip(self.key.iter()) {
            *s += *k;
        }
        rescue::permute(&mut state);
        for (s, k) in state.iter_mut().zip(self.key.iter()) {
            *s += *k;
        }
        state
    }

    /// first `len` keystream elements for `nonce`
    pub fn keystream(&self, nonce: &Nonce, len: usize) -> Zeroizing<Vec<Fe>> {
        let mut out = Zeroizing::new(Vec::with_capacity(len));
        let mut counter = 0u64;
        while out.len() < len {
            let mut block = self.block(nonce, counter);
            let take = (len - out.len()).min(WIDTH);
            out.extend_from_slice(&block[..take]);
            block.zeroize();
            counter += 1;
        }
        out
    }

    /// encrypt field elements, returning field ciphertexts
    pub fn encrypt_fields(&self, values: &[Fe], nonce: &Nonce) -> Vec<Fe> {
        let ks = self.keystream(nonce, values.len());
        values.iter().zip(ks.iter()).map(|(m, k)| *m + *k).collect()
    }

    /// decrypt field ciphertexts
    pub fn decrypt_fields(&self, ciphertext: &[Fe], nonce: &Nonce) -> Vec<Fe> {
        let ks = self.keystream(nonce, ciphertext.len());
        ciphertext.iter().zip(ks.iter()).map(|(c, k)| *c - *k).collect()
    }

    /// encrypt integers into 32-byte wire fields
    pub fn encrypt(&self, values: &[u64], nonce: &Nonce) -> Vec<CiphertextField> {
        let fields: Zeroizing<Vec<Fe>> =
            Zeroizing::new(values.iter().map(|v| Fe::from(*v)).collect());
        self.encrypt_fields(&fields, nonce)
            .iter()
            .map(Fe::to_bytes)
            .collect()
    }

    /// decrypt 32-byte wire fields back into integers
    pub fn decrypt(&self, ciphertext: &[CiphertextField], nonce: &Nonce) -> Result<Vec<u64>> {
        let fields = ciphertext
            .iter()
            .map(Fe::from_bytes)
            .collect::<Result<Vec<_>>>()?;
        let plain = Zeroizing::new(self.decrypt_fields(&fields, nonce));
        plain.iter().map(Fe::to_u64).collect()
    }
}

fn key_and_nonce(key: &[u8], nonce: &[u8]) -> Result<(RescueCipher, Nonce)> {
    let key: &[u8; KEY_BYTES] = key.try_into().map_err(|_| Error::InvalidKeyLength {
        expected: KEY_BYTES,
        actual: key.len(),
    })?;
    if nonce.len() != NONCE_BYTES {
        return Err(Error::InvalidNonceLength {
            expected: NONCE_BYTES,
            actual: nonce.len(),
        });
    }
    Ok((RescueCipher::from_key_bytes(key), Nonce::from_slice(nonce)?))
}

/// encrypt `values` under raw shared-secret bytes and a 16-byte nonce
pub fn encrypt(values: &[u64], key: &[u8], nonce: &[u8]) -> Result<Vec<CiphertextField>> {
    let (cipher, nonce) = key_and_nonce(key, nonce)?;
    Ok(cipher.encrypt(values, &nonce))
}

/// inverse of [`encrypt`]
pub fn decrypt(ciphertext: &[CiphertextField], key: &[u8], nonce: &[u8]) -> Result<Vec<u64>> {
    let (cipher, nonce) = key_and_nonce(key, nonce)?;
    cipher.decrypt(ciphertext, &nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> [u8; 32] {
        *blake3::hash(b"dark-market cipher test key").as_bytes()
    }

    #[test]
    fn test_roundtrip_multi_block() {
        let cipher = RescueCipher::from_key_bytes(&test_key());
        let nonce = Nonce::from_u128(99);
        let values: Vec<u64> = (0..12).map(|i| i * 1_000_000_007).collect();

        let ct = cipher.encrypt(&values, &nonce);
        assert_eq!(ct.len(), values.len());
        assert_eq!(cipher.decrypt(&ct, &nonce).unwrap(), values);
    }

    #[test]
    fn test_deterministic() {
        let cipher = RescueCipher::from_key_bytes(&test_key());
        let nonce = Nonce::from_u128(1);
        assert_eq!(cipher.encrypt(&[5], &nonce), cipher.encrypt(&[5], &nonce));
        assert_ne!(cipher.encrypt(&[5], &nonce), cipher.encrypt(&[6], &nonce));
    }

    #[test]
    fn test_wrong_nonce_garbles() {
        let cipher = RescueCipher::from_key_bytes(&test_key());
        let ct = cipher.encrypt(&[42], &Nonce::from_u128(1));
        // wrong mask leaves a full-width element that cannot reveal as u64
        assert!(cipher.decrypt(&ct, &Nonce::from_u128(2)).is_err());
    }

    #[test]
    fn test_additive_structure() {
        let cipher = RescueCipher::from_key_bytes(&test_key());
        let nonce = Nonce::from_u128(7);
        let ct = cipher.encrypt_fields(&[Fe::from(30u64), Fe::from(12u64)], &nonce);
        let ks = cipher.keystream(&nonce, 2);
        let sum = (ct[0] - ks[0]) + (ct[1] - ks[1]);
        assert_eq!(sum.to_u64().unwrap(), 42);
    }

    #[test]
    fn test_length_validation() {
        assert_eq!(
            encrypt(&[1], &[0u8; 16], &[0u8; 16]).unwrap_err(),
            Error::InvalidKeyLength { expected: 32, actual: 16 }
        );
        assert_eq!(
            encrypt(&[1], &test_key(), &[0u8; 12]).unwrap_err(),
            Error::InvalidNonceLength { expected: 16, actual: 12 }
        );
        assert!(decrypt(&[[0u8; 32]], &[0u8; 33], &[0u8; 16]).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_roundtrip(
            amount in any::<u64>(),
            prediction in 0u64..=1,
            key in any::<[u8; 32]>(),
            nonce in any::<[u8; 16]>(),
        ) {
            let ct = encrypt(&[amount, prediction], &key, &nonce).unwrap();
            prop_assert_eq!(decrypt(&ct, &key, &nonce).unwrap(), vec![amount, prediction]);
        }

        #[test]
        fn prop_distinct_under_fresh_nonces(
            a in any::<u64>(),
            b in any::<u64>(),
            n1 in any::<u128>(),
            n2 in any::<u128>(),
        ) {
            prop_assume!(a != b && n1 != n2);
            let cipher = RescueCipher::from_key_bytes(&test_key());
            let ca = cipher.encrypt(&[a], &Nonce::from_u128(n1));
            let cb = cipher.encrypt(&[b], &Nonce::from_u128(n2));
            prop_assert_ne!(
                blake3::hash(&ca[0]),
                blake3::hash(&cb[0])
            );
        }
    }
}
