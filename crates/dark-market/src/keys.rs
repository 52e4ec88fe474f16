//! x25519 key agreement between a bettor and the computation network
//!
//! every bet gets a fresh ephemeral key pair. the private half never leaves
//! the bettor's process; the public half is published next to the
//! ciphertext so the network can derive the same shared secret.
//!
//! all secret material zeroizes on drop (x25519-dalek `zeroize` feature).

use core::fmt;

use rand_core::OsRng;
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::{Error, Result};

/// x25519 scalar / point width
pub const KEY_BYTES: usize = 32;

fn key_array(bytes: &[u8]) -> Result<Zeroizing<[u8; KEY_BYTES]>> {
    if bytes.len() != KEY_BYTES {
        return Err(Error::InvalidKeyLength {
            expected: KEY_BYTES,
            actual: bytes.len(),
        });
    }
    let mut arr = Zeroizing::new([0u8; KEY_BYTES]);
    arr.copy_from_slice(bytes);
    Ok(arr)
}

/// x25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_BYTES]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr = key_array(bytes)?;
        Ok(Self(*arr))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| Error::Config(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// long-lived public key of the computation network
pub type NetworkPublicKey = PublicKey;

/// x25519 private scalar, zeroized on drop
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    /// fresh key from the os csprng
    pub fn random() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr = key_array(bytes)?;
        Ok(Self(StaticSecret::from(*arr)))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0).to_bytes())
    }

    /// raw scalar bytes; caller owns zeroization of the wrapper
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEY_BYTES]> {
        Zeroizing::new(self.0.to_bytes())
    }

    /// ecdh with a peer public key
    pub fn diffie_hellman(&self, peer: &PublicKey) -> Result<SharedSecret> {
        let shared = self.0.diffie_hellman(&x25519_dalek::PublicKey::from(peer.0));
        if !shared.was_contributory() {
            return Err(Error::InvalidPublicKey);
        }
        Ok(SharedSecret(shared))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// per-bet ephemeral key pair
#[derive(Clone, Debug)]
pub struct EphemeralKeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let private_key = PrivateKey::random();
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }
}

/// network-side key pair, held by the computation network only
pub type NetworkKeyPair = EphemeralKeyPair;

/// generate a fresh ephemeral key pair
pub fn generate_ephemeral_keypair() -> EphemeralKeyPair {
    EphemeralKeyPair::generate()
}

/// derive the shared secret for `private_key` and `peer_public_key`
///
/// both inputs must be exactly 32 bytes. symmetric:
/// `derive(a.priv, b.pub) == derive(b.priv, a.pub)`.
pub fn derive_shared_secret(private_key: &[u8], peer_public_key: &[u8]) -> Result<SharedSecret> {
    let secret = PrivateKey::from_slice(private_key)?;
    let peer = PublicKey::from_slice(peer_public_key)?;
    secret.diffie_hellman(&peer)
}

/// ecdh output, lives for one encryption or decryption
///
/// not clonable, zeroized on drop, compared in constant time.
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        self.0.as_bytes()
    }
}

impl ConstantTimeEq for SharedSecret {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0.as_bytes().ct_eq(other.0.as_bytes())
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for SharedSecret {}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_symmetry() {
        for _ in 0..8 {
            let a = generate_ephemeral_keypair();
            let b = generate_ephemeral_keypair();

            let ab = derive_shared_secret(
                a.private_key.to_bytes().as_slice(),
                b.public_key.as_bytes(),
            )
            .unwrap();
            let ba = derive_shared_secret(
                b.private_key.to_bytes().as_slice(),
                a.public_key.as_bytes(),
            )
            .unwrap();

            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn test_different_peers_differ() {
        let a = generate_ephemeral_keypair();
        let b = generate_ephemeral_keypair();
        let c = generate_ephemeral_keypair();
        let ab = a.private_key.diffie_hellman(&b.public_key).unwrap();
        let ac = a.private_key.diffie_hellman(&c.public_key).unwrap();
        assert_ne!(ab, ac);
    }

    #[test]
    fn test_invalid_key_length() {
        let a = generate_ephemeral_keypair();
        let err = derive_shared_secret(&[0u8; 31], a.public_key.as_bytes()).unwrap_err();
        assert_eq!(err, Error::InvalidKeyLength { expected: 32, actual: 31 });

        let err = derive_shared_secret(a.private_key.to_bytes().as_slice(), &[0u8; 33])
            .unwrap_err();
        assert_eq!(err, Error::InvalidKeyLength { expected: 32, actual: 33 });
    }

    #[test]
    fn test_low_order_point_rejected() {
        let a = generate_ephemeral_keypair();
        let identity = PublicKey::from_bytes([0u8; 32]);
        assert_eq!(
            a.private_key.diffie_hellman(&identity).unwrap_err(),
            Error::InvalidPublicKey
        );
    }

    #[test]
    fn test_hex_roundtrip() {
        let pk = generate_ephemeral_keypair().public_key;
        assert_eq!(PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
        assert!(PublicKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let kp = generate_ephemeral_keypair();
        assert_eq!(format!("{:?}", kp.private_key), "PrivateKey(<redacted>)");
    }
}
