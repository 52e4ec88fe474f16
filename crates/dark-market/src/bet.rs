//! bet encoding (bettor -> ledger) and receipt decoding (network -> bettor)
//!
//! a bet is two field elements, amount and prediction, encrypted in one
//! counter-mode stream (positions 0 and 1) under a fresh ephemeral key. the
//! prediction is its own element, never packed with the amount, so the
//! payout circuit can weight amounts by it directly.
//!
//! receipt wire layout, each field 32 bytes:
//!
//! ```text
//! [ bet_id | amount | prediction ]   encrypted at request_nonce + 1
//! ```

use crate::cipher::{CiphertextField, RescueCipher};
use crate::correlator::ComputationOffset;
use crate::field::FIELD_BYTES;
use crate::keys::{
    EphemeralKeyPair, NetworkPublicKey, PrivateKey, PublicKey, SharedSecret, KEY_BYTES,
};
use crate::nonce::{Nonce, NonceManager, NONCE_BYTES};
use crate::{Error, Result};

/// number of fields in an encrypted receipt
pub const RECEIPT_FIELDS: usize = 3;

/// outcome side
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    No = 0,
    Yes = 1,
}

impl Side {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<bool> for Side {
    fn from(yes: bool) -> Self {
        if yes {
            Side::Yes
        } else {
            Side::No
        }
    }
}

impl TryFrom<u8> for Side {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Side::No),
            1 => Ok(Side::Yes),
            other => Err(Error::InvalidPrediction(other)),
        }
    }
}

/// plaintext bet intent, consumed once by the encoder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BetInput {
    pub market_id: u64,
    /// smallest currency unit
    pub bet_amount: u64,
    pub prediction: Side,
    /// client-side tag for matching receipts to intents
    pub user_nonce: u64,
}

impl BetInput {
    pub fn new(market_id: u64, bet_amount: u64, prediction: u8, user_nonce: u64) -> Result<Self> {
        Ok(Self {
            market_id,
            bet_amount,
            prediction: Side::try_from(prediction)?,
            user_nonce,
        })
    }
}

/// ciphertext side of a bet, as stored on the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBetData {
    pub ciphertext_amount: CiphertextField,
    pub ciphertext_prediction: CiphertextField,
    pub ephemeral_public_key: PublicKey,
    pub nonce: Nonce,
}

impl EncryptedBetData {
    /// wire form for the place-bet request
    pub fn to_submission(&self, computation_offset: ComputationOffset) -> PlaceBetSubmission {
        PlaceBetSubmission {
            computation_offset,
            ciphertext_amount: self.ciphertext_amount.to_vec(),
            ciphertext_prediction: self.ciphertext_prediction.to_vec(),
            ephemeral_public_key: self.ephemeral_public_key.as_bytes().to_vec(),
            nonce: self.nonce.to_u128(),
        }
    }

    /// parse a submission; lengths only, contents are opaque here
    pub fn from_submission(sub: &PlaceBetSubmission) -> Result<Self> {
        sub.validate_lengths()?;
        let mut ciphertext_amount = [0u8; FIELD_BYTES];
        let mut ciphertext_prediction = [0u8; FIELD_BYTES];
        ciphertext_amount.copy_from_slice(&sub.ciphertext_amount);
        ciphertext_prediction.copy_from_slice(&sub.ciphertext_prediction);
        Ok(Self {
            ciphertext_amount,
            ciphertext_prediction,
            ephemeral_public_key: PublicKey::from_slice(&sub.ephemeral_public_key)?,
            nonce: Nonce::from_u128(sub.nonce),
        })
    }

    /// both ciphertext fields in stream order
    pub fn fields(&self) -> [CiphertextField; 2] {
        [self.ciphertext_amount, self.ciphertext_prediction]
    }
}

/// place-bet request as consumed by the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceBetSubmission {
    pub computation_offset: ComputationOffset,
    pub ciphertext_amount: Vec<u8>,
    pub ciphertext_prediction: Vec<u8>,
    pub ephemeral_public_key: Vec<u8>,
    pub nonce: u128,
}

impl PlaceBetSubmission {
    pub fn validate_lengths(&self) -> Result<()> {
        for (name, field) in [
            ("amount", &self.ciphertext_amount),
            ("prediction", &self.ciphertext_prediction),
        ] {
            if field.len() != FIELD_BYTES {
                return Err(Error::MalformedCiphertext(format!(
                    "{} ciphertext must be {} bytes, got {}",
                    name,
                    FIELD_BYTES,
                    field.len()
                )));
            }
        }
        if self.ephemeral_public_key.len() != KEY_BYTES {
            return Err(Error::InvalidKeyLength {
                expected: KEY_BYTES,
                actual: self.ephemeral_public_key.len(),
            });
        }
        Ok(())
    }
}

/// what the bettor keeps locally to open their bet and receipt later
pub struct BetSecrets {
    pub private_key: PrivateKey,
    pub nonce: Nonce,
    pub user_nonce: u64,
}

impl BetSecrets {
    fn shared_secret(&self, network: &NetworkPublicKey) -> Result<SharedSecret> {
        self.private_key.diffie_hellman(network)
    }

    /// open a receipt produced for this bet
    pub fn open_receipt(
        &self,
        receipt: &EncryptedReceipt,
        network: &NetworkPublicKey,
    ) -> Result<BetReceipt> {
        if receipt.nonce != self.nonce.successor() {
            return Err(Error::MalformedReceipt("unexpected response nonce".into()));
        }
        decode_receipt(
            &receipt.ciphertext,
            self.private_key.to_bytes().as_slice(),
            receipt.nonce.as_bytes(),
            network,
        )
    }
}

/// bet encoder bound to one network key
///
/// remembers a bounded window of its nonces, see [`NonceManager`]. the
/// window is dropped when the network key rotates.
pub struct BetEncoder {
    network: NetworkPublicKey,
    nonces: NonceManager,
}

impl BetEncoder {
    pub fn new(network: NetworkPublicKey) -> Self {
        Self {
            network,
            nonces: NonceManager::new(),
        }
    }

    pub fn network_key(&self) -> &NetworkPublicKey {
        &self.network
    }

    /// switch to a new network key and forget the old key's nonces
    pub fn rotate_network_key(&mut self, network: NetworkPublicKey) {
        self.network = network;
        self.nonces.clear();
        tracing::info!("bet encoder switched network key");
    }

    /// nonces the encoder still remembers
    pub fn remembered_nonces(&self) -> usize {
        self.nonces.issued()
    }

    /// encrypt a bet under a fresh ephemeral key and nonce
    pub fn encode(&self, input: &BetInput) -> Result<(EncryptedBetData, BetSecrets)> {
        let keypair = EphemeralKeyPair::generate();
        let shared = keypair.private_key.diffie_hellman(&self.network)?;
        let nonce = self.nonces.next_nonce();

        let cipher = RescueCipher::new(&shared);
        let ct = cipher.encrypt(&[input.bet_amount, input.prediction.as_u8() as u64], &nonce);

        let data = EncryptedBetData {
            ciphertext_amount: ct[0],
            ciphertext_prediction: ct[1],
            ephemeral_public_key: keypair.public_key,
            nonce,
        };
        let secrets = BetSecrets {
            private_key: keypair.private_key,
            nonce,
            user_nonce: input.user_nonce,
        };

        tracing::debug!(market_id = input.market_id, "bet encrypted");
        Ok((data, secrets))
    }
}

/// encrypt a bet for `network`
pub fn encode_bet(
    input: &BetInput,
    network: &NetworkPublicKey,
) -> Result<(EncryptedBetData, BetSecrets)> {
    BetEncoder::new(*network).encode(input)
}

/// bettor re-opens their own submission
pub fn decode_bet(
    data: &EncryptedBetData,
    secrets: &BetSecrets,
    network: &NetworkPublicKey,
) -> Result<(u64, Side)> {
    let shared = secrets.shared_secret(network)?;
    let plain = RescueCipher::new(&shared).decrypt(&data.fields(), &data.nonce)?;
    let prediction = u8::try_from(plain[1]).map_err(|_| Error::ValueOutOfRange)?;
    Ok((plain[0], Side::try_from(prediction)?))
}

/// decrypted receipt, only the bettor can produce it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BetReceipt {
    pub bet_id: u64,
    pub amount: u64,
    pub prediction: Side,
}

/// receipt as returned by the network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedReceipt {
    pub ciphertext: Vec<u8>,
    pub nonce: Nonce,
}

impl EncryptedReceipt {
    /// network side: encrypt a receipt under the bettor's shared secret
    pub fn seal(shared: &SharedSecret, request_nonce: &Nonce, receipt: &BetReceipt) -> Self {
        let nonce = request_nonce.successor();
        let fields = RescueCipher::new(shared).encrypt(
            &[receipt.bet_id, receipt.amount, receipt.prediction.as_u8() as u64],
            &nonce,
        );
        Self {
            ciphertext: fields.concat(),
            nonce,
        }
    }
}

/// decode `[bet_id, amount, prediction]` from a receipt ciphertext
///
/// `private_key` is the bettor's ephemeral key, `nonce` the receipt nonce.
pub fn decode_receipt(
    ciphertext: &[u8],
    private_key: &[u8],
    nonce: &[u8],
    network: &NetworkPublicKey,
) -> Result<BetReceipt> {
    if ciphertext.is_empty() || ciphertext.len() % FIELD_BYTES != 0 {
        return Err(Error::MalformedReceipt(format!(
            "length {} is not a multiple of {}",
            ciphertext.len(),
            FIELD_BYTES
        )));
    }
    let count = ciphertext.len() / FIELD_BYTES;
    if count != RECEIPT_FIELDS {
        return Err(Error::MalformedReceipt(format!(
            "expected {} fields, got {}",
            RECEIPT_FIELDS, count
        )));
    }
    if nonce.len() != NONCE_BYTES {
        return Err(Error::InvalidNonceLength {
            expected: NONCE_BYTES,
            actual: nonce.len(),
        });
    }

    let shared = PrivateKey::from_slice(private_key)?.diffie_hellman(network)?;
    let fields: Vec<CiphertextField> = ciphertext
        .chunks_exact(FIELD_BYTES)
        .map(|c| {
            let mut f = [0u8; FIELD_BYTES];
            f.copy_from_slice(c);
            f
        })
        .collect();

    let plain = RescueCipher::new(&shared)
        .decrypt(&fields, &Nonce::from_slice(nonce)?)
        .map_err(|e| Error::MalformedReceipt(e.to_string()))?;

    let prediction = u8::try_from(plain[2])
        .ok()
        .and_then(|p| Side::try_from(p).ok())
        .ok_or_else(|| Error::MalformedReceipt("prediction is not 0 or 1".into()))?;

    Ok(BetReceipt {
        bet_id: plain[0],
        amount: plain[1],
        prediction,
    })
}
