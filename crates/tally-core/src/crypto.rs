//! Hashing and Ed25519 signatures for the Tally ledger.
//!
//! Identifiers and signing payloads use double SHA-256. Addresses are the
//! HASH160 (`RIPEMD-160(SHA-256(pubkey))`) of an Ed25519 public key.
//!
//! # Signing scheme
//!
//! Every input of a transaction signs the same **signing hash**: the double
//! SHA-256 of the transaction encoding with all unlock scripts omitted (see
//! [`Transaction::signing_hash`]). Inputs can therefore be signed in any order.

use ed25519_dalek::{Signer, Verifier};
use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use crate::error::CryptoError;
use crate::script::Script;
use crate::types::{Address, Hash256, Transaction};

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// `SHA-256(SHA-256(data))`, used for every ledger identifier.
pub fn double_sha256(data: &[u8]) -> Hash256 {
    Hash256(sha256(&sha256(data)))
}

/// `RIPEMD-160(SHA-256(data))`.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(sha256(data)).into()
}

/// Ed25519 keypair for signing transactions.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Address receiving outputs locked to this key.
    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message, returning the raw 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key for verifying signatures and deriving addresses.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key: vk })
    }

    /// Parse a public key from an untyped stack element.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; PUBLIC_KEY_LENGTH] =
            bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&array)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// HASH160 of the raw key, wrapped as an [`Address`].
    pub fn address(&self) -> Address {
        Address(hash160(&self.to_bytes()))
    }

    /// Verify an Ed25519 signature on a message.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let sig_bytes: [u8; SIGNATURE_LENGTH] = signature
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Self::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Verify `signature` by the key in `public_key` over the transaction's
/// signing hash. This is the check behind the `CHECKSIG` opcode.
pub fn verify_transaction_signature(
    tx: &Transaction,
    public_key: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let pk = PublicKey::from_slice(public_key)?;
    pk.verify(tx.signing_hash().as_bytes(), signature)
}

/// Sign every input of `tx` with `keypair`, writing P2PKH unlock scripts.
///
/// All inputs share one signing hash, so the signature is computed once.
pub fn sign_transaction(tx: &mut Transaction, keypair: &KeyPair) {
    let signature = keypair.sign(tx.signing_hash().as_bytes());
    let public_key = keypair.public_key().to_bytes();
    for input in &mut tx.inputs {
        input.unlock_script = Script::p2pkh_unlock(&signature, &public_key);
    }
}

/// Sign a single input in place. Use when inputs belong to different keys.
pub fn sign_transaction_input(
    tx: &mut Transaction,
    input_index: usize,
    keypair: &KeyPair,
) -> Result<(), CryptoError> {
    let signature = keypair.sign(tx.signing_hash().as_bytes());
    let public_key = keypair.public_key().to_bytes();
    let input = tx
        .inputs
        .get_mut(input_index)
        .ok_or(CryptoError::InvalidSignature)?;
    input.unlock_script = Script::p2pkh_unlock(&signature, &public_key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutPoint, TransactionInput, TransactionOutput};

    #[test]
    fn double_sha256_known_vector() {
        // SHA-256d of the empty string.
        assert_eq!(
            double_sha256(b"").to_string(),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn hash160_is_twenty_bytes_and_deterministic() {
        let a = hash160(b"tally");
        let b = hash160(b"tally");
        assert_eq!(a, b);
        assert_ne!(a, hash160(b"tallY"));
    }

    #[test]
    fn keypair_from_secret_deterministic() {
        let a = KeyPair::from_secret_bytes([7u8; 32]);
        let b = KeyPair::from_secret_bytes([7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn keypair_generate_unique() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn keypair_debug_hides_secret() {
        let kp = KeyPair::from_secret_bytes([9u8; 32]);
        let debug = format!("{kp:?}");
        assert!(debug.contains("public_key"));
        assert!(!debug.contains(&hex::encode([9u8; 32])));
    }

    #[test]
    fn pubkey_from_wrong_length_fails() {
        assert_eq!(PublicKey::from_slice(&[1u8; 31]), Err(CryptoError::InvalidPublicKey));
    }

    #[test]
    fn pubkey_serde_json_roundtrip() {
        let pk = KeyPair::from_secret_bytes([3u8; 32]).public_key();
        let json = serde_json::to_string(&pk).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, back);
    }

    #[test]
    fn sign_verify_message() {
        let kp = KeyPair::from_secret_bytes([1u8; 32]);
        let sig = kp.sign(b"ledger");
        assert!(kp.public_key().verify(b"ledger", &sig).is_ok());
        assert_eq!(
            kp.public_key().verify(b"ledgers", &sig),
            Err(CryptoError::VerificationFailed)
        );
        assert_eq!(
            kp.public_key().verify(b"ledger", &sig[..63]),
            Err(CryptoError::InvalidSignature)
        );
    }

    fn spend(kp: &KeyPair) -> Transaction {
        Transaction {
            inputs: vec![TransactionInput {
                previous_output: OutPoint { transaction_hash: Hash256([0x11; 32]), index: 0 },
                unlock_script: Script::new(),
            }],
            outputs: vec![TransactionOutput {
                value: 1_000,
                lock_script: Script::p2pkh_lock(&kp.address()),
            }],
        }
    }

    #[test]
    fn signed_transaction_verifies() {
        let kp = KeyPair::from_secret_bytes([5u8; 32]);
        let mut tx = spend(&kp);
        sign_transaction(&mut tx, &kp);
        let (sig, pk) = tx.inputs[0].unlock_script.p2pkh_unlock_parts().unwrap();
        assert!(verify_transaction_signature(&tx, &pk, &sig).is_ok());
    }

    #[test]
    fn tampered_output_breaks_signature() {
        let kp = KeyPair::from_secret_bytes([5u8; 32]);
        let mut tx = spend(&kp);
        sign_transaction(&mut tx, &kp);
        let (sig, pk) = tx.inputs[0].unlock_script.p2pkh_unlock_parts().unwrap();
        tx.outputs[0].value += 1;
        assert_eq!(
            verify_transaction_signature(&tx, &pk, &sig),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn sign_input_out_of_bounds() {
        let kp = KeyPair::from_secret_bytes([5u8; 32]);
        let mut tx = spend(&kp);
        assert!(sign_transaction_input(&mut tx, 3, &kp).is_err());
        assert!(sign_transaction_input(&mut tx, 0, &kp).is_ok());
        assert!(tx.inputs[0].unlock_script.is_p2pkh_unlock());
    }
}
