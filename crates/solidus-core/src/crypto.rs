//! Ed25519 cryptographic operations.
//!
//! Transactions are signed over their [`canonical_tx_digest`](crate::hash::canonical_tx_digest):
//! the same digest that serves as the txid, with every input's signature
//! field removed. Signing an input therefore does not disturb the digest
//! other inputs are signed against, so inputs may be signed in any order.
//!
//! Addresses are derived from the raw public key: `bs58(content_hash(pubkey)[..20])`.

use ed25519_dalek::{Signer, Verifier};
use std::fmt;

use crate::error::CryptoError;
use crate::hash::{canonical_tx_digest, content_hash};
use crate::types::WireTransaction;

/// Length, in bytes, of the address payload taken from the pubkey hash.
const ADDRESS_PAYLOAD_LEN: usize = 20;

/// Ed25519 keypair for signing transactions.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

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

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Sign a `WireTransaction` input in place, writing hex-encoded pubkey
    /// and signature fields.
    pub fn sign_input(&self, tx: &mut WireTransaction, input_index: usize) {
        let digest = canonical_tx_digest(tx);
        let sig = self.sign(digest.as_bytes());
        let input = &mut tx.inputs[input_index];
        input.pubkey = hex::encode(self.public_key().to_bytes());
        input.sig = Some(hex::encode(sig));
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

#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key: vk })
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidPublicKey)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&arr)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Derive the address string that owns outputs paid to this key.
    pub fn address(&self) -> String {
        address_from_pubkey_bytes(&self.to_bytes())
    }

    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(signature);
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

/// Derive the address string owning outputs paid to a raw public key.
pub fn address_from_pubkey_bytes(pubkey: &[u8; 32]) -> String {
    let hash = content_hash(pubkey);
    bs58::encode(&hash.as_bytes()[..ADDRESS_PAYLOAD_LEN]).into_string()
}

/// Verify the signature on one input of a transaction, binding it both to
/// the canonical digest and to the address the input claims to spend from.
///
/// Mirrors the mempool admission pipeline's signature step: a signature that
/// verifies under a key which does not hash to the claimed address is
/// rejected the same way an invalid signature is, since either case means
/// the spender did not prove ownership of the referenced output.
pub fn verify_input_signature(
    tx: &WireTransaction,
    input_index: usize,
) -> Result<(), CryptoError> {
    let input = tx
        .inputs
        .get(input_index)
        .ok_or(CryptoError::InvalidSignature)?;
    let sig_hex = input.sig.as_ref().ok_or(CryptoError::MissingSignature)?;
    let sig_bytes = hex::decode(sig_hex).map_err(|_| CryptoError::InvalidSignature)?;
    let sig: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;

    let pubkey = PublicKey::from_hex(&input.pubkey)?;
    if pubkey.address() != input.address {
        return Err(CryptoError::AddressMismatch);
    }

    let digest = canonical_tx_digest(tx);
    pubkey.verify(digest.as_bytes(), &sig)
}
