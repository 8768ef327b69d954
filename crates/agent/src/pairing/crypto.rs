// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pairing cryptography: P-256 ECDH, fingerprints, verification-code and
//! session-key derivation, and the AES-256-GCM session cipher.
//!
//! The session cipher runs over an already transport-secured channel; the
//! transport layer is the primary defense against eavesdropping.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::rand_core::OsRng;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::PublicKey;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::PairingError;

/// Domain-separation prefixes for the two SHA-256 derivations.
const SESSION_KEY_CONTEXT: &[u8] = b"terminox-session-key";
const VERIFICATION_CONTEXT: &[u8] = b"terminox-verification";

/// AES-GCM nonce size (96 bits).
const NONCE_SIZE: usize = 12;

/// Agent-side ECDH key pair for one pairing session.
pub struct AgentKeyPair {
    secret: EphemeralSecret,
    public_der: Vec<u8>,
}

impl AgentKeyPair {
    /// Generate a fresh P-256 key pair.
    pub fn generate() -> Result<Self, PairingError> {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_der = secret
            .public_key()
            .to_public_key_der()
            .map_err(|e| PairingError::CryptoError(format!("public key encoding: {e}")))?
            .into_vec();
        Ok(Self { secret, public_der })
    }

    /// SubjectPublicKeyInfo DER of the agent public key.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn public_base64(&self) -> String {
        BASE64.encode(&self.public_der)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_der)
    }

    /// Run ECDH against the peer key and derive the session key and
    /// verification code. Consumes the key pair; the raw shared secret
    /// never leaves this function.
    pub fn derive(self, mobile_public: &PublicKey) -> DerivedSecrets {
        let shared = self.secret.diffie_hellman(mobile_public);
        let shared_bytes = shared.raw_secret_bytes();

        let mut key_hasher = Sha256::new();
        key_hasher.update(SESSION_KEY_CONTEXT);
        key_hasher.update(shared_bytes);
        let session_key: [u8; 32] = key_hasher.finalize().into();

        let mut code_hasher = Sha256::new();
        code_hasher.update(VERIFICATION_CONTEXT);
        code_hasher.update(shared_bytes);
        let digest = code_hasher.finalize();
        let v = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let verification_code = format!("{:06}", v % 1_000_000);

        DerivedSecrets { session_key, verification_code }
    }
}

/// Output of the key exchange: everything the pairing flow needs after
/// the shared secret is gone.
pub struct DerivedSecrets {
    pub session_key: [u8; 32],
    /// Six decimal digits, zero-padded.
    pub verification_code: String,
}

/// `"SHA256:" + base64(sha256(spki))` with trailing padding trimmed.
pub fn fingerprint(public_der: &[u8]) -> String {
    let digest = Sha256::digest(public_der);
    let encoded = BASE64.encode(digest);
    format!("SHA256:{}", encoded.trim_end_matches('='))
}

/// Decode a base64 X.509 SubjectPublicKeyInfo into a P-256 public key.
pub fn decode_public_key(b64: &str) -> Result<(PublicKey, Vec<u8>), PairingError> {
    let der = BASE64
        .decode(b64.trim())
        .map_err(|_| PairingError::InvalidKey)?;
    let key = PublicKey::from_public_key_der(&der).map_err(|_| PairingError::InvalidKey)?;
    Ok((key, der))
}

/// Encrypt with AES-256-GCM under a random 96-bit nonce. Output layout is
/// `nonce || ciphertext+tag`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, PairingError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| PairingError::CryptoError(format!("cipher init: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| PairingError::CryptoError(format!("encrypt: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt the `nonce || ciphertext+tag` layout produced by [`seal`].
pub fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, PairingError> {
    if sealed.len() < NONCE_SIZE {
        return Err(PairingError::CryptoError("sealed payload too short".to_owned()));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| PairingError::CryptoError(format!("cipher init: {e}")))?;

    let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
    cipher
        .decrypt(nonce, &sealed[NONCE_SIZE..])
        .map_err(|_| PairingError::CryptoError("decrypt failed".to_owned()))
}

#[cfg(test)]
#[path = "crypto_tests.rs"]
mod tests;
