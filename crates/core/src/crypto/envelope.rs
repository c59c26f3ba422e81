//! AES-256-GCM envelopes for protected fields.
//!
//! Envelope layout:
//!
//! ```text
//! [version: 1][key fingerprint: 8][nonce: 12][ciphertext || tag: n + 16]
//! ```
//!
//! The version byte and key fingerprint are bound into the AEAD as associated
//! data, so a header cannot be swapped without failing authentication.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Marker written wherever a protected value would otherwise be rendered.
pub const PROTECTED_MARKER: &str = "[protected]";

const KEY_LEN: usize = 32;
const FINGERPRINT_LEN: usize = 8;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + FINGERPRINT_LEN;
const MIN_ENVELOPE_LEN: usize = HEADER_LEN + NONCE_LEN + TAG_LEN;

/// The symmetric key protecting field values.
///
/// Key bytes are wiped on drop. `Debug` shows only the fingerprint.
pub struct FieldKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
    fingerprint: [u8; FINGERPRINT_LEN],
}

impl FieldKey {
    /// Parses the base64 form stored in the configuration store.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|e| {
            CryptoError::InvalidKey {
                message: format!("not valid base64: {e}"),
            }
        })?);
        if decoded.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey {
                message: format!("expected {KEY_LEN} bytes, got {}", decoded.len()),
            });
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(&decoded);
        Ok(Self::from_bytes(bytes))
    }

    /// Generates a fresh random key and returns its base64 form.
    pub fn generate_base64() -> Zeroizing<String> {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Zeroizing::new(STANDARD.encode(key.as_slice()))
    }

    fn from_bytes(bytes: Zeroizing<[u8; KEY_LEN]>) -> Self {
        let digest = Sha256::digest(bytes.as_slice());
        let mut fingerprint = [0u8; FINGERPRINT_LEN];
        fingerprint.copy_from_slice(&digest[..FINGERPRINT_LEN]);
        Self { bytes, fingerprint }
    }

    /// Hex form of the key fingerprint, safe to log.
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(self.bytes.as_slice()).map_err(|e| CryptoError::InvalidKey {
            message: e.to_string(),
        })
    }

    /// Seals `plaintext` into a new envelope with a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut header = [0u8; HEADER_LEN];
        header[0] = ENVELOPE_VERSION;
        header[1..].copy_from_slice(&self.fingerprint);

        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(nonce.as_slice());
        bytes.extend_from_slice(&ciphertext);
        Ok(Envelope(bytes))
    }

    /// Opens an envelope sealed by this key.
    pub fn open(&self, envelope: &Envelope) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let bytes = envelope.as_bytes();
        if bytes.len() < MIN_ENVELOPE_LEN {
            return Err(decryption_failed("envelope truncated"));
        }
        let (header, rest) = bytes.split_at(HEADER_LEN);
        if header[0] != ENVELOPE_VERSION {
            return Err(decryption_failed("unsupported envelope version"));
        }
        if header[1..] != self.fingerprint {
            return Err(decryption_failed("sealed under a different key"));
        }
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let plaintext = self
            .cipher()?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| decryption_failed("authentication tag mismatch"))?;
        Ok(Zeroizing::new(plaintext))
    }
}

impl fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldKey")
            .field("fingerprint", &self.fingerprint_hex())
            .finish_non_exhaustive()
    }
}

fn decryption_failed(reason: &str) -> CryptoError {
    CryptoError::DecryptionFailed {
        reason: reason.to_string(),
    }
}

/// The stored, encrypted form of a protected field.
///
/// An envelope never renders its contents: `Debug` shows the length and
/// `Serialize` writes [`PROTECTED_MARKER`], so audit snapshots and logs of
/// records holding envelopes cannot leak ciphertext either.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope(Vec<u8>);

impl Envelope {
    /// Wraps bytes loaded from storage. Validation happens on open.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// The format version byte, if present.
    pub fn version(&self) -> Option<u8> {
        self.0.first().copied()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope({} bytes)", self.0.len())
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(PROTECTED_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FieldKey {
        FieldKey::from_base64(&FieldKey::generate_base64()).unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = key();
        let envelope = key.seal("Patient reports chest pain".as_bytes()).unwrap();
        let opened = key.open(&envelope).unwrap();
        assert_eq!(opened.as_slice(), "Patient reports chest pain".as_bytes());
    }

    #[test]
    fn test_envelope_layout() {
        let key = key();
        let envelope = key.seal(b"abc").unwrap();
        assert_eq!(envelope.version(), Some(ENVELOPE_VERSION));
        assert_eq!(envelope.as_bytes().len(), MIN_ENVELOPE_LEN + 3);
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let key = key();
        let a = key.seal(b"same").unwrap();
        let b = key.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let key = key();
        let mut bytes = key.seal(b"secret").unwrap().into_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = key.open(&Envelope::from_bytes(bytes)).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed { .. }));
    }

    #[test]
    fn test_foreign_key_fails() {
        let sealed = key().seal(b"secret").unwrap();
        let err = key().open(&sealed).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed { .. }));
    }

    #[test]
    fn test_truncated_envelope_fails() {
        let err = key()
            .open(&Envelope::from_bytes(vec![ENVELOPE_VERSION, 1, 2]))
            .unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed { .. }));
    }

    #[test]
    fn test_invalid_key_material() {
        assert!(matches!(
            FieldKey::from_base64("not base64!"),
            Err(CryptoError::InvalidKey { .. })
        ));
        assert!(matches!(
            FieldKey::from_base64(&STANDARD.encode([0u8; 16])),
            Err(CryptoError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_redacted_rendering() {
        let key = key();
        let envelope = key.seal(b"do not print").unwrap();
        let debug = format!("{:?}", envelope);
        assert!(debug.starts_with("Envelope("));
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            serde_json::json!(PROTECTED_MARKER)
        );
        assert!(!format!("{:?}", key).contains("bytes"));
    }
}
