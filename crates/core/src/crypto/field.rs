//! Field encryption service.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::envelope::{Envelope, FieldKey};
use crate::config_store::{ConfigurationStore, ENCRYPTION_KEY};
use crate::error::{CoreResult, CryptoError};

/// Encrypts and decrypts protected field values.
///
/// The key is read from the [`ConfigurationStore`] on every call and dropped
/// (and wiped) when the call returns. Absent values pass through untouched;
/// an empty string is a value and is encrypted like any other.
#[derive(Clone)]
pub struct FieldEncryptionService {
    store: Arc<dyn ConfigurationStore>,
}

impl FieldEncryptionService {
    pub fn new(store: Arc<dyn ConfigurationStore>) -> Self {
        Self { store }
    }

    async fn load_key(&self) -> CoreResult<FieldKey> {
        let encoded = self
            .store
            .get(ENCRYPTION_KEY)
            .await?
            .ok_or_else(|| CryptoError::KeyUnavailable {
                key: ENCRYPTION_KEY.to_string(),
            })?;
        Ok(FieldKey::from_base64(&encoded)?)
    }

    /// Encrypts a field value. `None` yields `None`.
    pub async fn encrypt(&self, plaintext: Option<&str>) -> CoreResult<Option<Envelope>> {
        let Some(plaintext) = plaintext else {
            return Ok(None);
        };
        let key = self.load_key().await?;
        let envelope = key.seal(plaintext.as_bytes())?;
        debug!(key = %key.fingerprint_hex(), "sealed protected field");
        Ok(Some(envelope))
    }

    /// Decrypts a field value. `None` yields `None`.
    pub async fn decrypt(&self, envelope: Option<&Envelope>) -> CoreResult<Option<String>> {
        let Some(envelope) = envelope else {
            return Ok(None);
        };
        let key = self.load_key().await?;
        let plaintext = key.open(envelope).inspect_err(|e| {
            warn!(key = %key.fingerprint_hex(), error = %e, "failed to open protected field");
        })?;
        // Decode in place; the zeroizing buffer is wiped when it drops.
        let text = std::str::from_utf8(&plaintext).map_err(|_| CryptoError::DecryptionFailed {
            reason: "plaintext is not valid UTF-8".to_string(),
        })?;
        Ok(Some(text.to_owned()))
    }

    /// Encrypts many values concurrently.
    ///
    /// Results are returned in input order; one failure does not affect the
    /// other values.
    pub async fn encrypt_batch(&self, values: &[Option<&str>]) -> Vec<CoreResult<Option<Envelope>>> {
        join_all(values.iter().map(|value| self.encrypt(*value))).await
    }

    /// Decrypts many envelopes concurrently, with per-value results.
    pub async fn decrypt_batch(
        &self,
        envelopes: &[Option<&Envelope>],
    ) -> Vec<CoreResult<Option<String>>> {
        join_all(envelopes.iter().map(|envelope| self.decrypt(*envelope))).await
    }
}

impl std::fmt::Debug for FieldEncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldEncryptionService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::InMemoryConfigStore;
    use crate::error::CoreError;

    fn service() -> (FieldEncryptionService, Arc<InMemoryConfigStore>) {
        let store = Arc::new(InMemoryConfigStore::with_value(
            ENCRYPTION_KEY,
            FieldKey::generate_base64().as_str(),
        ));
        (FieldEncryptionService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let (svc, _) = service();
        let long = "x".repeat(10_000);
        for sample in ["", "Hypertension, stage 2", "ñandú / 東京 / 🩺", long.as_str()] {
            let envelope = svc.encrypt(Some(sample)).await.unwrap();
            assert!(envelope.is_some());
            let plain = svc.decrypt(envelope.as_ref()).await.unwrap();
            assert_eq!(plain.as_deref(), Some(sample));
        }
    }

    #[tokio::test]
    async fn test_non_utf8_plaintext_fails() {
        let encoded = FieldKey::generate_base64();
        let key = FieldKey::from_base64(&encoded).unwrap();
        let store = Arc::new(InMemoryConfigStore::with_value(ENCRYPTION_KEY, encoded.as_str()));
        let svc = FieldEncryptionService::new(store);

        let envelope = key.seal(&[0xff, 0xfe, 0xfd]).unwrap();
        let err = svc.decrypt(Some(&envelope)).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Crypto(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_absent_passes_through() {
        let (svc, store) = service();
        store.remove(ENCRYPTION_KEY);
        assert!(svc.encrypt(None).await.unwrap().is_none());
        assert!(svc.decrypt(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_key_unavailable() {
        let (svc, store) = service();
        store.remove(ENCRYPTION_KEY);
        let err = svc.encrypt(Some("value")).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Crypto(CryptoError::KeyUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_key_is_read_per_call() {
        let (svc, store) = service();
        let envelope = svc.encrypt(Some("before rotation")).await.unwrap();

        store
            .put(ENCRYPTION_KEY, FieldKey::generate_base64())
            .await
            .unwrap();
        let err = svc.decrypt(envelope.as_ref()).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Crypto(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let (svc, _) = service();
        let good = svc.encrypt(Some("ok")).await.unwrap();
        let garbage = Envelope::from_bytes(vec![1, 2, 3]);

        let results = svc
            .decrypt_batch(&[good.as_ref(), Some(&garbage), None])
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().as_deref(), Some("ok"));
        assert!(results[1].is_err());
        assert!(results[2].as_ref().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_encrypt_batch_preserves_order() {
        let (svc, _) = service();
        let sealed = svc.encrypt_batch(&[Some("a"), None, Some("c")]).await;
        let sealed: Vec<_> = sealed.into_iter().map(|r| r.unwrap()).collect();
        let opened = svc
            .decrypt_batch(&sealed.iter().map(|e| e.as_ref()).collect::<Vec<_>>())
            .await;
        let opened: Vec<_> = opened.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(opened, vec![Some("a".to_string()), None, Some("c".to_string())]);
    }
}
