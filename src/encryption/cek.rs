//! The CEK table (§3): the per-result-set list of column encryption keys a COLMETADATA's crypto
//! metadata points into by ordinal. Each entry may carry more than one encrypted blob of the
//! same key — one per key-store/provider the caller has configured — and all of them must
//! decrypt to the same plaintext.

use once_cell::sync::OnceCell;

use crate::encryption::provider;
use crate::error::Error;

/// One `{key-store-name, key-path, ciphertext, algorithm-name}` candidate for decrypting a
/// `CekTableEntry`'s key.
#[derive(Debug, Clone)]
pub(crate) struct EncryptedCek {
    pub(crate) ciphertext: Vec<u8>,
    pub(crate) key_store_name: String,
    pub(crate) key_path: String,
    pub(crate) algorithm_name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct CekTableEntry {
    pub(crate) database_id: i32,
    pub(crate) cek_id: i32,
    pub(crate) cek_version: i32,
    pub(crate) cek_md_version: Vec<u8>,
    pub(crate) candidates: Vec<EncryptedCek>,
    resolved: OnceCell<[u8; 32]>,
}

impl CekTableEntry {
    pub(crate) fn new(
        database_id: i32,
        cek_id: i32,
        cek_version: i32,
        cek_md_version: Vec<u8>,
        candidates: Vec<EncryptedCek>,
    ) -> Self {
        Self {
            database_id,
            cek_id,
            cek_version,
            cek_md_version,
            candidates,
            resolved: OnceCell::new(),
        }
    }

    /// Tries each candidate in order on first call, caching the first plaintext key that
    /// decrypts successfully; every later call returns the cached key without touching the
    /// key-store providers again. Fails with [`Error::CekDecryptionFailed`] only once every
    /// candidate has been tried.
    pub(crate) fn resolve(&self) -> Result<[u8; 32], Error> {
        self.resolved
            .get_or_try_init(|| {
                let mut last_error = None;

                for candidate in &self.candidates {
                    match provider::decrypt_cek(candidate) {
                        Ok(plaintext) => return Ok(plaintext),
                        Err(e) => last_error = Some(e),
                    }
                }

                Err(Error::CekDecryptionFailed(
                    last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no key-store candidates present".to_string()),
                ))
            })
            .map(|key| *key)
    }
}

/// The CEK table sent once per result set (before the first `CryptoMetadata` referencing it),
/// indexed by the ordinal the column metadata carries.
#[derive(Debug, Clone, Default)]
pub(crate) struct CekTable {
    entries: Vec<CekTableEntry>,
}

impl CekTable {
    pub(crate) fn new(entries: Vec<CekTableEntry>) -> Self {
        Self { entries }
    }

    pub(crate) fn get(&self, ordinal: u16) -> Result<&CekTableEntry, Error> {
        self.entries
            .get(ordinal as usize)
            .ok_or_else(|| Error::protocol(format!("CEK table ordinal {ordinal} out of range")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::encryption::provider::{self, KeyStoreProvider};

    use super::*;

    struct CountingProvider(Arc<AtomicUsize>);

    impl KeyStoreProvider for CountingProvider {
        fn decrypt_column_encryption_key(
            &self,
            _key_path: &str,
            _algorithm_name: &str,
            _encrypted_key: &[u8],
        ) -> Result<Vec<u8>, Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![7u8; 32])
        }
    }

    struct FailingProvider;

    impl KeyStoreProvider for FailingProvider {
        fn decrypt_column_encryption_key(
            &self,
            _key_path: &str,
            _algorithm_name: &str,
            _encrypted_key: &[u8],
        ) -> Result<Vec<u8>, Error> {
            Err(Error::CekDecryptionFailed("store is unreachable".to_string()))
        }
    }

    struct FixedKeyProvider(Vec<u8>);

    impl KeyStoreProvider for FixedKeyProvider {
        fn decrypt_column_encryption_key(
            &self,
            _key_path: &str,
            _algorithm_name: &str,
            _encrypted_key: &[u8],
        ) -> Result<Vec<u8>, Error> {
            Ok(self.0.clone())
        }
    }

    /// S6: a CEK entry carrying one candidate per key-store provider. The first provider's
    /// decrypt call fails; the second succeeds. `resolve` must return the second provider's key
    /// rather than propagating the first provider's error.
    #[test]
    fn resolve_falls_over_to_the_next_candidate_when_the_first_provider_fails() {
        provider::register_provider("cek-failover-test-bad-store", Arc::new(FailingProvider));
        provider::register_provider(
            "cek-failover-test-good-store",
            Arc::new(FixedKeyProvider(vec![9u8; 32])),
        );

        let entry = CekTableEntry::new(
            1,
            2,
            3,
            vec![],
            vec![
                EncryptedCek {
                    ciphertext: vec![0u8; 8],
                    key_store_name: "cek-failover-test-bad-store".to_string(),
                    key_path: "unused".to_string(),
                    algorithm_name: "RSA_OAEP".to_string(),
                },
                EncryptedCek {
                    ciphertext: vec![0u8; 8],
                    key_store_name: "cek-failover-test-good-store".to_string(),
                    key_path: "unused".to_string(),
                    algorithm_name: "RSA_OAEP".to_string(),
                },
            ],
        );

        assert_eq!(entry.resolve().unwrap(), [9u8; 32]);
    }

    /// When every candidate's provider fails, `resolve` fails with the last provider's error
    /// rather than the first — the point of trying every candidate is to find one that works,
    /// not to report only the first failure.
    #[test]
    fn resolve_fails_only_once_every_candidate_is_exhausted() {
        provider::register_provider("cek-failover-test-bad-store-2", Arc::new(FailingProvider));
        provider::register_provider("cek-failover-test-bad-store-3", Arc::new(FailingProvider));

        let entry = CekTableEntry::new(
            1,
            2,
            3,
            vec![],
            vec![
                EncryptedCek {
                    ciphertext: vec![0u8; 8],
                    key_store_name: "cek-failover-test-bad-store-2".to_string(),
                    key_path: "unused".to_string(),
                    algorithm_name: "RSA_OAEP".to_string(),
                },
                EncryptedCek {
                    ciphertext: vec![0u8; 8],
                    key_store_name: "cek-failover-test-bad-store-3".to_string(),
                    key_path: "unused".to_string(),
                    algorithm_name: "RSA_OAEP".to_string(),
                },
            ],
        );

        assert!(matches!(entry.resolve(), Err(Error::CekDecryptionFailed(_))));
    }

    #[test]
    fn resolve_only_consults_the_provider_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        provider::register_provider("cek-cache-test-store", Arc::new(CountingProvider(calls.clone())));

        let entry = CekTableEntry::new(
            1,
            2,
            3,
            vec![],
            vec![EncryptedCek {
                ciphertext: vec![0u8; 8],
                key_store_name: "cek-cache-test-store".to_string(),
                key_path: "unused".to_string(),
                algorithm_name: "RSA_OAEP".to_string(),
            }],
        );

        assert_eq!(entry.resolve().unwrap(), [7u8; 32]);
        assert_eq!(entry.resolve().unwrap(), [7u8; 32]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
