//! The process-wide column-encryption key-store provider registry (§4.5). A key store is
//! whatever holds the master key that protects a CEK — a local certificate store, an HSM, a
//! cloud key vault — and is registered once per process under a name that a connection string's
//! CEK metadata refers to by `key-store-name`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::encryption::cek::EncryptedCek;
use crate::error::Error;

/// Decrypts a column encryption key given the master key it names (`key_path`) and the
/// algorithm used to wrap it. Implementations talk to whatever holds the master key; they must
/// not cache plaintext themselves — the CEK table does that.
pub trait KeyStoreProvider: Send + Sync {
    fn decrypt_column_encryption_key(
        &self,
        key_path: &str,
        algorithm_name: &str,
        encrypted_key: &[u8],
    ) -> Result<Vec<u8>, Error>;
}

static PROVIDERS: Lazy<Mutex<HashMap<String, Arc<dyn KeyStoreProvider>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Registers `provider` under `name`, replacing any provider already registered under it.
/// Typically called once at process startup, before any connection is opened.
pub fn register_provider(name: impl Into<String>, provider: Arc<dyn KeyStoreProvider>) {
    PROVIDERS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(name.into(), provider);
}

pub(crate) fn decrypt_cek(candidate: &EncryptedCek) -> Result<[u8; 32], Error> {
    let provider = {
        let providers = PROVIDERS
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        providers.get(&candidate.key_store_name).cloned()
    };

    let provider = provider.ok_or_else(|| {
        Error::CekDecryptionFailed(format!(
            "no key-store provider registered under `{}`",
            candidate.key_store_name
        ))
    })?;

    let plaintext = provider.decrypt_column_encryption_key(
        &candidate.key_path,
        &candidate.algorithm_name,
        &candidate.ciphertext,
    )?;

    plaintext.try_into().map_err(|v: Vec<u8>| {
        Error::CekDecryptionFailed(format!(
            "key-store provider `{}` returned a {}-byte key, expected 32",
            candidate.key_store_name,
            v.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn resolves_a_registered_provider() {
        register_provider("test-store", Arc::new(FixedKeyProvider(vec![1u8; 32])));

        let candidate = EncryptedCek {
            ciphertext: vec![0u8; 8],
            key_store_name: "test-store".to_string(),
            key_path: "unused".to_string(),
            algorithm_name: "RSA_OAEP".to_string(),
        };

        let key = decrypt_cek(&candidate).unwrap();
        assert_eq!(key, [1u8; 32]);
    }

    #[test]
    fn fails_when_no_provider_is_registered() {
        let candidate = EncryptedCek {
            ciphertext: vec![0u8; 8],
            key_store_name: "nonexistent-store".to_string(),
            key_path: "unused".to_string(),
            algorithm_name: "RSA_OAEP".to_string(),
        };

        assert!(matches!(
            decrypt_cek(&candidate),
            Err(Error::CekDecryptionFailed(_))
        ));
    }
}
