//! AEAD_AES_256_CBC_HMAC_SHA256 (§4.5): the Always Encrypted cell-level cipher. Authenticate
//! first, constant-time, before ever touching the CBC decryptor — a forged ciphertext must
//! never reach AES.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const ALGORITHM_VERSION: u8 = 0x01;
const KEY_SIZE: usize = 32;
const IV_SIZE: usize = 16;
const MAC_SIZE: usize = 32;

const ENC_KEY_SALT: &[u8] = b"Microsoft SQL Server cell encryption key";
const MAC_KEY_SALT: &[u8] = b"Microsoft SQL Server cell MAC key";
const IV_KEY_SALT: &[u8] = b"Microsoft SQL Server cell IV key";

/// Whether a column's ciphertext is reproducible for the same plaintext (needed for equality
/// predicates) or freshly randomized on every encrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EncryptionType {
    Deterministic,
    Randomized,
    Plaintext,
}

struct DerivedKeys {
    enc: [u8; KEY_SIZE],
    mac: [u8; KEY_SIZE],
    iv: [u8; KEY_SIZE],
}

fn derive_keys(cek: &[u8; KEY_SIZE]) -> Result<DerivedKeys, Error> {
    let derive = |salt: &[u8]| -> Result<[u8; KEY_SIZE], Error> {
        let mut mac = HmacSha256::new_from_slice(cek)
            .map_err(|_| Error::protocol("AEAD key derivation: invalid CEK length"))?;
        mac.update(salt);
        let out = mac.finalize().into_bytes();
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&out[..KEY_SIZE]);
        Ok(key)
    };

    Ok(DerivedKeys {
        enc: derive(ENC_KEY_SALT)?,
        mac: derive(MAC_KEY_SALT)?,
        iv: derive(IV_KEY_SALT)?,
    })
}

fn compute_tag(mac_key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<[u8; MAC_SIZE], Error> {
    let mut mac = HmacSha256::new_from_slice(mac_key)
        .map_err(|_| Error::protocol("AEAD tag computation: invalid MAC key length"))?;
    mac.update(&[ALGORITHM_VERSION]);
    mac.update(iv);
    mac.update(ciphertext);
    mac.update(&[ALGORITHM_VERSION]);
    let out = mac.finalize().into_bytes();
    let mut tag = [0u8; MAC_SIZE];
    tag.copy_from_slice(&out[..MAC_SIZE]);
    Ok(tag)
}

/// Encrypts `plaintext` under `cek`, producing the on-wire layout
/// `version_byte(1) || tag(32) || iv(16) || ciphertext`.
pub(crate) fn encrypt(
    cek: &[u8; KEY_SIZE],
    encryption_type: EncryptionType,
    plaintext: &[u8],
) -> Result<Vec<u8>, Error> {
    let keys = derive_keys(cek)?;

    let iv = match encryption_type {
        EncryptionType::Deterministic => {
            let mut mac = HmacSha256::new_from_slice(&keys.iv)
                .map_err(|_| Error::protocol("AEAD IV derivation: invalid IV key length"))?;
            mac.update(plaintext);
            let out = mac.finalize().into_bytes();
            let mut iv = [0u8; IV_SIZE];
            iv.copy_from_slice(&out[..IV_SIZE]);
            iv
        }
        EncryptionType::Randomized => {
            let mut iv = [0u8; IV_SIZE];
            rand::thread_rng().fill_bytes(&mut iv);
            iv
        }
        EncryptionType::Plaintext => {
            return Err(Error::protocol("cannot encrypt a PLAINTEXT column"));
        }
    };

    let ciphertext = Aes256CbcEnc::new(keys.enc.as_slice().into(), iv.as_slice().into())
        .encrypt_padded_vec_mut::<aes::cipher::block_padding::Pkcs7>(plaintext);

    let tag = compute_tag(&keys.mac, &iv, &ciphertext)?;

    let mut out = Vec::with_capacity(1 + MAC_SIZE + IV_SIZE + ciphertext.len());
    out.push(ALGORITHM_VERSION);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Verifies the tag in constant time, then decrypts. A mismatch returns
/// [`Error::DecryptionFailed`] without revealing which byte of the tag differed.
pub(crate) fn decrypt(cek: &[u8; KEY_SIZE], data: &[u8]) -> Result<Vec<u8>, Error> {
    if data.len() < 1 + MAC_SIZE + IV_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let version = data[0];
    if version != ALGORITHM_VERSION {
        return Err(Error::DecryptionFailed);
    }

    let tag = &data[1..1 + MAC_SIZE];
    let iv: [u8; IV_SIZE] = data[1 + MAC_SIZE..1 + MAC_SIZE + IV_SIZE]
        .try_into()
        .map_err(|_| Error::DecryptionFailed)?;
    let ciphertext = &data[1 + MAC_SIZE + IV_SIZE..];

    let keys = derive_keys(cek)?;
    let expected_tag = compute_tag(&keys.mac, &iv, ciphertext)?;

    if expected_tag.ct_eq(tag).unwrap_u8() != 1 {
        return Err(Error::DecryptionFailed);
    }

    Aes256CbcDec::new(keys.enc.as_slice().into(), iv.as_slice().into())
        .decrypt_padded_vec_mut::<aes::cipher::block_padding::Pkcs7>(ciphertext)
        .map_err(|_| Error::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_randomized_encryption() {
        let cek = [7u8; KEY_SIZE];
        let plaintext = b"account-number-4242";

        let ciphertext = encrypt(&cek, EncryptionType::Randomized, plaintext).unwrap();
        let decrypted = decrypt(&cek, &ciphertext).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn deterministic_encryption_is_stable_across_calls() {
        let cek = [3u8; KEY_SIZE];
        let plaintext = b"same-value-every-time";

        let first = encrypt(&cek, EncryptionType::Deterministic, plaintext).unwrap();
        let second = encrypt(&cek, EncryptionType::Deterministic, plaintext).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn single_bit_flip_fails_authentication() {
        let cek = [9u8; KEY_SIZE];
        let mut ciphertext = encrypt(&cek, EncryptionType::Randomized, b"tamper me").unwrap();

        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;

        assert!(matches!(decrypt(&cek, &ciphertext), Err(Error::DecryptionFailed)));
    }
}
