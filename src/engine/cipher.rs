//! Passphrase based AES-256-CBC sealing.
//!
//! Output layout: `Salted__ || salt(8) || ciphertext`. Key and IV come from
//! `SHA256(pass || salt)` and `SHA256(key || pass || salt)[..16]`.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{EncryptionMode, EncryptionType, EngineError, LEGACY_KEY_LEN, MAX_KEY_LEN};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub(crate) const SALT_MARKER: &[u8; 8] = b"Salted__";
/// Base64 text that every sealed blob starts with; stripped on the wire.
pub(crate) const B64_SALT_PREFIX: &str = "U2FsdGVkX1";
const SALT_LEN: usize = 8;

struct Derived {
    key: Zeroizing<[u8; 32]>,
    iv: Zeroizing<[u8; 16]>,
}

fn passphrase_for(mode: EncryptionMode, key: &[u8]) -> Result<Zeroizing<Vec<u8>>, EngineError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(EngineError::InvalidKeyLen(key.len()));
    }
    match mode {
        EncryptionMode::Cbc => Ok(Zeroizing::new(key.to_vec())),
        EncryptionMode::CbcLegacyIv => {
            if key.len() > LEGACY_KEY_LEN {
                return Err(EngineError::InvalidKeyLen(key.len()));
            }
            let mut padded = Zeroizing::new(key.to_vec());
            padded.resize(LEGACY_KEY_LEN, b'0');
            Ok(padded)
        }
        EncryptionMode::Asymmetric => Err(EngineError::UnsupportedEncryptionMode {
            mode,
            encryption_type: EncryptionType::Rijndael,
        }),
    }
}

fn derive(pass: &[u8], salt: &[u8]) -> Derived {
    let mut key = Zeroizing::new([0u8; 32]);
    let mut iv = Zeroizing::new([0u8; 16]);

    let first = Sha256::new().chain_update(pass).chain_update(salt).finalize();
    key.copy_from_slice(&first);
    let second = Sha256::new()
        .chain_update(first)
        .chain_update(pass)
        .chain_update(salt)
        .finalize();
    iv.copy_from_slice(&second[..16]);

    Derived { key, iv }
}

pub(crate) fn encrypt(
    plaintext: &[u8],
    key: &[u8],
    mode: EncryptionMode,
    rng: &mut dyn RngCore,
) -> Result<Vec<u8>, EngineError> {
    let pass = passphrase_for(mode, key)?;
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let derived = derive(&pass, &salt);

    let cipher = Aes256CbcEnc::new_from_slices(&derived.key[..], &derived.iv[..])
        .map_err(|_| EngineError::InvalidKeyLen(derived.key.len()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(SALT_MARKER.len() + SALT_LEN + ciphertext.len());
    out.extend_from_slice(SALT_MARKER);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(crate) fn decrypt(
    sealed: &[u8],
    key: &[u8],
    mode: EncryptionMode,
) -> Result<Zeroizing<Vec<u8>>, EngineError> {
    let pass = passphrase_for(mode, key)?;
    let body = sealed
        .strip_prefix(&SALT_MARKER[..])
        .ok_or(EngineError::InvalidSpaData("missing salt marker"))?;
    if body.len() <= SALT_LEN {
        return Err(EngineError::InvalidSpaData("truncated ciphertext"));
    }
    let (salt, ciphertext) = body.split_at(SALT_LEN);
    let derived = derive(&pass, salt);

    let cipher = Aes256CbcDec::new_from_slices(&derived.key[..], &derived.iv[..])
        .map_err(|_| EngineError::InvalidKeyLen(derived.key.len()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| EngineError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sealed_blob_opens_with_same_key() {
        let sealed = encrypt(b"1.2.3.4,tcp/22", b"secret", EncryptionMode::Cbc, &mut OsRng).unwrap();
        assert!(sealed.starts_with(SALT_MARKER));
        let opened = decrypt(&sealed, b"secret", EncryptionMode::Cbc).unwrap();
        assert_eq!(opened.as_slice(), b"1.2.3.4,tcp/22");
    }

    #[test]
    fn wrong_key_does_not_open() {
        let sealed = encrypt(b"payload data here", b"secret", EncryptionMode::Cbc, &mut OsRng).unwrap();
        match decrypt(&sealed, b"other", EncryptionMode::Cbc) {
            Err(EngineError::DecryptionFailed) => {}
            Ok(plain) => assert_ne!(plain.as_slice(), b"payload data here"),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn legacy_mode_caps_key_length() {
        let long = [b'k'; 24];
        assert_eq!(
            encrypt(b"x", &long, EncryptionMode::CbcLegacyIv, &mut OsRng),
            Err(EngineError::InvalidKeyLen(24))
        );
        let sealed = encrypt(b"x", &long[..16], EncryptionMode::CbcLegacyIv, &mut OsRng).unwrap();
        assert_eq!(
            decrypt(&sealed, &long[..16], EncryptionMode::CbcLegacyIv).unwrap().as_slice(),
            b"x"
        );
    }

    #[test]
    fn legacy_short_key_is_zero_padded() {
        let sealed = encrypt(b"pad", b"abc", EncryptionMode::CbcLegacyIv, &mut OsRng).unwrap();
        let opened = decrypt(&sealed, b"abc0000000000000", EncryptionMode::CbcLegacyIv).unwrap();
        assert_eq!(opened.as_slice(), b"pad");
    }

    #[test]
    fn empty_key_is_rejected() {
        assert_eq!(
            encrypt(b"x", b"", EncryptionMode::Cbc, &mut OsRng),
            Err(EngineError::InvalidKeyLen(0))
        );
    }
}
