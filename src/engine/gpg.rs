use std::path::Path;

use thiserror::Error;

/// GPG parameters collected on a context.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpgParams<'a> {
    pub exe: Option<&'a Path>,
    pub home_dir: Option<&'a Path>,
    pub recipient: Option<&'a str>,
    pub signer: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpgError {
    #[error("no GPG backend available")]
    BackendUnavailable,
    #[error("GPG recipient key not set")]
    MissingRecipient,
    #[error("no secret key available to decrypt")]
    NoPrivateKey,
    #[error("bad signing passphrase")]
    BadPassphrase,
    #[error("{0}")]
    Failed(String),
}

/// Public key sealing used by the asymmetric encryption mode.
///
/// The passphrase is the signing passphrase on encrypt and the secret key
/// passphrase on decrypt; it may be empty when an agent holds it.
pub trait GpgBackend: Send + Sync {
    fn encrypt(
        &self,
        params: &GpgParams<'_>,
        plaintext: &[u8],
        passphrase: &[u8],
    ) -> Result<Vec<u8>, GpgError>;

    fn decrypt(
        &self,
        params: &GpgParams<'_>,
        ciphertext: &[u8],
        passphrase: &[u8],
    ) -> Result<Vec<u8>, GpgError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Reversible stand-in for a keyring. `holds_secret_key == false` models
    /// encrypting to somebody else's public key.
    pub(crate) struct FakeKeyring {
        pub holds_secret_key: bool,
    }

    const MAGIC: &[u8] = b"PGP:";

    impl GpgBackend for FakeKeyring {
        fn encrypt(
            &self,
            params: &GpgParams<'_>,
            plaintext: &[u8],
            _passphrase: &[u8],
        ) -> Result<Vec<u8>, GpgError> {
            let recipient = params.recipient.ok_or(GpgError::MissingRecipient)?;
            let mut out = MAGIC.to_vec();
            out.extend_from_slice(recipient.as_bytes());
            out.push(b'|');
            out.extend(plaintext.iter().map(|b| b ^ 0x5a));
            Ok(out)
        }

        fn decrypt(
            &self,
            _params: &GpgParams<'_>,
            ciphertext: &[u8],
            _passphrase: &[u8],
        ) -> Result<Vec<u8>, GpgError> {
            if !self.holds_secret_key {
                return Err(GpgError::NoPrivateKey);
            }
            let body = ciphertext
                .strip_prefix(MAGIC)
                .ok_or_else(|| GpgError::Failed("not a fake PGP message".to_string()))?;
            let sep = body
                .iter()
                .position(|b| *b == b'|')
                .ok_or_else(|| GpgError::Failed("missing recipient".to_string()))?;
            Ok(body[sep + 1..].iter().map(|b| b ^ 0x5a).collect())
        }
    }
}
