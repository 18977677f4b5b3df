//! Key custody: fixed-capacity buffers and the multi-source acquirer.
//!
//! The acquirer only writes into the buffers. Clearing them is left to the
//! exit path (and, as a backstop, to `Drop`).

use std::fmt;
use std::io;

use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::info;
use zeroize::{Zeroize, Zeroizing};

use crate::config::ClientOptions;
use crate::engine::MAX_KEY_LEN;
use crate::key_file::{self, KeyFileError};
use crate::prompt::{self, PasswordPrompt};

/// Longest base64 key text accepted on the command line.
pub const MAX_B64_KEY_LEN: usize = 180;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("[*] Invalid key length: '{len}', must be in [1,{max}]", max = MAX_KEY_LEN - 1)]
    InvalidDecodedLen { len: usize },
    #[error("[*] Invalid {slot} key length: '{len}', must be in [0,{max}]", max = MAX_KEY_LEN)]
    TooLong { slot: &'static str, len: usize },
    #[error("[*] Base64 {slot} key could not be decoded")]
    Base64 { slot: &'static str },
    #[error("[*] Multiple {0} key sources supplied")]
    ConflictingSources(&'static str),
    #[error(transparent)]
    File(#[from] KeyFileError),
    #[error("[*] getpasswd() key error: {0}")]
    Prompt(#[source] io::Error),
    #[error("[*] The encryption passphrase and HMAC key should not be identical, no SPA packet sent. Exiting.")]
    IdenticalKeys,
}

/// Fixed-capacity key storage. Truncation only moves the length; the
/// storage is overwritten on [`clear`](KeyBuffer::clear) and on drop.
pub struct KeyBuffer {
    bytes: Box<[u8; MAX_KEY_LEN]>,
    len: usize,
}

impl KeyBuffer {
    pub fn new() -> Self {
        Self {
            bytes: Box::new([0u8; MAX_KEY_LEN]),
            len: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn fill(&mut self, slot: &'static str, src: &[u8]) -> Result<(), KeyError> {
        if src.len() > MAX_KEY_LEN {
            return Err(KeyError::TooLong {
                slot,
                len: src.len(),
            });
        }
        self.bytes.zeroize();
        self.bytes[..src.len()].copy_from_slice(src);
        self.len = src.len();
        Ok(())
    }

    /// Shortens the usable key without touching the stored bytes.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn clear(&mut self) {
        self.bytes.zeroize();
        self.len = 0;
    }

    pub fn is_zeroed(&self) -> bool {
        self.len == 0 && self.bytes.iter().all(|b| *b == 0)
    }
}

impl Default for KeyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KeyBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for KeyBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBuffer").field("len", &self.len).finish_non_exhaustive()
    }
}

/// The two key slots of a run.
#[derive(Debug, Default)]
pub struct KeyMaterial {
    pub encryption_key: KeyBuffer,
    pub hmac_key: KeyBuffer,
}

impl KeyMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.encryption_key.clear();
        self.hmac_key.clear();
    }
}

/// Decodes a base64 key into a scratch buffer. Only lengths in
/// `(0, MAX_KEY_LEN)` are accepted.
pub fn decode_base64_key(slot: &'static str, encoded: &str) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    if encoded.len() > MAX_B64_KEY_LEN {
        return Err(KeyError::Base64 { slot });
    }
    let decoded = Zeroizing::new(
        crate::engine::b64_decode(encoded.trim()).map_err(|_| KeyError::Base64 { slot })?,
    );
    if decoded.is_empty() || decoded.len() >= MAX_KEY_LEN {
        return Err(KeyError::InvalidDecodedLen { len: decoded.len() });
    }
    Ok(decoded)
}

/// Resolves both key slots from `opts`. Returns whether an HMAC key is in
/// use.
pub fn acquire_keys(
    opts: &ClientOptions,
    keys: &mut KeyMaterial,
    prompt: &mut dyn PasswordPrompt,
) -> Result<bool, KeyError> {
    acquire_encryption_key(opts, &mut keys.encryption_key, prompt)?;
    let use_hmac = acquire_hmac_key(opts, &mut keys.hmac_key, prompt)?;

    if use_hmac {
        let enc = keys.encryption_key.as_bytes();
        let mac = keys.hmac_key.as_bytes();
        if enc.len() == mac.len() && bool::from(enc.ct_eq(mac)) {
            return Err(KeyError::IdenticalKeys);
        }
    }
    Ok(use_hmac)
}

fn acquire_encryption_key(
    opts: &ClientOptions,
    buf: &mut KeyBuffer,
    prompt: &mut dyn PasswordPrompt,
) -> Result<(), KeyError> {
    const SLOT: &str = "encryption";
    let sources = [opts.key.is_some(), opts.key_base64.is_some(), opts.key_file.is_some()];
    if sources.iter().filter(|s| **s).count() > 1 {
        return Err(KeyError::ConflictingSources(SLOT));
    }

    if let Some(key) = opts.key.as_deref() {
        return buf.fill(SLOT, key.as_bytes());
    }
    if let Some(encoded) = opts.key_base64.as_deref() {
        let decoded = decode_base64_key(SLOT, encoded)?;
        return buf.fill(SLOT, &decoded);
    }
    if let Some(path) = opts.key_file.as_deref() {
        let key = key_file::read_key_file(path, &opts.spa_server)?;
        return buf.fill(SLOT, key.as_bytes());
    }
    if opts.use_gpg {
        if opts.use_gpg_agent {
            info!("[+] GPG mode set, signing passphrase acquired via gpg-agent");
        } else if opts.gpg_no_signing_pw {
            info!("[+] GPG mode set, signing passphrase not required");
        } else if opts.gpg_signer.as_deref().is_some_and(|s| !s.is_empty()) {
            let pass = prompt
                .prompt(prompt::SIGNING_PASSPHRASE_PROMPT)
                .map_err(KeyError::Prompt)?;
            buf.fill(SLOT, pass.as_bytes())?;
        }
        return Ok(());
    }

    let key = prompt
        .prompt(prompt::ENCRYPTION_KEY_PROMPT)
        .map_err(KeyError::Prompt)?;
    buf.fill(SLOT, key.as_bytes())
}

fn acquire_hmac_key(
    opts: &ClientOptions,
    buf: &mut KeyBuffer,
    prompt: &mut dyn PasswordPrompt,
) -> Result<bool, KeyError> {
    const SLOT: &str = "HMAC";
    let sources = [
        opts.hmac_key.is_some(),
        opts.hmac_key_base64.is_some(),
        opts.hmac_key_file.is_some(),
    ];
    if sources.iter().filter(|s| **s).count() > 1 {
        return Err(KeyError::ConflictingSources(SLOT));
    }

    if let Some(key) = opts.hmac_key.as_deref() {
        buf.fill(SLOT, key.as_bytes())?;
    } else if let Some(encoded) = opts.hmac_key_base64.as_deref() {
        let decoded = decode_base64_key(SLOT, encoded)?;
        buf.fill(SLOT, &decoded)?;
    } else if !opts.use_hmac {
        return Ok(false);
    } else if let Some(path) = opts.hmac_key_file.as_deref() {
        let key = key_file::read_key_file(path, &opts.spa_server)?;
        buf.fill(SLOT, key.as_bytes())?;
    } else {
        let key = prompt
            .prompt(prompt::HMAC_KEY_PROMPT)
            .map_err(KeyError::Prompt)?;
        buf.fill(SLOT, key.as_bytes())?;
    }
    Ok(true)
}
