//! SPA encoding engine boundary.
//!
//! The client drives a context through [`EncodingContext`] in a fixed order and
//! only ever reads back the serialized token, the encryption mode and a dump.
//! [`SpaContext`] is the engine shipped with the crate; tests swap in their own
//! implementations of the trait.

mod cipher;
mod context;
mod encoding;
pub mod gpg;

pub use context::SpaContext;
pub use gpg::{GpgBackend, GpgError, GpgParams};

use std::fmt;
use std::path::Path;

use base64::Engine as _;
use thiserror::Error;

/// Protocol version carried inside every token.
pub const PROTOCOL_VERSION: &str = "3.0.0";

/// Capacity of a key buffer.
pub const MAX_KEY_LEN: usize = 128;

/// Longest usable key in [`EncryptionMode::CbcLegacyIv`].
pub const LEGACY_KEY_LEN: usize = 16;

/// Unpadded standard base64, the encoding used for every token field.
pub fn b64_encode(bytes: &[u8]) -> String {
    encoding::B64.encode(bytes)
}

/// Accepts padded and unpadded input.
pub fn b64_decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    encoding::B64.decode(text)
}

/// Wire message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Command,
    Access,
    NatAccess,
    AccessWithTimeout,
    NatAccessWithTimeout,
    LocalNatAccess,
    LocalNatAccessWithTimeout,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::Command,
        MessageType::Access,
        MessageType::NatAccess,
        MessageType::AccessWithTimeout,
        MessageType::NatAccessWithTimeout,
        MessageType::LocalNatAccess,
        MessageType::LocalNatAccessWithTimeout,
    ];

    pub fn code(self) -> u8 {
        match self {
            MessageType::Command => 0,
            MessageType::Access => 1,
            MessageType::NatAccess => 2,
            MessageType::AccessWithTimeout => 3,
            MessageType::NatAccessWithTimeout => 4,
            MessageType::LocalNatAccess => 5,
            MessageType::LocalNatAccessWithTimeout => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Types whose token carries a NAT access field.
    pub fn is_nat(self) -> bool {
        matches!(
            self,
            MessageType::NatAccess
                | MessageType::NatAccessWithTimeout
                | MessageType::LocalNatAccess
                | MessageType::LocalNatAccessWithTimeout
        )
    }

    /// Types whose token carries a client timeout field.
    pub fn has_timeout(self) -> bool {
        matches!(
            self,
            MessageType::AccessWithTimeout
                | MessageType::NatAccessWithTimeout
                | MessageType::LocalNatAccessWithTimeout
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Command => "Command msg",
            MessageType::Access => "Access msg",
            MessageType::NatAccess => "NAT access msg",
            MessageType::AccessWithTimeout => "Access msg with timeout",
            MessageType::NatAccessWithTimeout => "NAT access msg with timeout",
            MessageType::LocalNatAccess => "Local NAT access msg",
            MessageType::LocalNatAccessWithTimeout => "Local NAT access msg with timeout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionType {
    Rijndael,
    Gpg,
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionType::Rijndael => f.write_str("Rijndael"),
            EncryptionType::Gpg => f.write_str("GPG"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    Cbc,
    /// Backward compatible mode with a 16 byte key ceiling.
    CbcLegacyIv,
    /// GPG public key encryption.
    Asymmetric,
}

impl EncryptionMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cbc" => Some(EncryptionMode::Cbc),
            "legacy" => Some(EncryptionMode::CbcLegacyIv),
            "asymmetric" => Some(EncryptionMode::Asymmetric),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EncryptionMode::Cbc => "CBC",
            EncryptionMode::CbcLegacyIv => "legacy",
            EncryptionMode::Asymmetric => "Asymmetric",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestType {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Some(DigestType::Sha256),
            "sha384" => Some(DigestType::Sha384),
            "sha512" => Some(DigestType::Sha512),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestType::Sha256 => "SHA256",
            DigestType::Sha384 => "SHA384",
            DigestType::Sha512 => "SHA512",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacType {
    Sha256,
    Sha384,
    Sha512,
}

impl HmacType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Some(HmacType::Sha256),
            "sha384" => Some(HmacType::Sha384),
            "sha512" => Some(HmacType::Sha512),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HmacType::Sha256 => "SHA256",
            HmacType::Sha384 => "SHA384",
            HmacType::Sha512 => "SHA512",
        }
    }
}

/// Controls how the per-token random value is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RandMode {
    #[default]
    Full,
    /// Digits only.
    Legacy,
}

/// Settings replayed onto a decoding context.
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams<'a> {
    pub encryption_mode: EncryptionMode,
    pub hmac_key: &'a [u8],
    pub hmac_type: Option<HmacType>,
    pub rand_mode: RandMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Invalid SPA message: {0}")]
    InvalidMessage(String),
    #[error("Invalid NAT access string: {0}")]
    InvalidNatAccess(String),
    #[error("NAT access string not allowed for message type '{0}'")]
    NatAccessNotAllowed(MessageType),
    #[error("Invalid username")]
    InvalidUsername,
    #[error("Invalid random value")]
    InvalidRandValue,
    #[error("Timestamp offset out of range")]
    TimestampOutOfRange,
    #[error("{0} requires GPG encryption type")]
    WrongEncryptionType(&'static str),
    #[error("Encryption mode {} not supported by {}", .mode.name(), .encryption_type)]
    UnsupportedEncryptionMode {
        mode: EncryptionMode,
        encryption_type: EncryptionType,
    },
    #[error("SPA message not set")]
    MissingMessage,
    #[error("Invalid key length: {0}")]
    InvalidKeyLen(usize),
    #[error("HMAC key supplied but HMAC type not set")]
    HmacTypeNotSet,
    #[error("SPA data not finalized")]
    NotFinalized,
    #[error("Invalid SPA data: {0}")]
    InvalidSpaData(&'static str),
    #[error("HMAC verification failed")]
    HmacMismatch,
    #[error("SPA digest mismatch")]
    DigestMismatch,
    #[error("Decryption failed (wrong key or corrupted data)")]
    DecryptionFailed,
    #[error("Unable to render context dump")]
    DumpFailed,
    #[error("GPG error: {0}")]
    Gpg(#[from] GpgError),
    #[error("Could not zero out sensitive data buffer")]
    ZeroOutData,
}

impl EngineError {
    pub fn is_gpg(&self) -> bool {
        matches!(self, EngineError::Gpg(_))
    }
}

/// Capability set of an SPA encoding context.
///
/// Setters validate against state written by earlier setters, so callers must
/// keep the order: message type, timestamp, message, NAT access, username,
/// randomization, encryption type and GPG parameters, encryption mode, digest
/// and HMAC type, then [`finalize`](EncodingContext::finalize).
pub trait EncodingContext: Sized {
    fn new() -> Result<Self, EngineError>;

    /// Builds an independent context around serialized token data. The HMAC
    /// is verified here when `params.hmac_key` is non-empty.
    fn new_decoder(&self, spa_data: &str, params: DecodeParams<'_>) -> Result<Self, EngineError>;

    fn set_client_timeout(&mut self, seconds: u32) -> Result<(), EngineError>;
    fn set_message_type(&mut self, message_type: MessageType) -> Result<(), EngineError>;
    fn set_timestamp(&mut self, offset: i64) -> Result<(), EngineError>;
    fn set_message(&mut self, message: &str) -> Result<(), EngineError>;
    fn set_nat_access(&mut self, nat_access: &str) -> Result<(), EngineError>;
    fn set_username(&mut self, username: &str) -> Result<(), EngineError>;
    fn set_rand_mode(&mut self, mode: RandMode) -> Result<(), EngineError>;
    /// `None` regenerates the value under the current randomization mode.
    fn set_rand_value(&mut self, value: Option<&str>) -> Result<(), EngineError>;
    fn set_encryption_type(&mut self, encryption_type: EncryptionType) -> Result<(), EngineError>;
    fn set_encryption_mode(&mut self, mode: EncryptionMode) -> Result<(), EngineError>;
    fn set_gpg_exe(&mut self, path: &Path) -> Result<(), EngineError>;
    fn set_gpg_home_dir(&mut self, dir: &Path) -> Result<(), EngineError>;
    fn set_gpg_recipient(&mut self, key_id: &str) -> Result<(), EngineError>;
    fn set_gpg_signer(&mut self, key_id: &str) -> Result<(), EngineError>;
    fn set_digest_type(&mut self, digest: DigestType) -> Result<(), EngineError>;
    fn set_hmac_type(&mut self, hmac: HmacType) -> Result<(), EngineError>;

    /// Encrypts and authenticates the accumulated fields.
    fn finalize(&mut self, key: &[u8], hmac_key: &[u8]) -> Result<(), EngineError>;

    fn spa_data(&self) -> Result<&str, EngineError>;
    fn encryption_mode(&self) -> Result<EncryptionMode, EngineError>;
    fn decrypt(&mut self, key: &[u8]) -> Result<(), EngineError>;
    fn message(&self) -> Option<&str>;
    fn dump(&self) -> Result<String, EngineError>;

    /// Diagnostic text of the last GPG failure, if any.
    fn gpg_error(&self) -> Option<&str>;

    /// Overwrites sensitive state. `Err(EngineError::ZeroOutData)` when the
    /// overwrite could not be confirmed.
    fn destroy(&mut self) -> Result<(), EngineError>;

    fn version(&self) -> &str {
        PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_codes_are_stable() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_code(t.code()), Some(t));
        }
        assert_eq!(MessageType::from_code(7), None);
        assert_eq!(MessageType::Access.code(), 1);
        assert_eq!(MessageType::LocalNatAccessWithTimeout.code(), 6);
    }

    #[test]
    fn nat_and_timeout_classification() {
        assert!(!MessageType::Command.is_nat());
        assert!(MessageType::LocalNatAccess.is_nat());
        assert!(MessageType::NatAccessWithTimeout.has_timeout());
        assert!(!MessageType::NatAccess.has_timeout());
    }

    #[test]
    fn mode_names_parse() {
        assert_eq!(EncryptionMode::from_name("legacy"), Some(EncryptionMode::CbcLegacyIv));
        assert_eq!(EncryptionMode::from_name("CBC"), Some(EncryptionMode::Cbc));
        assert_eq!(EncryptionMode::from_name("ecb"), None);
        assert_eq!(DigestType::from_name("sha512"), Some(DigestType::Sha512));
        assert_eq!(HmacType::from_name("md5"), None);
    }

    #[test]
    fn gpg_errors_are_classified() {
        assert!(EngineError::Gpg(GpgError::NoPrivateKey).is_gpg());
        assert!(!EngineError::DecryptionFailed.is_gpg());
    }
}
