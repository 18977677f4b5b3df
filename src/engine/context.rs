use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::cipher::{self, B64_SALT_PREFIX};
use super::encoding::{self, Fields, B64, RAND_VALUE_LEN};
use super::gpg::{GpgBackend, GpgError, GpgParams};
use super::{
    DecodeParams, DigestType, EncodingContext, EncryptionMode, EncryptionType, EngineError,
    HmacType, MessageType, RandMode, PROTOCOL_VERSION,
};

const MAX_SPA_MESSAGE_LEN: usize = 256;
const MAX_USERNAME_LEN: usize = 64;
const MIN_SPA_DATA_LEN: usize = 16;
const NO_USER: &str = "NO_USER";

#[derive(Default)]
struct GpgSettings {
    exe: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    recipient: Option<String>,
    signer: Option<String>,
}

impl GpgSettings {
    fn params(&self) -> GpgParams<'_> {
        GpgParams {
            exe: self.exe.as_deref(),
            home_dir: self.home_dir.as_deref(),
            recipient: self.recipient.as_deref(),
            signer: self.signer.as_deref(),
        }
    }
}

/// Reference encoding engine: AES-256-CBC or GPG sealing, SHA-2 digests and
/// optional HMAC authentication.
pub struct SpaContext {
    rand_mode: RandMode,
    rand_value: String,
    username: String,
    timestamp: u64,
    version: String,
    message_type: MessageType,
    message: Option<String>,
    nat_access: Option<String>,
    client_timeout: Option<u32>,
    encryption_type: EncryptionType,
    encryption_mode: EncryptionMode,
    digest_type: DigestType,
    hmac_type: Option<HmacType>,
    gpg: GpgSettings,
    gpg_backend: Option<Arc<dyn GpgBackend>>,
    gpg_error: Option<String>,
    digest: Option<String>,
    hmac: Option<String>,
    /// Sealed text without the HMAC suffix; decode side only.
    sealed: Option<String>,
    spa_data: Option<String>,
}

impl SpaContext {
    /// Attaches the backend used for GPG sealing. Decoders created from this
    /// context share it.
    pub fn with_gpg_backend(mut self, backend: Arc<dyn GpgBackend>) -> Self {
        self.gpg_backend = Some(backend);
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn nat_access(&self) -> Option<&str> {
        self.nat_access.as_deref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn client_timeout(&self) -> Option<u32> {
        self.client_timeout
    }

    pub fn rand_value(&self) -> &str {
        &self.rand_value
    }

    fn blank(rand_mode: RandMode) -> Self {
        Self {
            rand_mode,
            rand_value: generate_rand_value(rand_mode, &mut OsRng),
            username: default_username(),
            timestamp: unix_now(),
            version: PROTOCOL_VERSION.to_string(),
            message_type: MessageType::Access,
            message: None,
            nat_access: None,
            client_timeout: None,
            encryption_type: EncryptionType::Rijndael,
            encryption_mode: EncryptionMode::Cbc,
            digest_type: DigestType::Sha256,
            hmac_type: None,
            gpg: GpgSettings::default(),
            gpg_backend: None,
            gpg_error: None,
            digest: None,
            hmac: None,
            sealed: None,
            spa_data: None,
        }
    }

    /// Drops serialized output after a field change. Decoders keep theirs.
    fn invalidate(&mut self) {
        if self.sealed.is_some() {
            return;
        }
        self.spa_data = None;
        self.digest = None;
        self.hmac = None;
    }

    fn require_gpg(&self, call: &'static str) -> Result<(), EngineError> {
        if self.encryption_type == EncryptionType::Gpg {
            Ok(())
        } else {
            Err(EngineError::WrongEncryptionType(call))
        }
    }

    fn backend(&self) -> Result<Arc<dyn GpgBackend>, EngineError> {
        self.gpg_backend
            .clone()
            .ok_or(EngineError::Gpg(GpgError::BackendUnavailable))
    }

    fn record_gpg(&mut self, err: GpgError) -> EngineError {
        self.gpg_error = Some(err.to_string());
        EngineError::Gpg(err)
    }

    fn seal(&mut self, plaintext: &[u8], key: &[u8]) -> Result<String, EngineError> {
        match self.encryption_type {
            EncryptionType::Rijndael => {
                let sealed = cipher::encrypt(plaintext, key, self.encryption_mode, &mut OsRng)?;
                let b64 = B64.encode(sealed);
                Ok(b64
                    .strip_prefix(B64_SALT_PREFIX)
                    .map(str::to_string)
                    .unwrap_or(b64))
            }
            EncryptionType::Gpg => {
                let backend = self.backend()?;
                let result = backend.encrypt(&self.gpg.params(), plaintext, key);
                match result {
                    Ok(sealed) => Ok(B64.encode(sealed)),
                    Err(err) => Err(self.record_gpg(err)),
                }
            }
        }
    }

    fn open(&mut self, sealed: &str, key: &[u8]) -> Result<String, EngineError> {
        let plaintext = match self.encryption_type {
            EncryptionType::Rijndael => {
                let raw = B64
                    .decode(format!("{B64_SALT_PREFIX}{sealed}"))
                    .map_err(|_| EngineError::InvalidSpaData("base64"))?;
                cipher::decrypt(&raw, key, self.encryption_mode)?.to_vec()
            }
            EncryptionType::Gpg => {
                let raw = B64
                    .decode(sealed)
                    .map_err(|_| EngineError::InvalidSpaData("base64"))?;
                let backend = self.backend()?;
                let result = backend.decrypt(&self.gpg.params(), &raw, key);
                match result {
                    Ok(plain) => plain,
                    Err(err) => return Err(self.record_gpg(err)),
                }
            }
        };
        String::from_utf8(plaintext).map_err(|_| EngineError::DecryptionFailed)
    }

    fn is_scrubbed(&self) -> bool {
        self.message.is_none()
            && self.nat_access.is_none()
            && self.spa_data.is_none()
            && self.sealed.is_none()
            && self.gpg.recipient.is_none()
            && self.gpg.signer.is_none()
            && self.gpg.home_dir.is_none()
            && self.rand_value.is_empty()
    }
}

impl EncodingContext for SpaContext {
    fn new() -> Result<Self, EngineError> {
        Ok(Self::blank(RandMode::Full))
    }

    fn new_decoder(&self, spa_data: &str, params: DecodeParams<'_>) -> Result<Self, EngineError> {
        let spa_data = spa_data.trim();
        if spa_data.len() < MIN_SPA_DATA_LEN {
            return Err(EngineError::InvalidSpaData("too short"));
        }

        let mut sealed = spa_data;
        let mut hmac = None;
        if !params.hmac_key.is_empty() {
            let hmac_type = params.hmac_type.unwrap_or(HmacType::Sha256);
            let tag_len = hmac_type.b64_len();
            if spa_data.len() <= tag_len || !spa_data.is_char_boundary(spa_data.len() - tag_len) {
                return Err(EngineError::InvalidSpaData("too short for HMAC"));
            }
            let (data, tag) = spa_data.split_at(spa_data.len() - tag_len);
            let expected = B64.encode(hmac_type.compute(params.hmac_key, data.as_bytes())?);
            if !bool::from(expected.as_bytes().ct_eq(tag.as_bytes())) {
                return Err(EngineError::HmacMismatch);
            }
            sealed = data;
            hmac = Some(tag.to_string());
        }

        let mut ctx = Self::blank(params.rand_mode);
        ctx.gpg_backend = self.gpg_backend.clone();
        ctx.encryption_type = match params.encryption_mode {
            EncryptionMode::Asymmetric => EncryptionType::Gpg,
            _ => EncryptionType::Rijndael,
        };
        ctx.encryption_mode = params.encryption_mode;
        ctx.hmac_type = params.hmac_type;
        ctx.hmac = hmac;
        ctx.rand_value.zeroize();
        ctx.username.clear();
        ctx.timestamp = 0;
        ctx.sealed = Some(sealed.to_string());
        ctx.spa_data = Some(spa_data.to_string());
        Ok(ctx)
    }

    fn set_client_timeout(&mut self, seconds: u32) -> Result<(), EngineError> {
        self.client_timeout = Some(seconds);
        self.invalidate();
        Ok(())
    }

    fn set_message_type(&mut self, message_type: MessageType) -> Result<(), EngineError> {
        self.message_type = message_type;
        self.invalidate();
        Ok(())
    }

    fn set_timestamp(&mut self, offset: i64) -> Result<(), EngineError> {
        let now = i64::try_from(unix_now()).map_err(|_| EngineError::TimestampOutOfRange)?;
        let adjusted = now
            .checked_add(offset)
            .filter(|ts| *ts >= 0)
            .ok_or(EngineError::TimestampOutOfRange)?;
        self.timestamp = adjusted as u64;
        self.invalidate();
        Ok(())
    }

    fn set_message(&mut self, message: &str) -> Result<(), EngineError> {
        validate_message(self.message_type, message)?;
        self.message = Some(message.to_string());
        self.invalidate();
        Ok(())
    }

    fn set_nat_access(&mut self, nat_access: &str) -> Result<(), EngineError> {
        if !self.message_type.is_nat() {
            return Err(EngineError::NatAccessNotAllowed(self.message_type));
        }
        validate_nat_access(nat_access)?;
        self.nat_access = Some(nat_access.to_string());
        self.invalidate();
        Ok(())
    }

    fn set_username(&mut self, username: &str) -> Result<(), EngineError> {
        if username.is_empty()
            || username.len() > MAX_USERNAME_LEN
            || username.chars().any(char::is_control)
        {
            return Err(EngineError::InvalidUsername);
        }
        self.username = username.to_string();
        self.invalidate();
        Ok(())
    }

    fn set_rand_mode(&mut self, mode: RandMode) -> Result<(), EngineError> {
        self.rand_mode = mode;
        self.invalidate();
        Ok(())
    }

    fn set_rand_value(&mut self, value: Option<&str>) -> Result<(), EngineError> {
        let value = match value {
            Some(v) if encoding::rand_value_is_valid(v, self.rand_mode) => v.to_string(),
            Some(_) => return Err(EngineError::InvalidRandValue),
            None => generate_rand_value(self.rand_mode, &mut OsRng),
        };
        self.rand_value = value;
        self.invalidate();
        Ok(())
    }

    fn set_encryption_type(&mut self, encryption_type: EncryptionType) -> Result<(), EngineError> {
        self.encryption_type = encryption_type;
        self.encryption_mode = match (encryption_type, self.encryption_mode) {
            (EncryptionType::Gpg, _) => EncryptionMode::Asymmetric,
            (EncryptionType::Rijndael, EncryptionMode::Asymmetric) => EncryptionMode::Cbc,
            (EncryptionType::Rijndael, mode) => mode,
        };
        self.invalidate();
        Ok(())
    }

    fn set_encryption_mode(&mut self, mode: EncryptionMode) -> Result<(), EngineError> {
        let supported = match self.encryption_type {
            EncryptionType::Gpg => mode == EncryptionMode::Asymmetric,
            EncryptionType::Rijndael => mode != EncryptionMode::Asymmetric,
        };
        if !supported {
            return Err(EngineError::UnsupportedEncryptionMode {
                mode,
                encryption_type: self.encryption_type,
            });
        }
        self.encryption_mode = mode;
        self.invalidate();
        Ok(())
    }

    fn set_gpg_exe(&mut self, path: &Path) -> Result<(), EngineError> {
        self.require_gpg("set_gpg_exe")?;
        if path.as_os_str().is_empty() {
            return Err(EngineError::Gpg(GpgError::Failed("empty GPG executable path".to_string())));
        }
        self.gpg.exe = Some(path.to_path_buf());
        Ok(())
    }

    fn set_gpg_home_dir(&mut self, dir: &Path) -> Result<(), EngineError> {
        self.require_gpg("set_gpg_home_dir")?;
        self.gpg.home_dir = Some(dir.to_path_buf());
        Ok(())
    }

    fn set_gpg_recipient(&mut self, key_id: &str) -> Result<(), EngineError> {
        self.require_gpg("set_gpg_recipient")?;
        if key_id.is_empty() {
            return Err(self.record_gpg(GpgError::MissingRecipient));
        }
        self.gpg.recipient = Some(key_id.to_string());
        self.invalidate();
        Ok(())
    }

    fn set_gpg_signer(&mut self, key_id: &str) -> Result<(), EngineError> {
        self.require_gpg("set_gpg_signer")?;
        self.gpg.signer = Some(key_id.to_string());
        self.invalidate();
        Ok(())
    }

    fn set_digest_type(&mut self, digest: DigestType) -> Result<(), EngineError> {
        self.digest_type = digest;
        self.invalidate();
        Ok(())
    }

    fn set_hmac_type(&mut self, hmac: HmacType) -> Result<(), EngineError> {
        self.hmac_type = Some(hmac);
        self.invalidate();
        Ok(())
    }

    fn finalize(&mut self, key: &[u8], hmac_key: &[u8]) -> Result<(), EngineError> {
        let message = self.message.clone().ok_or(EngineError::MissingMessage)?;
        if self.message_type.is_nat() && self.nat_access.is_none() {
            return Err(EngineError::InvalidNatAccess("NAT message type without NAT access".to_string()));
        }
        if !hmac_key.is_empty() && self.hmac_type.is_none() {
            return Err(EngineError::HmacTypeNotSet);
        }

        let fields = Fields {
            rand_value: self.rand_value.clone(),
            username: self.username.clone(),
            timestamp: self.timestamp,
            version: self.version.clone(),
            message_type: self.message_type,
            message,
            nat_access: self.nat_access.clone(),
            client_timeout: self.client_timeout,
        };
        let mut encoded = encoding::encode_fields(&fields);
        let (mut plaintext, digest) = encoding::append_digest(&encoded, self.digest_type);
        encoded.zeroize();

        let sealed = self.seal(plaintext.as_bytes(), key);
        plaintext.zeroize();
        let mut spa_data = sealed?;

        let hmac = match self.hmac_type {
            Some(hmac_type) if !hmac_key.is_empty() => {
                let tag = B64.encode(hmac_type.compute(hmac_key, spa_data.as_bytes())?);
                spa_data.push_str(&tag);
                Some(tag)
            }
            _ => None,
        };

        self.digest = Some(digest);
        self.hmac = hmac;
        self.spa_data = Some(spa_data);
        Ok(())
    }

    fn spa_data(&self) -> Result<&str, EngineError> {
        self.spa_data.as_deref().ok_or(EngineError::NotFinalized)
    }

    fn encryption_mode(&self) -> Result<EncryptionMode, EngineError> {
        Ok(self.encryption_mode)
    }

    fn decrypt(&mut self, key: &[u8]) -> Result<(), EngineError> {
        let sealed = self
            .sealed
            .clone()
            .ok_or(EngineError::InvalidSpaData("no encrypted data"))?;
        let mut plaintext = self.open(&sealed, key)?;
        let result = encoding::strip_digest(&plaintext).and_then(|(encoded, digest_type)| {
            let fields = encoding::decode_fields(encoded, self.rand_mode)?;
            let (_, digest) = encoding::append_digest(encoded, digest_type);
            Ok((fields, digest_type, digest))
        });
        plaintext.zeroize();
        let (fields, digest_type, digest) = result?;

        self.rand_value = fields.rand_value;
        self.username = fields.username;
        self.timestamp = fields.timestamp;
        self.version = fields.version;
        self.message_type = fields.message_type;
        self.message = Some(fields.message);
        self.nat_access = fields.nat_access;
        self.client_timeout = fields.client_timeout;
        self.digest_type = digest_type;
        self.digest = Some(digest);
        Ok(())
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn dump(&self) -> Result<String, EngineError> {
        let mut out = String::new();
        render_dump(self, &mut out).map_err(|_| EngineError::DumpFailed)?;
        Ok(out)
    }

    fn gpg_error(&self) -> Option<&str> {
        self.gpg_error.as_deref()
    }

    fn destroy(&mut self) -> Result<(), EngineError> {
        self.message.zeroize();
        self.nat_access.zeroize();
        self.spa_data.zeroize();
        self.sealed.zeroize();
        self.digest.zeroize();
        self.hmac.zeroize();
        self.rand_value.zeroize();
        self.username.zeroize();
        self.gpg.recipient.zeroize();
        self.gpg.signer.zeroize();
        self.gpg.home_dir = None;
        self.gpg.exe = None;
        self.gpg_error.zeroize();
        if self.is_scrubbed() {
            Ok(())
        } else {
            Err(EngineError::ZeroOutData)
        }
    }
}

impl Drop for SpaContext {
    fn drop(&mut self) {
        let _ = self.destroy();
    }
}

fn render_dump(ctx: &SpaContext, out: &mut String) -> std::fmt::Result {
    let null = "<NULL>";
    writeln!(out, "SPA Field Values:")?;
    writeln!(out, "=================")?;
    writeln!(out, "   Random Value: {}", ctx.rand_value)?;
    writeln!(out, "       Username: {}", ctx.username)?;
    writeln!(out, "      Timestamp: {}", ctx.timestamp)?;
    writeln!(out, "    SPA Version: {}", ctx.version)?;
    writeln!(out, "   Message Type: {} ({})", ctx.message_type.code(), ctx.message_type)?;
    writeln!(out, " Message String: {}", ctx.message.as_deref().unwrap_or(null))?;
    writeln!(out, "     Nat Access: {}", ctx.nat_access.as_deref().unwrap_or(null))?;
    writeln!(out, " Client Timeout: {}", ctx.client_timeout.unwrap_or(0))?;
    writeln!(out, "    Digest Type: {}", ctx.digest_type.name())?;
    writeln!(
        out,
        "      HMAC Type: {}",
        ctx.hmac_type.map(HmacType::name).unwrap_or("None")
    )?;
    writeln!(out, "Encryption Type: {}", ctx.encryption_type)?;
    writeln!(out, "Encryption Mode: {}", ctx.encryption_mode.name())?;
    if ctx.encryption_type == EncryptionType::Gpg {
        writeln!(out, "  GPG Recipient: {}", ctx.gpg.recipient.as_deref().unwrap_or(null))?;
        writeln!(out, "     GPG Signer: {}", ctx.gpg.signer.as_deref().unwrap_or(null))?;
    }
    writeln!(out, "SPA Data Digest: {}", ctx.digest.as_deref().unwrap_or(null))?;
    writeln!(out, "           HMAC: {}", ctx.hmac.as_deref().unwrap_or(null))?;
    writeln!(out, " Final SPA Data: {}", ctx.spa_data.as_deref().unwrap_or(null))?;
    Ok(())
}

fn validate_message(message_type: MessageType, message: &str) -> Result<(), EngineError> {
    let invalid = |reason: &str| EngineError::InvalidMessage(reason.to_string());

    if message.is_empty() || message.len() > MAX_SPA_MESSAGE_LEN {
        return Err(invalid("length out of range"));
    }
    let (ip, body) = message
        .split_once(',')
        .ok_or_else(|| invalid("expected '<ip>,<request>'"))?;
    if ip.parse::<Ipv4Addr>().is_err() {
        return Err(invalid("allow address is not an IPv4 address"));
    }
    if body.is_empty() {
        return Err(invalid("empty request"));
    }
    if message_type == MessageType::Command {
        return Ok(());
    }
    for spec in body.split(',') {
        let (proto, port) = spec
            .split_once('/')
            .ok_or_else(|| invalid("expected '<proto>/<port>'"))?;
        if !matches!(proto.to_ascii_lowercase().as_str(), "tcp" | "udp" | "icmp" | "none") {
            return Err(invalid("unknown protocol"));
        }
        if port.parse::<u16>().is_err() {
            return Err(invalid("port out of range"));
        }
    }
    Ok(())
}

fn validate_nat_access(nat_access: &str) -> Result<(), EngineError> {
    let invalid = || EngineError::InvalidNatAccess(nat_access.to_string());
    let (ip, port) = nat_access.split_once(',').ok_or_else(invalid)?;
    ip.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(invalid()),
    }
}

fn generate_rand_value(mode: RandMode, rng: &mut dyn RngCore) -> String {
    match mode {
        RandMode::Legacy => (0..RAND_VALUE_LEN)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect(),
        RandMode::Full => {
            let mut raw = [0u8; RAND_VALUE_LEN];
            rng.fill_bytes(&mut raw);
            B64.encode(raw)
        }
    }
}

fn default_username() -> String {
    ["SPOOF_USER", "USER", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .map(|user| user.chars().take(MAX_USERNAME_LEN).collect())
        .unwrap_or_else(|| NO_USER.to_string())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpg::testing::FakeKeyring;

    fn access_ctx(message: &str) -> SpaContext {
        let mut ctx = SpaContext::new().unwrap();
        ctx.set_message_type(MessageType::Access).unwrap();
        ctx.set_message(message).unwrap();
        ctx
    }

    fn decode_params(hmac_key: &[u8]) -> DecodeParams<'_> {
        DecodeParams {
            encryption_mode: EncryptionMode::Cbc,
            hmac_key,
            hmac_type: (!hmac_key.is_empty()).then_some(HmacType::Sha256),
            rand_mode: RandMode::Full,
        }
    }

    #[test]
    fn symmetric_token_decodes_to_same_fields() {
        let mut ctx = access_ctx("1.2.3.4,tcp/22");
        ctx.set_username("alice").unwrap();
        ctx.finalize(b"secret", b"").unwrap();

        let data = ctx.spa_data().unwrap().to_string();
        assert!(!data.starts_with(B64_SALT_PREFIX));

        let mut decoder = ctx.new_decoder(&data, decode_params(b"")).unwrap();
        decoder.decrypt(b"secret").unwrap();
        assert_eq!(decoder.message(), Some("1.2.3.4,tcp/22"));
        assert_eq!(decoder.username(), "alice");
        assert_eq!(decoder.timestamp(), ctx.timestamp());
        assert_eq!(decoder.rand_value(), ctx.rand_value());
    }

    #[test]
    fn hmac_is_appended_and_verified() {
        let mut ctx = access_ctx("1.2.3.4,tcp/22");
        ctx.set_hmac_type(HmacType::Sha256).unwrap();
        ctx.finalize(b"secret", b"hmac-key").unwrap();
        let data = ctx.spa_data().unwrap().to_string();

        let mut decoder = ctx.new_decoder(&data, decode_params(b"hmac-key")).unwrap();
        decoder.decrypt(b"secret").unwrap();
        assert_eq!(decoder.message(), Some("1.2.3.4,tcp/22"));

        assert!(matches!(
            ctx.new_decoder(&data, decode_params(b"wrong-hmac")),
            Err(EngineError::HmacMismatch)
        ));
    }

    #[test]
    fn hmac_key_without_type_is_rejected() {
        let mut ctx = access_ctx("1.2.3.4,tcp/22");
        assert_eq!(ctx.finalize(b"secret", b"hmac-key"), Err(EngineError::HmacTypeNotSet));
    }

    #[test]
    fn finalize_requires_message() {
        let mut ctx = SpaContext::new().unwrap();
        assert_eq!(ctx.finalize(b"secret", b""), Err(EngineError::MissingMessage));
        assert_eq!(ctx.spa_data(), Err(EngineError::NotFinalized));
    }

    #[test]
    fn nat_access_requires_nat_message_type() {
        let mut ctx = access_ctx("1.2.3.4,tcp/22");
        assert_eq!(
            ctx.set_nat_access("10.0.0.1,22"),
            Err(EngineError::NatAccessNotAllowed(MessageType::Access))
        );
        ctx.set_message_type(MessageType::NatAccess).unwrap();
        ctx.set_nat_access("10.0.0.1,22").unwrap();
        assert!(ctx.set_nat_access("host.example,22").is_err());
    }

    #[test]
    fn gpg_settings_require_gpg_type() {
        let mut ctx = SpaContext::new().unwrap();
        assert_eq!(
            ctx.set_gpg_home_dir(Path::new("/tmp/gnupg")),
            Err(EngineError::WrongEncryptionType("set_gpg_home_dir"))
        );
        assert!(ctx.set_encryption_mode(EncryptionMode::Asymmetric).is_err());
        ctx.set_encryption_type(EncryptionType::Gpg).unwrap();
        assert_eq!(ctx.encryption_mode(), Ok(EncryptionMode::Asymmetric));
        ctx.set_gpg_home_dir(Path::new("/tmp/gnupg")).unwrap();
        assert!(ctx.set_encryption_mode(EncryptionMode::Cbc).is_err());
    }

    #[test]
    fn messages_are_validated_against_type() {
        let mut ctx = SpaContext::new().unwrap();
        assert!(ctx.set_message("1.2.3.4,tcp").is_err());
        assert!(ctx.set_message("nothost,tcp/22").is_err());
        assert!(ctx.set_message("1.2.3.4,tcp/70000").is_err());
        ctx.set_message("1.2.3.4,none/0").unwrap();
        ctx.set_message_type(MessageType::Command).unwrap();
        ctx.set_message("1.2.3.4,echo hello").unwrap();
    }

    #[test]
    fn legacy_rand_mode_produces_digits() {
        let mut ctx = SpaContext::new().unwrap();
        ctx.set_rand_mode(RandMode::Legacy).unwrap();
        ctx.set_rand_value(None).unwrap();
        assert_eq!(ctx.rand_value().len(), RAND_VALUE_LEN);
        assert!(ctx.rand_value().bytes().all(|b| b.is_ascii_digit()));
        assert_eq!(ctx.set_rand_value(Some("abc")), Err(EngineError::InvalidRandValue));
    }

    #[test]
    fn negative_timestamp_is_rejected() {
        let mut ctx = SpaContext::new().unwrap();
        assert_eq!(ctx.set_timestamp(i64::MIN), Err(EngineError::TimestampOutOfRange));
        let before = ctx.timestamp();
        ctx.set_timestamp(-60).unwrap();
        assert!(ctx.timestamp() <= before);
    }

    #[test]
    fn gpg_without_backend_fails_as_gpg_error() {
        let mut ctx = access_ctx("1.2.3.4,tcp/22");
        ctx.set_encryption_type(EncryptionType::Gpg).unwrap();
        ctx.set_gpg_recipient("ABCD1234").unwrap();
        let err = ctx.finalize(b"", b"").unwrap_err();
        assert!(err.is_gpg());
    }

    #[test]
    fn gpg_round_trip_through_backend() {
        let backend = Arc::new(FakeKeyring { holds_secret_key: true });
        let mut ctx = SpaContext::new().unwrap().with_gpg_backend(backend);
        ctx.set_message("1.2.3.4,udp/53").unwrap();
        ctx.set_encryption_type(EncryptionType::Gpg).unwrap();
        ctx.set_gpg_recipient("ABCD1234").unwrap();
        ctx.finalize(b"", b"").unwrap();

        let data = ctx.spa_data().unwrap().to_string();
        let params = DecodeParams {
            encryption_mode: EncryptionMode::Asymmetric,
            ..decode_params(b"")
        };
        let mut decoder = ctx.new_decoder(&data, params).unwrap();
        decoder.decrypt(b"").unwrap();
        assert_eq!(decoder.message(), Some("1.2.3.4,udp/53"));
    }

    #[test]
    fn gpg_decrypt_without_secret_key_reports_diagnostic() {
        let backend = Arc::new(FakeKeyring { holds_secret_key: false });
        let mut ctx = SpaContext::new().unwrap().with_gpg_backend(backend);
        ctx.set_message("1.2.3.4,udp/53").unwrap();
        ctx.set_encryption_type(EncryptionType::Gpg).unwrap();
        ctx.set_gpg_recipient("ABCD1234").unwrap();
        ctx.finalize(b"", b"").unwrap();

        let data = ctx.spa_data().unwrap().to_string();
        let params = DecodeParams {
            encryption_mode: EncryptionMode::Asymmetric,
            ..decode_params(b"")
        };
        let mut decoder = ctx.new_decoder(&data, params).unwrap();
        assert_eq!(decoder.decrypt(b""), Err(EngineError::Gpg(GpgError::NoPrivateKey)));
        assert!(decoder.gpg_error().is_some());
    }

    #[test]
    fn destroy_scrubs_sensitive_fields() {
        let mut ctx = access_ctx("1.2.3.4,tcp/22");
        ctx.finalize(b"secret", b"").unwrap();
        ctx.destroy().unwrap();
        assert_eq!(ctx.message(), None);
        assert_eq!(ctx.spa_data(), Err(EngineError::NotFinalized));
    }

    #[test]
    fn dump_lists_fields() {
        let mut ctx = access_ctx("1.2.3.4,tcp/22");
        ctx.finalize(b"secret", b"").unwrap();
        let dump = ctx.dump().unwrap();
        assert!(dump.contains(" Message String: 1.2.3.4,tcp/22"));
        assert!(dump.contains("   Message Type: 1 (Access msg)"));
        assert!(dump.contains("Encryption Mode: CBC"));
    }
}
