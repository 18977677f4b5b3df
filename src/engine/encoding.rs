//! Plaintext field layout, digests and HMACs.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use super::{DigestType, EngineError, HmacType, MessageType, RandMode};

/// Standard alphabet, no padding on encode, padding optional on decode.
pub(crate) const B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub(crate) const RAND_VALUE_LEN: usize = 16;

const FIELD_SEP: char = ':';

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fields {
    pub rand_value: String,
    pub username: String,
    pub timestamp: u64,
    pub version: String,
    pub message_type: MessageType,
    pub message: String,
    pub nat_access: Option<String>,
    pub client_timeout: Option<u32>,
}

pub(crate) fn encode_fields(fields: &Fields) -> String {
    let mut out = format!(
        "{rand}:{user}:{ts}:{version}:{kind}:{msg}",
        rand = fields.rand_value,
        user = B64.encode(fields.username.as_bytes()),
        ts = fields.timestamp,
        version = fields.version,
        kind = fields.message_type.code(),
        msg = B64.encode(fields.message.as_bytes()),
    );
    if fields.message_type.is_nat() {
        out.push(FIELD_SEP);
        out.push_str(&B64.encode(fields.nat_access.as_deref().unwrap_or("").as_bytes()));
    }
    if fields.message_type.has_timeout() {
        out.push(FIELD_SEP);
        out.push_str(&fields.client_timeout.unwrap_or(0).to_string());
    }
    out
}

pub(crate) fn decode_fields(encoded: &str, rand_mode: RandMode) -> Result<Fields, EngineError> {
    let parts: Vec<&str> = encoded.split(FIELD_SEP).collect();
    if parts.len() < 6 {
        return Err(EngineError::InvalidSpaData("too few fields"));
    }

    let rand_value = parts[0].to_string();
    if !rand_value_is_valid(&rand_value, rand_mode) {
        return Err(EngineError::InvalidRandValue);
    }
    let username = decode_text(parts[1], "username")?;
    let timestamp = parts[2]
        .parse::<u64>()
        .map_err(|_| EngineError::InvalidSpaData("timestamp"))?;
    let version = parts[3].to_string();
    let message_type = parts[4]
        .parse::<u8>()
        .ok()
        .and_then(MessageType::from_code)
        .ok_or(EngineError::InvalidSpaData("message type"))?;
    let message = decode_text(parts[5], "message")?;

    let mut rest = parts[6..].iter();
    let nat_access = if message_type.is_nat() {
        let raw = rest.next().ok_or(EngineError::InvalidSpaData("missing NAT access"))?;
        Some(decode_text(raw, "NAT access")?)
    } else {
        None
    };
    let client_timeout = if message_type.has_timeout() {
        let raw = rest.next().ok_or(EngineError::InvalidSpaData("missing client timeout"))?;
        Some(
            raw.parse::<u32>()
                .map_err(|_| EngineError::InvalidSpaData("client timeout"))?,
        )
    } else {
        None
    };
    if rest.next().is_some() {
        return Err(EngineError::InvalidSpaData("unexpected trailing fields"));
    }

    Ok(Fields {
        rand_value,
        username,
        timestamp,
        version,
        message_type,
        message,
        nat_access,
        client_timeout,
    })
}

fn decode_text(raw: &str, what: &'static str) -> Result<String, EngineError> {
    let bytes = B64.decode(raw).map_err(|_| EngineError::InvalidSpaData(what))?;
    String::from_utf8(bytes).map_err(|_| EngineError::InvalidSpaData(what))
}

pub(crate) fn rand_value_is_valid(value: &str, mode: RandMode) -> bool {
    match mode {
        RandMode::Legacy => {
            value.len() == RAND_VALUE_LEN && value.bytes().all(|b| b.is_ascii_digit())
        }
        RandMode::Full => {
            value.len() >= RAND_VALUE_LEN
                && value
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
        }
    }
}

impl DigestType {
    pub(crate) fn compute(self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestType::Sha256 => Sha256::digest(data).to_vec(),
            DigestType::Sha384 => Sha384::digest(data).to_vec(),
            DigestType::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Length of the unpadded base64 digest text.
    pub(crate) fn b64_len(self) -> usize {
        match self {
            DigestType::Sha256 => 43,
            DigestType::Sha384 => 64,
            DigestType::Sha512 => 86,
        }
    }

    fn from_b64_len(len: usize) -> Option<Self> {
        [DigestType::Sha256, DigestType::Sha384, DigestType::Sha512]
            .into_iter()
            .find(|d| d.b64_len() == len)
    }
}

impl HmacType {
    pub(crate) fn compute(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, EngineError> {
        match self {
            HmacType::Sha256 => mac_with::<Hmac<Sha256>>(key, data),
            HmacType::Sha384 => mac_with::<Hmac<Sha384>>(key, data),
            HmacType::Sha512 => mac_with::<Hmac<Sha512>>(key, data),
        }
    }

    pub(crate) fn b64_len(self) -> usize {
        match self {
            HmacType::Sha256 => 43,
            HmacType::Sha384 => 64,
            HmacType::Sha512 => 86,
        }
    }
}

fn mac_with<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| EngineError::InvalidKeyLen(key.len()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Appends `:<digest>` to the encoded fields.
pub(crate) fn append_digest(encoded: &str, digest: DigestType) -> (String, String) {
    let digest_b64 = B64.encode(digest.compute(encoded.as_bytes()));
    (format!("{encoded}{FIELD_SEP}{digest_b64}"), digest_b64)
}

/// Splits off and checks the trailing digest, inferring its type from length.
pub(crate) fn strip_digest(plaintext: &str) -> Result<(&str, DigestType), EngineError> {
    let (encoded, digest_b64) = plaintext
        .rsplit_once(FIELD_SEP)
        .ok_or(EngineError::InvalidSpaData("missing digest"))?;
    let digest = DigestType::from_b64_len(digest_b64.len())
        .ok_or(EngineError::InvalidSpaData("unknown digest length"))?;
    let expected = B64.encode(digest.compute(encoded.as_bytes()));
    if bool::from(expected.as_bytes().ct_eq(digest_b64.as_bytes())) {
        Ok((encoded, digest))
    } else {
        Err(EngineError::DigestMismatch)
    }
}
