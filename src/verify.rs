//! Test-mode self check: decode the finalized token with a second context.

use thiserror::Error;
use tracing::{error, warn};

use crate::config::ClientOptions;
use crate::engine::{DecodeParams, EncodingContext, EngineError, GpgError, RandMode};
use crate::error::{ClientError, EngineCall};
use crate::keys::KeyMaterial;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Decoded token carries no message")]
    MissingMessage,
    #[error("Decoded message '{decoded}' does not match '{expected}'")]
    MessageMismatch { expected: String, decoded: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Decoded {
        message: String,
        dump: Option<String>,
    },
    /// The token was sealed to a public key whose secret half is not held
    /// locally. Expected for third-party recipients; not a failure.
    NoPrivateKey { detail: String },
}

/// Rebuilds a decoder from `ctx`'s serialized data and decrypts it with the
/// same keys. The decoder is destroyed on every path out of this function.
pub fn verify_round_trip<C: EncodingContext>(
    ctx: &C,
    opts: &ClientOptions,
    keys: &KeyMaterial,
    expected_message: &str,
) -> Result<Verification, ClientError> {
    let spa_data = ctx.spa_data().during("get_spa_data")?;
    let mode = ctx.encryption_mode().during("get_spa_encryption_mode")?;
    let rand_mode = if opts.rand_legacy {
        RandMode::Legacy
    } else {
        RandMode::Full
    };
    let hmac_key = keys.hmac_key.as_bytes();
    let params = DecodeParams {
        encryption_mode: mode,
        hmac_key,
        hmac_type: (!hmac_key.is_empty()).then_some(opts.hmac_type),
        rand_mode,
    };

    let decoder = ctx.new_decoder(spa_data, params).during("new_with_data")?;
    let mut decoder = scopeguard::guard(decoder, |mut d| {
        if d.destroy().is_err() {
            error!("[*] Could not zero out sensitive data buffer.");
        }
    });

    decoder.set_encryption_mode(mode).during("set_spa_encryption_mode")?;
    if opts.rand_legacy {
        decoder.set_rand_mode(RandMode::Legacy).during("set_rand_mode")?;
    }
    if opts.use_gpg {
        if let Some(home) = opts.gpg_home_dir.as_deref().filter(|h| !h.is_empty()) {
            decoder
                .set_gpg_home_dir(std::path::Path::new(home))
                .during("set_gpg_home_dir")?;
        }
    }

    match decoder.decrypt(keys.encryption_key.as_bytes()) {
        Ok(()) => {}
        Err(EngineError::Gpg(GpgError::NoPrivateKey)) => {
            let detail = decoder
                .gpg_error()
                .unwrap_or("no secret key available to decrypt")
                .to_string();
            error!("GPG ERR: {detail}\nNo access to recipient private key?");
            return Ok(Verification::NoPrivateKey { detail });
        }
        Err(err) => {
            if err.is_gpg() {
                error!("GPG ERR: {}", decoder.gpg_error().unwrap_or("no diagnostic"));
            }
            return Err(ClientError::engine("decrypt_spa_data", err));
        }
    }

    let message = decoder
        .message()
        .ok_or(VerifyError::MissingMessage)?
        .to_string();
    if message != expected_message {
        return Err(VerifyError::MessageMismatch {
            expected: expected_message.to_string(),
            decoded: message,
        }
        .into());
    }

    let dump = match decoder.dump() {
        Ok(dump) => Some(dump),
        Err(err) => {
            warn!("Unable to dump context: {err}");
            None
        }
    };
    Ok(Verification::Decoded { message, dump })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpg::testing::FakeKeyring;
    use crate::engine::{EncryptionMode, EncryptionType, HmacType, SpaContext};
    use std::sync::Arc;

    fn keys(enc: &[u8], mac: &[u8]) -> KeyMaterial {
        let opts = ClientOptions {
            key: Some(String::from_utf8(enc.to_vec()).unwrap()),
            hmac_key: (!mac.is_empty()).then(|| String::from_utf8(mac.to_vec()).unwrap()),
            ..ClientOptions::default()
        };
        let mut keys = KeyMaterial::new();
        let mut no_input = crate::prompt::ReaderPrompt::new(&b""[..]);
        crate::keys::acquire_keys(&opts, &mut keys, &mut no_input).unwrap();
        keys
    }

    fn sealed(message: &str, keys: &KeyMaterial, mode: EncryptionMode) -> SpaContext {
        let mut ctx = SpaContext::new().unwrap();
        ctx.set_message(message).unwrap();
        ctx.set_encryption_mode(mode).unwrap();
        if !keys.hmac_key.is_empty() {
            ctx.set_hmac_type(HmacType::Sha256).unwrap();
        }
        ctx.finalize(keys.encryption_key.as_bytes(), keys.hmac_key.as_bytes())
            .unwrap();
        ctx
    }

    #[test]
    fn symmetric_token_round_trips() {
        let keys = keys(b"secret", b"");
        let ctx = sealed("1.2.3.4,tcp/22", &keys, EncryptionMode::Cbc);
        let outcome = verify_round_trip(&ctx, &ClientOptions::default(), &keys, "1.2.3.4,tcp/22").unwrap();
        match outcome {
            Verification::Decoded { message, dump } => {
                assert_eq!(message, "1.2.3.4,tcp/22");
                assert!(dump.unwrap().contains("1.2.3.4,tcp/22"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn hmac_and_legacy_mode_round_trip() {
        let keys = keys(b"legacykey", b"hmac secret");
        let ctx = sealed("10.0.0.1,udp/53", &keys, EncryptionMode::CbcLegacyIv);
        let outcome =
            verify_round_trip(&ctx, &ClientOptions::default(), &keys, "10.0.0.1,udp/53").unwrap();
        assert!(matches!(outcome, Verification::Decoded { .. }));
    }

    #[test]
    fn wrong_key_is_a_fatal_verification_error() {
        let keys_a = keys(b"secret", b"");
        let keys_b = keys(b"different", b"");
        let ctx = sealed("1.2.3.4,tcp/22", &keys_a, EncryptionMode::Cbc);
        let err = verify_round_trip(&ctx, &ClientOptions::default(), &keys_b, "1.2.3.4,tcp/22")
            .unwrap_err();
        assert!(matches!(err, ClientError::Engine { call: "decrypt_spa_data", .. }));
    }

    #[test]
    fn mismatched_message_is_reported() {
        let keys = keys(b"secret", b"");
        let ctx = sealed("1.2.3.4,tcp/22", &keys, EncryptionMode::Cbc);
        let err = verify_round_trip(&ctx, &ClientOptions::default(), &keys, "1.2.3.4,tcp/23")
            .unwrap_err();
        assert!(matches!(err, ClientError::Verify(VerifyError::MessageMismatch { .. })));
    }

    #[test]
    fn missing_private_key_is_not_fatal() {
        let backend = Arc::new(FakeKeyring { holds_secret_key: false });
        let mut ctx = SpaContext::new().unwrap().with_gpg_backend(backend);
        ctx.set_message("1.2.3.4,tcp/22").unwrap();
        ctx.set_encryption_type(EncryptionType::Gpg).unwrap();
        ctx.set_gpg_recipient("THIRD-PARTY").unwrap();
        ctx.finalize(b"", b"").unwrap();

        let opts = ClientOptions {
            use_gpg: true,
            gpg_home_dir: Some("/tmp/gnupg".to_string()),
            ..ClientOptions::default()
        };
        let outcome = verify_round_trip(&ctx, &opts, &KeyMaterial::new(), "1.2.3.4,tcp/22").unwrap();
        assert!(matches!(outcome, Verification::NoPrivateKey { .. }));
    }
}
