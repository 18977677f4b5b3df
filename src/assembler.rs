//! Drives an [`EncodingContext`] through its mandated call order.
//!
//! Several setters validate state written by earlier ones (NAT access needs a
//! NAT message type, GPG parameters need the GPG engine, the home directory
//! precedes every other GPG call), so the order below is part of the contract.

use std::path::Path;

use tracing::{error, warn};

use crate::access::AccessDescriptor;
use crate::config::ClientOptions;
use crate::engine::{
    EncodingContext, EncryptionMode, EncryptionType, EngineError, MessageType, RandMode,
    LEGACY_KEY_LEN,
};
use crate::error::ClientError;
use crate::keys::KeyMaterial;

/// Everything decided about the request before the engine is involved.
#[derive(Debug, Clone, Copy)]
pub struct TokenPlan<'a> {
    pub message_type: MessageType,
    pub access: &'a AccessDescriptor,
    pub nat_access: Option<&'a str>,
}

fn call<C: EncodingContext>(
    ctx: &mut C,
    name: &'static str,
    op: impl FnOnce(&mut C) -> Result<(), EngineError>,
) -> Result<(), ClientError> {
    match op(ctx) {
        Ok(()) => Ok(()),
        Err(err) => {
            if err.is_gpg() {
                error!("GPG ERR: {}", ctx.gpg_error().unwrap_or("no diagnostic"));
            }
            Err(ClientError::engine(name, err))
        }
    }
}

/// Applies every request parameter up to and including the digest type.
pub fn configure<C: EncodingContext>(
    ctx: &mut C,
    opts: &ClientOptions,
    plan: &TokenPlan<'_>,
) -> Result<(), ClientError> {
    if let Some(timeout) = opts.fw_timeout {
        call(ctx, "set_client_timeout", |c| c.set_client_timeout(timeout))?;
    }

    call(ctx, "set_message_type", |c| c.set_message_type(plan.message_type))?;

    if opts.time_offset != 0 {
        call(ctx, "set_timestamp", |c| c.set_timestamp(opts.time_offset))?;
    }

    call(ctx, "set_message", |c| c.set_message(plan.access.as_str()))?;

    if let Some(nat) = plan.nat_access {
        call(ctx, "set_nat_access", |c| c.set_nat_access(nat))?;
    }

    if let Some(user) = opts.spoof_user.as_deref().filter(|u| !u.is_empty()) {
        call(ctx, "set_username", |c| c.set_username(user))?;
    }

    if opts.rand_legacy {
        call(ctx, "set_rand_mode", |c| c.set_rand_mode(RandMode::Legacy))?;
        call(ctx, "set_rand_value", |c| c.set_rand_value(None))?;
    }

    if opts.use_gpg {
        call(ctx, "set_encryption_type", |c| c.set_encryption_type(EncryptionType::Gpg))?;
        if let Some(exe) = opts.gpg_exe.as_deref() {
            call(ctx, "set_gpg_exe", |c| c.set_gpg_exe(exe))?;
        }
        if let Some(home) = opts.gpg_home_dir.as_deref().filter(|h| !h.is_empty()) {
            call(ctx, "set_gpg_home_dir", |c| c.set_gpg_home_dir(Path::new(home)))?;
        }
        let recipient = opts.gpg_recipient.as_deref().unwrap_or_default();
        call(ctx, "set_gpg_recipient", |c| c.set_gpg_recipient(recipient))?;
        if let Some(signer) = opts.gpg_signer.as_deref().filter(|s| !s.is_empty()) {
            call(ctx, "set_gpg_signer", |c| c.set_gpg_signer(signer))?;
        }
        call(ctx, "set_encryption_mode", |c| {
            c.set_encryption_mode(EncryptionMode::Asymmetric)
        })?;
    } else {
        call(ctx, "set_encryption_mode", |c| c.set_encryption_mode(opts.encryption_mode))?;
    }

    call(ctx, "set_digest_type", |c| c.set_digest_type(opts.digest_type))
}

/// Sets the HMAC type when an HMAC key is in use, applies the legacy key
/// ceiling and seals the token.
pub fn finalize<C: EncodingContext>(
    ctx: &mut C,
    opts: &ClientOptions,
    keys: &mut KeyMaterial,
    use_hmac: bool,
) -> Result<(), ClientError> {
    if use_hmac {
        call(ctx, "set_hmac_type", |c| c.set_hmac_type(opts.hmac_type))?;
    }

    if opts.encryption_mode == EncryptionMode::CbcLegacyIv
        && !opts.use_gpg
        && keys.encryption_key.len() > LEGACY_KEY_LEN
    {
        warn!("WARNING: Encryption key in '-M legacy' mode must be <= {LEGACY_KEY_LEN} bytes");
        warn!("long - truncating before sending SPA packet. Upgrading remote");
        warn!("server is recommended.");
        keys.encryption_key.truncate(LEGACY_KEY_LEN);
    }

    let hmac_key: &[u8] = if use_hmac { keys.hmac_key.as_bytes() } else { &[] };
    let key = keys.encryption_key.as_bytes();
    call(ctx, "finalize", |c| c.finalize(key, hmac_key))
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingContext;
    use super::*;
    use crate::access;
    use rand::rngs::mock::StepRng;
    use std::io;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    fn keys_with(enc: &str, mac: &str) -> KeyMaterial {
        let opts = ClientOptions {
            key: Some(enc.to_string()),
            hmac_key: (!mac.is_empty()).then(|| mac.to_string()),
            ..ClientOptions::default()
        };
        let mut keys = KeyMaterial::new();
        crate::keys::acquire_keys(&opts, &mut keys, &mut crate::prompt::ReaderPrompt::new(&b""[..]))
            .unwrap();
        keys
    }

    fn desc(opts: &ClientOptions) -> AccessDescriptor {
        access::build(opts, Ipv4Addr::new(1, 2, 3, 4), &mut StepRng::new(0, 1)).unwrap()
    }

    #[test]
    fn full_call_order() {
        let opts = ClientOptions {
            access: Some("tcp/22".to_string()),
            nat_local: true,
            fw_timeout: Some(30),
            time_offset: -60,
            spoof_user: Some("bob".to_string()),
            rand_legacy: true,
            ..ClientOptions::default()
        };
        let access = desc(&opts);
        let plan = TokenPlan {
            message_type: MessageType::LocalNatAccessWithTimeout,
            access: &access,
            nat_access: Some("10.0.0.1,22"),
        };
        let mut ctx = RecordingContext::default();
        configure(&mut ctx, &opts, &plan).unwrap();
        let mut keys = keys_with("secret", "mac");
        finalize(&mut ctx, &opts, &mut keys, true).unwrap();

        assert_eq!(
            ctx.calls,
            [
                "set_client_timeout",
                "set_message_type",
                "set_timestamp",
                "set_message",
                "set_nat_access",
                "set_username",
                "set_rand_mode",
                "set_rand_value",
                "set_encryption_mode",
                "set_digest_type",
                "set_hmac_type",
                "finalize",
            ]
        );
        assert_eq!(ctx.message.as_deref(), Some("1.2.3.4,tcp/22"));
        assert_eq!(ctx.finalized_hmac_key.as_deref(), Some(&b"mac"[..]));
    }

    #[test]
    fn gpg_home_dir_precedes_other_gpg_calls() {
        let opts = ClientOptions {
            use_gpg: true,
            gpg_home_dir: Some("/home/u/.gnupg".to_string()),
            gpg_recipient: Some("RECIPIENT".to_string()),
            gpg_signer: Some("SIGNER".to_string()),
            ..ClientOptions::default()
        };
        let access = desc(&opts);
        let plan = TokenPlan {
            message_type: MessageType::Access,
            access: &access,
            nat_access: None,
        };
        let mut ctx = RecordingContext::default();
        configure(&mut ctx, &opts, &plan).unwrap();
        assert_eq!(
            &ctx.calls[2..],
            [
                "set_encryption_type",
                "set_gpg_home_dir",
                "set_gpg_recipient",
                "set_gpg_signer",
                "set_encryption_mode",
                "set_digest_type",
            ]
        );
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;
        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn finalize_logged(opts: &ClientOptions, keys: &mut KeyMaterial) -> (RecordingContext, String) {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let mut ctx = RecordingContext::default();
        tracing::subscriber::with_default(subscriber, || {
            finalize(&mut ctx, opts, keys, false).unwrap();
        });
        (ctx, logs.text())
    }

    #[test]
    fn legacy_mode_truncates_long_keys() {
        let opts = ClientOptions {
            encryption_mode: EncryptionMode::CbcLegacyIv,
            ..ClientOptions::default()
        };
        let mut keys = keys_with(&"k".repeat(24), "");
        let (ctx, logs) = finalize_logged(&opts, &mut keys);
        assert_eq!(ctx.finalized_key.as_ref().map(Vec::len), Some(16));
        assert_eq!(ctx.finalized_hmac_key.as_deref(), Some(&b""[..]));
        assert!(!ctx.calls.contains(&"set_hmac_type"));
        assert!(logs.contains("WARN"));
        assert!(logs.contains("must be <= 16 bytes"));
        assert!(logs.contains("truncating before sending SPA packet"));
    }

    #[test]
    fn legacy_mode_leaves_short_keys_alone() {
        let opts = ClientOptions {
            encryption_mode: EncryptionMode::CbcLegacyIv,
            ..ClientOptions::default()
        };
        let mut keys = keys_with("short", "");
        let (ctx, logs) = finalize_logged(&opts, &mut keys);
        assert_eq!(ctx.finalized_key.as_deref(), Some(&b"short"[..]));
        assert!(!logs.contains("truncating"));
    }

    #[test]
    fn engine_failure_names_the_call() {
        let opts = ClientOptions::default();
        let access = desc(&opts);
        let plan = TokenPlan {
            message_type: MessageType::Access,
            access: &access,
            nat_access: None,
        };
        let mut ctx = RecordingContext {
            fail_on: Some("set_message"),
            ..RecordingContext::default()
        };
        let err = configure(&mut ctx, &opts, &plan).unwrap_err();
        assert!(matches!(err, ClientError::Engine { call: "set_message", .. }));
        assert_eq!(ctx.calls.last(), Some(&"set_message"));
    }
}
