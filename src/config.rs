use std::net::Ipv4Addr;
use std::path::PathBuf;

use thiserror::Error;
use zeroize::Zeroize;

use crate::cli::{Cli, SpaProtocol};
use crate::engine::{DigestType, EncryptionMode, HmacType};
use crate::logging::LogLevel;

pub const DEFAULT_SPA_PORT: u16 = 62201;
pub const DEFAULT_RESOLVE_URL: &str = "https://api.ipify.org?format=json";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Must use --destination unless --test mode is used")]
    MissingDestination,
    #[error("Must use one of [-s|-R|-a] to specify IP for SPA access.")]
    MissingAllowSource,
    #[error("Invalid allow IP address '{0}'")]
    InvalidAllowIp(String),
    #[error("NAT modes require an access spec (-A <proto>/<port>)")]
    NatWithoutAccess,
    #[error("NAT modes cannot be combined with a server command")]
    NatWithCommand,
    #[error("Invalid NAT port {0}, must be in [1,65535]")]
    InvalidNatPort(u32),
    #[error("Conflicting {0} key sources")]
    ConflictingKeySources(&'static str),
    #[error("Unknown encryption mode '{0}'")]
    UnknownEncryptionMode(String),
    #[error("Unknown digest type '{0}'")]
    UnknownDigestType(String),
    #[error("Unknown HMAC digest type '{0}'")]
    UnknownHmacType(String),
    #[error("GPG mode requires --gpg-recipient-key")]
    MissingGpgRecipient,
    #[error("Encryption mode '{0}' cannot be combined with GPG")]
    ModeWithGpg(String),
}

/// Where the address to be granted access comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowSource {
    Explicit(Ipv4Addr),
    /// The server uses the packet's source address.
    Source,
    ResolveHttp,
}

/// Validated client configuration. Built once from the command line and
/// read by reference everywhere else; only the exit path mutates it.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub spa_server: String,
    pub spa_port: u16,
    pub protocol: SpaProtocol,
    pub source_port: Option<u16>,
    pub rand_port: bool,

    pub allow: AllowSource,
    pub resolve_url: String,

    pub access: Option<String>,
    pub server_command: Option<String>,
    pub nat_access: Option<String>,
    pub nat_local: bool,
    pub nat_port: Option<u16>,
    pub nat_rand_port: bool,
    /// Zero counts as set.
    pub fw_timeout: Option<u32>,
    pub spoof_user: Option<String>,
    /// Signed seconds added to the packet timestamp.
    pub time_offset: i64,

    pub encryption_mode: EncryptionMode,
    pub digest_type: DigestType,
    pub hmac_type: HmacType,
    pub use_hmac: bool,
    pub rand_legacy: bool,

    pub key: Option<String>,
    pub key_base64: Option<String>,
    pub key_file: Option<PathBuf>,
    pub hmac_key: Option<String>,
    pub hmac_key_base64: Option<String>,
    pub hmac_key_file: Option<PathBuf>,
    pub input_from_stdin: bool,

    pub use_gpg: bool,
    pub gpg_recipient: Option<String>,
    pub gpg_signer: Option<String>,
    pub gpg_home_dir: Option<String>,
    pub gpg_exe: Option<PathBuf>,
    pub use_gpg_agent: bool,
    pub gpg_no_signing_pw: bool,

    pub test: bool,
    pub verbosity: LogLevel,
    pub save_packet: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            spa_server: String::new(),
            spa_port: DEFAULT_SPA_PORT,
            protocol: SpaProtocol::Udp,
            source_port: None,
            rand_port: false,
            allow: AllowSource::Source,
            resolve_url: DEFAULT_RESOLVE_URL.to_string(),
            access: None,
            server_command: None,
            nat_access: None,
            nat_local: false,
            nat_port: None,
            nat_rand_port: false,
            fw_timeout: None,
            spoof_user: None,
            time_offset: 0,
            encryption_mode: EncryptionMode::Cbc,
            digest_type: DigestType::Sha256,
            hmac_type: HmacType::Sha256,
            use_hmac: false,
            rand_legacy: false,
            key: None,
            key_base64: None,
            key_file: None,
            hmac_key: None,
            hmac_key_base64: None,
            hmac_key_file: None,
            input_from_stdin: false,
            use_gpg: false,
            gpg_recipient: None,
            gpg_signer: None,
            gpg_home_dir: None,
            gpg_exe: None,
            use_gpg_agent: false,
            gpg_no_signing_pw: false,
            test: false,
            verbosity: LogLevel::Warning,
            save_packet: None,
        }
    }
}

impl ClientOptions {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let spa_server = match cli.destination.as_deref().map(str::trim) {
            Some(dest) if !dest.is_empty() => dest.to_string(),
            _ if cli.test => String::from("127.0.0.1"),
            _ => return Err(ConfigError::MissingDestination),
        };

        let allow = if let Some(ip) = cli.allow_ip.as_deref() {
            let ip = ip.trim();
            AllowSource::Explicit(
                ip.parse()
                    .map_err(|_| ConfigError::InvalidAllowIp(ip.to_string()))?,
            )
        } else if cli.source_ip {
            AllowSource::Source
        } else if cli.resolve_ip_https {
            AllowSource::ResolveHttp
        } else {
            return Err(ConfigError::MissingAllowSource);
        };

        let nat_requested =
            cli.nat_local || cli.nat_access.is_some() || cli.nat_port.is_some() || cli.nat_rand_port;
        if nat_requested {
            if cli.server_cmd.is_some() {
                return Err(ConfigError::NatWithCommand);
            }
            if cli.access.is_none() {
                return Err(ConfigError::NatWithoutAccess);
            }
        }
        let nat_port = match cli.nat_port {
            Some(p) => Some(
                u16::try_from(p)
                    .ok()
                    .filter(|p| *p > 0)
                    .ok_or(ConfigError::InvalidNatPort(p))?,
            ),
            None => None,
        };

        let key_sources = [
            cli.key_rijndael.is_some(),
            cli.key_base64_rijndael.is_some(),
            cli.get_key.is_some(),
        ];
        if key_sources.iter().filter(|s| **s).count() > 1 {
            return Err(ConfigError::ConflictingKeySources("encryption"));
        }
        let hmac_sources = [
            cli.key_hmac.is_some(),
            cli.key_base64_hmac.is_some(),
            cli.get_hmac_key.is_some(),
        ];
        if hmac_sources.iter().filter(|s| **s).count() > 1 {
            return Err(ConfigError::ConflictingKeySources("HMAC"));
        }

        let encryption_mode = match cli.encryption_mode.as_deref() {
            Some(name) => EncryptionMode::from_name(name)
                .filter(|m| *m != EncryptionMode::Asymmetric)
                .ok_or_else(|| ConfigError::UnknownEncryptionMode(name.to_string()))?,
            None => EncryptionMode::Cbc,
        };
        if cli.gpg_encryption {
            if let Some(name) = cli.encryption_mode.as_deref() {
                return Err(ConfigError::ModeWithGpg(name.to_string()));
            }
            if cli.gpg_recipient_key.is_none() {
                return Err(ConfigError::MissingGpgRecipient);
            }
        }
        let digest_type = match cli.digest_type.as_deref() {
            Some(name) => DigestType::from_name(name)
                .ok_or_else(|| ConfigError::UnknownDigestType(name.to_string()))?,
            None => DigestType::Sha256,
        };
        let hmac_type = match cli.hmac_digest_type.as_deref() {
            Some(name) => HmacType::from_name(name)
                .ok_or_else(|| ConfigError::UnknownHmacType(name.to_string()))?,
            None => HmacType::Sha256,
        };

        let time_offset = match (cli.time_offset_plus, cli.time_offset_minus) {
            (Some(plus), _) => plus,
            (None, Some(minus)) => -minus,
            (None, None) => 0,
        };

        let use_hmac = cli.use_hmac
            || cli.key_hmac.is_some()
            || cli.key_base64_hmac.is_some()
            || cli.get_hmac_key.is_some();

        Ok(Self {
            spa_server,
            spa_port: cli.server_port.unwrap_or(DEFAULT_SPA_PORT),
            protocol: cli.server_proto.unwrap_or_default(),
            source_port: cli.source_port,
            rand_port: cli.rand_port,
            allow,
            resolve_url: cli
                .resolve_url
                .clone()
                .unwrap_or_else(|| DEFAULT_RESOLVE_URL.to_string()),
            access: cli.access.clone(),
            server_command: cli.server_cmd.clone(),
            nat_access: cli.nat_access.clone(),
            nat_local: cli.nat_local,
            nat_port,
            nat_rand_port: cli.nat_rand_port,
            fw_timeout: cli.fw_timeout,
            spoof_user: cli.spoof_user.clone(),
            time_offset,
            encryption_mode,
            digest_type,
            hmac_type,
            use_hmac,
            rand_legacy: cli.rand_legacy,
            key: cli.key_rijndael.clone(),
            key_base64: cli.key_base64_rijndael.clone(),
            key_file: cli.get_key.clone(),
            hmac_key: cli.key_hmac.clone(),
            hmac_key_base64: cli.key_base64_hmac.clone(),
            hmac_key_file: cli.get_hmac_key.clone(),
            input_from_stdin: cli.stdin,
            use_gpg: cli.gpg_encryption,
            gpg_recipient: cli.gpg_recipient_key.clone(),
            gpg_signer: cli.gpg_signer_key.clone(),
            gpg_home_dir: cli.gpg_home_dir.clone(),
            gpg_exe: cli.gpg_exe.clone(),
            use_gpg_agent: cli.gpg_agent,
            gpg_no_signing_pw: cli.gpg_no_signing_pw,
            test: cli.test,
            verbosity: LogLevel::from_verbosity(cli.verbose),
            save_packet: cli.save_packet.clone(),
        })
    }

    /// Overwrites every option field that may carry secrets.
    pub fn free_configs(&mut self) {
        self.key.zeroize();
        self.key_base64.zeroize();
        self.hmac_key.zeroize();
        self.hmac_key_base64.zeroize();
        self.gpg_recipient.zeroize();
        self.gpg_signer.zeroize();
        self.gpg_home_dir.zeroize();
        self.server_command.zeroize();
    }

    pub fn holds_secrets(&self) -> bool {
        self.key.is_some()
            || self.key_base64.is_some()
            || self.hmac_key.is_some()
            || self.hmac_key_base64.is_some()
            || self.gpg_recipient.is_some()
            || self.gpg_signer.is_some()
            || self.gpg_home_dir.is_some()
            || self.server_command.is_some()
    }
}
