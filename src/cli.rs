use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use zeroize::Zeroize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SpaProtocol {
    #[default]
    Udp,
    Tcp,
}

/// Single Packet Authorization client.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "spa-client", disable_version_flag = true)]
pub struct Cli {
    /// Ports and protocols to open, e.g. "tcp/22".
    #[arg(short = 'A', long = "access")]
    pub access: Option<String>,

    /// IP address to grant access to.
    #[arg(short = 'a', long = "allow-ip", conflicts_with_all = ["source_ip", "resolve_ip_https"])]
    pub allow_ip: Option<String>,

    /// Let the server use the packet's source address.
    #[arg(short = 's', long = "source-ip", conflicts_with = "resolve_ip_https")]
    pub source_ip: bool,

    /// Resolve the external address of this host over HTTPS.
    #[arg(short = 'R', long = "resolve-ip-https")]
    pub resolve_ip_https: bool,

    /// URL queried by --resolve-ip-https.
    #[arg(long = "resolve-url")]
    pub resolve_url: Option<String>,

    /// SPA server host name or address.
    #[arg(short = 'D', long = "destination")]
    pub destination: Option<String>,

    /// SPA server port.
    #[arg(short = 'p', long = "server-port")]
    pub server_port: Option<u16>,

    #[arg(short = 'P', long = "server-proto", value_enum)]
    pub server_proto: Option<SpaProtocol>,

    /// Source port of the SPA packet.
    #[arg(short = 'S', long = "source-port")]
    pub source_port: Option<u16>,

    /// Send the packet to a random high port.
    #[arg(short = 'r', long = "rand-port")]
    pub rand_port: bool,

    /// Command for the server to run instead of opening ports.
    #[arg(short = 'C', long = "server-cmd")]
    pub server_cmd: Option<String>,

    /// Forward access to this internal "ip,port" or "host,port".
    #[arg(short = 'N', long = "nat-access")]
    pub nat_access: Option<String>,

    /// Forward access to a service on the SPA server itself.
    #[arg(long = "nat-local")]
    pub nat_local: bool,

    /// Externally visible port to translate.
    #[arg(long = "nat-port", conflicts_with = "nat_rand_port")]
    pub nat_port: Option<u32>,

    #[arg(long = "nat-rand-port")]
    pub nat_rand_port: bool,

    /// Firewall rule timeout requested from the server, in seconds.
    #[arg(short = 'f', long = "fw-timeout")]
    pub fw_timeout: Option<u32>,

    /// Username placed in the packet.
    #[arg(short = 'U', long = "spoof-user")]
    pub spoof_user: Option<String>,

    /// Move the timestamp forward, e.g. "60", "5m", "1h".
    #[arg(long = "time-offset-plus", value_parser = parse_time_offset, conflicts_with = "time_offset_minus")]
    pub time_offset_plus: Option<i64>,

    #[arg(long = "time-offset-minus", value_parser = parse_time_offset)]
    pub time_offset_minus: Option<i64>,

    /// Encryption mode: cbc or legacy.
    #[arg(short = 'M', long = "encryption-mode")]
    pub encryption_mode: Option<String>,

    /// Digest type: sha256, sha384 or sha512.
    #[arg(short = 'm', long = "digest-type")]
    pub digest_type: Option<String>,

    /// HMAC digest type: sha256, sha384 or sha512.
    #[arg(long = "hmac-digest-type")]
    pub hmac_digest_type: Option<String>,

    /// Authenticate the packet with an HMAC key.
    #[arg(long = "use-hmac")]
    pub use_hmac: bool,

    /// Digits-only random value for older servers.
    #[arg(long = "rand-legacy")]
    pub rand_legacy: bool,

    #[arg(long = "key-rijndael", conflicts_with_all = ["key_base64_rijndael", "get_key"])]
    pub key_rijndael: Option<String>,

    #[arg(long = "key-base64-rijndael", conflicts_with = "get_key")]
    pub key_base64_rijndael: Option<String>,

    #[arg(long = "key-hmac", conflicts_with_all = ["key_base64_hmac", "get_hmac_key"])]
    pub key_hmac: Option<String>,

    #[arg(long = "key-base64-hmac", conflicts_with = "get_hmac_key")]
    pub key_base64_hmac: Option<String>,

    /// File holding "<server>: <key>" lines.
    #[arg(short = 'G', long = "get-key")]
    pub get_key: Option<PathBuf>,

    #[arg(long = "get-hmac-key")]
    pub get_hmac_key: Option<PathBuf>,

    /// Read keys from stdin instead of the terminal.
    #[arg(long = "stdin")]
    pub stdin: bool,

    #[arg(long = "gpg-encryption")]
    pub gpg_encryption: bool,

    #[arg(long = "gpg-recipient-key")]
    pub gpg_recipient_key: Option<String>,

    #[arg(long = "gpg-signer-key")]
    pub gpg_signer_key: Option<String>,

    #[arg(long = "gpg-home-dir")]
    pub gpg_home_dir: Option<String>,

    #[arg(long = "gpg-exe")]
    pub gpg_exe: Option<PathBuf>,

    /// Signing passphrase is provided by gpg-agent.
    #[arg(long = "gpg-agent")]
    pub gpg_agent: bool,

    #[arg(long = "gpg-no-signing-pw")]
    pub gpg_no_signing_pw: bool,

    /// Build and decode the packet without sending it.
    #[arg(short = 'T', long = "test")]
    pub test: bool,

    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Replay the arguments of the previous run.
    #[arg(short = 'l', long = "last-cmd")]
    pub last_cmd: bool,

    #[arg(long = "show-last", conflicts_with = "last_cmd")]
    pub show_last: bool,

    #[arg(long = "save-args-file")]
    pub save_args_file: Option<PathBuf>,

    #[arg(long = "no-save-args")]
    pub no_save_args: bool,

    /// Also write the packet data to this file.
    #[arg(short = 'B', long = "save-packet")]
    pub save_packet: Option<PathBuf>,

    #[arg(short = 'V', long = "version")]
    pub version: bool,
}

impl Cli {
    /// Overwrites key material and commands given on the command line once
    /// they have been copied into the validated options.
    pub fn free_secrets(&mut self) {
        self.key_rijndael.zeroize();
        self.key_base64_rijndael.zeroize();
        self.key_hmac.zeroize();
        self.key_base64_hmac.zeroize();
        self.server_cmd.zeroize();
    }
}

/// Seconds, optionally suffixed with `s`, `m`, `h` or `d`.
pub fn parse_time_offset(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    let (digits, scale) = match raw.char_indices().last() {
        Some((idx, 's')) => (&raw[..idx], 1),
        Some((idx, 'm')) => (&raw[..idx], 60),
        Some((idx, 'h')) => (&raw[..idx], 3600),
        Some((idx, 'd')) => (&raw[..idx], 86400),
        _ => (raw, 1),
    };
    let value: i64 = digits
        .parse()
        .map_err(|_| format!("invalid time offset '{raw}'"))?;
    if value < 0 {
        return Err(format!("time offset '{raw}' must not be negative"));
    }
    value
        .checked_mul(scale)
        .ok_or_else(|| format!("time offset '{raw}' out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_offsets_accept_unit_suffixes() {
        assert_eq!(parse_time_offset("90"), Ok(90));
        assert_eq!(parse_time_offset("5m"), Ok(300));
        assert_eq!(parse_time_offset("2h"), Ok(7200));
        assert_eq!(parse_time_offset("1d"), Ok(86400));
        assert!(parse_time_offset("-5").is_err());
        assert!(parse_time_offset("soon").is_err());
    }

    #[test]
    fn parses_a_typical_command_line() {
        let cli = Cli::try_parse_from([
            "spa-client", "-A", "tcp/22", "-a", "1.2.3.4", "-D", "spa.example.com",
            "--key-rijndael", "secret", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.access.as_deref(), Some("tcp/22"));
        assert_eq!(cli.destination.as_deref(), Some("spa.example.com"));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn conflicting_time_offsets_are_refused() {
        let res = Cli::try_parse_from([
            "spa-client", "--time-offset-plus", "10", "--time-offset-minus", "10",
        ]);
        assert!(res.is_err());
    }
}
