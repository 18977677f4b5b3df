pub mod logging;

pub mod access;
pub mod assembler;
pub mod cli;
pub mod client;
pub mod config;
pub mod dns_resolver;
pub mod engine;
pub mod error;
pub mod exit;
pub mod external_ip;
pub mod history;
pub mod key_file;
pub mod keys;
pub mod message_type;
pub mod nat;
pub mod prompt;
pub mod transmit;
pub mod verify;

pub use config::ClientOptions;
pub use engine::{EncodingContext, SpaContext};
pub use error::ClientError;
pub use keys::{KeyBuffer, KeyMaterial};

pub const CLIENT_NAME: &str = "spa-client";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
