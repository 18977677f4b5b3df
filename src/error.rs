use thiserror::Error;

use crate::access::AccessError;
use crate::config::ConfigError;
use crate::dns_resolver::ResolveError;
use crate::engine::EngineError;
use crate::history::HistoryError;
use crate::keys::KeyError;
use crate::nat::NatError;
use crate::transmit::TransmitError;
use crate::verify::VerifyError;

/// Every fatal outcome of a client run.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Nat(#[from] NatError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{call}: Error - {source}")]
    Engine {
        call: &'static str,
        source: EngineError,
    },
    #[error(transparent)]
    Transmit(#[from] TransmitError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

impl ClientError {
    pub fn engine(call: &'static str, source: EngineError) -> Self {
        ClientError::Engine { call, source }
    }
}

/// Tags an engine result with the name of the call that produced it.
pub trait EngineCall<T> {
    fn during(self, call: &'static str) -> Result<T, ClientError>;
}

impl<T> EngineCall<T> for Result<T, EngineError> {
    fn during(self, call: &'static str) -> Result<T, ClientError> {
        self.map_err(|source| ClientError::engine(call, source))
    }
}
