//! The only way out of a client run.
//!
//! Every terminal path, successful or not, hands its context, options and
//! keys to [`clean_exit`], which scrubs them before producing the process
//! exit code. Nothing else in the crate ends the process.

use std::process::ExitCode;

use tracing::error;

use crate::config::ClientOptions;
use crate::engine::{EncodingContext, EngineError};
use crate::keys::{KeyBuffer, KeyMaterial};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => ExitCode::SUCCESS,
            ExitStatus::Failure => ExitCode::FAILURE,
        }
    }
}

/// Scrubs one key buffer. Buffers that were never written are left alone.
fn zero_buf_wrapper(buf: &mut KeyBuffer) {
    if buf.is_zeroed() {
        return;
    }
    buf.clear();
    if !buf.is_zeroed() {
        error!("[*] Could not zero out sensitive data buffer.");
    }
}

/// Destroys the context and scrubs options and keys. The returned status is
/// what the process exits with. A context that cannot confirm its own scrub is
/// reported but does not change the status.
pub fn clean_exit<C: EncodingContext>(
    ctx: Option<&mut C>,
    opts: &mut ClientOptions,
    keys: &mut KeyMaterial,
    status: ExitStatus,
) -> ExitStatus {
    if let Some(ctx) = ctx {
        if let Err(EngineError::ZeroOutData) = ctx.destroy() {
            error!("[*] Could not zero out sensitive data buffer.");
        }
    }
    opts.free_configs();
    zero_buf_wrapper(&mut keys.encryption_key);
    zero_buf_wrapper(&mut keys.hmac_key);
    status
}

/// Same scrub as [`clean_exit`] when no context was ever created.
pub fn clean_exit_without_context(
    opts: &mut ClientOptions,
    keys: &mut KeyMaterial,
    status: ExitStatus,
) -> ExitStatus {
    opts.free_configs();
    zero_buf_wrapper(&mut keys.encryption_key);
    zero_buf_wrapper(&mut keys.hmac_key);
    status
}
