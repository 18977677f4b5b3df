//! Keys stored on disk and the permission checks shared with the saved
//! invocation file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum KeyFileError {
    #[error("[*] Could not stat {}: {source}", .path.display())]
    Stat { path: PathBuf, source: io::Error },
    #[error("[*] file: {} is not a regular file", .0.display())]
    NotRegular(PathBuf),
    #[error("[*] Could not read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("[*] Could not get key for {server} from {}", .path.display())]
    NoKey { server: String, path: PathBuf },
}

/// The file must exist and be a regular file. Loose permissions or a foreign
/// owner only produce warnings.
pub fn verify_file_perms(path: &Path) -> Result<(), KeyFileError> {
    let meta = fs::metadata(path).map_err(|source| KeyFileError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_file() {
        return Err(KeyFileError::NotRegular(path.to_path_buf()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        if meta.mode() & 0o777 != 0o600 {
            warn!(
                "[-] file: {} permissions should only be user read/write (0600, -rw-------)",
                path.display()
            );
        }
        if meta.uid() != nix::unistd::geteuid().as_raw() {
            warn!("[-] file: {} not owned by current effective user id", path.display());
        }
    }

    Ok(())
}

/// Looks up the key for `server`. Lines are `<server>: <key>`; blank lines
/// and `#` comments are skipped. A file with a single key line and no
/// matching server entry yields that line.
pub fn read_key_file(path: &Path, server: &str) -> Result<Zeroizing<String>, KeyFileError> {
    verify_file_perms(path)?;
    let contents = Zeroizing::new(fs::read_to_string(path).map_err(|source| KeyFileError::Read {
        path: path.to_path_buf(),
        source,
    })?);

    let entries: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();

    let matched = entries.iter().find_map(|line| {
        line.split_once(':')
            .filter(|(name, _)| name.trim() == server)
            .map(|(_, key)| key.trim())
    });

    match (matched, entries.as_slice()) {
        (Some(key), _) => Ok(Zeroizing::new(key.to_string())),
        (None, [only]) => Ok(Zeroizing::new(only.to_string())),
        _ => Err(KeyFileError::NoKey {
            server: server.to_string(),
            path: path.to_path_buf(),
        }),
    }
}
