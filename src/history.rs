//! The saved invocation behind `--last-cmd` and `--show-last`.
//!
//! One line of space-joined arguments in a per-user file, created owner
//! read/write only.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::key_file::{verify_file_perms, KeyFileError};
use crate::notice;

pub const SAVE_FILE_NAME: &str = ".spa-client.run";
pub const MAX_CMDLINE_ARGS: usize = 50;
pub const MAX_ARGS_LINE_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Unable to determine HOME directory")]
    NoHome,
    #[error("Arguments exceed {max} bytes, not saving", max = MAX_ARGS_LINE_LEN)]
    LineTooLong,
    #[error("Too many arguments in {} (limit {max})", .0.display(), max = MAX_CMDLINE_ARGS)]
    TooManyArgs(PathBuf),
    #[error("No saved arguments in {}", .0.display())]
    Empty(PathBuf),
    #[error(transparent)]
    Perms(#[from] KeyFileError),
    #[error("Could not access {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> HistoryError + '_ {
    move |source| HistoryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn save_file_path(explicit: Option<&Path>) -> Result<PathBuf, HistoryError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let home = std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .ok_or(HistoryError::NoHome)?;
    Ok(PathBuf::from(home).join(SAVE_FILE_NAME))
}

/// Joins `args` with single spaces and replaces the file contents with that
/// line.
pub fn save_args<S: AsRef<str>>(args: &[S], path: &Path) -> Result<(), HistoryError> {
    let mut line = String::new();
    for arg in args {
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(arg.as_ref());
        if line.len() >= MAX_ARGS_LINE_LEN {
            return Err(HistoryError::LineTooLong);
        }
    }
    line.push('\n');

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(io_err(path))?;
    file.write_all(line.as_bytes()).map_err(io_err(path))?;
    debug!("Saved arguments to {}", path.display());
    Ok(())
}

fn first_line(path: &Path) -> Result<String, HistoryError> {
    verify_file_perms(path)?;
    let file = fs::File::open(path).map_err(io_err(path))?;
    let mut line = String::new();
    BufReader::new(file)
        .read_line(&mut line)
        .map_err(io_err(path))?;
    let line = line.trim_end_matches(&['\r', '\n'][..]).to_string();
    if line.trim().is_empty() {
        return Err(HistoryError::Empty(path.to_path_buf()));
    }
    Ok(line)
}

/// Arguments of the previous run, without the program name.
pub fn load_last(path: &Path) -> Result<Vec<String>, HistoryError> {
    let line = first_line(path)?;
    let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if args.len() > MAX_CMDLINE_ARGS {
        return Err(HistoryError::TooManyArgs(path.to_path_buf()));
    }
    Ok(args)
}

pub fn show_last(path: &Path) -> Result<(), HistoryError> {
    let line = first_line(path)?;
    notice!("Last spa-client command line: {line}");
    Ok(())
}
