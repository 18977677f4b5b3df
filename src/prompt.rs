use std::io::{self, BufRead, Write};

use zeroize::Zeroizing;

pub const ENCRYPTION_KEY_PROMPT: &str = "Enter encryption key: ";
pub const HMAC_KEY_PROMPT: &str = "Enter HMAC key: ";
pub const SIGNING_PASSPHRASE_PROMPT: &str = "Enter passphrase for signing: ";

/// Source of interactively entered secrets.
pub trait PasswordPrompt {
    fn prompt(&mut self, message: &str) -> io::Result<Zeroizing<String>>;
}

/// Reads from the controlling terminal with echo disabled. Blocks until a
/// line is entered.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    #[cfg(unix)]
    fn prompt(&mut self, message: &str) -> io::Result<Zeroizing<String>> {
        use std::fs::OpenOptions;
        use std::io::BufReader;

        use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};

        let mut tty = OpenOptions::new().read(true).write(true).open("/dev/tty")?;
        tty.write_all(message.as_bytes())?;
        tty.flush()?;

        let original = tcgetattr(&tty)?;
        let mut silent = original.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        silent.local_flags.insert(LocalFlags::ECHONL);
        tcsetattr(&tty, SetArg::TCSANOW, &silent)?;

        let _restore = scopeguard::guard((), |_| {
            let _ = tcsetattr(&tty, SetArg::TCSANOW, &original);
        });
        read_secret_line(&mut BufReader::new(&tty))
    }

    #[cfg(not(unix))]
    fn prompt(&mut self, message: &str) -> io::Result<Zeroizing<String>> {
        let mut stderr = io::stderr();
        stderr.write_all(message.as_bytes())?;
        stderr.flush()?;
        read_secret_line(&mut io::stdin().lock())
    }
}

/// Reads one line per prompt from any buffered reader (`--stdin`, tests).
pub struct ReaderPrompt<R> {
    reader: R,
}

impl<R: BufRead> ReaderPrompt<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> PasswordPrompt for ReaderPrompt<R> {
    fn prompt(&mut self, _message: &str) -> io::Result<Zeroizing<String>> {
        read_secret_line(&mut self.reader)
    }
}

fn read_secret_line(reader: &mut dyn BufRead) -> io::Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no key entered"));
    }
    let trimmed = line.trim_end_matches(&['\r', '\n'][..]).len();
    line.truncate(trimmed);
    Ok(line)
}
