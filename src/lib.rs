//! Library crate backing the `remotefs-mount`, `cp`, and `mv` binaries: a
//! FUSE-mounted filesystem that translates POSIX calls into SFTP
//! operations over an SSH session.

use std::process::{ExitCode, Termination};

use console::{style, Term};
use derive_more::{Display, Error, From};

pub mod attrs;
pub mod cli;
pub mod constants;
pub mod errno;
pub mod fs;
pub mod registry;
pub mod session;
pub mod sftp_ops;
pub mod transfer;

pub use cli::{init_logger, parse_mount_options, MountArgs, MountOptions};
pub use fs::RemoteFs;
pub use session::{ConnectionRecord, Credential, HostKeyPolicy};

/// Wrapper around a [`CliResult`] that provides [`Termination`] support, so
/// each binary's `main` can simply `return MainResult::from(run())`.
pub struct MainResult {
    inner: CliResult,
}

impl MainResult {
    pub const OK: MainResult = MainResult { inner: Ok(()) };

    pub fn new(inner: CliResult) -> Self {
        Self { inner }
    }
}

impl From<CliResult> for MainResult {
    fn from(res: CliResult) -> Self {
        Self::new(res)
    }
}

impl From<anyhow::Error> for MainResult {
    fn from(x: anyhow::Error) -> Self {
        Self::new(Err(CliError::Error(x)))
    }
}

impl From<anyhow::Result<()>> for MainResult {
    fn from(res: anyhow::Result<()>) -> Self {
        Self::new(res.map_err(CliError::Error))
    }
}

pub type CliResult = Result<(), CliError>;

/// Represents an error associated with the CLI.
#[derive(Debug, Display, Error, From)]
pub enum CliError {
    /// CLI should return a specific error code.
    Exit(#[error(not(source))] u8),

    /// CLI encountered some unexpected error.
    Error(#[error(not(source))] anyhow::Error),
}

impl CliError {
    /// Generic failure, exit code 1.
    pub const FAILURE: CliError = CliError::Exit(1);
}

impl Termination for MainResult {
    fn report(self) -> ExitCode {
        match self.inner {
            Ok(_) => ExitCode::SUCCESS,
            Err(x) => match x {
                CliError::Exit(code) => ExitCode::from(code),
                CliError::Error(x) => {
                    format_error_for_shell(&x);
                    ::log::error!("{x:?}");
                    ::log::logger().flush();
                    ExitCode::FAILURE
                }
            },
        }
    }
}

/// Format an anyhow error for human-readable shell output: colored when
/// stderr is a TTY, plain otherwise, with the cause chain and a short list
/// of contextual suggestions appended.
fn format_error_for_shell(err: &anyhow::Error) {
    let term = Term::stderr();
    let interactive = term.is_term();

    let top_msg = format!("{err}");
    if interactive {
        let _ = term.write_line(&format!("{} {}", style("✗").red(), style(&top_msg).red()));
    } else {
        let _ = term.write_line(&format!("error: {top_msg}"));
    }

    let mut causes: Vec<String> = err.chain().skip(1).map(|e| format!("{e}")).collect();
    causes.dedup();

    for cause in &causes {
        if interactive {
            let _ = term.write_line(&format!(
                "  {} {}",
                style("caused by:").dim(),
                style(cause).dim()
            ));
        } else {
            let _ = term.write_line(&format!("  caused by: {cause}"));
        }
    }

    let full_msg = {
        let mut parts = vec![top_msg];
        parts.extend(causes);
        parts.join(" ")
    };
    let lower = full_msg.to_lowercase();

    let suggestions = suggestions_for_error(&lower);
    if !suggestions.is_empty() {
        let _ = term.write_line("");
        if interactive {
            let _ = term.write_line(&format!("  {}:", style("Try").bold()));
        } else {
            let _ = term.write_line("  Try:");
        }
        for (cmd, desc) in &suggestions {
            if interactive {
                let _ =
                    term.write_line(&format!("    {}  {}", style(cmd).cyan(), style(desc).dim()));
            } else {
                let _ = term.write_line(&format!("    {cmd}  {desc}"));
            }
        }
    }
}

/// Contextual suggestions based on error message patterns, scoped to the
/// failure modes this crate actually has: connecting, authenticating, and
/// mounting.
fn suggestions_for_error(msg: &str) -> Vec<(&'static str, &'static str)> {
    let mut suggestions = Vec::new();

    if msg.contains("connection refused") || msg.contains("connect to") {
        suggestions.push(("ssh -p <port> user@host", "Check the host is reachable over SSH"));
    }

    if msg.contains("authentication failed") {
        suggestions.push(("ssh-add -l", "Check loaded SSH keys"));
        suggestions.push(("-o key=~/.ssh/id_ed25519", "Point at a private key explicitly"));
    }

    if msg.contains("host key") {
        suggestions.push(("ssh-keygen -R <host>", "Remove a stale known_hosts entry"));
        suggestions.push(("-o strict_host_keys", "Require an already-trusted host key"));
    }

    if msg.contains("transport endpoint is not connected") || msg.contains("not connected") {
        suggestions.push(("fusermount -u <mountpoint>", "Unmount a stale mount before remounting"));
    }

    suggestions
}
