//! Command-line surface shared by the mount daemon and the `cp`/`mv`
//! binaries: argument parsing with `clap` and the logger bring-up pattern,
//! both adapted from the distant CLI's `Cli::initialize`/`init_logger` split
//! to this crate's single-binary-per-concern layout.

use std::path::PathBuf;

use clap::Parser;

use crate::errno::RemoteFsError;
use crate::session::{Credential, HostKeyPolicy};

/// `remotefs-mount [fuse options] <mountpoint> -o key=value ...`
///
/// Mirrors the original program's argument shape: a mount point plus a
/// series of `-o key=value` pairs carrying everything the Session Manager
/// needs, rather than a flag per connection parameter.
#[derive(Debug, Parser)]
#[command(name = "remotefs-mount", author, version, about)]
pub struct MountArgs {
    /// Local directory the remote filesystem is attached to.
    pub mountpoint: PathBuf,

    /// Mount option in `key=value` form (or a bare flag). May be repeated or
    /// comma-separated, matching `mount(8)`'s `-o` convention.
    #[arg(short = 'o', value_delimiter = ',')]
    pub options: Vec<String>,

    /// Run in the foreground instead of daemonizing.
    #[arg(short = 'f', long)]
    pub foreground: bool,
}

/// Parsed, validated form of [`MountArgs::options`].
#[derive(Debug, Clone)]
pub struct MountOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
    pub remote_base_path: String,
    pub readonly: bool,
    pub allow_other: bool,
    pub host_key_policy: HostKeyPolicy,
}

/// Parse the raw `-o key=value` pairs into a [`MountOptions`], per §6's
/// required/optional option table. `host` and `user` are mandatory; exactly
/// one of `pass`/`key` must be given.
pub fn parse_mount_options(raw: &[String]) -> Result<MountOptions, RemoteFsError> {
    let mut host = None;
    let mut port = crate::constants::DEFAULT_PORT;
    let mut user = None;
    let mut password = None;
    let mut key_path = None;
    let mut remote_base_path = String::from("/");
    let mut readonly = false;
    let mut allow_other = false;
    let mut strict_host_keys = false;

    for opt in raw {
        match opt.split_once('=') {
            Some(("host", v)) => host = Some(v.to_string()),
            Some(("port", v)) => {
                port = v
                    .parse()
                    .map_err(|_| RemoteFsError::Configuration(format!("invalid port: {v}")))?
            }
            Some(("user", v)) => user = Some(v.to_string()),
            Some(("pass", v)) => password = Some(v.to_string()),
            Some(("key", v)) => key_path = Some(PathBuf::from(v)),
            Some(("remotepath", v)) => remote_base_path = v.to_string(),
            Some((other, _)) => {
                return Err(RemoteFsError::Configuration(format!(
                    "unrecognized mount option: {other}"
                )))
            }
            None => match opt.as_str() {
                "readonly" | "ro" => readonly = true,
                "allow_other" => allow_other = true,
                "strict_host_keys" => strict_host_keys = true,
                "" => {}
                other => {
                    return Err(RemoteFsError::Configuration(format!(
                        "unrecognized mount option: {other}"
                    )))
                }
            },
        }
    }

    let host = host.ok_or_else(|| RemoteFsError::Configuration("missing -o host=".into()))?;
    let user = user.ok_or_else(|| RemoteFsError::Configuration("missing -o user=".into()))?;

    let credential = match (key_path, password) {
        (Some(path), passphrase) => Credential::PrivateKey { path, passphrase },
        (None, Some(password)) => Credential::Password(password),
        (None, None) => {
            return Err(RemoteFsError::Configuration(
                "one of -o key= or -o pass= is required".into(),
            ))
        }
    };

    Ok(MountOptions {
        host,
        port,
        user,
        credential,
        remote_base_path,
        readonly,
        allow_other,
        host_key_policy: if strict_host_keys {
            HostKeyPolicy::Strict
        } else {
            HostKeyPolicy::TrustOnFirstUse
        },
    })
}

/// Bring up `env_logger` with a default filter that shows our own crate's
/// `info` level (and above) without drowning the mount daemon's own
/// activity in dependency chatter, the way the distant CLI scopes its own
/// logger to a short allow-list of modules.
pub fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[&str]) -> Vec<String> {
        pairs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn minimal_password_mount_parses() {
        let parsed =
            parse_mount_options(&opts(&["host=example.com", "user=alice", "pass=hunter2"]))
                .unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, crate::constants::DEFAULT_PORT);
        assert!(matches!(parsed.credential, Credential::Password(_)));
    }

    #[test]
    fn missing_host_is_an_error() {
        let err = parse_mount_options(&opts(&["user=alice", "pass=hunter2"])).unwrap_err();
        assert!(matches!(err, RemoteFsError::Configuration(_)));
    }

    #[test]
    fn missing_credential_is_an_error() {
        let err = parse_mount_options(&opts(&["host=example.com", "user=alice"])).unwrap_err();
        assert!(matches!(err, RemoteFsError::Configuration(_)));
    }

    #[test]
    fn key_and_pass_together_prefers_key() {
        let parsed = parse_mount_options(&opts(&[
            "host=example.com",
            "user=alice",
            "pass=hunter2",
            "key=/home/alice/.ssh/id_ed25519",
        ]))
        .unwrap();
        assert!(matches!(parsed.credential, Credential::PrivateKey { .. }));
    }

    #[test]
    fn readonly_and_allow_other_flags_are_recognized() {
        let parsed = parse_mount_options(&opts(&[
            "host=h",
            "user=u",
            "pass=p",
            "readonly",
            "allow_other",
        ]))
        .unwrap();
        assert!(parsed.readonly);
        assert!(parsed.allow_other);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = parse_mount_options(&opts(&["host=h", "user=u", "pass=p", "bogus"])).unwrap_err();
        assert!(matches!(err, RemoteFsError::Configuration(_)));
    }

    #[test]
    fn custom_remote_base_path_is_honored() {
        let parsed = parse_mount_options(&opts(&[
            "host=h",
            "user=u",
            "pass=p",
            "remotepath=/srv/data",
        ]))
        .unwrap();
        assert_eq!(parsed.remote_base_path, "/srv/data");
    }
}
