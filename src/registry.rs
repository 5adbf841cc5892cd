//! Mount Registry (component E): on-disk persistence of live mounts and
//! their full connection parameters, so that `cp`/`mv` running in a
//! separate process can rediscover a live mount and open a private session.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::constants::{CONFIG_DIR, CONNECTIONS_FILE_PATH, MOUNTS_FILE_PATH};
use crate::errno::RemoteFsError;
use crate::session::Credential;

/// `(absolute local mount point, remote base path)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub remote_base_path: String,
}

/// Superset of [`MountEntry`]: full connection parameters minus the runtime
/// slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionEntry {
    pub mount_point: PathBuf,
    pub host: String,
    pub user: String,
    pub port: u16,
    pub remote_base_path: String,
    pub key_path: Option<PathBuf>,
    pub password: Option<String>,
}

impl ConnectionEntry {
    pub fn credential(&self) -> Result<Credential, RemoteFsError> {
        if let Some(path) = &self.key_path {
            return Ok(Credential::PrivateKey {
                path: path.clone(),
                passphrase: self.password.clone(),
            });
        }
        if let Some(password) = &self.password {
            return Ok(Credential::Password(password.clone()));
        }
        Err(RemoteFsError::Configuration(format!(
            "no key path or password on record for {}",
            self.mount_point.display()
        )))
    }
}

fn ensure_config_dir() -> Result<(), RemoteFsError> {
    fs::create_dir_all(&*CONFIG_DIR).map_err(RemoteFsError::Io)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o700);
        let _ = fs::set_permissions(&*CONFIG_DIR, perms);
    }
    Ok(())
}

/// Rewrite `path` atomically: write the full new contents to a sibling temp
/// file, then rename into place. Per invariant 4.
fn atomic_write_lines(path: &Path, lines: &[String]) -> Result<(), RemoteFsError> {
    ensure_config_dir()?;
    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = File::create(&tmp_path).map_err(RemoteFsError::Io)?;
        for line in lines {
            writeln!(tmp, "{line}").map_err(RemoteFsError::Io)?;
        }
        tmp.sync_all().map_err(RemoteFsError::Io)?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(&tmp_path, perms);
    }
    fs::rename(&tmp_path, path).map_err(RemoteFsError::Io)
}

fn read_lines(path: &Path) -> Result<Vec<String>, RemoteFsError> {
    match File::open(path) {
        Ok(f) => BufReader::new(f)
            .lines()
            .collect::<std::io::Result<Vec<String>>>()
            .map_err(RemoteFsError::Io),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(RemoteFsError::Io(e)),
    }
}

/// Load every `mounts.conf` record: `<mount point>:<remote base path>`.
pub fn load_mounts() -> Result<Vec<MountEntry>, RemoteFsError> {
    let mut out = Vec::new();
    for line in read_lines(&MOUNTS_FILE_PATH)? {
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ':');
        let mount_point = parts.next().unwrap_or_default();
        let remote_base_path = parts.next().unwrap_or_default();
        out.push(MountEntry {
            mount_point: PathBuf::from(mount_point),
            remote_base_path: remote_base_path.to_string(),
        });
    }
    Ok(out)
}

/// Replace or append the record for `entry.mount_point`.
pub fn save_mount(entry: &MountEntry) -> Result<(), RemoteFsError> {
    let mut entries = load_mounts()?;
    entries.retain(|e| e.mount_point != entry.mount_point);
    entries.push(entry.clone());
    let lines = entries
        .iter()
        .map(|e| format!("{}:{}", e.mount_point.display(), e.remote_base_path))
        .collect::<Vec<_>>();
    atomic_write_lines(&MOUNTS_FILE_PATH, &lines)?;
    debug!("saved mount entry for {}", entry.mount_point.display());
    Ok(())
}

pub fn remove_mount(mount_point: &Path) -> Result<(), RemoteFsError> {
    let entries: Vec<_> = load_mounts()?
        .into_iter()
        .filter(|e| e.mount_point != mount_point)
        .collect();
    let lines = entries
        .iter()
        .map(|e| format!("{}:{}", e.mount_point.display(), e.remote_base_path))
        .collect::<Vec<_>>();
    atomic_write_lines(&MOUNTS_FILE_PATH, &lines)
}

/// Load every `connections.conf` record:
/// `<mount point>:<host>:<user>:<port>:<remote base path>:<key path>|<password>`.
/// The final two fields are joined by a pipe so a colon in a path does not
/// confuse the parser.
pub fn load_connections() -> Result<Vec<ConnectionEntry>, RemoteFsError> {
    let mut out = Vec::new();
    for line in read_lines(&CONNECTIONS_FILE_PATH)? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_connection_line(&line) {
            Some(entry) => out.push(entry),
            None => {
                return Err(RemoteFsError::Configuration(format!(
                    "unparseable connections.conf record: {line:?}"
                )))
            }
        }
    }
    Ok(out)
}

fn parse_connection_line(line: &str) -> Option<ConnectionEntry> {
    let mut fields = line.splitn(6, ':');
    let mount_point = fields.next()?;
    let host = fields.next()?;
    let user = fields.next()?;
    let port: u16 = fields.next()?.parse().ok()?;
    let remote_base_path = fields.next()?;
    let tail = fields.next().unwrap_or_default();

    let mut pipe = tail.splitn(2, '|');
    let key_path = pipe.next().unwrap_or_default();
    let password = pipe.next().unwrap_or_default();

    Some(ConnectionEntry {
        mount_point: PathBuf::from(mount_point),
        host: host.to_string(),
        user: user.to_string(),
        port,
        remote_base_path: remote_base_path.to_string(),
        key_path: if key_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(key_path))
        },
        password: if password.is_empty() {
            None
        } else {
            Some(password.to_string())
        },
    })
}

fn format_connection_line(entry: &ConnectionEntry) -> String {
    let key_path = entry
        .key_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let password = entry.password.clone().unwrap_or_default();
    format!(
        "{}:{}:{}:{}:{}:{}|{}",
        entry.mount_point.display(),
        entry.host,
        entry.user,
        entry.port,
        entry.remote_base_path,
        key_path,
        password
    )
}

pub fn save_connection(entry: &ConnectionEntry) -> Result<(), RemoteFsError> {
    let mut entries = load_connections()?;
    entries.retain(|e| e.mount_point != entry.mount_point);
    entries.push(entry.clone());
    let lines = entries.iter().map(format_connection_line).collect::<Vec<_>>();
    atomic_write_lines(&CONNECTIONS_FILE_PATH, &lines)?;
    // Best-effort: tighten permissions since this file may hold a password.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(&*CONNECTIONS_FILE_PATH, perms);
    }
    Ok(())
}

pub fn remove_connection(mount_point: &Path) -> Result<(), RemoteFsError> {
    let entries: Vec<_> = load_connections()?
        .into_iter()
        .filter(|e| e.mount_point != mount_point)
        .collect();
    let lines = entries.iter().map(format_connection_line).collect::<Vec<_>>();
    atomic_write_lines(&CONNECTIONS_FILE_PATH, &lines)
}

/// Classify an absolute, resolved path as belonging to a registered mount.
/// Per the testable path-containment invariant: true iff the path equals a
/// mount point or begins with `mount_point + "/"`.
pub fn find_containing_mount(entries: &[MountEntry], path: &Path) -> Option<MountEntry> {
    entries
        .iter()
        .filter(|e| path == e.mount_point || path.starts_with(&e.mount_point))
        .max_by_key(|e| e.mount_point.as_os_str().len())
        .cloned()
}

/// Rewrite `local_path` (an absolute path inside `mount.mount_point`) as the
/// corresponding remote path, by replacing the mount-point prefix with the
/// mount's remote base path.
pub fn local_path_to_remote(mount: &MountEntry, local_path: &Path) -> PathBuf {
    let suffix = local_path
        .strip_prefix(&mount.mount_point)
        .unwrap_or(Path::new(""));
    let mut remote = PathBuf::from(&mount.remote_base_path);
    remote.push(suffix);
    remote
}
