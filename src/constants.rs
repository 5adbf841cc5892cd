#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use once_cell::sync::Lazy;

/// Chunk budget for a single SFTP read or write call inside the retry loops
/// in `sftp_ops`.
pub const SFTP_CHUNK_SIZE: usize = 64 * 1024;

/// Sleep between retries when the remote reports `would-block` inside a
/// read/write loop.
pub const WOULD_BLOCK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Session inactivity timeout set on every `ssh2::Session` right after the
/// handshake completes.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Attribute cache timeout reported to the kernel bridge at `init`.
pub const ATTR_CACHE_TIMEOUT: Duration = Duration::from_secs(5);

/// Directory-entry cache timeout reported to the kernel bridge at `init`.
pub const ENTRY_CACHE_TIMEOUT: Duration = Duration::from_secs(5);

/// Negative-lookup cache timeout reported to the kernel bridge at `init`.
pub const NEGATIVE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Remote base path that activates the zero-size compatibility shim.
pub const PROC_SHIM_BASE_PATH: &str = "/proc";

/// Default remote port when none is configured.
pub const DEFAULT_PORT: u16 = 22;

/// Mode applied to a file created without an explicit mode.
pub const DEFAULT_CREATE_MODE: u32 = 0o644;

/// Root project directory used to calculate the registry and log paths.
static PROJECT_DIR: Lazy<ProjectDirs> = Lazy::new(|| {
    ProjectDirs::from("", "", "remotefs").expect("could not determine a valid home directory")
});

/// Directory holding `mounts.conf` and `connections.conf`; created 0700 on
/// first use.
pub static CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| PROJECT_DIR.config_dir().to_path_buf());

/// Path to the mount registry (`(mount point, remote base path)` records).
pub static MOUNTS_FILE_PATH: Lazy<PathBuf> = Lazy::new(|| CONFIG_DIR.join("mounts.conf"));

/// Path to the connection registry (full connection parameters).
pub static CONNECTIONS_FILE_PATH: Lazy<PathBuf> = Lazy::new(|| CONFIG_DIR.join("connections.conf"));

/// Path to the mount daemon's log file, used when not logging to stderr.
pub static LOG_FILE_PATH: Lazy<PathBuf> = Lazy::new(|| PROJECT_DIR.cache_dir().join("mount.log"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sftp_chunk_size_is_64k() {
        assert_eq!(SFTP_CHUNK_SIZE, 64 * 1024);
    }

    #[test]
    fn mounts_file_path_ends_with_mounts_conf() {
        assert!(MOUNTS_FILE_PATH.ends_with("mounts.conf"));
    }

    #[test]
    fn connections_file_path_ends_with_connections_conf() {
        assert!(CONNECTIONS_FILE_PATH.ends_with("connections.conf"));
    }

    #[test]
    fn config_dir_is_named_remotefs() {
        let name = CONFIG_DIR.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, "remotefs");
    }
}
