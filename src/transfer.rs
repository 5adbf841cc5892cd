//! Shared path-classification and transfer logic for the `cp`/`mv`
//! binaries: classify each argument against the Mount Registry, then copy
//! or move through the SFTP Operation Surface whenever either side is
//! remote, falling back to the local filesystem (or the system utility)
//! when neither is.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::DEFAULT_CREATE_MODE;
use crate::errno::RemoteFsError;
use crate::registry::{self, ConnectionEntry};
use crate::session::ConnectionRecord;
use crate::sftp_ops::{self, PosixOpenFlags};

/// Which side of a transfer a path resolved to.
pub enum Root {
    Local,
    Remote(ConnectionRecord),
}

/// An argument after classification: which root it lives under, and its
/// path within that root (an ordinary absolute local path, or the
/// corresponding absolute remote path).
pub struct Location {
    pub root: Root,
    pub path: PathBuf,
}

impl Location {
    pub fn is_remote(&self) -> bool {
        matches!(self.root, Root::Remote(_))
    }
}

/// Resolve `abs_path` against the Mount Registry. A path inside a
/// registered mount opens a private session via its recorded connection
/// parameters; anything else is local.
pub fn classify(abs_path: &Path) -> Result<Location, RemoteFsError> {
    let mounts = registry::load_mounts()?;
    match registry::find_containing_mount(&mounts, abs_path) {
        None => Ok(Location {
            root: Root::Local,
            path: abs_path.to_path_buf(),
        }),
        Some(mount) => {
            let entry = find_connection_entry(&mount.mount_point)?;
            let remote_path = registry::local_path_to_remote(&mount, abs_path);
            let mut conn = ConnectionRecord::new(
                entry.host.clone(),
                entry.port,
                entry.user.clone(),
                entry.credential()?,
                entry.remote_base_path.clone(),
            );
            conn.connect_and_authenticate()?;
            Ok(Location {
                root: Root::Remote(conn),
                path: remote_path,
            })
        }
    }
}

/// The mount point `abs_path` resolves under, if any. Used by `mv` to
/// decide whether a remote→remote move can use a single SFTP rename (both
/// sides share a mount) or must be refused (cross-mount rename is
/// unsupported).
pub fn mount_point_of(abs_path: &Path) -> Result<Option<PathBuf>, RemoteFsError> {
    let mounts = registry::load_mounts()?;
    Ok(registry::find_containing_mount(&mounts, abs_path).map(|m| m.mount_point))
}

fn find_connection_entry(mount_point: &Path) -> Result<ConnectionEntry, RemoteFsError> {
    registry::load_connections()?
        .into_iter()
        .find(|e| e.mount_point == mount_point)
        .ok_or_else(|| {
            RemoteFsError::Configuration(format!(
                "no connection record for mount {}",
                mount_point.display()
            ))
        })
}

pub fn is_dir(root: &Root, path: &Path) -> Result<bool, RemoteFsError> {
    match root {
        Root::Local => Ok(fs::metadata(path).map_err(RemoteFsError::Io)?.is_dir()),
        Root::Remote(conn) => Ok(sftp_ops::stat(conn, path)?.is_dir()),
    }
}

pub fn exists(root: &Root, path: &Path) -> bool {
    match root {
        Root::Local => path.exists(),
        Root::Remote(conn) => sftp_ops::stat(conn, path).is_ok(),
    }
}

fn mode_of(root: &Root, path: &Path) -> u32 {
    match root {
        Root::Local => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::metadata(path)
                    .map(|m| m.permissions().mode())
                    .unwrap_or(DEFAULT_CREATE_MODE)
            }
            #[cfg(not(unix))]
            {
                DEFAULT_CREATE_MODE
            }
        }
        Root::Remote(conn) => sftp_ops::stat(conn, path)
            .ok()
            .and_then(|s| s.perm)
            .unwrap_or(DEFAULT_CREATE_MODE),
    }
}

/// Create `path` as a directory under `root` with `mode`, tolerating an
/// already-existing directory.
pub fn ensure_dir(root: &Root, path: &Path, mode: u32) -> Result<(), RemoteFsError> {
    match root {
        Root::Local => {
            fs::create_dir_all(path).map_err(RemoteFsError::Io)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777));
            }
            Ok(())
        }
        Root::Remote(conn) => match sftp_ops::mkdir(conn, path, (mode & 0o7777) as i32) {
            Ok(()) => Ok(()),
            Err(e) if e.to_errno() == crate::errno::PosixErrno::Exists => Ok(()),
            Err(e) => Err(e),
        },
    }
}

/// List the immediate children of a directory as `(name, is_dir)` pairs.
pub fn list_dir(root: &Root, path: &Path) -> Result<Vec<(OsString, bool)>, RemoteFsError> {
    match root {
        Root::Local => {
            let mut out = Vec::new();
            for entry in fs::read_dir(path).map_err(RemoteFsError::Io)? {
                let entry = entry.map_err(RemoteFsError::Io)?;
                let is_dir = entry.file_type().map_err(RemoteFsError::Io)?.is_dir();
                out.push((entry.file_name(), is_dir));
            }
            Ok(out)
        }
        Root::Remote(conn) => {
            let mut out = Vec::new();
            for (full_path, stat) in sftp_ops::readdir(conn, path)? {
                if let Some(name) = full_path.file_name() {
                    out.push((name.to_os_string(), stat.is_dir()));
                }
            }
            Ok(out)
        }
    }
}

/// Copy a single regular file between any combination of roots, carrying
/// the source's permission bits through to the destination where possible.
pub fn copy_single(
    src_root: &Root,
    src_path: &Path,
    dst_root: &Root,
    dst_path: &Path,
) -> Result<(), RemoteFsError> {
    match (src_root, dst_root) {
        (Root::Local, Root::Local) => {
            fs::copy(src_path, dst_path).map(|_| ()).map_err(RemoteFsError::Io)
        }
        (Root::Local, Root::Remote(dst_conn)) => {
            let data = fs::read(src_path).map_err(RemoteFsError::Io)?;
            let mode = mode_of(src_root, src_path) & 0o7777;
            let mut handle = sftp_ops::create(dst_conn, dst_path, mode as i32)?;
            sftp_ops::write_loop(&mut handle, 0, &data)?;
            sftp_ops::close(&mut handle)
        }
        (Root::Remote(src_conn), Root::Local) => {
            let stat = sftp_ops::stat(src_conn, src_path)?;
            let len = stat.size.unwrap_or(0) as usize;
            let mut handle = sftp_ops::open(
                src_conn,
                src_path,
                PosixOpenFlags {
                    read: true,
                    ..Default::default()
                },
                0,
            )?;
            let data = sftp_ops::read_loop(&mut handle, 0, len)?;
            sftp_ops::close(&mut handle)?;
            fs::write(dst_path, &data).map_err(RemoteFsError::Io)?;
            #[cfg(unix)]
            if let Some(perm) = stat.perm {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(dst_path, fs::Permissions::from_mode(perm & 0o7777));
            }
            Ok(())
        }
        (Root::Remote(src_conn), Root::Remote(dst_conn)) => {
            sftp_ops::copy_file(src_conn, src_path, dst_conn, dst_path)
        }
    }
}

/// Recursively copy a directory tree between any combination of roots.
pub fn copy_recursive(
    src_root: &Root,
    src_path: &Path,
    dst_root: &Root,
    dst_path: &Path,
) -> Result<(), RemoteFsError> {
    let mode = mode_of(src_root, src_path);
    ensure_dir(dst_root, dst_path, mode)?;

    for (name, child_is_dir) in list_dir(src_root, src_path)? {
        let child_src = src_path.join(&name);
        let child_dst = dst_path.join(&name);
        if child_is_dir {
            copy_recursive(src_root, &child_src, dst_root, &child_dst)?;
        } else {
            copy_single(src_root, &child_src, dst_root, &child_dst)?;
        }
    }
    Ok(())
}

/// Remove a single file (not a directory) under `root`.
pub fn remove_file(root: &Root, path: &Path) -> Result<(), RemoteFsError> {
    match root {
        Root::Local => fs::remove_file(path).map_err(RemoteFsError::Io),
        Root::Remote(conn) => sftp_ops::unlink(conn, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_metadata_reports_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_dir(&Root::Local, dir.path()).unwrap());
    }

    #[test]
    fn local_list_dir_finds_children() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let entries = list_dir(&Root::Local, dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|(n, is_dir)| n == "a.txt" && !is_dir));
        assert!(entries.iter().any(|(n, is_dir)| n == "sub" && *is_dir));
    }

    #[test]
    fn local_to_local_copy_preserves_contents() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        fs::write(&src, b"payload").unwrap();
        copy_single(&Root::Local, &src, &Root::Local, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn local_recursive_copy_mirrors_tree() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        fs::create_dir(src_dir.path().join("nested")).unwrap();
        fs::write(src_dir.path().join("nested/file.txt"), b"x").unwrap();

        copy_recursive(&Root::Local, src_dir.path(), &Root::Local, dst_dir.path()).unwrap();

        assert!(dst_dir.path().join("nested").is_dir());
        assert_eq!(
            fs::read(dst_dir.path().join("nested/file.txt")).unwrap(),
            b"x"
        );
    }
}
