//! Attribute half of the Attribute & Error Mapper: remote `ssh2::FileStat`
//! (each field independently present/absent) to a POSIX-shaped attribute
//! record the Filesystem Callback Layer hands to `fuser`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{FileAttr, FileType};
use ssh2::FileStat;

use crate::constants::PROC_SHIM_BASE_PATH;

const BLOCK_SIZE: u32 = 4096;
const ROOT_DIR_PERM: u16 = 0o555;
const DEFAULT_FILE_PERM: u16 = 0o444;

/// Everything the mapper needs besides the raw remote stat: whether the
/// path being mapped is the mount root, the mount's configured remote base
/// path (for the `/proc` size shim), and the mounting user's own uid/gid to
/// fall back on when the remote omits ownership.
pub struct MapContext<'a> {
    pub is_root: bool,
    pub remote_base_path: &'a str,
    pub mounting_uid: u32,
    pub mounting_gid: u32,
}

/// Build a `fuser::FileAttr` from a remote `FileStat`, applying the POSIX
/// defaults and the `/proc` zero-size compatibility shim documented in the
/// attribute mapper design.
pub fn map_attr(ino: u64, stat: &FileStat, ctx: &MapContext<'_>) -> FileAttr {
    let is_dir = stat.is_dir() || (ctx.is_root && stat.perm.is_none());

    let kind = if is_dir {
        FileType::Directory
    } else {
        FileType::RegularFile
    };

    let perm: u16 = match stat.perm {
        Some(p) => (p & 0o7777) as u16,
        None if ctx.is_root => ROOT_DIR_PERM,
        None => DEFAULT_FILE_PERM,
    };

    let nlink: u32 = if kind == FileType::Directory { 2 } else { 1 };

    let uid = stat.uid.unwrap_or(ctx.mounting_uid);
    let gid = stat.gid.unwrap_or(ctx.mounting_gid);

    let mut size = stat.size.unwrap_or(0);
    if size == 0 && kind == FileType::RegularFile && ctx.remote_base_path == PROC_SHIM_BASE_PATH {
        size = BLOCK_SIZE as u64;
    }

    let blocks = size.div_ceil(BLOCK_SIZE as u64);

    let (atime, mtime, ctime) = match (stat.atime, stat.mtime) {
        (Some(a), Some(m)) => {
            let at = epoch_to_systemtime(a);
            let mt = epoch_to_systemtime(m);
            (at, mt, mt)
        }
        _ => {
            let now = SystemTime::now();
            (now, now, now)
        }
    };

    FileAttr {
        ino,
        size,
        blocks,
        atime,
        mtime,
        ctime,
        crtime: ctime,
        kind,
        perm,
        nlink,
        uid,
        gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn epoch_to_systemtime(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_stat() -> FileStat {
        FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: None,
            atime: None,
            mtime: None,
        }
    }

    fn ctx<'a>(is_root: bool, remote_base_path: &'a str) -> MapContext<'a> {
        MapContext {
            is_root,
            remote_base_path,
            mounting_uid: 1000,
            mounting_gid: 1000,
        }
    }

    #[test]
    fn root_with_no_attrs_synthesizes_directory() {
        let attr = map_attr(1, &bare_stat(), &ctx(true, "/home/alice"));
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o555);
        assert_eq!(attr.nlink, 2);
    }

    #[test]
    fn non_root_with_no_attrs_synthesizes_regular_file() {
        let attr = map_attr(2, &bare_stat(), &ctx(false, "/home/alice"));
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o444);
        assert_eq!(attr.nlink, 1);
    }

    #[test]
    fn proc_shim_upgrades_zero_size_regular_file_to_4096() {
        let mut stat = bare_stat();
        stat.size = Some(0);
        stat.perm = Some(0o100644);
        let attr = map_attr(3, &stat, &ctx(false, "/proc"));
        assert_eq!(attr.size, 4096);
    }

    #[test]
    fn etc_zero_byte_file_keeps_zero_size() {
        let mut stat = bare_stat();
        stat.size = Some(0);
        stat.perm = Some(0o100644);
        let attr = map_attr(4, &stat, &ctx(false, "/etc"));
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn proc_shim_does_not_apply_to_directories() {
        let mut stat = bare_stat();
        stat.size = Some(0);
        stat.perm = Some(0o040755);
        let attr = map_attr(5, &stat, &ctx(false, "/proc"));
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn present_owner_is_carried_through() {
        let mut stat = bare_stat();
        stat.uid = Some(42);
        stat.gid = Some(7);
        let attr = map_attr(6, &stat, &ctx(false, "/etc"));
        assert_eq!(attr.uid, 42);
        assert_eq!(attr.gid, 7);
    }

    #[test]
    fn absent_owner_falls_back_to_mounting_user() {
        let attr = map_attr(7, &bare_stat(), &ctx(false, "/etc"));
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.gid, 1000);
    }

    #[test]
    fn block_count_rounds_up() {
        let mut stat = bare_stat();
        stat.size = Some(4097);
        stat.perm = Some(0o100644);
        let attr = map_attr(8, &stat, &ctx(false, "/etc"));
        assert_eq!(attr.blocks, 2);
    }
}
