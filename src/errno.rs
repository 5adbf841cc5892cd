//! POSIX errno taxonomy and the translation from remote SFTP status codes.
//!
//! This is component C's error half (see `attrs` for the attribute half).
//! The enum is deliberately closed: every return from the Filesystem
//! Callback Layer is either success or one of these.

use std::fmt;

use ssh2::{Error as Ssh2Error, ErrorCode};

/// Mirrors of the `LIBSSH2_FX_*` / `LIBSSH2_ERROR_EAGAIN` constants from
/// libssh2's `sftp.h`. The `ssh2` crate does not re-export its internal
/// `libssh2-sys` bindings, so the handful of numeric status codes this
/// table needs are reproduced here rather than pulled in as a second
/// dependency on the sys crate.
mod fx {
    pub const OK: i32 = 0;
    pub const EOF: i32 = 1;
    pub const NO_SUCH_FILE: i32 = 2;
    pub const PERMISSION_DENIED: i32 = 3;
    pub const FAILURE: i32 = 4;
    pub const BAD_MESSAGE: i32 = 5;
    pub const NO_CONNECTION: i32 = 6;
    pub const CONNECTION_LOST: i32 = 7;
    pub const OP_UNSUPPORTED: i32 = 8;
    pub const INVALID_HANDLE: i32 = 9;
    pub const NO_SUCH_PATH: i32 = 10;
    pub const FILE_ALREADY_EXISTS: i32 = 11;
    pub const WRITE_PROTECT: i32 = 12;
    pub const NO_SPACE_ON_FILESYSTEM: i32 = 14;
    pub const QUOTA_EXCEEDED: i32 = 15;
    pub const LOCK_CONFLICT: i32 = 17;
    pub const DIR_NOT_EMPTY: i32 = 18;
    pub const NOT_A_DIRECTORY: i32 = 19;
    pub const INVALID_FILENAME: i32 = 20;
    pub const LINK_LOOP: i32 = 21;
}

const LIBSSH2_ERROR_EAGAIN: i32 = -37;

/// Fixed enumeration of failure kinds the Filesystem Callback Layer may
/// return to the kernel bridge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PosixErrno {
    NoSuchFile,
    PermissionDenied,
    NotADirectory,
    IsADirectory,
    Exists,
    ReadOnlyFilesystem,
    NoSpace,
    QuotaExceeded,
    DirectoryNotEmpty,
    InvalidArgument,
    IoError,
    NotConnected,
    BadFileDescriptor,
    NotSupported,
    NoMemory,
    WouldBlock,
    TooManySymlinks,
    Deadlock,
}

impl PosixErrno {
    /// The `libc::E*` constant the kernel bridge expects.
    pub fn to_errno(self) -> i32 {
        match self {
            PosixErrno::NoSuchFile => libc::ENOENT,
            PosixErrno::PermissionDenied => libc::EACCES,
            PosixErrno::NotADirectory => libc::ENOTDIR,
            PosixErrno::IsADirectory => libc::EISDIR,
            PosixErrno::Exists => libc::EEXIST,
            PosixErrno::ReadOnlyFilesystem => libc::EROFS,
            PosixErrno::NoSpace => libc::ENOSPC,
            PosixErrno::QuotaExceeded => libc::EDQUOT,
            PosixErrno::DirectoryNotEmpty => libc::ENOTEMPTY,
            PosixErrno::InvalidArgument => libc::EINVAL,
            PosixErrno::IoError => libc::EIO,
            PosixErrno::NotConnected => libc::ENOTCONN,
            PosixErrno::BadFileDescriptor => libc::EBADF,
            PosixErrno::NotSupported => libc::ENOTSUP,
            PosixErrno::NoMemory => libc::ENOMEM,
            PosixErrno::WouldBlock => libc::EAGAIN,
            PosixErrno::TooManySymlinks => libc::ELOOP,
            PosixErrno::Deadlock => libc::EDEADLK,
        }
    }
}

impl fmt::Display for PosixErrno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Translate an `ssh2::Error` produced by the SFTP Operation Surface into a
/// `PosixErrno`, following the table in the attribute & error mapper design.
/// Any remote status not named in the table defaults to `IoError`.
pub fn translate_ssh2_error(err: &Ssh2Error) -> PosixErrno {
    match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_EAGAIN) => PosixErrno::WouldBlock,
        ErrorCode::SFTP(code) => translate_sftp_status(code),
        ErrorCode::Session(_) => PosixErrno::IoError,
    }
}

/// Translate a raw `LIBSSH2_FX_*` status code. Exposed separately from
/// [`translate_ssh2_error`] so the Mount Registry and tests can exercise the
/// table without constructing a live `ssh2::Error`.
pub fn translate_sftp_status(code: i32) -> PosixErrno {
    match code {
        fx::OK => PosixErrno::IoError, // callers check for Ok before calling this
        fx::EOF => PosixErrno::IoError, // short-read semantics, not an error path
        fx::NO_SUCH_FILE | fx::NO_SUCH_PATH => PosixErrno::NoSuchFile,
        fx::PERMISSION_DENIED => PosixErrno::PermissionDenied,
        fx::OP_UNSUPPORTED => PosixErrno::NotSupported,
        fx::INVALID_HANDLE => PosixErrno::BadFileDescriptor,
        fx::FILE_ALREADY_EXISTS => PosixErrno::Exists,
        fx::WRITE_PROTECT => PosixErrno::ReadOnlyFilesystem,
        fx::NO_SPACE_ON_FILESYSTEM => PosixErrno::NoSpace,
        fx::QUOTA_EXCEEDED => PosixErrno::QuotaExceeded,
        fx::DIR_NOT_EMPTY => PosixErrno::DirectoryNotEmpty,
        fx::NOT_A_DIRECTORY => PosixErrno::NotADirectory,
        fx::INVALID_FILENAME => PosixErrno::InvalidArgument,
        fx::LOCK_CONFLICT => PosixErrno::Deadlock,
        fx::LINK_LOOP => PosixErrno::TooManySymlinks,
        fx::NO_CONNECTION | fx::CONNECTION_LOST | fx::BAD_MESSAGE | fx::FAILURE => {
            PosixErrno::IoError
        }
        _ => PosixErrno::IoError,
    }
}

/// Top-level library error, covering the five categories from the error
/// handling design: configuration, connection, per-operation remote,
/// resource, and programmer errors.
#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum RemoteFsError {
    #[display("configuration error: {_0}")]
    Configuration(#[error(not(source))] String),

    #[display("connection error: {_0}")]
    Connection(#[error(not(source))] String),

    #[display("remote operation failed: {_0}")]
    Remote(PosixErrno),

    #[display("i/o error: {_0}")]
    Io(std::io::Error),

    #[display("ssh error: {_0}")]
    Ssh(Ssh2Error),
}

impl RemoteFsError {
    /// Map this error to the POSIX errno the Filesystem Callback Layer
    /// should surface to the kernel bridge.
    pub fn to_errno(&self) -> PosixErrno {
        match self {
            RemoteFsError::Configuration(_) => PosixErrno::InvalidArgument,
            RemoteFsError::Connection(_) => PosixErrno::NotConnected,
            RemoteFsError::Remote(e) => *e,
            RemoteFsError::Io(_) => PosixErrno::IoError,
            RemoteFsError::Ssh(e) => translate_ssh2_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_such_file_variants_map_the_same() {
        assert_eq!(translate_sftp_status(fx::NO_SUCH_FILE), PosixErrno::NoSuchFile);
        assert_eq!(translate_sftp_status(fx::NO_SUCH_PATH), PosixErrno::NoSuchFile);
    }

    #[test]
    fn unlisted_code_defaults_to_io_error() {
        assert_eq!(translate_sftp_status(9999), PosixErrno::IoError);
    }

    #[test]
    fn lock_conflict_maps_to_deadlock_not_would_block() {
        assert_eq!(translate_sftp_status(fx::LOCK_CONFLICT), PosixErrno::Deadlock);
    }

    #[test]
    fn write_protect_maps_to_read_only_filesystem() {
        assert_eq!(
            translate_sftp_status(fx::WRITE_PROTECT),
            PosixErrno::ReadOnlyFilesystem
        );
    }

    #[test]
    fn errno_constants_match_libc() {
        assert_eq!(PosixErrno::NoSuchFile.to_errno(), libc::ENOENT);
        assert_eq!(PosixErrno::IsADirectory.to_errno(), libc::EISDIR);
        assert_eq!(PosixErrno::WouldBlock.to_errno(), libc::EAGAIN);
    }
}
