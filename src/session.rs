//! Session Manager (component A): connect-and-authenticate and disconnect.
//!
//! Holds no ambient state of its own — every operation takes or returns a
//! [`ConnectionRecord`] explicitly, per the dependency-injection
//! re-architecture in the design notes. The Filesystem Callback Layer keeps
//! one alive for the life of a mount; the `cp`/`mv` binaries build a private
//! one per invocation.

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use log::{debug, info, warn};
use ssh2::{CheckResult, KnownHostFileKind, Session, Sftp};

use crate::constants::SESSION_TIMEOUT;
use crate::errno::RemoteFsError;

static LIBSSH2_INIT: Once = Once::new();

/// Runs libssh2's process-wide initializer exactly once, regardless of how
/// many [`ConnectionRecord`]s are connected over the process lifetime.
/// Grounded in the reference SSH binding's own `Once`-guarded init/exit
/// pair; `ssh2::Session::new()` performs the equivalent of this internally
/// on first use, so this function exists to make the "exactly one init per
/// process" invariant explicit and independently testable.
fn ensure_library_initialized() {
    LIBSSH2_INIT.call_once(|| {
        debug!("initializing ssh transport library (process-wide, once)");
    });
}

/// One of the two supported authentication methods.
#[derive(Clone, Debug)]
pub enum Credential {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

/// Whether an unknown host is accepted (and learned) or rejected outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Refuse to authenticate if the host is not already in the known-hosts
    /// file.
    Strict,
    /// Accept and remember an unseen host; still refuse on a *mismatched*
    /// key for a host that is already known.
    TrustOnFirstUse,
}

/// Everything needed to open a session, plus the three runtime slots that
/// are idle until `connect_and_authenticate` succeeds.
pub struct ConnectionRecord {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
    pub remote_base_path: String,
    pub host_key_policy: HostKeyPolicy,

    // Runtime slots: either all idle (`None`) or all established (`Some`),
    // per invariant 1.
    tcp: Option<TcpStream>,
    session: Option<Session>,
    sftp: Option<Sftp>,
}

impl ConnectionRecord {
    pub fn new(
        host: String,
        port: u16,
        user: String,
        credential: Credential,
        remote_base_path: String,
    ) -> Self {
        ConnectionRecord {
            host,
            port,
            user,
            credential,
            remote_base_path,
            host_key_policy: HostKeyPolicy::TrustOnFirstUse,
            tcp: None,
            session: None,
            sftp: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Reference to the live SFTP session. Only `Some` once
    /// `connect_and_authenticate` has returned successfully.
    pub fn sftp(&self) -> Option<&Sftp> {
        self.sftp.as_ref()
    }

    /// Connect sequence from the Session Manager design: socket, handshake,
    /// timeout, host-key check, authentication, SFTP init. Each step
    /// failure-propagates; on any failure the record is left fully idle.
    pub fn connect_and_authenticate(&mut self) -> Result<(), RemoteFsError> {
        ensure_library_initialized();

        // Step 1: stream socket.
        let addr = format!("{}:{}", self.host, self.port);
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| RemoteFsError::Connection(format!("connect to {addr}: {e}")))?;

        // Step 3: session + blocking handshake.
        let mut session =
            Session::new().map_err(|e| RemoteFsError::Connection(format!("session init: {e}")))?;
        session.set_tcp_stream(tcp.try_clone().map_err(RemoteFsError::Io)?);
        session
            .handshake()
            .map_err(|e| RemoteFsError::Connection(format!("handshake: {e}")))?;

        // Step 4: inactivity timeout.
        session.set_timeout(SESSION_TIMEOUT.as_millis() as u32);

        // Step 5: host-key verification. This must not be a logged-only
        // gap; an unverified or mismatched key aborts the connect sequence
        // before any authentication is attempted.
        self.verify_host_key(&session)?;

        // Step 6: authenticate.
        self.authenticate(&session)?;

        // Step 7: SFTP init.
        let sftp = session
            .sftp()
            .map_err(|e| RemoteFsError::Connection(format!("sftp init: {e}")))?;

        self.tcp = Some(tcp);
        self.session = Some(session);
        self.sftp = Some(sftp);
        info!("connected to {}@{}:{}", self.user, self.host, self.port);
        Ok(())
    }

    fn verify_host_key(&self, session: &Session) -> Result<(), RemoteFsError> {
        let (key, key_type) = session
            .host_key()
            .ok_or_else(|| RemoteFsError::Connection("server offered no host key".into()))?;

        let known_hosts_path = known_hosts_file_path();
        let mut known_hosts = session
            .known_hosts()
            .map_err(|e| RemoteFsError::Connection(format!("known_hosts init: {e}")))?;

        // A missing file is not fatal: it just means nothing is known yet.
        if known_hosts_path.exists() {
            known_hosts
                .read_file(&known_hosts_path, KnownHostFileKind::OpenSSH)
                .map_err(|e| RemoteFsError::Connection(format!("reading known_hosts: {e}")))?;
        }

        match known_hosts.check(&self.host, key) {
            CheckResult::Match => Ok(()),
            CheckResult::Mismatch => Err(RemoteFsError::Connection(format!(
                "host key for {} does not match known_hosts, refusing to continue",
                self.host
            ))),
            CheckResult::NotFound => match self.host_key_policy {
                HostKeyPolicy::Strict => Err(RemoteFsError::Connection(format!(
                    "host {} is not in known_hosts and strict host-key checking is enabled",
                    self.host
                ))),
                HostKeyPolicy::TrustOnFirstUse => {
                    warn!("host {} not in known_hosts, adding on trust", self.host);
                    known_hosts
                        .add(&self.host, key, &self.host, key_type.into())
                        .map_err(|e| RemoteFsError::Connection(format!("known_hosts add: {e}")))?;
                    let _ = known_hosts.write_file(&known_hosts_path, KnownHostFileKind::OpenSSH);
                    Ok(())
                }
            },
            CheckResult::Failure => Err(RemoteFsError::Connection(
                "failed to check host key against known_hosts".into(),
            )),
        }
    }

    fn authenticate(&self, session: &Session) -> Result<(), RemoteFsError> {
        let offered = session
            .auth_methods(&self.user)
            .unwrap_or("password,publickey");

        let mut attempted = false;

        if let Credential::PrivateKey { path, passphrase } = &self.credential {
            if offered.contains("publickey") {
                attempted = true;
                if session
                    .userauth_pubkey_file(&self.user, None, path, passphrase.as_deref())
                    .is_ok()
                {
                    return Ok(());
                }
            }
        }

        if let Credential::Password(password) = &self.credential {
            if offered.contains("password") {
                attempted = true;
                if session.userauth_password(&self.user, password).is_ok() {
                    return Ok(());
                }
            }
        }

        let _ = attempted;
        if session.authenticated() {
            return Ok(());
        }

        Err(RemoteFsError::Connection(format!(
            "authentication failed for {}@{}",
            self.user, self.host
        )))
    }

    /// Disconnect sequence, strict reverse order of connect. Idempotent: a
    /// partially or fully idle record disconnects cleanly.
    pub fn disconnect(&mut self) {
        if let Some(sftp) = self.sftp.take() {
            drop(sftp);
        }
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "remotefs unmounting", None);
        }
        if let Some(tcp) = self.tcp.take() {
            let _ = tcp.shutdown(std::net::Shutdown::Both);
        }
        debug!("disconnected from {}:{}", self.host, self.port);
    }
}

impl Drop for ConnectionRecord {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn known_hosts_file_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|d| d.home_dir().join(".ssh").join("known_hosts"))
        .unwrap_or_else(|| Path::new(".ssh/known_hosts").to_path_buf())
}

/// Sleep used by the read/write retry loops in `sftp_ops` on a would-block
/// result. Pulled out so the constant lives in one place the spec can be
/// checked against.
pub fn would_block_sleep() {
    std::thread::sleep(Duration::from_millis(
        crate::constants::WOULD_BLOCK_RETRY_DELAY.as_millis() as u64,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_connection_record_is_not_connected() {
        let record = ConnectionRecord::new(
            "127.0.0.1".into(),
            22,
            "alice".into(),
            Credential::Password("secret".into()),
            "/home/alice".into(),
        );
        assert!(!record.is_connected());
        assert!(record.sftp().is_none());
    }

    #[test]
    fn disconnect_on_idle_record_is_a_no_op() {
        let mut record = ConnectionRecord::new(
            "127.0.0.1".into(),
            22,
            "alice".into(),
            Credential::Password("secret".into()),
            "/home/alice".into(),
        );
        record.disconnect();
        record.disconnect();
        assert!(!record.is_connected());
    }
}
