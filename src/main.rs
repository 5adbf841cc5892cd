//! Mount daemon entrypoint: parse `-o key=value` mount options, establish
//! and validate the SSH/SFTP session, register the mount, then hand control
//! to the kernel bridge until the filesystem is unmounted.
//!
//! ### Exit codes
//!
//! * 1 - configuration error (bad arguments, missing credential)
//! * 1 - connection or authentication failure
//! * 1 - mount(2)/FUSE setup failure

use clap::Parser;
use log::info;

use remotefs::registry::{self, ConnectionEntry, MountEntry};
use remotefs::session::ConnectionRecord;
use remotefs::{cli, MainResult, MountArgs, RemoteFs};

fn main() -> MainResult {
    cli::init_logger();
    MainResult::from(run())
}

fn run() -> anyhow::Result<()> {
    let args = MountArgs::parse();
    let options = remotefs::parse_mount_options(&args.options)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let mountpoint = args
        .mountpoint
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("mount point {}: {e}", args.mountpoint.display()))?;

    let mounting_uid = unsafe { libc::getuid() };
    let mounting_gid = unsafe { libc::getgid() };

    let mut conn = ConnectionRecord::new(
        options.host.clone(),
        options.port,
        options.user.clone(),
        options.credential.clone(),
        options.remote_base_path.clone(),
    );
    conn.host_key_policy = options.host_key_policy;

    // Validate the session up front so a bad host/credential fails fast
    // with a clear message, rather than surfacing as an opaque FUSE
    // mount-init error. `init()` reconnects once the kernel bridge takes
    // over, so we disconnect again immediately after.
    conn.connect_and_authenticate()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    conn.disconnect();

    let mount_entry = MountEntry {
        mount_point: mountpoint.clone(),
        remote_base_path: options.remote_base_path.clone(),
    };
    let connection_entry = ConnectionEntry {
        mount_point: mountpoint.clone(),
        host: options.host.clone(),
        user: options.user.clone(),
        port: options.port,
        remote_base_path: options.remote_base_path.clone(),
        key_path: match &options.credential {
            remotefs::Credential::PrivateKey { path, .. } => Some(path.clone()),
            remotefs::Credential::Password(_) => None,
        },
        password: match &options.credential {
            remotefs::Credential::Password(p) => Some(p.clone()),
            remotefs::Credential::PrivateKey { .. } => None,
        },
    };
    registry::save_mount(&mount_entry).map_err(|e| anyhow::anyhow!("{e}"))?;
    registry::save_connection(&connection_entry).map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut mount_options = vec![
        fuser::MountOption::FSName(format!("remotefs:{}@{}", options.user, options.host)),
        fuser::MountOption::Subtype("remotefs".into()),
        fuser::MountOption::DefaultPermissions,
    ];
    mount_options.push(if options.readonly {
        fuser::MountOption::RO
    } else {
        fuser::MountOption::RW
    });
    if options.allow_other {
        mount_options.push(fuser::MountOption::AllowOther);
    }

    let fs = RemoteFs::new(conn, mounting_uid, mounting_gid);

    info!(
        "mounting {}@{}:{} at {} (remote base {})",
        options.user,
        options.host,
        options.port,
        mountpoint.display(),
        options.remote_base_path
    );

    let result = fuser::mount2(fs, &mountpoint, &mount_options)
        .map_err(|e| anyhow::anyhow!("mount failed: {e}"));

    let _ = registry::remove_mount(&mountpoint);
    let _ = registry::remove_connection(&mountpoint);

    result?;
    info!("unmounted {}", mountpoint.display());
    Ok(())
}
