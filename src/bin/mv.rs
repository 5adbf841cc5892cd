//! `mv [-v] <src> <dst>`: moves `src` to `dst`. Directory moves are not
//! supported across a mount boundary; callers are pointed at `cp -r` plus
//! `rm -r` instead of silently falling back to a slow copy-then-delete.

use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;

use remotefs::transfer::{self, Root};
use remotefs::{cli, MainResult};

#[derive(Debug, Parser)]
#[command(name = "mv", author, version, about)]
struct Args {
    /// Print the source and destination once the move completes.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    src: PathBuf,
    dst: PathBuf,
}

fn main() -> MainResult {
    cli::init_logger();
    MainResult::from(run())
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let src_abs = absolute(&args.src)?;
    let dst_abs = absolute(&args.dst)?;

    let src = transfer::classify(&src_abs).map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut dst = transfer::classify(&dst_abs).map_err(|e| anyhow::anyhow!("{e}"))?;

    if !src.is_remote() && !dst.is_remote() {
        let mut cmd = std::process::Command::new("mv");
        if args.verbose {
            cmd.arg("-v");
        }
        let status = cmd.arg(&args.src).arg(&args.dst).status()?;
        std::process::exit(status.code().unwrap_or(1));
    }

    if transfer::is_dir(&src.root, &src.path).map_err(|e| anyhow::anyhow!("{e}"))? {
        anyhow::bail!(
            "mv: cannot move directory '{}' across a mount boundary; use 'cp -r' followed by 'rm -r' instead",
            args.src.display()
        );
    }

    if transfer::exists(&dst.root, &dst.path) && transfer::is_dir(&dst.root, &dst.path)? {
        let basename = src_abs
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("source path has no file name"))?;
        dst.path.push(basename);
    }

    match (&src.root, &dst.root) {
        (Root::Remote(src_conn), Root::Remote(dst_conn)) => {
            let src_mount = transfer::mount_point_of(&src_abs).map_err(|e| anyhow::anyhow!("{e}"))?;
            let dst_mount = transfer::mount_point_of(&dst_abs).map_err(|e| anyhow::anyhow!("{e}"))?;
            if src_mount.is_none() || src_mount != dst_mount {
                anyhow::bail!(
                    "mv: '{}' and '{}' are on different mounts; cross-mount rename is not supported",
                    args.src.display(),
                    args.dst.display()
                );
            }
            // Same mount: a plain rename is both cheaper and more correct
            // than copy-then-unlink (rename is atomic on the server).
            remotefs::sftp_ops::rename(src_conn, &src.path, &dst.path)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        _ => {
            transfer::copy_single(&src.root, &src.path, &dst.root, &dst.path)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            transfer::remove_file(&src.root, &src.path).map_err(|e| anyhow::anyhow!("{e}"))?;
        }
    }

    if args.verbose {
        info!("{} -> {}", args.src.display(), args.dst.display());
        println!("{} -> {}", args.src.display(), args.dst.display());
    }

    Ok(())
}
