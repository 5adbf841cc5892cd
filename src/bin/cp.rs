//! `cp [-v] [-r] <src> <dst>`: copies `src` to `dst`, transparently routing
//! through the SFTP Operation Surface whenever either argument lies inside
//! a registered mount.

use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;

use remotefs::transfer;
use remotefs::{cli, MainResult};

#[derive(Debug, Parser)]
#[command(name = "cp", author, version, about)]
struct Args {
    /// Copy directories recursively.
    #[arg(short = 'r', long = "recursive")]
    recursive: bool,

    /// Print each file copied.
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
        // Neither side touches a mount: defer entirely to the system `cp`.
        let mut cmd = std::process::Command::new("cp");
        if args.recursive {
            cmd.arg("-r");
        }
        if args.verbose {
            cmd.arg("-v");
        }
        let status = cmd.arg(&args.src).arg(&args.dst).status()?;
        std::process::exit(status.code().unwrap_or(1));
    }

    // If the destination already exists as a directory, copy into it under
    // the source's basename, matching ordinary `cp` semantics.
    if transfer::exists(&dst.root, &dst.path) && transfer::is_dir(&dst.root, &dst.path)? {
        let basename = src_abs
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("source path has no file name"))?;
        dst.path.push(basename);
    }

    let src_is_dir = transfer::is_dir(&src.root, &src.path).map_err(|e| anyhow::anyhow!("{e}"))?;

    if src_is_dir {
        if !args.recursive {
            anyhow::bail!(
                "cp: omitting directory '{}' (use -r to copy recursively)",
                args.src.display()
            );
        }
        transfer::copy_recursive(&src.root, &src.path, &dst.root, &dst.path)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    } else {
        transfer::copy_single(&src.root, &src.path, &dst.root, &dst.path)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    if args.verbose {
        info!("{} -> {}", args.src.display(), args.dst.display());
        println!("{} -> {}", args.src.display(), args.dst.display());
    }

    Ok(())
}
