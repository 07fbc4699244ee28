// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! ephemfs FUSE host
//!
//! Mounts an in-memory filesystem whose files vanish once nobody has
//! written to them for a while.

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod adapter;
mod mount;
#[cfg_attr(not(all(feature = "fuse", target_os = "linux")), allow(dead_code))]
mod ops;

#[cfg(all(feature = "fuse", target_os = "linux"))]
use adapter::EphemFuse;
use anyhow::{Context, Result};
use clap::Parser;
use ephemfs_core::{FsConfig, FsContext, Reaper};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Environment variable naming a JSON configuration file.
const CONFIG_ENV: &str = "EPHEMFS_CONFIG";

#[derive(Parser, Debug)]
#[command(name = "ephemfs-fuse-host", about = "Mount an ephemeral in-memory filesystem")]
struct Args {
    /// Directory to mount the filesystem on
    #[arg(value_name = "MOUNT_POINT")]
    mount_point: PathBuf,
}

fn load_config(config_path: Option<PathBuf>) -> Result<FsConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            FsConfig::from_json_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(FsConfig::default()),
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()).map(PathBuf::from)
}

fn run(args: Args) -> Result<()> {
    info!(mount_point = %args.mount_point.display(), "starting ephemfs FUSE host");

    let config = load_config(config_path_from_env())?;
    info!(?config, "configuration loaded");

    let ctx = FsContext::in_memory(config).context("initializing filesystem")?;
    let reaper = Reaper::spawn(ctx.clone()).context("starting reaper")?;

    mount::try_unmount(&args.mount_point);

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    {
        let options = [
            fuser::MountOption::FSName("ephemfs".to_string()),
            fuser::MountOption::Subtype("ephemfs".to_string()),
        ];
        info!("mounting filesystem");
        let session = fuser::spawn_mount2(EphemFuse::new(ctx), &args.mount_point, &options)
            .with_context(|| format!("mounting {}", args.mount_point.display()))?;
        info!("ephemfs mounted; blocking until unmount");
        session.join();
        info!("ephemfs unmounted");
    }

    #[cfg(not(all(feature = "fuse", target_os = "linux")))]
    {
        tracing::warn!("FUSE support not compiled in; nothing to mount");
        info!(nodes = ctx.nodes().len(), "filesystem initialized");
    }

    reaper.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            // Help and version go to stdout, usage errors to stderr.
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    if let Err(err) = ephemfs_logging::init_from_env("ephemfs-fuse-host") {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "ephemfs FUSE host failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_defaults_without_a_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config, FsConfig::default());
        assert_eq!(config.reaper.threshold_ms, 10_000);
    }

    #[test]
    fn config_loads_partial_json() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(br#"{ "reaper": { "threshold_ms": 2500 }, "cache": { "attr_ttl_ms": 0 } }"#)
            .unwrap();
        temp_file.flush().unwrap();

        let config = load_config(Some(temp_file.path().to_path_buf())).unwrap();
        assert_eq!(config.reaper.threshold_ms, 2_500);
        assert_eq!(config.reaper.interval_ms, 1_000);
        assert_eq!(config.cache.attr_ttl_ms, 0);
        assert_eq!(config.cache.entry_ttl_ms, 1_000);
        assert_eq!(config.modes.file_mode, 0o664);
    }

    #[test]
    fn config_errors_name_the_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"not json").unwrap();
        temp_file.flush().unwrap();

        let err = load_config(Some(temp_file.path().to_path_buf())).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config"));
        assert!(load_config(Some(PathBuf::from("/nonexistent/ephemfs.json"))).is_err());
    }

    #[test]
    fn config_with_zero_interval_is_refused() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(br#"{ "reaper": { "interval_ms": 0 } }"#).unwrap();
        temp_file.flush().unwrap();

        let err = load_config(Some(temp_file.path().to_path_buf())).unwrap_err();
        assert!(format!("{err:#}").contains("reaper.interval_ms"), "{err:#}");
    }

    #[test]
    fn args_take_exactly_one_mount_point() {
        let args = Args::try_parse_from(["ephemfs-fuse-host", "/mnt/x"]).unwrap();
        assert_eq!(args.mount_point, PathBuf::from("/mnt/x"));

        assert!(Args::try_parse_from(["ephemfs-fuse-host"]).is_err());
        assert!(Args::try_parse_from(["ephemfs-fuse-host", "/a", "/b"]).is_err());
        let help = Args::try_parse_from(["ephemfs-fuse-host", "--help"]).unwrap_err();
        assert!(!help.use_stderr());
    }
}
