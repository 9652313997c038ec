//! envfs - filesystem operations through an envfs backend.
//!
//! Every subcommand goes through the same `FileSystemApi` a library caller
//! would use. `--remote` puts an in-process agent and the wire protocol
//! between the command and the disk, which makes the binary a handy smoke
//! test for the remote backend.
//!
//! ```text
//! envfs stat /etc/hosts
//! envfs --json ls -l ./src
//! envfs --remote hash ./target
//! envfs diff ./a ./b
//! envfs watch -r ./src --type created,deleted --count 10
//! ```

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use envfs_core::types::{ChangeType, ReplaceExistingDuringMove, SymlinkPolicy};
use envfs_core::{AnyFileSystem, Config, LocalFileSystem};

use commands::Output;

#[derive(Parser, Debug)]
#[command(name = "envfs", version, about = "Filesystem operations through an envfs backend")]
struct Args {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Serve the local filesystem through an in-process agent and talk to it
    /// over the wire protocol
    #[arg(long, global = true)]
    remote: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show metadata for a path
    Stat {
        path: String,
        /// do-not-resolve, just-resolve or resolve-and-follow
        #[arg(long, default_value = "do-not-resolve")]
        policy: SymlinkPolicy,
    },

    /// List a directory
    Ls {
        path: String,
        /// Include type, permissions and size
        #[arg(short, long)]
        long: bool,
        #[arg(long, default_value = "do-not-resolve")]
        policy: SymlinkPolicy,
    },

    /// Print the content hash of every file under a path
    Hash { path: String },

    /// Compare the hashed trees under two paths
    Diff { left: String, right: String },

    /// Print change events under one or more roots
    Watch {
        #[arg(required = true)]
        paths: Vec<String>,
        /// Include subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// Only report these kinds (created, deleted, changed)
        #[arg(long = "type", value_delimiter = ',')]
        types: Vec<ChangeType>,
        /// Exit after this many events
        #[arg(long)]
        count: Option<usize>,
    },

    /// Show total and available space of the volume holding a path
    Disk { path: String },

    /// Write a file's content to stdout
    Cat {
        path: String,
        /// Bytes to read at most
        #[arg(long, default_value_t = 16 * 1024 * 1024)]
        limit: u64,
    },

    /// Copy a file or tree
    Cp {
        source: String,
        target: String,
        #[arg(short, long)]
        recursive: bool,
        /// Replace an existing target
        #[arg(short, long)]
        force: bool,
        /// Keep permissions and timestamps
        #[arg(short, long)]
        preserve: bool,
        /// Copy what symlinks point at instead of the links
        #[arg(short = 'L', long)]
        follow: bool,
    },

    /// Move or rename an entry
    Mv {
        source: String,
        target: String,
        #[arg(long, value_enum, default_value_t = Replace::Never)]
        replace: Replace,
        #[arg(short = 'L', long)]
        follow: bool,
    },

    /// Delete an entry
    Rm {
        path: String,
        /// Remove directory content too
        #[arg(short, long)]
        recursive: bool,
    },

    /// Create a uniquely named temporary file or directory
    Mktemp {
        #[arg(short, long)]
        directory: bool,
        #[arg(long, default_value = "tmp")]
        prefix: String,
        #[arg(long, default_value = "")]
        suffix: String,
        /// Create inside this directory instead of the system temp dir
        #[arg(long)]
        parent: Option<String>,
    },

    /// Create a directory (POSIX environments)
    Mkdir {
        path: String,
        /// Octal mode, e.g. 750
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<u32>,
    },

    /// Create a symbolic link (POSIX environments)
    Ln { target: String, link: String },
}

/// Replacement rule for `mv`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Replace {
    /// Replace files and directories
    All,
    /// Replace files, refuse directories
    Files,
    Never,
}

impl From<Replace> for ReplaceExistingDuringMove {
    fn from(replace: Replace) -> Self {
        match replace {
            Replace::All => ReplaceExistingDuringMove::ReplaceEverything,
            Replace::Files => ReplaceExistingDuringMove::DoNotReplaceDirectories,
            Replace::Never => ReplaceExistingDuringMove::DoNotReplace,
        }
    }
}

fn parse_mode(raw: &str) -> Result<u32, String> {
    let mode = u32::from_str_radix(raw, 8).map_err(|e| format!("not an octal mode: {e}"))?;
    if mode > 0o7777 {
        return Err(format!("mode {raw} has bits outside 7777"));
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_deref())
        .with_context(|| format!("loading config {:?}", args.config))?;

    let fs = backend(config, args.remote).await?;
    tracing::debug!(backend = ?fs, "backend ready");

    let out = Output::new(args.json);
    match &fs {
        AnyFileSystem::Posix(posix) => match &args.command {
            Command::Mkdir { .. } | Command::Ln { .. } => {
                commands::run_posix(posix.as_ref(), &args.command, &out).await
            }
            command => commands::run(posix.as_ref(), command, &out).await,
        },
        AnyFileSystem::Windows(windows) => match &args.command {
            Command::Mkdir { .. } | Command::Ln { .. } => {
                anyhow::bail!("mkdir and ln need a POSIX environment")
            }
            command => commands::run(windows.as_ref(), command, &out).await,
        },
    }
}

/// Local backend, optionally wrapped in a loopback agent.
async fn backend(config: Config, remote: bool) -> Result<AnyFileSystem> {
    #[cfg(unix)]
    {
        use envfs_core::FileSystemApi;

        let local: Arc<dyn envfs_core::PosixFileSystemApi> =
            Arc::new(LocalFileSystem::with_config(config.clone()));
        if !remote {
            return Ok(AnyFileSystem::Posix(local));
        }
        let client = envfs_core::loopback(local, &config)
            .await
            .context("starting loopback agent")?;
        tracing::info!(descriptor = %client.descriptor(), "talking to loopback agent");
        Ok(AnyFileSystem::Posix(Arc::new(client)))
    }

    #[cfg(windows)]
    {
        if remote {
            anyhow::bail!("--remote needs a POSIX host");
        }
        Ok(AnyFileSystem::Windows(Arc::new(LocalFileSystem::with_config(config))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["envfs", "stat", "/tmp", "--json", "--remote"]).unwrap();
        assert!(args.json);
        assert!(args.remote);
        match args.command {
            Command::Stat { path, policy } => {
                assert_eq!(path, "/tmp");
                assert_eq!(policy, SymlinkPolicy::DoNotResolve);
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_watch_types_are_comma_separated() {
        let args = Args::try_parse_from([
            "envfs", "watch", "-r", "/srv", "--type", "created,Deleted", "--count", "3",
        ])
        .unwrap();
        match args.command {
            Command::Watch { paths, recursive, types, count } => {
                assert_eq!(paths, vec!["/srv".to_string()]);
                assert!(recursive);
                assert_eq!(types, vec![ChangeType::Created, ChangeType::Deleted]);
                assert_eq!(count, Some(3));
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_policy_parses_kebab_case() {
        let args =
            Args::try_parse_from(["envfs", "ls", "-l", "/srv", "--policy", "resolve-and-follow"])
                .unwrap();
        assert!(matches!(
            args.command,
            Command::Ls { long: true, policy: SymlinkPolicy::ResolveAndFollow, .. }
        ));
    }

    #[test]
    fn test_mode_must_be_octal() {
        assert_eq!(parse_mode("750"), Ok(0o750));
        assert_eq!(parse_mode("4755"), Ok(0o4755));
        assert!(parse_mode("9").is_err());
        assert!(parse_mode("17777").is_err());
    }

    #[test]
    fn test_replace_maps_to_move_rule() {
        assert_eq!(
            ReplaceExistingDuringMove::from(Replace::Files),
            ReplaceExistingDuringMove::DoNotReplaceDirectories
        );
        assert_eq!(
            ReplaceExistingDuringMove::from(Replace::Never),
            ReplaceExistingDuringMove::default()
        );
    }
}
