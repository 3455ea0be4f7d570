use crate::config::settings::LiberationConfig;
use crate::kernel::scanner::snapshot_handles;
use crate::kernel::{native_platform, Platform};
use crate::liberation::resolver::CandidateWalk;
use crate::liberation::Liberator;
use crate::utils::path_norm::NormalizedPath;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Release file handles that keep a file locked", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Close this process's own handles to a file
    CloseSelf {
        /// File to release
        path: PathBuf,
    },
    /// Force every other process holding a file to release it (may terminate them)
    ForceUnlock {
        /// File to release
        path: PathBuf,
    },
    /// Close own handles, then force-unlock the rest
    Liberate {
        /// File to release
        path: PathBuf,
        /// Check afterwards that the file can be opened exclusively
        #[arg(long)]
        verify: bool,
    },
    /// List this process's file-backed handles
    Handles {
        /// Only show handles equivalent to this path
        #[arg(long)]
        filter: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON
    Config,
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = LiberationConfig::from_env().context("invalid HANDLEFREE_* environment")?;

    if let Commands::Liberate { verify: true, .. } = cli.command {
        config.verify_exclusive_access = true;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if cli.command == Commands::Config {
        return print_json(&mut out, &config);
    }

    let platform = native_platform()?;
    execute(&Liberator::new(platform, config), cli.command, &mut out)
}

fn execute<P: Platform>(liberator: &Liberator<P>, command: Commands, out: &mut dyn Write) -> Result<()> {
    match command {
        Commands::CloseSelf { path } => {
            let report = liberator
                .close_self_file_handles(&path)
                .with_context(|| format!("close-self failed for {}", path.display()))?;
            print_json(out, &report)
        }
        Commands::ForceUnlock { path } => {
            let outcome = liberator
                .force_unlock_file(&path)
                .with_context(|| format!("force-unlock failed for {}", path.display()))?;
            print_json(out, &outcome)
        }
        Commands::Liberate { path, .. } => {
            let report = liberator
                .liberate(&path)
                .with_context(|| format!("liberate failed for {}", path.display()))?;
            if report.exclusive_access == Some(false) {
                log::warn!("{} is still held after liberation", path.display());
            }
            print_json(out, &report)
        }
        Commands::Handles { filter } => {
            let filter = filter.as_deref().map(NormalizedPath::resolve).transpose()?;
            let target = filter.as_ref().map_or_else(|| "*".to_string(), |f| f.to_string());
            let platform = liberator.platform();
            let snapshot = snapshot_handles(platform, liberator.config(), &target)?;

            let mut walk = CandidateWalk::new(platform, snapshot.iter());
            for candidate in walk.by_ref() {
                if filter.as_ref().is_some_and(|f| !candidate.path.is_equivalent(f)) {
                    continue;
                }
                writeln!(out, "{}", serde_json::to_string(&candidate)?)?;
            }
            log::info!(
                "{} records examined, {} own, {} unresolved",
                snapshot.len(),
                walk.own_handles,
                walk.unresolved
            );
            Ok(())
        }
        Commands::Config => print_json(out, liberator.config()),
    }
}

fn print_json<T: serde::Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}
