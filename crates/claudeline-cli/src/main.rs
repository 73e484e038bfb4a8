//! claudeline - operator front end for Claude Code
//!
//! By default speaks a JSON-lines protocol on stdin/stdout so a transport
//! (web socket bridge, editor plugin, ...) can drive one session. With
//! `--one-shot` it runs a single prompt interactively on the terminal.

mod one_shot;
mod protocol;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use console::style;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use claudeline_core::agent::ClaudeCli;
use claudeline_core::config::{Config, ConfigManager};
use claudeline_core::session::{PermissionMode, SessionController};

#[derive(Parser)]
#[command(name = "claudeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive a Claude Code session from a remote operator", long_about = None)]
struct Cli {
    /// Directory Claude Code works in (defaults to config, then the current directory)
    #[arg(short = 'd', long)]
    work_dir: Option<PathBuf>,

    /// Claude Code executable name or path
    #[arg(short, long)]
    command: Option<String>,

    /// Initial mode: plan, supervised or unsupervised
    #[arg(short, long)]
    mode: Option<PermissionMode>,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Execute a single prompt on the terminal and exit
    #[arg(long)]
    one_shot: Option<String>,

    /// Write --command, --work-dir and --mode into the config file and exit
    #[arg(long)]
    save_config: bool,
}

fn open_config(cli: &Cli) -> anyhow::Result<ConfigManager> {
    Ok(match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone())?,
        None => ConfigManager::new()?,
    })
}

fn apply_flags(cli: &Cli, config: &mut Config) {
    if let Some(command) = &cli.command {
        config.agent.command = command.clone();
    }
    if let Some(dir) = &cli.work_dir {
        config.agent.work_dir = Some(absolute_dir(dir));
    }
    if let Some(mode) = cli.mode {
        config.session.initial_mode = mode;
    }
}

/// File, then environment, then flags
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = open_config(cli)?.into_config();
    config.apply_env_overrides();
    apply_flags(cli, &mut config);
    Ok(config)
}

/// Persist the flags on top of the file contents. Environment overrides are
/// not written.
fn save_config(cli: &Cli) -> anyhow::Result<PathBuf> {
    let mut manager = open_config(cli)?;
    apply_flags(cli, manager.config_mut());
    manager.save()?;
    Ok(manager.config_path().to_path_buf())
}

/// Absolute form of `dir`, without the UNC prefix on Windows
fn absolute_dir(dir: &Path) -> PathBuf {
    dunce::canonicalize(dir).unwrap_or_else(|_| {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(dir))
                .unwrap_or_else(|_| dir.to_path_buf())
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.save_config {
        let path = save_config(&cli).context("Failed to save configuration")?;
        println!("Saved configuration to {}", path.display());
        return Ok(());
    }
    let config = load_config(&cli).context("Failed to load configuration")?;

    // Logs go to stderr: stdout carries the protocol
    let filter = if cli.verbose {
        EnvFilter::new("info,claudeline_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let work_dir = absolute_dir(&config.work_dir()?);
    let agent = ClaudeCli::from_config(&config.agent);
    if !agent.is_available() {
        warn!(
            command = %config.agent.command,
            "Claude Code not found; prompts will fail until it is installed"
        );
    }
    info!(
        work_dir = %work_dir.display(),
        mode = %config.session.initial_mode,
        "Starting claudeline"
    );

    let controller = Arc::new(SessionController::with_mode(
        Arc::new(agent),
        work_dir,
        config.session.initial_mode,
    ));

    if let Some(prompt) = cli.one_shot {
        if prompt.trim().is_empty() {
            eprintln!("{}", style("Error: Empty command").red());
            std::process::exit(2);
        }
        let success = one_shot::run(controller, &prompt).await?;
        if !success {
            std::process::exit(1);
        }
        return Ok(());
    }

    protocol::serve(controller).await
}
