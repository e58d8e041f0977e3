//! Command-line host for the URLNavigator updater.
//!
//! Plays the part of the UI layer: resolves the version, checks for updates,
//! and drives an apply while polling progress snapshots.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use urlnav_updater::update::VersionSources;
use urlnav_updater::{
    ProgressPhase, ProgressTracker, UpdateChecker, Updater, UpdaterConfig, VersionResolver,
};

/// URLNavigator self-update tool.
#[derive(Parser)]
#[command(name = "urlnav-update", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show the resolved application version and its source.
    Version {
        /// Re-run resolution from scratch.
        #[arg(long)]
        reload: bool,
    },

    /// Check the release registry for a newer version.
    Check {
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Download and install the latest release.
    Apply {
        /// Do not restart after a successful install.
        #[arg(long)]
        no_restart: bool,
    },

    /// Set the release registry owner and project.
    SetRelease { owner: String, project: String },

    /// Relaunch the application.
    Restart,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("urlnav_updater=info,urlnav_update=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(ref path) => UpdaterConfig::from_file(path)?,
        None => UpdaterConfig::load_or_default()?,
    };
    let resolver = VersionResolver::new(VersionSources::from_config(&config));

    match cli.command.unwrap_or(Command::Version { reload: false }) {
        Command::Version { reload } => show_version(&resolver, reload),
        Command::Check { json } => check(&config, &resolver, json),
        Command::Apply { no_restart } => apply(config, &resolver, no_restart),
        Command::SetRelease { owner, project } => {
            let record = resolver.set_release_identity(&owner, &project)?;
            println!("release identity set to {}/{}", record.release_owner, record.release_project);
            Ok(())
        }
        Command::Restart => {
            let updater = Updater::new(config, Arc::new(ProgressTracker::new()));
            updater.restart()?;
            // Keep the process alive until the grace-delayed exit fires.
            std::thread::sleep(Duration::from_secs(5));
            Ok(())
        }
    }
}

fn show_version(resolver: &VersionResolver, reload: bool) -> anyhow::Result<()> {
    let record = if reload {
        match resolver.force_reload() {
            Ok(record) => record,
            Err(e) => {
                eprintln!("warning: {e}");
                resolver.resolve()
            }
        }
    } else {
        resolver.resolve()
    };

    println!("{} {}", record.app_name, record.version);
    println!("  source:  {}", record.source);
    if record.is_defaulted {
        println!("  (defaulted: no version source was found)");
    }
    if record.has_release_identity() {
        println!("  release: {}/{}", record.release_owner, record.release_project);
    } else {
        println!("  release: not configured");
    }
    Ok(())
}

fn check(config: &UpdaterConfig, resolver: &VersionResolver, json: bool) -> anyhow::Result<()> {
    let result = UpdateChecker::new(config).check(&resolver.resolve());
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if let Some(err) = &result.error_message {
        eprintln!("{err}");
    }
    if result.has_update {
        println!(
            "Update available: {} -> {}",
            result.current_version, result.latest_version
        );
        if let Some(asset) = &result.selected_asset {
            println!("  asset: {} ({} bytes)", asset.name, asset.size_bytes);
        }
        if !result.release_notes.is_empty() {
            println!("\n{}", result.release_notes);
        }
    } else if result.error_message.is_none() {
        println!("{} is up to date", result.current_version);
    }
    Ok(())
}

fn apply(
    mut config: UpdaterConfig,
    resolver: &VersionResolver,
    no_restart: bool,
) -> anyhow::Result<()> {
    let availability = UpdateChecker::new(&config).check(&resolver.resolve());
    let Some(asset) = availability.selected_asset.filter(|_| availability.has_update) else {
        match availability.error_message {
            Some(msg) => anyhow::bail!("{msg}"),
            None => {
                println!("{} is up to date", availability.current_version);
                return Ok(());
            }
        }
    };

    if no_restart {
        config.auto_restart = false;
    }
    let tracker = Arc::new(ProgressTracker::new());
    let updater = Arc::new(Updater::new(config, Arc::clone(&tracker)));
    let worker = updater.spawn_apply(asset)?;

    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("  {msg} [{bar:30}] {pos}% {prefix}") {
        pb.set_style(style);
    }

    loop {
        let snap = tracker.snapshot();
        pb.set_position(u64::from(snap.percent));
        pb.set_message(snap.message.clone());
        pb.set_prefix(format!("{} {}", snap.speed_label, snap.eta_label));
        if snap.phase.is_terminal() || worker.is_finished() {
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    pb.finish();

    match worker.join() {
        Ok(Ok(())) => {
            let snap = tracker.snapshot();
            println!("{}", snap.message);
            if snap.phase == ProgressPhase::Completed && !no_restart {
                // Give the scheduled restart time to take over.
                std::thread::sleep(Duration::from_secs(10));
            }
            Ok(())
        }
        Ok(Err(e)) if e.is_fatal() => {
            anyhow::bail!("UNRECOVERABLE: {e}. Reinstall URLNavigator manually.")
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => anyhow::bail!("update worker panicked"),
    }
}
