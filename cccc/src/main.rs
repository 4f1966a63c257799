//! `cccc` — the orchestrator binary (spec §6 CLI surface). `run` drives
//! the main tick loop described in spec §2; `init`/`upgrade` stamp a
//! settings skeleton into a target directory.

mod init;

use anyhow::{Context, Result};
use cccc_core::config::{bindings_from_agents, load_agents, load_cli_profiles, load_foreman_settings, load_policies};
use cccc_core::{Foreman, ForemanConfig, ForemanOutcome, Role, RoutingCore};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "cccc", about = "Dual-peer message routing orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestrator's main tick loop.
    Run {
        /// Session home directory (holds settings/, state/, mailbox/).
        /// Defaults to `~/.cccc` when not given.
        #[arg(long)]
        home: Option<PathBuf>,
    },
    /// Stamp a fresh settings skeleton into a target directory.
    Init {
        #[arg(long)]
        home: Option<PathBuf>,
    },
    /// Fill in any settings files missing from an existing directory,
    /// without touching files already there.
    Upgrade {
        #[arg(long)]
        home: Option<PathBuf>,
    },
}

/// Resolves `--home`, falling back to `~/.cccc` via `dirs::home_dir()`
/// (or `./.cccc` if the platform has no resolvable home directory).
fn resolve_home(home: Option<PathBuf>) -> PathBuf {
    home.unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".cccc"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run { home } => run(&resolve_home(home)).await,
        Command::Init { home } => {
            init::stamp_skeleton(&resolve_home(home)).map(|n| tracing::info!(wrote = n, "initialized session directory"))
        }
        Command::Upgrade { home } => {
            init::stamp_skeleton(&resolve_home(home)).map(|n| tracing::info!(wrote = n, "upgraded session directory"))
        }
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "fatal configuration error");
        std::process::exit(1);
    }
    Ok(())
}

/// Resolves the Aux actor's CLI invocation template (`command` + `args`
/// joined) from `cli_profiles.yaml`, used by foreman's `reuse_aux` mode
/// (spec §4.10).
fn resolve_aux_invoke_template(agents: &cccc_core::AgentsConfig, profiles: &cccc_core::CliProfiles) -> Option<String> {
    let aux_id = agents.aux.as_ref()?;
    let profile = profiles.profiles.get(aux_id)?;
    let mut parts = vec![profile.command.clone()];
    parts.extend(profile.args.clone());
    Some(parts.join(" "))
}

async fn run(home: &Path) -> Result<()> {
    let settings_dir = home.join("settings");
    let agents = load_agents(&settings_dir.join("agents.yaml")).context("loading settings/agents.yaml")?;
    let policies = load_policies(&settings_dir.join("policies.yaml")).context("loading settings/policies.yaml")?;
    let cli_profiles = load_cli_profiles(&settings_dir.join("cli_profiles.yaml")).unwrap_or_default();
    let aux_invoke_template = resolve_aux_invoke_template(&agents, &cli_profiles);
    let bindings = bindings_from_agents(&agents, aux_invoke_template);

    let mut core = RoutingCore::new(home, bindings, &policies).context("constructing routing core")?;

    let foreman_settings =
        load_foreman_settings(&settings_dir.join("foreman.yaml")).context("loading settings/foreman.yaml")?;
    let (foreman_tx, mut foreman_rx) = tokio::sync::mpsc::unbounded_channel::<(Vec<Role>, String)>();
    if foreman_settings.enabled && !foreman_settings.command.is_empty() {
        spawn_foreman_loop(home, foreman_settings, foreman_tx);
    }

    tracing::info!(home = %home.display(), "cccc orchestrator started");
    let mut tick_interval = tokio::time::interval(Duration::from_millis(300));
    let mut status_interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                let report = core.tick();
                if report.commands_processed > 0 || !report.scans.is_empty() || !report.timeouts_resolved.is_empty() {
                    tracing::debug!(?report, "tick");
                }
            }
            _ = status_interval.tick() => {
                core.write_status();
            }
            Some((receivers, body)) = foreman_rx.recv() => {
                core.relay_foreman_output(&receivers, &body);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested, writing final status snapshot");
                core.write_status();
                break;
            }
        }
    }
    Ok(())
}

/// Runs foreman on `interval_seconds`, relaying each completed run's
/// output back to the main loop over `tx` (spec §4.10: foreman "runs
/// outside the main loop").
fn spawn_foreman_loop(
    home: &Path,
    settings: cccc_core::ForemanSettings,
    tx: tokio::sync::mpsc::UnboundedSender<(Vec<Role>, String)>,
) {
    let home = home.to_path_buf();
    let prompt_path = home.join(&settings.prompt_path);
    let interval = Duration::from_secs(settings.interval_seconds.max(1));
    let foreman = Foreman::new(
        &home,
        ForemanConfig {
            command: settings.command.clone(),
            args: settings.args.clone(),
            max_run_seconds: settings.max_run_seconds,
            kill_grace_seconds: settings.kill_grace_seconds,
        },
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip so foreman doesn't run at startup
        loop {
            ticker.tick().await;
            let prompt = std::fs::read_to_string(&prompt_path).unwrap_or_default();
            match foreman.run(&prompt).await {
                Ok(ForemanOutcome::Completed) => {
                    if let Some(body) = foreman.take_output() {
                        let receivers = cccc_core::foreman::parse_recipient_header(&body);
                        let _ = tx.send((receivers, body));
                    }
                }
                Ok(outcome) => tracing::warn!(?outcome, "foreman run did not complete cleanly"),
                Err(e) => tracing::warn!(error = %e, "foreman run failed"),
            }
        }
    });
}
