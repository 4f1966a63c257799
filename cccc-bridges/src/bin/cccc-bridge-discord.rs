//! `cccc-bridge-discord` — Discord adapter over the shared bridge
//! runtime (spec §4.11). Polls each configured channel's message list
//! with a snowflake `after` high-water mark.

use anyhow::{Context, Result};
use cccc_bridges::attachments::save_attachment;
use cccc_bridges::consumer::BridgeRuntime;
use cccc_bridges::discord::{load_config, DiscordAdapter, DiscordConfig, DiscordMessage, SnowflakeCursor};
use cccc_bridges::inbound::{
    deliver_inbound, execute_local_command, parse_local_command, parse_route_prefix, LocalCommandContext,
    RouteTarget,
};
use cccc_bridges::singleton::SingletonLock;
use cccc_core::commands::{CommandQueue, CommandRecord};
use cccc_core::config::{bindings_from_agents, load_agents};
use cccc_core::{Ledger, Mailbox, Role};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(name = "cccc-bridge-discord", about = "Discord bridge for a CCCC session")]
struct Args {
    #[arg(long, default_value = ".cccc")]
    home: PathBuf,

    #[arg(long, default_value = "settings/bridge_discord.yaml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config_path = if args.config.is_absolute() { args.config.clone() } else { args.home.join(&args.config) };

    let _lock = SingletonLock::acquire(&args.home, "discord").context("another discord bridge instance is running")?;
    let config = load_config(&config_path)?;
    let agents = load_agents(&args.home.join("settings").join("agents.yaml"))?;
    let bindings = bindings_from_agents(&agents, None);

    let ledger = Ledger::open(args.home.join("state").join("ledger.jsonl"))?;
    let commands = CommandQueue::new(&args.home.join("state"))?;
    let mut runtime = BridgeRuntime::new(&args.home, "discord", config.channels.clone())?;
    let adapter = DiscordAdapter::new(config.bot_token.clone());
    let self_id = adapter.self_id().context("discord users/@me failed")?;

    let has_peer_b = agents.peer_b.is_some();
    let mailbox_for = |role: Role| -> Option<Mailbox> {
        match role {
            Role::PeerA => Some(Mailbox::new(&args.home, "peerA")),
            Role::PeerB if has_peer_b => Some(Mailbox::new(&args.home, "peerB")),
            _ => None,
        }
    };

    tracing::info!("discord bridge started");
    loop {
        for channel in config.channels.clone() {
            poll_channel(
                &channel,
                &args.home,
                &config,
                &bindings,
                &adapter,
                &self_id,
                &mut runtime,
                &commands,
                &ledger,
                mailbox_for,
            );
        }
        if let Err(e) = runtime.run_outbound_tick(&adapter) {
            tracing::warn!(error = %e, "discord outbound tick failed");
        }
        std::thread::sleep(Duration::from_secs(3));
    }
}

#[allow(clippy::too_many_arguments)]
fn poll_channel(
    channel: &str,
    home: &std::path::Path,
    config: &DiscordConfig,
    bindings: &cccc_core::RuntimeBindings,
    adapter: &DiscordAdapter,
    self_id: &str,
    runtime: &mut BridgeRuntime,
    commands: &CommandQueue,
    ledger: &Ledger,
    mailbox_for: impl Fn(Role) -> Option<Mailbox>,
) {
    let cursor = SnowflakeCursor::new(home, channel);
    let after = cursor.load();
    let messages = match adapter.messages_after(channel, after.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, channel, "discord messages_after failed");
            return;
        }
    };
    let mut newest = after.clone();
    for message in &messages {
        newest = Some(message.id.clone());
        if message.author.id == self_id {
            continue;
        }
        handle_message(message, channel, config, bindings, adapter, runtime, commands, ledger, &mailbox_for);
    }
    if newest != after {
        if let Some(id) = newest {
            if let Err(e) = cursor.save(&id) {
                tracing::warn!(error = %e, channel, "failed to persist discord snowflake cursor");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_message(
    message: &DiscordMessage,
    channel: &str,
    config: &DiscordConfig,
    bindings: &cccc_core::RuntimeBindings,
    adapter: &DiscordAdapter,
    runtime: &mut BridgeRuntime,
    commands: &CommandQueue,
    ledger: &Ledger,
    mailbox_for: &impl Fn(Role) -> Option<Mailbox>,
) {
    let raw_text = message.content.clone();

    if let Some(cmd) = parse_local_command(&raw_text) {
        let mut ctx = LocalCommandContext {
            home: &runtime.home,
            bindings,
            subscriptions: &mut runtime.subscriptions,
            channel,
        };
        let reply = execute_local_command(&cmd, &mut ctx);
        adapter.post(channel, &reply);
        return;
    }
    if raw_text.starts_with('/') {
        forward_unknown_command(&raw_text, channel, commands);
        return;
    }

    let (target, mut body) = match parse_route_prefix(&raw_text) {
        Some((target, body)) => (target, body),
        None if !config.require_prefix => (RouteTarget::Both, raw_text.clone()),
        None => {
            adapter.post(channel, "Prefix your message with a:, b:, or both: to route it.");
            return;
        }
    };

    for attachment in &message.attachments {
        if let Ok(resp) = reqwest::blocking::get(&attachment.url) {
            if let Ok(bytes) = resp.bytes() {
                let mime = attachment.content_type.clone().unwrap_or_else(|| "application/octet-stream".to_string());
                if let Ok(saved) = save_attachment(&runtime.home, "discord", &attachment.filename, &mime, &bytes) {
                    body.push_str(&format!("\n[attachment: {}]", saved.display()));
                }
            }
        }
    }

    deliver_inbound(target, &body, "discord", mailbox_for, ledger);
}

fn forward_unknown_command(raw_text: &str, channel: &str, commands: &CommandQueue) {
    let mut parts = raw_text[1..].split_whitespace();
    let Some(kind) = parts.next() else { return };
    let args: serde_json::Map<String, serde_json::Value> = [(
        "text".to_string(),
        serde_json::Value::String(parts.collect::<Vec<_>>().join(" ")),
    )]
    .into_iter()
    .collect();
    let record = CommandRecord {
        id: None,
        kind: kind.to_string(),
        args,
        source: format!("bridge-discord:{channel}"),
        ts: SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0),
    };
    if let Err(e) = commands.append_command(&record) {
        tracing::warn!(error = %e, "failed to forward discord command");
    }
}
