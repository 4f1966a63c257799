//! `cccc-bridge-slack` — Slack adapter over the shared bridge runtime
//! (spec §4.11). Polls `conversations.history` per configured channel,
//! filtering out the bridge's own posts via `bot_user_id`.

use anyhow::{Context, Result};
use cccc_bridges::attachments::save_attachment;
use cccc_bridges::consumer::BridgeRuntime;
use cccc_bridges::inbound::{
    deliver_inbound, execute_local_command, parse_local_command, parse_route_prefix, LocalCommandContext,
    RouteTarget,
};
use cccc_bridges::singleton::SingletonLock;
use cccc_bridges::slack::{load_config, HistoryCursor, SlackAdapter, SlackConfig};
use cccc_core::commands::{CommandQueue, CommandRecord};
use cccc_core::config::{bindings_from_agents, load_agents};
use cccc_core::{Ledger, Mailbox, Role};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(name = "cccc-bridge-slack", about = "Slack bridge for a CCCC session")]
struct Args {
    #[arg(long, default_value = ".cccc")]
    home: PathBuf,

    #[arg(long, default_value = "settings/bridge_slack.yaml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config_path = if args.config.is_absolute() { args.config.clone() } else { args.home.join(&args.config) };

    let _lock = SingletonLock::acquire(&args.home, "slack").context("another slack bridge instance is running")?;
    let config = load_config(&config_path)?;
    let agents = load_agents(&args.home.join("settings").join("agents.yaml"))?;
    let bindings = bindings_from_agents(&agents, None);

    let ledger = Ledger::open(args.home.join("state").join("ledger.jsonl"))?;
    let commands = CommandQueue::new(&args.home.join("state"))?;
    let mut runtime = BridgeRuntime::new(&args.home, "slack", config.channels.clone())?;
    let adapter = SlackAdapter::new(config.bot_token.clone());
    let bot_user_id = adapter.bot_user_id().context("slack auth.test failed")?;

    let has_peer_b = agents.peer_b.is_some();
    let mailbox_for = |role: Role| -> Option<Mailbox> {
        match role {
            Role::PeerA => Some(Mailbox::new(&args.home, "peerA")),
            Role::PeerB if has_peer_b => Some(Mailbox::new(&args.home, "peerB")),
            _ => None,
        }
    };

    tracing::info!("slack bridge started");
    loop {
        for channel in config.channels.clone() {
            poll_channel(
                &channel,
                &args.home,
                &config,
                &bindings,
                &adapter,
                &bot_user_id,
                &mut runtime,
                &commands,
                &ledger,
                mailbox_for,
            );
        }
        if let Err(e) = runtime.run_outbound_tick(&adapter) {
            tracing::warn!(error = %e, "slack outbound tick failed");
        }
        std::thread::sleep(Duration::from_secs(3));
    }
}

#[allow(clippy::too_many_arguments)]
fn poll_channel(
    channel: &str,
    home: &std::path::Path,
    config: &SlackConfig,
    bindings: &cccc_core::RuntimeBindings,
    adapter: &SlackAdapter,
    bot_user_id: &str,
    runtime: &mut BridgeRuntime,
    commands: &CommandQueue,
    ledger: &Ledger,
    mailbox_for: impl Fn(Role) -> Option<Mailbox>,
) {
    let cursor = HistoryCursor::new(home, channel);
    let oldest = cursor.load();
    let messages = match adapter.history_since(channel, oldest.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, channel, "slack conversations.history failed");
            return;
        }
    };
    let mut newest_ts = oldest.clone();
    for message in messages {
        if message.ts.as_str() > newest_ts.as_deref().unwrap_or("") {
            newest_ts = Some(message.ts.clone());
        }
        if message.is_self_echo(bot_user_id) {
            continue;
        }
        handle_message(&message, channel, config, bindings, adapter, runtime, commands, ledger, &mailbox_for);
    }
    if newest_ts != oldest {
        if let Some(ts) = newest_ts {
            if let Err(e) = cursor.save(&ts) {
                tracing::warn!(error = %e, channel, "failed to persist slack history cursor");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_message(
    message: &cccc_bridges::slack::SlackMessage,
    channel: &str,
    config: &SlackConfig,
    bindings: &cccc_core::RuntimeBindings,
    adapter: &SlackAdapter,
    runtime: &mut BridgeRuntime,
    commands: &CommandQueue,
    ledger: &Ledger,
    mailbox_for: &impl Fn(Role) -> Option<Mailbox>,
) {
    let raw_text = message.text.clone();

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

    for file in &message.files {
        if let Ok(resp) = reqwest::blocking::Client::new()
            .get(&file.url_private)
            .bearer_auth(&config.bot_token)
            .send()
        {
            if let Ok(bytes) = resp.bytes() {
                if let Ok(saved) = save_attachment(&runtime.home, "slack", &file.name, &file.mimetype, &bytes) {
                    body.push_str(&format!("\n[attachment: {}]", saved.display()));
                }
            }
        }
    }

    deliver_inbound(target, &body, "slack", mailbox_for, ledger);
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
        source: format!("bridge-slack:{channel}"),
        ts: SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0),
    };
    if let Err(e) = commands.append_command(&record) {
        tracing::warn!(error = %e, "failed to forward slack command");
    }
}
