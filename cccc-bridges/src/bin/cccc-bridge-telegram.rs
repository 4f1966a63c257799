//! `cccc-bridge-telegram` — Telegram adapter over the shared bridge
//! runtime (spec §4.11). Long-polls `getUpdates`, routes inbound
//! messages into peer mailboxes, and relays outbox events back out.

use anyhow::{Context, Result};
use cccc_bridges::attachments::save_attachment;
use cccc_bridges::consumer::BridgeRuntime;
use cccc_bridges::inbound::{
    deliver_inbound, execute_local_command, parse_local_command, parse_route_prefix, LocalCommandContext,
    RouteTarget,
};
use cccc_bridges::singleton::SingletonLock;
use cccc_bridges::telegram::{effective_text, load_config, TelegramAdapter, TelegramUpdate, UpdateOffset};
use cccc_core::commands::{CommandQueue, CommandRecord};
use cccc_core::config::{bindings_from_agents, load_agents};
use cccc_core::{Ledger, Mailbox, Role};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(name = "cccc-bridge-telegram", about = "Telegram bridge for a CCCC session")]
struct Args {
    /// Session home directory (holds settings/, state/, mailbox/).
    #[arg(long, default_value = ".cccc")]
    home: PathBuf,

    /// Path to the Telegram bridge config, relative to `home` if not absolute.
    #[arg(long, default_value = "settings/bridge_telegram.yaml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config_path = if args.config.is_absolute() { args.config.clone() } else { args.home.join(&args.config) };

    let _lock = SingletonLock::acquire(&args.home, "telegram").context("another telegram bridge instance is running")?;
    let config = load_config(&config_path)?;
    let agents = load_agents(&args.home.join("settings").join("agents.yaml"))?;
    let bindings = bindings_from_agents(&agents, None);

    let ledger = Ledger::open(args.home.join("state").join("ledger.jsonl"))?;
    let commands = CommandQueue::new(&args.home.join("state"))?;
    let mut runtime = BridgeRuntime::new(&args.home, "telegram", config.channels.clone())?;
    let adapter = TelegramAdapter::new(config.bot_token.clone());
    let offset_file = UpdateOffset::new(&args.home);

    let has_peer_b = agents.peer_b.is_some();
    let mailbox_for = |role: Role| -> Option<Mailbox> {
        match role {
            Role::PeerA => Some(Mailbox::new(&args.home, "peerA")),
            Role::PeerB if has_peer_b => Some(Mailbox::new(&args.home, "peerB")),
            _ => None,
        }
    };

    tracing::info!("telegram bridge started");
    loop {
        let offset = offset_file.load();
        let updates = match adapter.get_updates(offset) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(error = %e, "telegram getUpdates failed");
                std::thread::sleep(Duration::from_secs(5));
                Vec::new()
            }
        };
        let mut highest = offset;
        for update in &updates {
            highest = highest.max(update.update_id);
            handle_update(
                update,
                &config,
                &bindings,
                &adapter,
                &mut runtime,
                &commands,
                &ledger,
                mailbox_for,
            );
        }
        if highest != offset {
            if let Err(e) = offset_file.save(highest) {
                tracing::warn!(error = %e, "failed to persist telegram update offset");
            }
        }
        if let Err(e) = runtime.run_outbound_tick(&adapter) {
            tracing::warn!(error = %e, "telegram outbound tick failed");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_update(
    update: &TelegramUpdate,
    config: &cccc_bridges::telegram::TelegramConfig,
    bindings: &cccc_core::RuntimeBindings,
    adapter: &TelegramAdapter,
    runtime: &mut BridgeRuntime,
    commands: &CommandQueue,
    ledger: &Ledger,
    mailbox_for: impl Fn(Role) -> Option<Mailbox>,
) {
    let Some(message) = &update.message else {
        return;
    };
    let chat_id = message.chat.id.to_string();
    let raw_text = message.text.clone().unwrap_or_default();

    if let Some(cmd) = parse_local_command(&raw_text) {
        let mut ctx = LocalCommandContext {
            home: &runtime.home,
            bindings,
            subscriptions: &mut runtime.subscriptions,
            channel: &chat_id,
        };
        let reply = execute_local_command(&cmd, &mut ctx);
        adapter.post(&chat_id, &reply);
        return;
    }
    if raw_text.starts_with('/') {
        forward_unknown_command(&raw_text, &chat_id, commands);
        return;
    }

    let resolved = effective_text(&raw_text, config.bot_handle.as_deref());
    let (target, mut body) = match parse_route_prefix(&resolved) {
        Some((target, body)) => (target, body),
        None if resolved != raw_text => (RouteTarget::Both, resolved),
        None if !config.require_prefix => (RouteTarget::Both, raw_text.clone()),
        None => {
            adapter.post(&chat_id, "Prefix your message with a:, b:, or both: to route it.");
            return;
        }
    };

    if let Some(doc) = &message.document {
        if let Ok(Some(file_path)) = adapter.get_file_path(&doc.file_id) {
            if let Ok(bytes) = adapter.download_file(&file_path) {
                let filename = doc.file_name.clone().unwrap_or_else(|| "file".to_string());
                let mime = doc.mime_type.clone().unwrap_or_else(|| "application/octet-stream".to_string());
                if let Ok(saved) = save_attachment(&runtime.home, "telegram", &filename, &mime, &bytes) {
                    body.push_str(&format!("\n[attachment: {}]", saved.display()));
                }
            }
        }
    }

    deliver_inbound(target, &body, "telegram", mailbox_for, ledger);
}

fn forward_unknown_command(raw_text: &str, chat_id: &str, commands: &CommandQueue) {
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
        source: format!("bridge-telegram:{chat_id}"),
        ts: SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0),
    };
    if let Err(e) = commands.append_command(&record) {
        tracing::warn!(error = %e, "failed to forward telegram command");
    }
}
