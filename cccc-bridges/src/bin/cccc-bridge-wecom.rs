//! `cccc-bridge-wecom` — WeCom (Enterprise WeChat) adapter over the
//! shared bridge runtime (spec §4.11).
//!
//! WeCom delivers inbound messages only via a webhook callback encrypted
//! with the app's AES key, which needs a public HTTPS endpoint and its
//! own XML/crypto handling — a different shape than the poll loop every
//! other bridge binary runs. This binary relays outbound only: it posts
//! `to_user`/`to_peer_summary` outbox events to the configured WeCom
//! users/channels the same way the other bridges do, and leaves inbound
//! to a future callback-receiver binary.

use anyhow::{Context, Result};
use cccc_bridges::consumer::BridgeRuntime;
use cccc_bridges::singleton::SingletonLock;
use cccc_bridges::wecom::{load_config, WeComAdapter};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "cccc-bridge-wecom", about = "WeCom bridge for a CCCC session")]
struct Args {
    #[arg(long, default_value = ".cccc")]
    home: PathBuf,

    #[arg(long, default_value = "settings/bridge_wecom.yaml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config_path = if args.config.is_absolute() { args.config.clone() } else { args.home.join(&args.config) };

    let _lock = SingletonLock::acquire(&args.home, "wecom").context("another wecom bridge instance is running")?;
    let config = load_config(&config_path)?;

    let runtime = BridgeRuntime::new(&args.home, "wecom", config.channels.clone())?;
    let adapter = WeComAdapter::new(config.corp_id.clone(), config.corp_secret.clone(), config.agent_id);

    tracing::info!("wecom bridge started (outbound relay only)");
    loop {
        if let Err(e) = runtime.run_outbound_tick(&adapter) {
            tracing::warn!(error = %e, "wecom outbound tick failed");
        }
        std::thread::sleep(Duration::from_secs(5));
    }
}
