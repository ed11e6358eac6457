//! Modbus Bridge client
//!
//! Runs the coil bridge engine against a Modbus TCP server and prints every
//! status change and coil event until Ctrl+C.
//!
//! Usage: cargo run --bin modbus-bridge -- --host 192.168.1.50 --coils 16
//!
//! Lines typed on stdin control the engine:
//!
//! - `w <index> <0|1>` writes a coil
//! - `t <index>` toggles a coil
//! - `r` resets every level latch
//! - `p` polls immediately
//! - `s` prints a snapshot

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use modbus_bridge::{BridgeConfig, BridgeEvent, ChannelListener, CoilBridge};

/// Poll coils from a Modbus TCP server and report pulse/level changes
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON configuration file; flags below override its values
    #[clap(short, long)]
    config: Option<String>,

    /// Modbus server host
    #[clap(long)]
    host: Option<String>,

    /// Modbus server port
    #[clap(long)]
    port: Option<u16>,

    /// Number of coils polled from address 0 (1-1000)
    #[clap(long)]
    coils: Option<u16>,

    /// Poll interval in milliseconds
    #[clap(long)]
    poll_interval_ms: Option<u64>,

    /// Emit every log level instead of errors only
    #[clap(long)]
    debug: bool,

    /// Log filter (trace, debug, info, warn, error)
    #[clap(short = 'l', long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

impl Args {
    fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load_from_file(path)
                .with_context(|| format!("loading bridge config from {}", path))?,
            None => BridgeConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(coils) = self.coils {
            config.num_coils = coils;
        }
        if let Some(interval) = self.poll_interval_ms {
            config.poll_interval_ms = interval;
        }
        config.debug |= self.debug;
        config.validate().context("invalid bridge configuration")?;
        Ok(config)
    }
}

async fn run_console_command(bridge: &CoilBridge, line: &str) -> Result<()> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["w", index, state] => {
            let outcome = bridge
                .set_coil_state(index.parse()?, state.parse()?)
                .await?;
            println!("write: {:?}", outcome);
        }
        ["t", index] => {
            let outcome = bridge.toggle_coil(index.parse()?).await?;
            println!("toggle: {:?}", outcome);
        }
        ["r"] => bridge.reset_level_latches().await?,
        ["p"] => println!("poll ok: {}", bridge.poll_now().await?),
        ["s"] => {
            let snapshot = bridge.snapshot().await?;
            println!(
                "status={} attempts={} reconnect_pending={}",
                snapshot.status, snapshot.reconnect_attempts, snapshot.reconnect_pending
            );
            let coils = snapshot.pulses.iter().zip(&snapshot.levels);
            for (index, (pulse, level)) in coils.enumerate() {
                println!("  coil {:>4}: pulse={} level={}", index, *pulse as u8, *level as u8);
            }
        }
        [] => {}
        _ => println!("commands: w <index> <0|1> | t <index> | r | p | s"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = args.bridge_config()?;
    println!(
        "Bridging {} coils from {}:{} (unit {})",
        config.num_coils, config.host, config.port, config.unit_id
    );

    let (listener, mut events) = ChannelListener::new();
    let bridge = CoilBridge::start(config, listener).context("starting bridge")?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping...");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(BridgeEvent::ConnectionStatusChanged(status)) => {
                        println!("status: {}", status)
                    }
                    Some(BridgeEvent::CoilStateChanged { index, pulse, level }) => {
                        println!("coil {}: pulse={} level={}", index, pulse as u8, level as u8)
                    }
                    Some(BridgeEvent::WriteFailed { index, value, message }) => {
                        println!("write to coil {} ({}) failed: {}", index, value, message)
                    }
                    Some(BridgeEvent::ReconnectExhausted { attempts }) => {
                        println!("giving up after {} reconnect attempts", attempts)
                    }
                    None => break,
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        if let Err(e) = run_console_command(&bridge, line.trim()).await {
                            println!("error: {:#}", e);
                        }
                    }
                    // Keep reporting events until Ctrl+C
                    None => stdin_open = false,
                }
            }
        }
    }

    bridge.stop().await.context("stopping bridge")?;
    Ok(())
}
