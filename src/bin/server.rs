//! Modbus Bridge server
//!
//! Serves in-memory coil, discrete input and register tables over Modbus TCP.
//!
//! Usage: cargo run --bin modbus-bridge-server -- --bind 127.0.0.1:1502 --coils 48

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use modbus_bridge::{ModbusTcpServer, ServerConfig};

/// Serve Modbus coil and register tables over TCP
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON configuration file; flags below override its values
    #[clap(short, long)]
    config: Option<String>,

    /// Bind address
    #[clap(short, long)]
    bind: Option<String>,

    /// Number of coils
    #[clap(long)]
    coils: Option<usize>,

    /// Number of discrete inputs
    #[clap(long)]
    discrete_inputs: Option<usize>,

    /// Number of holding registers
    #[clap(long)]
    holding_registers: Option<usize>,

    /// Number of input registers
    #[clap(long)]
    input_registers: Option<usize>,

    /// Log filter (trace, debug, info, warn, error)
    #[clap(short = 'l', long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load_from_file(path)
                .with_context(|| format!("loading server config from {}", path))?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(n) = self.coils {
            config.coils = n;
        }
        if let Some(n) = self.discrete_inputs {
            config.discrete_inputs = n;
        }
        if let Some(n) = self.holding_registers {
            config.holding_registers = n;
        }
        if let Some(n) = self.input_registers {
            config.input_registers = n;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = args.server_config()?;
    let mut server = ModbusTcpServer::new(config).context("invalid server configuration")?;
    let addr = server.start().await.context("starting server")?;
    info!("{} serving on {}", modbus_bridge::info(), addr);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;

    let stats = server.stats().await;
    server.stop().await?;
    info!(
        "Served {} requests ({} exceptions) over {} connections",
        stats.total_requests, stats.exception_responses, stats.connections_count
    );
    Ok(())
}
