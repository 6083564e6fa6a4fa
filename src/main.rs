//! HR Webhooks gateway
//!
//! Receives provider webhooks for the HR platform.

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// HR platform inbound webhook gateway
#[derive(Parser, Debug)]
#[command(name = "hr-webhooks")]
#[command(version)]
#[command(about = "Inbound webhook gateway for Keka, Plum, Springverify and Zoho Sign")]
struct Args {
    /// Address to listen on (overrides WEBHOOK_GATEWAY_ADDR)
    #[arg(short, long)]
    addr: Option<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    hr_webhooks::server::run(args.addr)
        .await
        .context("HR webhook gateway failed")?;

    Ok(())
}
