use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;

use netproxy::{Config, Protocol};

#[derive(Parser, Debug)]
#[command(name = "netproxy", about = "SOCKS4 / HTTP CONNECT relay for network tests")]
struct Args {
    /// Port to listen on, on 127.0.0.1
    #[arg(short, long)]
    port: u16,

    /// Handshake spoken by clients: socks4 or http
    #[arg(long, default_value = "socks4")]
    protocol: Protocol,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let proxy = netproxy::run(Config{ port: args.port, protocol: args.protocol })
        .with_context(|| format!("failed to start {} proxy on port {}",
                                 args.protocol, args.port))?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("failed to install Ctrl+C handler")?;

    info!("Press Ctrl+C to stop.");
    let _ = rx.recv();

    proxy.terminate();
    Ok(())
}
