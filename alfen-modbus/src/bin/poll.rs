//! Poll a charging station and print every snapshot as one JSON line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use alfen_modbus::simulator::Station;
use alfen_modbus::{Hub, HubConfig, Snapshot, Socket, Transport};

#[derive(Parser, Debug)]
#[command(name = "alfen-modbus-poll", version, about)]
/// Poll an Alfen charging station over Modbus/TCP
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ALFEN_CONFIG")]
    config: Option<PathBuf>,

    /// Station host name or address, overrides the configuration
    #[arg(long)]
    host: Option<String>,

    /// Poll an in-memory station with two sockets instead of a real one
    #[arg(long)]
    simulate: bool,

    /// Max current of socket 1 in amperes, written again whenever it is about to expire
    #[arg(long)]
    max_current: Option<f64>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut figment = HubConfig::figment(args.config.as_deref());
    if let Some(host) = &args.host {
        figment = figment.merge(("host", host));
    } else if args.simulate {
        figment = figment.merge(("host", "simulator"));
    }
    let config = HubConfig::extract(figment).context("invalid configuration")?;

    if args.simulate {
        let station = Station::populated(
            config.station_address,
            2,
            chrono::Local::now().fixed_offset(),
        );
        run(Hub::new(config, station), args.max_current).await
    } else {
        run(Hub::tcp(config)?, args.max_current).await
    }
}

async fn run<T: Transport>(hub: Hub<T>, max_current: Option<f64>) -> Result<()> {
    let (refresh_tx, mut refresh_rx) = tokio::sync::mpsc::unbounded_channel();
    let id = hub
        .subscribe_with_refresh(print_snapshot, move |_: &Snapshot| {
            let _ = refresh_tx.send(());
        })
        .await;
    info!(hub = %hub.name(), "polling, press Ctrl-C to stop");

    if let Some(amps) = max_current {
        if let Err(err) = hub.set_max_current(Socket::One, amps).await {
            warn!("initial max current not written: {err}");
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(()) = refresh_rx.recv() => {
                let Some(amps) = max_current else {
                    continue;
                };
                if let Err(err) = hub.set_max_current(Socket::One, amps).await {
                    warn!("max current refresh failed: {err}");
                }
            }
        }
    }

    hub.unsubscribe(id).await;
    info!(hub = %hub.name(), "stopped");
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    match serde_json::to_string(snapshot) {
        Ok(json) => println!("{json}"),
        Err(err) => error!("snapshot not serializable: {err}"),
    }
}
