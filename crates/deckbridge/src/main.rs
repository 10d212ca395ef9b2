use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

use deckbridge_core::bridge::Bridge;
use deckbridge_core::deck::VirtualDeck;
use deckbridge_core::events::outbound_queue;
use deckbridge_core::geometry::Grid;
use deckbridge_core::server::PluginServer;
use deckbridge_core::shared::{self, BridgeConfig};
use deckbridge_core::pipe;
use deckbridge_core::ui::UiEmitter;

/// Headless bridge between a button deck and a remote tabletop plugin.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Loopback port for the plugin WebSocket server.
    #[arg(short, long, default_value_t = 3001)]
    port: u16,

    /// Path of the named pipe the trampoline writes to.
    #[arg(long, default_value = "/tmp/deckbridge_pipe")]
    pipe: PathBuf,

    /// Device id to bridge.
    #[arg(long, default_value = "deck-0")]
    device: String,

    /// Key columns of the device.
    #[arg(long, default_value_t = 8)]
    columns: u8,

    /// Key rows of the device.
    #[arg(long, default_value_t = 4)]
    rows: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = BridgeConfig {
        grid: Grid {
            columns: args.columns,
            rows: args.rows,
        },
        port: args.port,
        pipe_path: args.pipe,
        ..BridgeConfig::default()
    };

    let paths = shared::discover_paths()?;
    shared::ensure_assets(&paths)?;

    let deck = Arc::new(VirtualDeck::new(&args.device, &paths.config_dir)?);
    let ui = UiEmitter::new(16);
    let (queue, outbound) = outbound_queue(config.queue_capacity);
    let bridge = Bridge::new(deck, &paths, &config, queue.clone(), ui)?;
    bridge.attach();

    pipe::create(&config.pipe_path)?;
    let (stop_tx, stop_rx) = watch::channel(false);

    let listener = tokio::spawn({
        let pipe_path = config.pipe_path.clone();
        let stop = stop_rx.clone();
        let read_buffer = config.pipe_read_buffer;
        async move { pipe::run(&pipe_path, queue, stop, read_buffer).await }
    });

    let server = PluginServer::new(
        Arc::clone(&bridge),
        config.heartbeat_timeout,
        config.grace_period,
    );
    let session = tokio::spawn(server.run(config.port, outbound, stop_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = stop_tx.send(true);

    if let Err(err) = listener.await? {
        error!("Pipe listener failed: {:#}", err);
    }
    if let Err(err) = session.await? {
        error!("Plugin server failed: {:#}", err);
    }

    Ok(())
}
