//! zram-csi: CSI driver for zram volumes.

use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use zram_csi::driver::{DRIVER_NAME, default_node_id};
use zram_csi::{Config, Driver};

#[derive(Parser, Debug)]
#[command(name = "zram-csi", version)]
#[command(about = "CSI driver for zram volumes")]
struct Args {
    /// CSI endpoint (unix:// or tcp://).
    #[arg(long, default_value = "unix:///tmp/csi.sock")]
    endpoint: String,

    /// Node ID. Defaults to the hostname.
    #[arg(long)]
    node_id: Option<String>,

    /// Name reported to the orchestrator.
    #[arg(long, default_value = DRIVER_NAME)]
    driver_name: String,

    /// Advertise NodeGetVolumeStats.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    enable_get_volume_stats: bool,

    /// Pin volumes to the node that created them.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    enable_topology: bool,

    /// Verbosity level (0-4).
    #[arg(short, default_value = "0")]
    v: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep h2, tonic and hyper at warn; only our crates get detailed logging.
    let filter = match args.v {
        0 => "warn".to_string(),
        1 => "zram_csi=info,zram=info,warn".to_string(),
        2 => "zram_csi=debug,zram=debug,warn".to_string(),
        3 => "zram_csi=trace,zram=trace,warn".to_string(),
        _ => "zram_csi=trace,zram=trace,info".to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = Config {
        name: args.driver_name,
        node_id: args.node_id.unwrap_or_else(default_node_id),
        endpoint: args.endpoint,
        enable_get_volume_stats: args.enable_get_volume_stats,
        enable_topology: args.enable_topology,
        ..Default::default()
    };

    Driver::new(config).run().await?;

    Ok(())
}
