//! Replays a recorded GPS file against a running server.
//!
//! ```bash
//! gps_replay --url ws://127.0.0.1:5000/ws --data bus_gps_data.json --interval-ms 200
//! ```

use std::{fs, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bus_eta::{replay, types::BusTrack};

#[derive(Parser, Debug)]
#[command(name = "gps_replay")]
#[command(about = "Stream a recorded GPS file into the live ingestion socket")]
struct Args {
    #[arg(long, default_value = "ws://127.0.0.1:5000/ws")]
    url: String,

    /// JSON array of {bus_id, data: [...]}
    #[arg(long, default_value = "bus_gps_data.json")]
    data: String,

    /// Pause between packets
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,

    /// Only replay this bus
    bus_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "bus_eta=info".into()))
        .init();

    let args = Args::parse();
    let txt = fs::read_to_string(&args.data)
        .with_context(|| format!("failed to read gps data at {}", args.data))?;
    let tracks: Vec<BusTrack> =
        serde_json::from_str(&txt).with_context(|| format!("failed to parse {}", args.data))?;

    let summary = replay::replay_tracks(
        &args.url,
        &tracks,
        args.bus_id.as_deref(),
        Duration::from_millis(args.interval_ms),
    )
    .await?;
    println!(
        "sent {} packets: {} accepted, {} rejected",
        summary.sent, summary.accepted, summary.rejected
    );
    Ok(())
}
