//! Batch forecasts over a recorded GPS file.
//!
//! ```bash
//! offline_predictor --model path_model.json --scaler scaler.json \
//!     --data bus_gps_data.json --steps 5 [BUS_ID]
//! ```

use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bus_eta::{
    eta::{DEFAULT_BASELINE_SECS, FALLBACK_SPEED_MPS},
    types::{BusTrack, DEFAULT_PREDICT_STEPS, MAX_PREDICT_STEPS, SEQUENCE_LENGTH},
    AffineScaler, EtaParams, FeatureCodec, ForecastError, Forecaster, PredictionOut,
    TrackForecast,
};

#[derive(Parser, Debug)]
#[command(name = "offline_predictor")]
#[command(about = "Forecast next bus positions and ETAs from a recorded GPS file")]
struct Args {
    /// Step model (.json linear weights, or .pt TorchScript with the torch feature)
    #[arg(long)]
    model: String,

    /// Fitted scaler JSON
    #[arg(long)]
    scaler: String,

    /// JSON array of {bus_id, data: [...]}
    #[arg(long, default_value = "bus_gps_data.json")]
    data: String,

    #[arg(long, default_value_t = DEFAULT_PREDICT_STEPS, value_parser = parse_steps)]
    steps: usize,

    /// Speed assumed when recent fixes give none (m/s)
    #[arg(long, default_value_t = FALLBACK_SPEED_MPS, value_parser = parse_positive)]
    fallback_speed: f64,

    /// Sampling interval assumed when history has a single fix (s)
    #[arg(long, default_value_t = DEFAULT_BASELINE_SECS, value_parser = parse_positive)]
    default_baseline: f64,

    /// Print PredictionOut JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Only forecast this bus
    bus_id: Option<String>,
}

fn parse_steps(s: &str) -> Result<usize, String> {
    let steps: usize = s.parse().map_err(|e| format!("{}", e))?;
    if (1..=MAX_PREDICT_STEPS).contains(&steps) {
        Ok(steps)
    } else {
        Err(format!("must be between 1 and {}", MAX_PREDICT_STEPS))
    }
}

fn parse_positive(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err("must be a positive number".to_string())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "bus_eta=info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let model = bus_eta::load_model(&args.model)?;
    let scaler = AffineScaler::load(&args.scaler)?;
    tracing::info!("loaded model {} and scaler {}", args.model, args.scaler);

    let forecaster = Forecaster::new(
        model,
        Arc::new(FeatureCodec::new(Arc::new(scaler))),
        EtaParams::new(args.fallback_speed, args.default_baseline)?,
    );

    let txt = fs::read_to_string(&args.data)
        .with_context(|| format!("failed to read gps data at {}", args.data))?;
    let tracks: Vec<BusTrack> =
        serde_json::from_str(&txt).with_context(|| format!("failed to parse {}", args.data))?;

    let results = forecaster.forecast_tracks(&tracks, args.bus_id.as_deref(), args.steps);
    if results.is_empty() {
        tracing::warn!("no matching buses in {}", args.data);
    }

    let mut outputs = Vec::new();
    for TrackForecast { track, result } in results {
        let predictions = match result {
            Ok(p) => p,
            Err(ForecastError::InsufficientHistory { available, .. }) => {
                if !args.json {
                    println!("\n--- Bus: {} entries: {}", track.bus_id, available);
                    println!("Not enough data (need at least {} points). Skipping.", SEQUENCE_LENGTH);
                }
                continue;
            }
            Err(e) => {
                tracing::warn!("skipping bus {}: {}", track.bus_id, e);
                continue;
            }
        };

        if args.json {
            outputs.push(PredictionOut {
                bus_id: track.bus_id.clone(),
                generated_at_ms: Utc::now().timestamp_millis(),
                predictions,
            });
            continue;
        }

        println!("\n--- Bus: {} entries: {}", track.bus_id, track.data.len());
        println!("ETA / delay estimates (per step):");
        for p in &predictions {
            println!(
                "  step {}  lat {:.6}  lon {:.6}  eta_s {}  delay_s {}",
                p.step, p.latitude, p.longitude, p.eta_seconds_from_last, p.delay_seconds_vs_baseline
            );
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        println!("\nDone.");
    }
    Ok(())
}
