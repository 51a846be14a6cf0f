use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use bus_eta::{
    config::ServiceConfig,
    server::{self, AppState},
    types::{NUM_FEATURES, SEQUENCE_LENGTH},
    AffineScaler, FeatureCodec, Forecaster, Window,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "bus_eta=info,tower_http=info".into()),
        )
        .init();

    let cfg = ServiceConfig::from_env()?;
    let model = bus_eta::load_model(cfg.model_path()?)?;
    let scaler = AffineScaler::load(cfg.scaler_path()?)?;
    tracing::info!(
        "loaded model {} and scaler {}",
        cfg.model_path()?,
        cfg.scaler_path()?
    );

    let codec = Arc::new(FeatureCodec::new(Arc::new(scaler)));
    let forecaster =
        Forecaster::new(model, codec, cfg.eta_params()?).with_max_steps(cfg.max_predict_steps);

    // Warmup so a broken model fails at startup rather than on the first request
    let blank = Window::new([[0.0; NUM_FEATURES]; SEQUENCE_LENGTH]);
    forecaster
        .forecast_window(&blank, &[], 1)
        .context("warmup forward failed")?;
    tracing::info!("warmup forward ok");

    let app = server::router(AppState::new(forecaster, cfg.predict_steps));

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;
    tracing::info!(
        "listening on {} (horizon {} steps, max {})",
        cfg.bind_addr,
        cfg.predict_steps,
        cfg.max_predict_steps
    );
    axum::serve(listener, app).await?;
    Ok(())
}
