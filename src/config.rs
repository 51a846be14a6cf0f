use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::{env, fs};

use crate::eta::{EtaParams, DEFAULT_BASELINE_SECS, FALLBACK_SPEED_MPS};
use crate::types::{DEFAULT_PREDICT_STEPS, MAX_PREDICT_STEPS};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub model_path: Option<String>,
    pub scaler_path: Option<String>,
    pub predict_steps: usize,
    /// Requests asking for a longer horizon are rejected.
    pub max_predict_steps: usize,
    pub fallback_speed_mps: f64,
    pub default_baseline_secs: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            model_path: None,
            scaler_path: None,
            predict_steps: DEFAULT_PREDICT_STEPS,
            max_predict_steps: MAX_PREDICT_STEPS,
            fallback_speed_mps: FALLBACK_SPEED_MPS,
            default_baseline_secs: DEFAULT_BASELINE_SECS,
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &str) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path))?;
        let cfg: Self = serde_json::from_str(&data)
            .with_context(|| format!("invalid config JSON in {}", path))?;
        cfg.validate()
            .with_context(|| format!("invalid config in {}", path))?;
        Ok(cfg)
    }

    /// `CONFIG_PATH` file if set, then individual env var overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match env::var("CONFIG_PATH") {
            Ok(path) => Self::load(&path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_predict_steps >= 1,
            "max_predict_steps must be at least 1"
        );
        ensure!(
            (1..=self.max_predict_steps).contains(&self.predict_steps),
            "predict_steps must be between 1 and {}, got {}",
            self.max_predict_steps,
            self.predict_steps
        );
        self.eta_params()?;
        Ok(())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("MODEL_PATH") {
            self.model_path = Some(v);
        }
        if let Some(v) = var("SCALER_PATH") {
            self.scaler_path = Some(v);
        }
        if let Some(v) = var("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = var("PORT") {
            let port: u16 = v.parse().with_context(|| format!("PORT {:?} is not a port", v))?;
            let host = self.bind_addr.rsplit_once(':').map_or("0.0.0.0", |(h, _)| h);
            self.bind_addr = format!("{}:{}", host, port);
        }
        if let Some(v) = var("PREDICT_STEPS") {
            self.predict_steps = v
                .parse()
                .with_context(|| format!("PREDICT_STEPS {:?} is not a number", v))?;
        }
        if let Some(v) = var("MAX_PREDICT_STEPS") {
            self.max_predict_steps = v
                .parse()
                .with_context(|| format!("MAX_PREDICT_STEPS {:?} is not a number", v))?;
        }
        Ok(())
    }

    pub fn model_path(&self) -> Result<&str> {
        self.model_path.as_deref().context("MODEL_PATH not set")
    }

    pub fn scaler_path(&self) -> Result<&str> {
        self.scaler_path.as_deref().context("SCALER_PATH not set")
    }

    pub fn eta_params(&self) -> Result<EtaParams> {
        EtaParams::new(self.fallback_speed_mps, self.default_baseline_secs)
    }
}
