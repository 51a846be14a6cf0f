use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{fs, path::Path, sync::Arc};

use crate::types::{Window, NUM_FEATURES, SEQUENCE_LENGTH};

/// A fitted one-step predictor: `L x F` normalized window in, next step out.
///
/// Implementations return either `[lat, lon]` or a full `F`-wide vector.
/// They must be deterministic for a fixed window.
pub trait StepModel: Send + Sync {
    fn predict_one_step(&self, window: &Window) -> Result<Vec<f64>>;
}

impl<F> StepModel for F
where
    F: Fn(&Window) -> Result<Vec<f64>> + Send + Sync,
{
    fn predict_one_step(&self, window: &Window) -> Result<Vec<f64>> {
        self(window)
    }
}

#[derive(Deserialize)]
struct LinearJson {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

/// Dense affine map over the flattened window: `y = W x + b`.
#[derive(Debug, Clone)]
pub struct LinearStepModel {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

impl LinearStepModel {
    pub fn new(weights: Vec<Vec<f64>>, bias: Vec<f64>) -> Result<Self> {
        let in_dim = SEQUENCE_LENGTH * NUM_FEATURES;
        if weights.len() != bias.len() {
            bail!("{} weight rows but {} bias terms", weights.len(), bias.len());
        }
        if bias.len() != 2 && bias.len() != NUM_FEATURES {
            bail!("output width must be 2 or {}, got {}", NUM_FEATURES, bias.len());
        }
        if let Some(row) = weights.iter().find(|row| row.len() != in_dim) {
            bail!("weight row has {} inputs, expected {}", row.len(), in_dim);
        }
        Ok(Self { weights, bias })
    }

    pub fn load(path: &str) -> Result<Self> {
        let txt = fs::read_to_string(Path::new(path))
            .with_context(|| format!("failed to read model at {}", path))?;
        let raw: LinearJson =
            serde_json::from_str(&txt).with_context(|| format!("failed to parse model {}", path))?;
        Self::new(raw.weights, raw.bias)
    }
}

impl StepModel for LinearStepModel {
    fn predict_one_step(&self, window: &Window) -> Result<Vec<f64>> {
        let x = window.flatten();
        Ok(self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(&x).map(|(w, v)| w * v).sum::<f64>() + b)
            .collect())
    }
}

#[cfg(feature = "torch")]
pub use torch::TorchStepModel;

#[cfg(feature = "torch")]
mod torch {
    use super::*;
    use tch::{kind::Kind, CModule, Device, Tensor};

    /// TorchScript model run on CPU.
    pub struct TorchStepModel {
        model: CModule,
        device: Device,
        pub out_dim: usize,
    }

    impl TorchStepModel {
        pub fn load(model_path: &str) -> Result<Self> {
            let device = Device::Cpu;
            let model = CModule::load_on_device(model_path, device)
                .with_context(|| format!("failed to load TorchScript {}", model_path))?;

            // Probe output shape with a dummy forward: expect [1, 2] or [1, F]
            let dummy = Tensor::zeros(
                [1, SEQUENCE_LENGTH as i64, NUM_FEATURES as i64],
                (Kind::Float, device),
            );
            let sz = model.forward_ts(&[dummy])?.size();
            if sz.len() != 2 || sz[0] != 1 || (sz[1] != 2 && sz[1] != NUM_FEATURES as i64) {
                bail!("unexpected model output size: {:?}", sz);
            }

            Ok(Self {
                model,
                device,
                out_dim: sz[1] as usize,
            })
        }
    }

    impl StepModel for TorchStepModel {
        fn predict_one_step(&self, window: &Window) -> Result<Vec<f64>> {
            let x: Vec<f32> = window.flatten().into_iter().map(|v| v as f32).collect();
            let input = Tensor::from_slice(&x)
                .reshape([1, SEQUENCE_LENGTH as i64, NUM_FEATURES as i64])
                .to_device(self.device);

            let out = self
                .model
                .forward_ts(&[input])?
                .to_kind(Kind::Float)
                .view([-1]);
            let values = Vec::<f32>::try_from(&out)?;
            Ok(values.into_iter().map(f64::from).collect())
        }
    }
}

/// Loads a model, choosing the backend from the file extension.
pub fn load_model(path: &str) -> Result<Arc<dyn StepModel>> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match ext {
        "json" => Ok(Arc::new(LinearStepModel::load(path)?)),
        #[cfg(feature = "torch")]
        "pt" | "ts" => Ok(Arc::new(TorchStepModel::load(path)?)),
        #[cfg(not(feature = "torch"))]
        "pt" | "ts" => bail!("{} is a TorchScript model; rebuild with --features torch", path),
        other => bail!("unsupported model format {:?} for {}", other, path),
    }
}
