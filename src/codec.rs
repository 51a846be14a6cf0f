use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::CodecError;
use crate::types::{FeatureVector, NUM_FEATURES};

/// Fitted, invertible, row-wise transform between raw and normalized space.
pub trait FeatureTransform: Send + Sync {
    fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, CodecError>;
    fn inverse_transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, CodecError>;
}

/// Per-column `normalized = raw * scale + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineScaler {
    scale: Vec<f64>,
    offset: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ScalerFile {
    MinMax { data_min: Vec<f64>, data_max: Vec<f64> },
    Standard { mean: Vec<f64>, std: Vec<f64> },
}

impl AffineScaler {
    pub fn new(scale: Vec<f64>, offset: Vec<f64>) -> Result<Self, CodecError> {
        if scale.len() != offset.len() {
            return Err(CodecError::InvalidScaler(format!(
                "{} scale columns but {} offset columns",
                scale.len(),
                offset.len()
            )));
        }
        if scale.iter().chain(&offset).any(|v| !v.is_finite()) || scale.contains(&0.0) {
            return Err(CodecError::InvalidScaler(
                "scale and offset must be finite with non-zero scale".into(),
            ));
        }
        Ok(Self { scale, offset })
    }

    /// Maps each column's `[min, max]` onto `[0, 1]`.
    pub fn min_max(data_min: &[f64], data_max: &[f64]) -> Result<Self, CodecError> {
        if data_min.len() != data_max.len() {
            return Err(CodecError::InvalidScaler(
                "data_min and data_max differ in length".into(),
            ));
        }
        let scale: Vec<f64> = data_min
            .iter()
            .zip(data_max)
            .map(|(lo, hi)| 1.0 / non_zero_range(hi - lo))
            .collect();
        let offset = data_min.iter().zip(&scale).map(|(lo, s)| -lo * s).collect();
        Self::new(scale, offset)
    }

    /// Zero mean, unit variance per column.
    pub fn standard(mean: &[f64], std: &[f64]) -> Result<Self, CodecError> {
        if mean.len() != std.len() {
            return Err(CodecError::InvalidScaler("mean and std differ in length".into()));
        }
        let scale: Vec<f64> = std.iter().map(|s| 1.0 / non_zero_range(*s)).collect();
        let offset = mean.iter().zip(&scale).map(|(m, s)| -m * s).collect();
        Self::new(scale, offset)
    }

    pub fn identity(width: usize) -> Self {
        Self {
            scale: vec![1.0; width],
            offset: vec![0.0; width],
        }
    }

    pub fn load(path: &str) -> Result<Self> {
        let txt = fs::read_to_string(Path::new(path))
            .with_context(|| format!("failed to read scaler at {}", path))?;
        Self::from_json(&txt).with_context(|| format!("failed to parse scaler {}", path))
    }

    pub fn from_json(txt: &str) -> Result<Self> {
        let file: ScalerFile = serde_json::from_str(txt)?;
        let scaler = match file {
            ScalerFile::MinMax { data_min, data_max } => Self::min_max(&data_min, &data_max)?,
            ScalerFile::Standard { mean, std } => Self::standard(&mean, &std)?,
        };
        Ok(scaler)
    }

    pub fn width(&self) -> usize {
        self.scale.len()
    }

    fn check_width(&self, rows: &[Vec<f64>]) -> Result<(), CodecError> {
        match rows.iter().find(|r| r.len() != self.width()) {
            Some(bad) => Err(CodecError::WidthMismatch {
                expected: self.width(),
                actual: bad.len(),
            }),
            None => Ok(()),
        }
    }
}

// constant columns keep unit scale instead of dividing by zero
fn non_zero_range(range: f64) -> f64 {
    if range == 0.0 {
        1.0
    } else {
        range
    }
}

impl FeatureTransform for AffineScaler {
    fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, CodecError> {
        self.check_width(rows)?;
        Ok(rows
            .iter()
            .map(|r| {
                r.iter()
                    .zip(self.scale.iter().zip(&self.offset))
                    .map(|(x, (s, o))| x * s + o)
                    .collect()
            })
            .collect())
    }

    fn inverse_transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, CodecError> {
        self.check_width(rows)?;
        Ok(rows
            .iter()
            .map(|r| {
                r.iter()
                    .zip(self.scale.iter().zip(&self.offset))
                    .map(|(y, (s, o))| (y - o) / s)
                    .collect()
            })
            .collect())
    }
}

/// Converts between raw physical units and the model's normalized space.
///
/// `denormalize` only has latitude and longitude to invert, so it zero-pads
/// speed and heading before calling the inverse transform and drops them
/// afterwards. That is only exact when the injected transform treats columns
/// independently (min-max or z-score scaling). The codec does not check this;
/// it is a precondition on whoever supplies the transform.
#[derive(Clone)]
pub struct FeatureCodec {
    transform: Arc<dyn FeatureTransform>,
}

impl FeatureCodec {
    pub fn new(transform: Arc<dyn FeatureTransform>) -> Self {
        Self { transform }
    }

    pub fn normalize(&self, raw: &[FeatureVector]) -> Result<Vec<FeatureVector>, CodecError> {
        let rows: Vec<Vec<f64>> = raw.iter().map(|r| r.to_vec()).collect();
        self.transform
            .transform(&rows)?
            .into_iter()
            .map(to_feature_vector)
            .collect()
    }

    pub fn normalize_one(&self, raw: &FeatureVector) -> Result<FeatureVector, CodecError> {
        let mut out = self.normalize(std::slice::from_ref(raw))?;
        out.pop().ok_or(CodecError::WidthMismatch {
            expected: NUM_FEATURES,
            actual: 0,
        })
    }

    pub fn denormalize(&self, partial: &[(f64, f64)]) -> Result<Vec<(f64, f64)>, CodecError> {
        let padded: Vec<Vec<f64>> = partial
            .iter()
            .map(|&(lat, lon)| {
                let mut row = vec![0.0; NUM_FEATURES];
                row[0] = lat;
                row[1] = lon;
                row
            })
            .collect();
        self.transform
            .inverse_transform(&padded)?
            .into_iter()
            .map(|row| match row.as_slice() {
                [lat, lon, ..] => Ok((*lat, *lon)),
                _ => Err(CodecError::WidthMismatch {
                    expected: NUM_FEATURES,
                    actual: row.len(),
                }),
            })
            .collect()
    }
}

fn to_feature_vector(row: Vec<f64>) -> Result<FeatureVector, CodecError> {
    let actual = row.len();
    row.try_into().map_err(|_| CodecError::WidthMismatch {
        expected: NUM_FEATURES,
        actual,
    })
}
