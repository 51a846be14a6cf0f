use crate::error::ForecastError;
use crate::model::StepModel;
use crate::types::{FeatureVector, Window, MAX_PREDICT_STEPS, NUM_FEATURES};

/// One predicted future step, still in normalized space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastStep {
    /// 1-based, step 1 is the nearest future.
    pub step: usize,
    /// Predicted lat/lon with speed and heading carried over from the window.
    pub normalized: FeatureVector,
}

impl ForecastStep {
    pub fn latlon(&self) -> (f64, f64) {
        (self.normalized[0], self.normalized[1])
    }
}

/// Rolls `model` forward `steps` times from `seed`.
///
/// Only latitude and longitude are taken from the model; speed and heading of
/// each synthesized row are copied from the newest row of the current window.
/// Any model failure aborts the whole rollout with no partial result.
pub fn forecast(
    model: &dyn StepModel,
    seed: &Window,
    steps: usize,
) -> Result<Vec<ForecastStep>, ForecastError> {
    if steps == 0 {
        return Err(ForecastError::InvalidHorizon);
    }

    let mut window = *seed;
    let mut out = Vec::with_capacity(steps.min(MAX_PREDICT_STEPS));
    for step in 1..=steps {
        let pred = model
            .predict_one_step(&window)
            .map_err(|e| ForecastError::ModelInference(format!("step {}: {:#}", step, e)))?;
        let (lat, lon) = position_from_output(&pred)
            .map_err(|msg| ForecastError::ModelInference(format!("step {}: {}", step, msg)))?;

        let carried = window.last();
        let next = [lat, lon, carried[2], carried[3]];
        out.push(ForecastStep {
            step,
            normalized: next,
        });
        window.push(next);
    }
    Ok(out)
}

fn position_from_output(pred: &[f64]) -> Result<(f64, f64), String> {
    if pred.len() != 2 && pred.len() != NUM_FEATURES {
        return Err(format!(
            "model returned {} values, expected 2 or {}",
            pred.len(),
            NUM_FEATURES
        ));
    }
    if pred.iter().any(|v| !v.is_finite()) {
        return Err(format!("model returned non-finite output {:?}", pred));
    }
    Ok((pred[0], pred[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seed() -> Window {
        Window::new([
            [0.10, 0.20, 0.50, 0.25],
            [0.11, 0.21, 0.55, 0.30],
            [0.12, 0.22, 0.60, 0.35],
        ])
    }

    fn step_north(w: &Window) -> (f64, f64) {
        (w.last()[0] + 0.01, w.last()[1])
    }

    #[test]
    fn test_returns_exactly_requested_steps() {
        let model = |w: &Window| -> Result<Vec<f64>> {
            let (lat, lon) = step_north(w);
            Ok(vec![lat, lon])
        };
        for steps in [1, 5, 12] {
            let out = forecast(&model, &seed(), steps).unwrap();
            assert_eq!(out.len(), steps);
            for (i, s) in out.iter().enumerate() {
                assert_eq!(s.step, i + 1);
            }
        }
    }

    #[test]
    fn test_rollout_feeds_predictions_back() {
        let model = |w: &Window| -> Result<Vec<f64>> {
            let (lat, lon) = step_north(w);
            Ok(vec![lat, lon])
        };
        let out = forecast(&model, &seed(), 3).unwrap();
        assert!((out[0].latlon().0 - 0.13).abs() < 1e-12);
        assert!((out[1].latlon().0 - 0.14).abs() < 1e-12);
        assert!((out[2].latlon().0 - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_speed_and_heading_carried_forward() {
        // model tries to change speed and heading; they must be ignored
        let model = |w: &Window| -> Result<Vec<f64>> {
            let (lat, lon) = step_north(w);
            Ok(vec![lat, lon, 0.99, 0.99])
        };
        for s in forecast(&model, &seed(), 4).unwrap() {
            assert_eq!(s.normalized[2], 0.60);
            assert_eq!(s.normalized[3], 0.35);
        }
    }

    #[test]
    fn test_output_width_does_not_matter() {
        let narrow = |w: &Window| -> Result<Vec<f64>> {
            let (lat, lon) = step_north(w);
            Ok(vec![lat, lon])
        };
        let wide = |w: &Window| -> Result<Vec<f64>> {
            let (lat, lon) = step_north(w);
            Ok(vec![lat, lon, -7.0, 123.0])
        };
        assert_eq!(
            forecast(&narrow, &seed(), 5).unwrap(),
            forecast(&wide, &seed(), 5).unwrap()
        );
    }

    #[test]
    fn test_failure_mid_rollout_returns_nothing() {
        let calls = AtomicUsize::new(0);
        let model = |w: &Window| -> Result<Vec<f64>> {
            if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                return Err(anyhow!("session crashed"));
            }
            let (lat, lon) = step_north(w);
            Ok(vec![lat, lon])
        };
        match forecast(&model, &seed(), 5) {
            Err(ForecastError::ModelInference(msg)) => {
                assert!(msg.contains("step 3"), "{}", msg);
                assert!(msg.contains("session crashed"), "{}", msg);
            }
            other => panic!("expected ModelInference, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_arity_is_inference_error() {
        let model = |_: &Window| -> Result<Vec<f64>> { Ok(vec![0.1, 0.2, 0.3]) };
        assert!(matches!(
            forecast(&model, &seed(), 2),
            Err(ForecastError::ModelInference(_))
        ));
        let model = |_: &Window| -> Result<Vec<f64>> { Ok(vec![f64::NAN, 0.2]) };
        assert!(matches!(
            forecast(&model, &seed(), 2),
            Err(ForecastError::ModelInference(_))
        ));
    }

    #[test]
    fn test_zero_steps_rejected() {
        let model = |_: &Window| -> Result<Vec<f64>> { Ok(vec![0.0, 0.0]) };
        assert!(matches!(
            forecast(&model, &seed(), 0),
            Err(ForecastError::InvalidHorizon)
        ));
    }

    #[test]
    fn test_horizon_past_the_capacity_hint_still_completes() {
        let model = |w: &Window| -> Result<Vec<f64>> {
            let (lat, lon) = step_north(w);
            Ok(vec![lat, lon])
        };
        let out = forecast(&model, &seed(), MAX_PREDICT_STEPS + 3).unwrap();
        assert_eq!(out.len(), MAX_PREDICT_STEPS + 3);
    }

    #[test]
    fn test_seed_window_not_mutated() {
        let model = |w: &Window| -> Result<Vec<f64>> {
            let (lat, lon) = step_north(w);
            Ok(vec![lat, lon])
        };
        let s = seed();
        forecast(&model, &s, 3).unwrap();
        assert_eq!(s, seed());
    }
}
