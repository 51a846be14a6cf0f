use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::FeatureCodec;
use crate::error::ForecastError;
use crate::eta::{self, EtaParams};
use crate::model::StepModel;
use crate::rollout;
use crate::store::SlidingWindowStore;
use crate::types::{BusTrack, EtaEstimate, Fix, Sample, Window, MAX_PREDICT_STEPS, SEQUENCE_LENGTH};

/// Seed window -> rollout -> denormalize -> ETA, with model and codec injected.
#[derive(Clone)]
pub struct Forecaster {
    model: Arc<dyn StepModel>,
    codec: Arc<FeatureCodec>,
    params: EtaParams,
    max_steps: usize,
}

/// Result for one recorded track of a batch run.
#[derive(Debug)]
pub struct TrackForecast<'a> {
    pub track: &'a BusTrack,
    pub result: Result<Vec<EtaEstimate>, ForecastError>,
}

impl Forecaster {
    pub fn new(model: Arc<dyn StepModel>, codec: Arc<FeatureCodec>, params: EtaParams) -> Self {
        Self {
            model,
            codec,
            params,
            max_steps: MAX_PREDICT_STEPS,
        }
    }

    /// Caps the horizon any single forecast may request.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn codec(&self) -> Arc<FeatureCodec> {
        Arc::clone(&self.codec)
    }

    /// Forecasts from an already normalized seed window and the recent raw fixes.
    pub fn forecast_window(
        &self,
        seed: &Window,
        history: &[Fix],
        steps: usize,
    ) -> Result<Vec<EtaEstimate>, ForecastError> {
        if steps > self.max_steps {
            return Err(ForecastError::HorizonTooLong {
                requested: steps,
                max: self.max_steps,
            });
        }
        let forecast = rollout::forecast(self.model.as_ref(), seed, steps)?;
        let normalized: Vec<(f64, f64)> = forecast.iter().map(|s| s.latlon()).collect();
        let positions = self.codec.denormalize(&normalized)?;
        Ok(eta::estimate(history, &positions, &self.params))
    }

    /// Streaming mode: forecast for an entity buffered in `store`.
    ///
    /// The lock is held only while the snapshot is copied out, not during inference.
    pub fn forecast_entity(
        &self,
        store: &Mutex<SlidingWindowStore>,
        entity_id: &str,
        steps: usize,
    ) -> Result<Vec<EtaEstimate>, ForecastError> {
        let (seed, history) = store.lock().snapshot(entity_id)?;
        let out = self.forecast_window(&seed, &history, steps)?;
        tracing::debug!("forecast {} steps for {}", out.len(), entity_id);
        Ok(out)
    }

    /// Batch mode: forecast from a chronological list of raw samples.
    pub fn forecast_history(
        &self,
        samples: &[Sample],
        steps: usize,
    ) -> Result<Vec<EtaEstimate>, ForecastError> {
        if samples.len() < SEQUENCE_LENGTH {
            return Err(ForecastError::InsufficientHistory {
                required: SEQUENCE_LENGTH,
                available: samples.len(),
            });
        }
        let recent = &samples[samples.len() - SEQUENCE_LENGTH..];
        let raw: Vec<_> = recent.iter().map(Sample::features).collect();
        let seed = Window::from_latest(&self.codec.normalize(&raw)?)?;
        let history: Vec<Fix> = recent.iter().map(Sample::fix).collect();
        self.forecast_window(&seed, &history, steps)
    }

    /// Batch mode over a recorded track whose entries may be unsorted.
    pub fn forecast_track(
        &self,
        track: &BusTrack,
        steps: usize,
    ) -> Result<Vec<EtaEstimate>, ForecastError> {
        let samples = track.samples()?;
        self.forecast_history(&samples, steps)
    }

    /// Forecasts every track (or only `bus_id`), in file order. A failing
    /// track is reported in its own result and never stops the rest.
    pub fn forecast_tracks<'a>(
        &self,
        tracks: &'a [BusTrack],
        bus_id: Option<&str>,
        steps: usize,
    ) -> Vec<TrackForecast<'a>> {
        tracks
            .iter()
            .filter(|t| bus_id.map_or(true, |id| t.bus_id == id))
            .map(|track| TrackForecast {
                track,
                result: self.forecast_track(track, steps),
            })
            .collect()
    }
}
