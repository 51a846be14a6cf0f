//! Near-future position forecasting for buses and the arrival-time and
//! schedule-delay estimates derived from it.
//!
//! Raw GPS samples are normalized by a fitted scaler, buffered per bus in a
//! short sliding window, rolled forward by a learned one-step model, and the
//! denormalized forecast is turned into per-step ETAs and delays.

pub mod codec;
pub mod config;
pub mod error;
pub mod eta;
pub mod geo;
pub mod model;
pub mod pipeline;
pub mod replay;
pub mod rollout;
pub mod server;
pub mod store;
pub mod types;

pub use codec::{AffineScaler, FeatureCodec, FeatureTransform};
pub use error::{CodecError, ForecastError};
pub use eta::EtaParams;
pub use model::{load_model, LinearStepModel, StepModel};
pub use pipeline::{Forecaster, TrackForecast};
pub use store::SlidingWindowStore;
pub use types::{EtaEstimate, PredictionOut, Sample, Window};
