use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

/// Number of consecutive samples the model consumes (L).
pub const SEQUENCE_LENGTH: usize = 3;
/// latitude, longitude, speed, heading (F).
pub const NUM_FEATURES: usize = 4;
pub const DEFAULT_PREDICT_STEPS: usize = 5;
/// Largest horizon a single forecast request may ask for.
pub const MAX_PREDICT_STEPS: usize = 64;

/// `[latitude, longitude, speed, heading]`, raw or normalized depending on who holds it.
pub type FeatureVector = [f64; NUM_FEATURES];

/// Exactly `SEQUENCE_LENGTH` normalized feature vectors, oldest first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window([FeatureVector; SEQUENCE_LENGTH]);

impl Window {
    pub fn new(rows: [FeatureVector; SEQUENCE_LENGTH]) -> Self {
        Self(rows)
    }

    /// Builds a window from the most recent `SEQUENCE_LENGTH` rows.
    /// Shorter histories are rejected, never padded.
    pub fn from_latest(rows: &[FeatureVector]) -> Result<Self, ForecastError> {
        if rows.len() < SEQUENCE_LENGTH {
            return Err(ForecastError::InsufficientHistory {
                required: SEQUENCE_LENGTH,
                available: rows.len(),
            });
        }
        let mut out = [[0.0; NUM_FEATURES]; SEQUENCE_LENGTH];
        out.copy_from_slice(&rows[rows.len() - SEQUENCE_LENGTH..]);
        Ok(Self(out))
    }

    pub fn rows(&self) -> &[FeatureVector; SEQUENCE_LENGTH] {
        &self.0
    }

    pub fn last(&self) -> &FeatureVector {
        &self.0[SEQUENCE_LENGTH - 1]
    }

    /// Appends `next`, dropping the oldest row so the length stays fixed.
    pub fn push(&mut self, next: FeatureVector) {
        self.0.rotate_left(1);
        self.0[SEQUENCE_LENGTH - 1] = next;
    }

    /// Row-major `L x F` values, the layout models take as input.
    pub fn flatten(&self) -> Vec<f64> {
        self.0.iter().flatten().copied().collect()
    }
}

/// A timestamped position, the part of a sample the ETA estimator needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

/// One observation of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub heading: f64,
}

impl Sample {
    pub fn features(&self) -> FeatureVector {
        [self.latitude, self.longitude, self.speed, self.heading]
    }

    pub fn fix(&self) -> Fix {
        Fix {
            timestamp: self.timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

// ---------- Wire types ----------

/// Timestamps arrive either as ISO-8601 text or as epoch seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

impl RawTimestamp {
    pub fn parse(&self) -> Result<DateTime<Utc>, ForecastError> {
        match self {
            RawTimestamp::Epoch(secs) => from_epoch_secs(*secs, &secs.to_string()),
            RawTimestamp::Text(s) => parse_timestamp(s),
        }
    }
}

/// One entry of a bus track, as found in the offline data file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpsEntry {
    pub timestamp: RawTimestamp,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub heading: f64,
}

impl GpsEntry {
    pub fn to_sample(&self) -> Result<Sample, ForecastError> {
        Ok(Sample {
            timestamp: self.timestamp.parse()?,
            latitude: self.latitude,
            longitude: self.longitude,
            speed: self.speed,
            heading: self.heading,
        })
    }
}

/// A single live GPS report pushed by a vehicle: a track entry tagged with its bus.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpsPacket {
    pub bus_id: String,
    #[serde(flatten)]
    pub entry: GpsEntry,
}

impl GpsPacket {
    pub fn to_sample(&self) -> Result<Sample, ForecastError> {
        self.entry.to_sample()
    }
}

/// Full recorded history of one bus.
#[derive(Debug, Clone, Deserialize)]
pub struct BusTrack {
    pub bus_id: String,
    #[serde(default)]
    pub data: Vec<GpsEntry>,
}

impl BusTrack {
    /// Parses every entry and sorts them chronologically.
    pub fn samples(&self) -> Result<Vec<Sample>, ForecastError> {
        let mut samples = self
            .data
            .iter()
            .map(GpsEntry::to_sample)
            .collect::<Result<Vec<_>, _>>()?;
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    /// Entries in file order, each tagged with this bus id.
    pub fn packets(&self) -> impl Iterator<Item = GpsPacket> + '_ {
        self.data.iter().map(move |entry| GpsPacket {
            bus_id: self.bus_id.clone(),
            entry: entry.clone(),
        })
    }
}

/// Per-step arrival estimate for one forecast point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaEstimate {
    pub step: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub eta_seconds_from_last: i64,
    pub delay_seconds_vs_baseline: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionOut {
    pub bus_id: String,
    pub generated_at_ms: i64,
    pub predictions: Vec<EtaEstimate>,
}

// ---------- Timestamp parsing ----------

/// Accepts RFC 3339, zone-less ISO-8601 (read as UTC) or epoch seconds.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ForecastError> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(secs) = s.parse::<f64>() {
        return from_epoch_secs(secs, raw);
    }
    Err(ForecastError::timestamp_parse(
        raw,
        "expected ISO-8601 or epoch seconds",
    ))
}

fn from_epoch_secs(secs: f64, raw: &str) -> Result<DateTime<Utc>, ForecastError> {
    if !secs.is_finite() {
        return Err(ForecastError::timestamp_parse(raw, "epoch is not finite"));
    }
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
        .ok_or_else(|| ForecastError::timestamp_parse(raw, "epoch out of range"))
}
