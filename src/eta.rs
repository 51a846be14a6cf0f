use anyhow::{ensure, Result};

use crate::geo;
use crate::types::{EtaEstimate, Fix};

pub const FALLBACK_SPEED_MPS: f64 = 8.0;
pub const DEFAULT_BASELINE_SECS: f64 = 300.0;

/// Fallbacks used when the history cannot provide a speed or a baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaParams {
    pub fallback_speed_mps: f64,
    pub default_baseline_secs: f64,
}

impl Default for EtaParams {
    fn default() -> Self {
        Self {
            fallback_speed_mps: FALLBACK_SPEED_MPS,
            default_baseline_secs: DEFAULT_BASELINE_SECS,
        }
    }
}

impl EtaParams {
    /// Both fallbacks must be positive and finite.
    pub fn new(fallback_speed_mps: f64, default_baseline_secs: f64) -> Result<Self> {
        ensure!(
            fallback_speed_mps.is_finite() && fallback_speed_mps > 0.0,
            "fallback speed must be a positive number of m/s, got {}",
            fallback_speed_mps
        );
        ensure!(
            default_baseline_secs.is_finite() && default_baseline_secs > 0.0,
            "default baseline must be a positive number of seconds, got {}",
            default_baseline_secs
        );
        Ok(Self {
            fallback_speed_mps,
            default_baseline_secs,
        })
    }
}

/// Speed over the last two fixes in m/s, or the fallback when it is not positive.
pub fn instantaneous_speed(history: &[Fix], params: &EtaParams) -> f64 {
    let measured = match history {
        [.., prev, last] => {
            let dt = seconds_between(prev, last);
            if dt > 0.0 {
                geo::distance(prev.latitude, prev.longitude, last.latitude, last.longitude) / dt
            } else {
                f64::NAN
            }
        }
        _ => f64::NAN,
    };
    if measured.is_finite() && measured > 0.0 {
        measured
    } else {
        params.fallback_speed_mps
    }
}

/// Mean interval between consecutive fixes over the whole history.
pub fn baseline_interval(history: &[Fix], params: &EtaParams) -> f64 {
    if history.len() < 2 {
        return params.default_baseline_secs;
    }
    let total: f64 = history
        .windows(2)
        .map(|pair| seconds_between(&pair[0], &pair[1]))
        .sum();
    total / (history.len() - 1) as f64
}

/// Turns forecast positions into cumulative ETAs and delays against the
/// historical sampling interval.
///
/// `history` is chronological and its last fix is the last known real
/// position. Returns nothing when `history` is empty.
pub fn estimate(history: &[Fix], forecast: &[(f64, f64)], params: &EtaParams) -> Vec<EtaEstimate> {
    let Some(last) = history.last() else {
        return Vec::new();
    };
    let speed = instantaneous_speed(history, params);
    let baseline = baseline_interval(history, params);

    let mut prev = (last.latitude, last.longitude);
    let mut cumulative = 0.0;
    let mut out = Vec::with_capacity(forecast.len());
    for (i, &(lat, lon)) in forecast.iter().enumerate() {
        let step = i + 1;
        let dist = geo::distance(prev.0, prev.1, lat, lon);
        cumulative += if speed > 0.0 { dist / speed } else { baseline };
        let delay = cumulative - baseline * step as f64;

        out.push(EtaEstimate {
            step,
            latitude: lat,
            longitude: lon,
            eta_seconds_from_last: cumulative as i64,
            delay_seconds_vs_baseline: delay as i64,
        });
        prev = (lat, lon);
    }
    out
}

fn seconds_between(a: &Fix, b: &Fix) -> f64 {
    (b.timestamp - a.timestamp).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::EARTH_RADIUS_M;
    use chrono::{Duration, TimeZone, Utc};

    /// Latitude offset in degrees that spans `meters` along a meridian.
    fn north(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_M).to_degrees()
    }

    fn fix(secs: i64, lat: f64) -> Fix {
        Fix {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap() + Duration::seconds(secs),
            latitude: lat,
            longitude: 76.7,
        }
    }

    #[test]
    fn test_measured_speed_used_when_positive() {
        let history = [fix(0, 30.0), fix(300, 30.0 + north(100.0))];
        let speed = instantaneous_speed(&history, &EtaParams::default());
        assert!((speed - 100.0 / 300.0).abs() < 1e-6, "speed {}", speed);
    }

    #[test]
    fn test_scenario_two_points_one_step() {
        let history = [fix(0, 30.0), fix(300, 30.0 + north(100.0))];
        let forecast = [(30.0 + north(200.0), 76.7)];
        let out = estimate(&history, &forecast, &EtaParams::default());

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].step, 1);
        assert!((299..=300).contains(&out[0].eta_seconds_from_last), "{:?}", out[0]);
        assert!((-1..=0).contains(&out[0].delay_seconds_vs_baseline), "{:?}", out[0]);
    }

    #[test]
    fn test_single_point_uses_defaults() {
        let history = [fix(0, 30.0)];
        let params = EtaParams::default();
        assert_eq!(instantaneous_speed(&history, &params), FALLBACK_SPEED_MPS);
        assert_eq!(baseline_interval(&history, &params), DEFAULT_BASELINE_SECS);
    }

    #[test]
    fn test_zero_delay_when_on_baseline_pace() {
        // fallback speed 8 m/s over a 300 s baseline covers 2400 m per step
        let history = [fix(0, 30.0)];
        let forecast: Vec<(f64, f64)> = (1..=5)
            .map(|i| (30.0 + north(2400.0 * i as f64), 76.7))
            .collect();
        let out = estimate(&history, &forecast, &EtaParams::default());

        assert_eq!(out.len(), 5);
        for e in &out {
            assert_eq!(e.delay_seconds_vs_baseline, 0, "{:?}", e);
            let expected = 300 * e.step as i64;
            assert!((e.eta_seconds_from_last - expected).abs() <= 1, "{:?}", e);
        }
    }

    #[test]
    fn test_non_positive_interval_falls_back_to_constant_speed() {
        let history = [fix(60, 30.0), fix(60, 30.0 + north(50.0))];
        assert_eq!(
            instantaneous_speed(&history, &EtaParams::default()),
            FALLBACK_SPEED_MPS
        );
        let backwards = [fix(60, 30.0), fix(0, 30.0 + north(50.0))];
        assert_eq!(
            instantaneous_speed(&backwards, &EtaParams::default()),
            FALLBACK_SPEED_MPS
        );
    }

    #[test]
    fn test_stationary_vehicle_falls_back() {
        let history = [fix(0, 30.0), fix(120, 30.0)];
        assert_eq!(
            instantaneous_speed(&history, &EtaParams::default()),
            FALLBACK_SPEED_MPS
        );
    }

    #[test]
    fn test_baseline_is_mean_over_whole_history() {
        let history = [fix(0, 30.0), fix(100, 30.0), fix(400, 30.0)];
        assert_eq!(baseline_interval(&history, &EtaParams::default()), 200.0);
    }

    #[test]
    fn test_running_late_is_positive_delay() {
        // 60 s baseline, but the vehicle crawls at 1 m/s and each step is 120 m
        let history = [fix(0, 30.0), fix(60, 30.0 + north(60.0))];
        let last = 30.0 + north(60.0);
        let forecast = [(last + north(120.0), 76.7), (last + north(240.0), 76.7)];
        let out = estimate(&history, &forecast, &EtaParams::default());

        assert!((119..=120).contains(&out[0].eta_seconds_from_last));
        assert!((59..=60).contains(&out[0].delay_seconds_vs_baseline));
        assert!((239..=240).contains(&out[1].eta_seconds_from_last));
        assert!((119..=120).contains(&out[1].delay_seconds_vs_baseline));
    }

    #[test]
    fn test_params_reject_non_positive_fallbacks() {
        assert_eq!(
            EtaParams::new(FALLBACK_SPEED_MPS, DEFAULT_BASELINE_SECS).unwrap(),
            EtaParams::default()
        );
        assert!(EtaParams::new(0.0, 300.0).is_err());
        assert!(EtaParams::new(-8.0, 300.0).is_err());
        assert!(EtaParams::new(f64::NAN, 300.0).is_err());
        assert!(EtaParams::new(8.0, 0.0).is_err());
        assert!(EtaParams::new(8.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_empty_history_yields_nothing() {
        assert!(estimate(&[], &[(30.0, 76.7)], &EtaParams::default()).is_empty());
    }
}
