pub mod builder;
pub mod store;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::AnalysisError;

/// Default spacing between timeline entries (seconds).
pub const DEFAULT_RESOLUTION: f64 = 0.05;

/// Reference pitch at one instant. `pitch` is `None` where nothing should be
/// sung.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    #[serde(serialize_with = "round3")]
    pub time: f64,
    #[serde(serialize_with = "round2_opt")]
    pub pitch: Option<f64>,
}

/// Evenly spaced reference pitches starting at 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub resolution: f64,
    pub entries: Vec<TimelineEntry>,
}

/// Summary numbers logged after each run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchStats {
    pub voiced: usize,
    pub total: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl Timeline {
    pub fn new(resolution: f64, entries: Vec<TimelineEntry>) -> Self {
        Self {
            resolution,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reference pitch of the entry nearest to `t`.
    pub fn pitch_at(&self, t: f64) -> Option<f64> {
        if !(t >= 0.0) || self.resolution <= 0.0 {
            return None;
        }
        let idx = (t / self.resolution).round() as usize;
        self.entries.get(idx).and_then(|e| e.pitch)
    }

    pub fn stats(&self) -> Option<PitchStats> {
        let pitches: Vec<f64> = self.entries.iter().filter_map(|e| e.pitch).collect();
        if pitches.is_empty() {
            return None;
        }
        Some(PitchStats {
            voiced: pitches.len(),
            total: self.entries.len(),
            mean: pitches.iter().sum::<f64>() / pitches.len() as f64,
            min: pitches.iter().copied().fold(f64::INFINITY, f64::min),
            max: pitches.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    pub fn log_stats(&self) {
        match self.stats() {
            Some(s) => {
                log::info!("Valid pitches: {}/{}", s.voiced, s.total);
                log::info!(
                    "Pitch: mean {:.2} Hz, min {:.2} Hz, max {:.2} Hz",
                    s.mean,
                    s.min,
                    s.max
                );
            }
            None => log::warn!("Timeline has no valid pitch data ({} entries)", self.len()),
        }
    }
}

/// Timestamps `0, r, 2r, ...` up to and including `duration`, each rounded
/// to the millisecond.
pub fn time_grid(duration: f64, resolution: f64) -> Result<Vec<f64>, AnalysisError> {
    if !(resolution > 0.0) || !resolution.is_finite() {
        return Err(AnalysisError::InvalidResolution);
    }
    if !(duration >= 0.0) || !duration.is_finite() {
        return Err(AnalysisError::InvalidDuration);
    }

    // The epsilon keeps 1.0 / 0.05 from landing on 19.999...
    let steps = (duration / resolution + 1e-9).floor() as usize;
    Ok((0..=steps).map(|i| round_to(i as f64 * resolution, 3)).collect())
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn round3<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_to(*value, 3))
}

fn round2_opt<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_some(&round_to(*v, 2)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(time: f64, pitch: Option<f64>) -> TimelineEntry {
        TimelineEntry { time, pitch }
    }

    #[test]
    fn grid_covers_duration_inclusive() {
        let grid = time_grid(1.0, 0.05).unwrap();
        assert_eq!(grid.len(), 21);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[20], 1.0);
        assert_eq!(grid[3], 0.15);

        let grid = time_grid(1.02, 0.05).unwrap();
        assert_eq!(grid.len(), 21);
        assert!(*grid.last().unwrap() <= 1.02);
    }

    #[test]
    fn grid_rejects_bad_resolution() {
        assert_eq!(time_grid(1.0, 0.0), Err(AnalysisError::InvalidResolution));
        assert_eq!(time_grid(1.0, -0.1), Err(AnalysisError::InvalidResolution));
        assert_eq!(time_grid(1.0, f64::NAN), Err(AnalysisError::InvalidResolution));
    }

    #[test]
    fn zero_duration_is_single_entry() {
        assert_eq!(time_grid(0.0, 0.05).unwrap(), vec![0.0]);
    }

    #[test]
    fn pitch_at_nearest_entry() {
        let timeline = Timeline::new(
            0.05,
            vec![entry(0.0, None), entry(0.05, Some(220.0)), entry(0.1, Some(330.0))],
        );
        assert_eq!(timeline.pitch_at(0.0), None);
        assert_eq!(timeline.pitch_at(0.06), Some(220.0));
        assert_eq!(timeline.pitch_at(0.08), Some(330.0));
        assert_eq!(timeline.pitch_at(0.5), None);
        assert_eq!(timeline.pitch_at(-1.0), None);
    }

    #[test]
    fn stats_skip_silence() {
        let timeline = Timeline::new(
            0.05,
            vec![entry(0.0, None), entry(0.05, Some(200.0)), entry(0.1, Some(400.0))],
        );
        let stats = timeline.stats().unwrap();
        assert_eq!(stats.voiced, 2);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.mean, 300.0);
        assert_eq!(stats.min, 200.0);
        assert_eq!(stats.max, 400.0);

        assert!(Timeline::new(0.05, vec![entry(0.0, None)]).stats().is_none());
    }

    #[test]
    fn entries_serialize_rounded() {
        let json = serde_json::to_string(&entry(0.15000000000000002, Some(261.6255653))).unwrap();
        assert_eq!(json, r#"{"time":0.15,"pitch":261.63}"#);
        let json = serde_json::to_string(&entry(0.2, None)).unwrap();
        assert_eq!(json, r#"{"time":0.2,"pitch":null}"#);
    }
}
