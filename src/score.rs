//! Scoring a sung pitch against the reference pitch.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AnalysisError;
use crate::pitch::detector::PitchSource;
use crate::timeline::Timeline;

/// Outcome of one comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreResult {
    /// Positive when the user is flat.
    pub cents_diff: f64,
    pub score: u8,
}

/// Signed distance from `user_hz` up to `target_hz`, in cents.
pub fn cents(user_hz: f64, target_hz: f64) -> f64 {
    1200.0 * (target_hz / user_hz).log2()
}

/// Raw points for an absolute deviation in cents. Continuous at every
/// breakpoint; existing tuning depends on these exact segments.
pub fn points_for_deviation(diff: f64) -> f64 {
    if diff <= 5.0 {
        100.0 - diff * 0.5
    } else if diff <= 10.0 {
        97.5 - (diff - 5.0) * 0.5
    } else if diff <= 20.0 {
        95.0 - (diff - 10.0)
    } else if diff <= 30.0 {
        85.0 - (diff - 20.0) * 1.5
    } else if diff <= 50.0 {
        70.0 - (diff - 30.0)
    } else {
        (50.0 - (diff - 50.0)).max(0.0)
    }
}

/// `None` when either pitch is missing or not a positive frequency.
pub fn score(user_hz: Option<f64>, target_hz: Option<f64>) -> Option<ScoreResult> {
    let user = user_hz.filter(|f| *f > 0.0 && f.is_finite())?;
    let target = target_hz.filter(|f| *f > 0.0 && f.is_finite())?;

    let cents_diff = cents(user, target);
    let points = points_for_deviation(cents_diff.abs()).clamp(0.0, 100.0).round();
    Some(ScoreResult {
        cents_diff,
        score: points as u8,
    })
}

/// One live comparison as posted by the player.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRequest {
    pub audio_data: Vec<f32>,
    pub sample_rate: u32,
    #[serde(default)]
    pub target_pitch: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveResponse {
    pub success: bool,
    pub user_pitch: Option<i64>,
    pub target_pitch: Option<i64>,
    pub score: u8,
    pub accuracy: u8,
}

impl LiveRequest {
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let request: Self =
            serde_json::from_str(json).map_err(|e| AnalysisError::InvalidRequest(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.audio_data.is_empty() {
            return Err(AnalysisError::InvalidRequest("audioData is empty".into()));
        }
        if self.audio_data.iter().any(|s| !s.is_finite()) {
            return Err(AnalysisError::InvalidRequest(
                "audioData contains non-finite samples".into(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(AnalysisError::InvalidRequest("sampleRate must be positive".into()));
        }
        Ok(())
    }
}

/// Detect the user's pitch in the request buffer and score it.
pub fn respond(request: &LiveRequest, detector: &dyn PitchSource) -> Result<LiveResponse, AnalysisError> {
    request.validate()?;

    let user = detector
        .detect(&request.audio_data, request.sample_rate)
        .map(f64::from);
    let target = request.target_pitch.filter(|f| *f > 0.0);
    let result = score(user, target);
    if let Some(r) = result {
        log::debug!("Live score {} ({:+.1} cents)", r.score, r.cents_diff);
    }
    let points = result.map_or(0, |r| r.score);

    Ok(LiveResponse {
        success: true,
        user_pitch: user.map(|f| f.round() as i64),
        target_pitch: target.map(|f| f.round() as i64),
        score: points,
        accuracy: points,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Perfect,
    Good,
    Ok,
    Poor,
    Miss,
}

impl Grade {
    pub fn from_score(score: u8) -> Self {
        match score {
            95..=u8::MAX => Grade::Perfect,
            85..=94 => Grade::Good,
            70..=84 => Grade::Ok,
            50..=69 => Grade::Poor,
            _ => Grade::Miss,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Grade::Perfect => "perfect",
            Grade::Good => "good",
            Grade::Ok => "ok",
            Grade::Poor => "poor",
            Grade::Miss => "miss",
        };
        f.write_str(label)
    }
}

/// Running tally of a performance against a reference timeline.
#[derive(Debug, Clone)]
pub struct ScoreSession<'a> {
    reference: &'a Timeline,
    total: u64,
    scored: usize,
    skipped: usize,
    grades: [usize; 5],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionSummary {
    pub mean_score: f64,
    pub scored: usize,
    pub skipped: usize,
    pub perfect: usize,
    pub good: usize,
    pub ok: usize,
    pub poor: usize,
    pub miss: usize,
}

impl<'a> ScoreSession<'a> {
    pub fn new(reference: &'a Timeline) -> Self {
        Self {
            reference,
            total: 0,
            scored: 0,
            skipped: 0,
            grades: [0; 5],
        }
    }

    /// Record the user's pitch at `time`. Returns the points awarded, or
    /// `None` when nothing should be sung there.
    pub fn record(&mut self, time: f64, user_hz: Option<f64>) -> Option<u8> {
        let Some(target) = self.reference.pitch_at(time) else {
            self.skipped += 1;
            return None;
        };
        let points = score(user_hz, Some(target)).map_or(0, |r| r.score);

        self.total += points as u64;
        self.scored += 1;
        self.grades[Grade::from_score(points) as usize] += 1;
        Some(points)
    }

    pub fn count(&self, grade: Grade) -> usize {
        self.grades[grade as usize]
    }

    pub fn mean_score(&self) -> f64 {
        if self.scored == 0 {
            return 0.0;
        }
        self.total as f64 / self.scored as f64
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            mean_score: self.mean_score(),
            scored: self.scored,
            skipped: self.skipped,
            perfect: self.count(Grade::Perfect),
            good: self.count(Grade::Good),
            ok: self.count(Grade::Ok),
            poor: self.count(Grade::Poor),
            miss: self.count(Grade::Miss),
        }
    }
}
