//! Time-domain pitch estimation by normalized autocorrelation.
//!
//! For every integer lag in the detection band the buffer is correlated with
//! a copy of itself shifted by that lag (Pearson correlation of the two
//! overlapping slices). The lag that best lines the signal up with itself is
//! the fundamental period.
//!
//! Brute force: O(window length x lag range). Meant for analysis windows of
//! tens of milliseconds.

/// Lowest detectable fundamental (Hz).
pub const MIN_FREQUENCY: f32 = 80.0;
/// Highest detectable fundamental (Hz).
pub const MAX_FREQUENCY: f32 = 800.0;
/// Correlation a period must exceed to be reported.
pub const CORRELATION_THRESHOLD: f64 = 0.15;
/// Peaks whose correlation is within this distance of the best one count as
/// ties, and ties go to the shortest period.
pub const PEAK_TOLERANCE: f64 = 0.01;

/// Anything that can turn one buffer of mono samples into a fundamental
/// frequency.
pub trait PitchSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, buffer: &[f32], sample_rate: u32) -> Option<f32>;
}

/// Autocorrelation pitch detector.
#[derive(Clone, Debug)]
pub struct PitchDetector {
    /// Buffers quieter than this RMS are not analyzed.
    pub volume_threshold: f32,
    pub correlation_threshold: f64,
    /// 0.0 keeps only the exact maximum (first one wins).
    pub peak_tolerance: f64,
    /// Refine the winning lag with a parabola through its neighbours.
    pub interpolate: bool,
}

impl Default for PitchDetector {
    fn default() -> Self {
        Self {
            volume_threshold: 0.01,
            correlation_threshold: CORRELATION_THRESHOLD,
            peak_tolerance: PEAK_TOLERANCE,
            interpolate: true,
        }
    }
}

impl PitchDetector {
    pub fn new(volume_threshold: f32) -> Self {
        Self {
            volume_threshold,
            ..Self::default()
        }
    }

    /// Integer-period detector: exact maximum, `sample_rate / period` output.
    pub fn integer_period(volume_threshold: f32) -> Self {
        Self {
            volume_threshold,
            peak_tolerance: 0.0,
            interpolate: false,
            ..Self::default()
        }
    }

    /// Estimate the fundamental of `buffer`, or `None` when the buffer is
    /// too quiet, too short for the lowest period, or not periodic enough.
    pub fn detect(&self, buffer: &[f32], sample_rate: u32) -> Option<f32> {
        if buffer.is_empty() || sample_rate == 0 {
            return None;
        }

        if rms(buffer) < self.volume_threshold {
            return None;
        }

        let (min_period, max_period) = period_range(sample_rate);
        if buffer.len() < max_period || min_period == 0 {
            return None;
        }

        let correlations: Vec<Option<f64>> = (min_period..max_period)
            .map(|period| lagged_correlation(buffer, period))
            .collect();

        let best = correlations
            .iter()
            .flatten()
            .copied()
            .fold(None, |acc: Option<f64>, c| match acc {
                Some(b) if b >= c => Some(b),
                _ => Some(c),
            })?;

        // First peak that ties with the best one, climbed to its top.
        let floor = best - self.peak_tolerance;
        let mut idx = correlations
            .iter()
            .position(|c| matches!(c, Some(v) if *v >= floor))?;
        while let (Some(Some(cur)), Some(Some(next))) =
            (correlations.get(idx), correlations.get(idx + 1))
        {
            if next > cur {
                idx += 1;
            } else {
                break;
            }
        }

        let peak = correlations[idx]?;
        if peak <= self.correlation_threshold {
            return None;
        }

        let period = min_period + idx;
        let refined = if self.interpolate {
            let before = match idx {
                0 => lagged_correlation(buffer, period - 1),
                _ => correlations[idx - 1],
            };
            let after = match correlations.get(idx + 1) {
                Some(c) => *c,
                None => lagged_correlation(buffer, period + 1),
            };
            refine_period(period as f64, before, peak, after)
        } else {
            period as f64
        };

        Some((sample_rate as f64 / refined) as f32)
    }
}

impl PitchSource for PitchDetector {
    fn name(&self) -> &'static str {
        "autocorrelation"
    }

    fn detect(&self, buffer: &[f32], sample_rate: u32) -> Option<f32> {
        PitchDetector::detect(self, buffer, sample_rate)
    }
}

/// Ordered list of pitch sources. The first source that reports a pitch wins.
pub struct PitchSourceChain {
    sources: Vec<Box<dyn PitchSource>>,
}

impl PitchSourceChain {
    pub fn new(sources: Vec<Box<dyn PitchSource>>) -> Self {
        Self { sources }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

impl PitchSource for PitchSourceChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn detect(&self, buffer: &[f32], sample_rate: u32) -> Option<f32> {
        self.sources
            .iter()
            .find_map(|source| source.detect(buffer, sample_rate))
    }
}

/// Root mean square of a buffer. Empty buffers have no energy.
pub fn rms(buffer: &[f32]) -> f32 {
    if buffer.is_empty() {
        return 0.0;
    }
    let sum: f64 = buffer.iter().map(|&s| s as f64 * s as f64).sum();
    (sum / buffer.len() as f64).sqrt() as f32
}

/// `[min_period, max_period)` in samples for the 80-800 Hz band.
pub fn period_range(sample_rate: u32) -> (usize, usize) {
    let min_period = (sample_rate as f32 / MAX_FREQUENCY).floor() as usize;
    let max_period = (sample_rate as f32 / MIN_FREQUENCY).floor() as usize;
    (min_period, max_period)
}

/// Pearson correlation between `buffer[..len - lag]` and `buffer[lag..]`.
/// `None` when either slice has no variance or the overlap is too short.
fn lagged_correlation(buffer: &[f32], lag: usize) -> Option<f64> {
    if lag == 0 || lag + 2 > buffer.len() {
        return None;
    }
    let head = &buffer[..buffer.len() - lag];
    let tail = &buffer[lag..];
    let n = head.len() as f64;

    let mean_x = head.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_y = tail.iter().map(|&v| v as f64).sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in head.iter().zip(tail) {
        let dx = x as f64 - mean_x;
        let dy = y as f64 - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let r = sxy / (sxx * syy).sqrt();
    r.is_finite().then_some(r)
}

fn refine_period(period: f64, before: Option<f64>, peak: f64, after: Option<f64>) -> f64 {
    let (Some(a), Some(c)) = (before, after) else {
        return period;
    };
    let denom = a - 2.0 * peak + c;
    if denom.abs() < 1e-12 {
        return period;
    }
    let shift = 0.5 * (a - c) / denom;
    if shift.abs() > 1.0 {
        period
    } else {
        period + shift
    }
}

#[cfg(test)]
pub(crate) fn sine(freq: f32, sample_rate: u32, seconds: f32, amplitude: f32) -> Vec<f32> {
    let n = (sample_rate as f32 * seconds) as usize;
    (0..n)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            amplitude * (2.0 * std::f64::consts::PI * freq as f64 * t).sin() as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_within_two_hz_across_band() {
        let detector = PitchDetector::new(0.01);
        for freq in [80.0, 98.0, 110.0, 146.8, 220.0, 261.63, 330.0, 440.0, 523.25, 659.0, 790.0, 800.0] {
            let buffer = sine(freq, 44100, 0.1, 0.5);
            let detected = detector.detect(&buffer, 44100).expect("pitch");
            assert!(
                (detected - freq).abs() <= 2.0,
                "{} Hz detected as {} Hz",
                freq,
                detected
            );
        }
    }

    #[test]
    fn other_sample_rate() {
        let detector = PitchDetector::new(0.01);
        for freq in [100.0, 196.0, 415.3, 700.0] {
            let buffer = sine(freq, 48000, 0.1, 0.3);
            let detected = detector.detect(&buffer, 48000).expect("pitch");
            assert!((detected - freq).abs() <= 2.0, "{} -> {}", freq, detected);
        }
    }

    #[test]
    fn integer_period_reports_sample_rate_over_lag() {
        let detector = PitchDetector::integer_period(0.01);
        let buffer = sine(150.0, 44100, 0.1, 0.5);
        assert_eq!(detector.detect(&buffer, 44100), Some(150.0));
    }

    #[test]
    fn silence_is_none() {
        let buffer = vec![0.0f32; 4410];
        assert_eq!(PitchDetector::new(0.01).detect(&buffer, 44100), None);
        assert_eq!(PitchDetector::new(0.0).detect(&buffer, 44100), None);
        assert_eq!(PitchDetector::integer_period(0.0).detect(&buffer, 44100), None);
    }

    #[test]
    fn quiet_signal_is_none() {
        let buffer = sine(220.0, 44100, 0.1, 0.005);
        assert_eq!(PitchDetector::new(0.01).detect(&buffer, 44100), None);
        assert!(PitchDetector::new(0.001).detect(&buffer, 44100).is_some());
    }

    #[test]
    fn short_buffer_is_none() {
        let (_, max_period) = period_range(44100);
        let buffer = sine(440.0, 44100, 1.0, 0.5);
        assert_eq!(PitchDetector::new(0.01).detect(&buffer[..max_period - 1], 44100), None);
        assert!(PitchDetector::new(0.01).detect(&buffer[..max_period * 4], 44100).is_some());
    }

    #[test]
    fn empty_buffer_is_none() {
        assert_eq!(PitchDetector::default().detect(&[], 44100), None);
    }

    #[test]
    fn period_range_matches_band() {
        assert_eq!(period_range(44100), (55, 551));
        assert_eq!(period_range(48000), (60, 600));
        assert_eq!(period_range(8000), (10, 100));
    }

    #[test]
    fn rms_of_constant() {
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    struct Fixed(Option<f32>);

    impl PitchSource for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&self, _: &[f32], _: u32) -> Option<f32> {
            self.0
        }
    }

    #[test]
    fn chain_takes_first_answer() {
        let chain = PitchSourceChain::new(vec![
            Box::new(Fixed(None)),
            Box::new(Fixed(Some(330.0))),
            Box::new(Fixed(Some(440.0))),
        ]);
        assert_eq!(chain.detect(&[0.0; 10], 44100), Some(330.0));
        assert_eq!(chain.names(), vec!["fixed", "fixed", "fixed"]);

        let empty = PitchSourceChain::new(Vec::new());
        assert_eq!(empty.detect(&[0.0; 10], 44100), None);
    }
}
