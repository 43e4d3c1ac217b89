use super::detector::{period_range, rms, PitchSource};

/// YIN estimator (de Cheveigne & Kawahara, 2002) over the same 80-800 Hz
/// band as the autocorrelation detector. Second in line when the
/// autocorrelation detector finds nothing periodic enough.
#[derive(Clone, Debug)]
pub struct YinDetector {
    pub volume_threshold: f32,
    /// Absolute threshold on the cumulative mean normalized difference.
    pub threshold: f32,
}

impl Default for YinDetector {
    fn default() -> Self {
        Self {
            volume_threshold: 0.01,
            threshold: 0.1,
        }
    }
}

impl YinDetector {
    pub fn new(volume_threshold: f32) -> Self {
        Self {
            volume_threshold,
            ..Self::default()
        }
    }
}

impl PitchSource for YinDetector {
    fn name(&self) -> &'static str {
        "yin"
    }

    fn detect(&self, frame: &[f32], sample_rate: u32) -> Option<f32> {
        if frame.is_empty() || sample_rate == 0 || rms(frame) < self.volume_threshold {
            return None;
        }

        let (min_tau, max_tau) = period_range(sample_rate);
        let max_tau = max_tau.min(frame.len() / 2);
        if min_tau < 2 || max_tau <= min_tau + 1 {
            return None;
        }

        let mut diff = vec![0.0f32; max_tau + 1];
        for (tau, slot) in diff.iter_mut().enumerate().skip(1) {
            *slot = frame[..frame.len() - tau]
                .iter()
                .zip(&frame[tau..])
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
        }

        let mut cmnd = vec![1.0f32; diff.len()];
        let mut running = 0.0f32;
        for tau in 1..=max_tau {
            running += diff[tau];
            cmnd[tau] = diff[tau] * tau as f32 / running.max(1e-8);
        }

        let mut tau = (min_tau..max_tau).find(|&t| cmnd[t] < self.threshold)?;
        // Walk down to the bottom of the dip.
        while tau + 1 < max_tau && cmnd[tau + 1] < cmnd[tau] {
            tau += 1;
        }

        let t = tau as f32;
        let a = cmnd[tau - 1];
        let b = cmnd[tau];
        let c = cmnd[tau + 1];
        let denom = a - 2.0 * b + c;
        let better_tau = if denom.abs() < 1e-8 {
            t
        } else {
            t + (a - c) / (2.0 * denom)
        };

        Some(sample_rate as f32 / better_tau)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::detector::sine;

    #[test]
    fn finds_sine() {
        let yin = YinDetector::new(0.01);
        for freq in [110.0, 220.0, 440.0] {
            let buffer = sine(freq, 44100, 0.1, 0.5);
            let detected = yin.detect(&buffer, 44100).expect("pitch");
            assert!((detected - freq).abs() < 2.0, "{} -> {}", freq, detected);
        }
    }

    #[test]
    fn silence_is_none() {
        assert_eq!(YinDetector::default().detect(&vec![0.0; 4410], 44100), None);
    }
}
