//! Splitting a vocal stem into sung and silent stretches.

const FRAME_LENGTH: usize = 2048;
const HOP_LENGTH: usize = 512;

/// Loudness floor for the dB conversion.
const AMIN: f32 = 1e-10;

/// RMS of each `FRAME_LENGTH` frame, one every `HOP_LENGTH` samples. A
/// buffer shorter than one frame is a single frame.
pub fn frame_rms(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    if samples.len() <= FRAME_LENGTH {
        return vec![crate::pitch::detector::rms(samples)];
    }
    let frames = 1 + (samples.len() - FRAME_LENGTH) / HOP_LENGTH;
    (0..frames)
        .map(|i| {
            let start = i * HOP_LENGTH;
            crate::pitch::detector::rms(&samples[start..start + FRAME_LENGTH])
        })
        .collect()
}

/// Stretches whose frame RMS is within `top_db` of the loudest frame,
/// as `(start, end)` seconds. Empty for digital silence.
pub fn non_silent_intervals(samples: &[f32], sample_rate: u32, top_db: f32) -> Vec<(f64, f64)> {
    let rms = frame_rms(samples);
    let peak = rms.iter().copied().fold(0.0f32, f32::max);
    if peak <= AMIN || sample_rate == 0 {
        return Vec::new();
    }

    let peak_db = 20.0 * peak.log10();
    let loud: Vec<bool> = rms
        .iter()
        .map(|&r| 20.0 * r.max(AMIN).log10() > peak_db - top_db)
        .collect();

    let to_seconds = |sample: usize| sample as f64 / sample_rate as f64;
    let frame_end = |frame: usize| {
        if frame + 1 >= loud.len() {
            samples.len()
        } else {
            (frame + 1) * HOP_LENGTH
        }
    };

    let mut intervals = Vec::new();
    let mut open: Option<usize> = None;
    for (i, &is_loud) in loud.iter().enumerate() {
        match (open, is_loud) {
            (None, true) => open = Some(i),
            (Some(first), false) => {
                intervals.push((to_seconds(first * HOP_LENGTH), to_seconds(frame_end(i - 1))));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(first) = open {
        intervals.push((to_seconds(first * HOP_LENGTH), to_seconds(samples.len())));
    }

    log::debug!("{} non-silent intervals (top_db={})", intervals.len(), top_db);
    intervals
}

/// Where singing begins: the first non-silent interval, 0.0 when none.
pub fn vocal_start_time(intervals: &[(f64, f64)]) -> f64 {
    intervals.first().map_or(0.0, |&(start, _)| start)
}

/// The gaps between consecutive non-silent intervals.
pub fn silent_gaps(intervals: &[(f64, f64)]) -> Vec<(f64, f64)> {
    intervals
        .windows(2)
        .map(|pair| (pair[0].1, pair[1].0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::detector::sine;

    const SR: u32 = 22050;

    fn silence(seconds: f32) -> Vec<f32> {
        vec![0.0; (SR as f32 * seconds) as usize]
    }

    #[test]
    fn frames_follow_hop() {
        assert!(frame_rms(&[]).is_empty());
        assert_eq!(frame_rms(&[0.5; 100]).len(), 1);
        assert_eq!(frame_rms(&vec![0.0; 2048 + 512 * 3]).len(), 4);
    }

    #[test]
    fn finds_sung_phrases() {
        let mut samples = silence(1.0);
        samples.extend(sine(220.0, SR, 1.0, 0.5));
        samples.extend(silence(1.0));
        samples.extend(sine(330.0, SR, 1.0, 0.5));

        let intervals = non_silent_intervals(&samples, SR, 20.0);
        assert_eq!(intervals.len(), 2, "{:?}", intervals);

        let start = vocal_start_time(&intervals);
        // Frames overlapping the onset count as loud.
        assert!(start > 0.85 && start <= 1.0, "{}", start);
        assert!((intervals[1].1 - 4.0).abs() < 1e-3);

        let gaps = silent_gaps(&intervals);
        assert_eq!(gaps.len(), 1);
        assert!(gaps[0].0 >= 2.0 && gaps[0].0 < 2.15, "{:?}", gaps);
        assert!(gaps[0].1 > 2.85 && gaps[0].1 <= 3.0, "{:?}", gaps);
    }

    #[test]
    fn quiet_passage_below_top_db_is_silent() {
        let mut samples = sine(220.0, SR, 1.0, 0.5);
        samples.extend(sine(220.0, SR, 1.0, 0.01));
        samples.extend(sine(220.0, SR, 1.0, 0.5));
        assert_eq!(non_silent_intervals(&samples, SR, 20.0).len(), 2);
        assert_eq!(non_silent_intervals(&samples, SR, 40.0).len(), 1);
    }

    #[test]
    fn digital_silence_has_no_intervals() {
        let intervals = non_silent_intervals(&silence(2.0), SR, 20.0);
        assert!(intervals.is_empty());
        assert_eq!(vocal_start_time(&intervals), 0.0);
        assert!(silent_gaps(&intervals).is_empty());
    }
}
