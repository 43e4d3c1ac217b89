//! Builds reference pitch timelines from a MIDI vocal track or from audio.

use indicatif::ProgressBar;
use rayon::prelude::*;

use super::{round_to, time_grid, Timeline, TimelineEntry};
use crate::error::AnalysisError;
use crate::midi::note::{midi_to_frequency, Note, Track};
use crate::pitch::detector::{rms, PitchSource};

/// Floor for the silence threshold between notes (seconds).
pub const MIN_INSTRUMENTAL_GAP: f64 = 0.3;
/// Silence threshold as a multiple of the average gap between notes.
pub const GAP_SCALE: f64 = 1.5;
/// Average gap assumed when no two notes are separated by silence.
pub const DEFAULT_AVG_GAP: f64 = 0.5;
/// Vocal stem windows quieter than this percentile of all window levels are
/// treated as unvoiced.
pub const VOICING_PERCENTILE: f64 = 10.0;

/// Reference pitch of a monophonic MIDI vocal line at any instant.
///
/// Before the first note everything is silent. Inside notes the highest
/// sounding note wins. Between notes, short gaps hold the neighbouring
/// note's pitch (the preceding one when there is one) and gaps longer than
/// the instrumental threshold are silent.
#[derive(Debug, Clone)]
pub struct MidiTimelineBuilder {
    /// Sorted by start time.
    notes: Vec<Note>,
    vocal_start: f64,
    avg_gap: f64,
    instrumental_threshold: f64,
}

impl MidiTimelineBuilder {
    pub fn new(track: &Track) -> Result<Self, AnalysisError> {
        Self::from_notes(track.notes.clone())
    }

    pub fn from_notes(mut notes: Vec<Note>) -> Result<Self, AnalysisError> {
        if notes.is_empty() {
            return Err(AnalysisError::NoNotes);
        }
        notes.sort_by(|a, b| a.start.total_cmp(&b.start));

        let vocal_start = notes.iter().map(|n| n.start).fold(f64::INFINITY, f64::min);

        let gaps: Vec<f64> = notes
            .windows(2)
            .map(|pair| pair[1].start - pair[0].end)
            .filter(|gap| *gap > 0.0)
            .collect();
        let avg_gap = if gaps.is_empty() {
            DEFAULT_AVG_GAP
        } else {
            gaps.iter().sum::<f64>() / gaps.len() as f64
        };
        let instrumental_threshold = MIN_INSTRUMENTAL_GAP.max(avg_gap * GAP_SCALE);

        Ok(Self {
            notes,
            vocal_start,
            avg_gap,
            instrumental_threshold,
        })
    }

    pub fn vocal_start(&self) -> f64 {
        self.vocal_start
    }

    pub fn avg_gap(&self) -> f64 {
        self.avg_gap
    }

    pub fn instrumental_threshold(&self) -> f64 {
        self.instrumental_threshold
    }

    /// Reference frequency at `t`, in Hz.
    pub fn pitch_at(&self, t: f64) -> Option<f64> {
        self.note_at(t).map(midi_to_frequency)
    }

    /// Reference MIDI note number at `t`.
    pub fn note_at(&self, t: f64) -> Option<u8> {
        if t < self.vocal_start {
            return None;
        }

        // Notes before `split` have started by `t`.
        let split = self.notes.partition_point(|n| n.start <= t);
        let started = &self.notes[..split];

        if let Some(highest) = started
            .iter()
            .filter(|n| n.is_active_at(t))
            .map(|n| n.pitch)
            .max()
        {
            return Some(highest);
        }

        // Nothing sounding: every started note has ended.
        let prev = started.last();
        let next = self.notes.get(split);

        let long_after_prev = prev.is_some_and(|n| t - n.end > self.instrumental_threshold);
        let long_before_next = next.is_some_and(|n| n.start - t > self.instrumental_threshold);
        if long_after_prev || long_before_next {
            return None;
        }

        prev.or(next).map(|n| n.pitch)
    }

    /// Sample the track every `resolution` seconds over `[0, duration]`.
    pub fn produce(&self, duration: f64, resolution: f64) -> Result<Timeline, AnalysisError> {
        let entries = time_grid(duration, resolution)?
            .into_iter()
            .map(|time| TimelineEntry {
                time,
                pitch: self.pitch_at(time),
            })
            .collect();
        Ok(Timeline::new(resolution, entries))
    }
}

/// Runs a pitch source over fixed windows of PCM audio.
///
/// Window `i` starts at sample `round(i * hop_size * sample_rate)` and its
/// entry is stamped `i * hop_size`, so entries stay on the time grid at any
/// sample rate. Silence is whatever the source reports as `None`, nothing is
/// filled in.
pub struct AudioTimelineBuilder {
    pub window_size: f64,
    pub hop_size: f64,
    progress: Option<ProgressBar>,
}

impl AudioTimelineBuilder {
    pub fn new(window_size: f64, hop_size: f64) -> Self {
        Self {
            window_size,
            hop_size,
            progress: None,
        }
    }

    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    fn window_len(&self, sample_rate: u32) -> usize {
        (self.window_size * sample_rate as f64) as usize
    }

    /// Start offsets (in samples) of every analysis window.
    pub fn window_starts(&self, total_samples: usize, sample_rate: u32) -> Result<Vec<usize>, AnalysisError> {
        if !(self.hop_size > 0.0) || !(self.window_size > 0.0) {
            return Err(AnalysisError::InvalidResolution);
        }
        let window = self.window_len(sample_rate);
        let hop = self.hop_size * sample_rate as f64;
        if window == 0 || hop < 1.0 {
            return Err(AnalysisError::InvalidResolution);
        }
        if total_samples <= window {
            return Err(AnalysisError::InsufficientSamples {
                needed: window + 1,
                got: total_samples,
            });
        }

        let last_start = total_samples - window;
        Ok((0..)
            .map(|i: usize| (i as f64 * hop).round() as usize)
            .take_while(|&start| start < last_start)
            .collect())
    }

    pub fn build(
        &self,
        samples: &[f32],
        sample_rate: u32,
        source: &dyn PitchSource,
    ) -> Result<Timeline, AnalysisError> {
        if samples.is_empty() {
            return Err(AnalysisError::EmptyBuffer);
        }
        let window = self.window_len(sample_rate);
        let starts = self.window_starts(samples.len(), sample_rate)?;

        if let Some(bar) = &self.progress {
            bar.set_length(starts.len() as u64);
        }

        // Windows are independent; collect keeps them in time order.
        let entries: Vec<TimelineEntry> = starts
            .par_iter()
            .enumerate()
            .map(|(i, &start)| {
                let pitch = source.detect(&samples[start..start + window], sample_rate);
                if let Some(bar) = &self.progress {
                    bar.inc(1);
                }
                TimelineEntry {
                    time: round_to(i as f64 * self.hop_size, 3),
                    pitch: pitch.map(|p| p as f64),
                }
            })
            .collect();

        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }

        Ok(Timeline::new(self.hop_size, entries))
    }

    /// RMS level of every analysis window, in entry order.
    pub fn window_levels(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>, AnalysisError> {
        if samples.is_empty() {
            return Err(AnalysisError::EmptyBuffer);
        }
        let window = self.window_len(sample_rate);
        let starts = self.window_starts(samples.len(), sample_rate)?;
        Ok(starts
            .par_iter()
            .map(|&start| rms(&samples[start..start + window]))
            .collect())
    }
}

/// Value at percentile `q` (0-100), interpolating linearly between ranks.
pub fn percentile(values: &[f32], q: f64) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);

    let rank = q.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Silence entries whose window level is strictly below percentile `q` of
/// `levels`. Returns how many voiced entries were dropped.
pub fn gate_quiet_windows(timeline: &mut Timeline, levels: &[f32], q: f64) -> usize {
    let Some(threshold) = percentile(levels, q) else {
        return 0;
    };
    let mut gated = 0;
    for (entry, &level) in timeline.entries.iter_mut().zip(levels) {
        if level < threshold && entry.pitch.is_some() {
            entry.pitch = None;
            gated += 1;
        }
    }
    gated
}

/// Silence everything before `vocal_start` and inside any `silent_regions`
/// (inclusive bounds) of an isolated vocal timeline.
pub fn mask_vocal_silence(timeline: &mut Timeline, vocal_start: f64, silent_regions: &[(f64, f64)]) {
    for entry in &mut timeline.entries {
        let before_start = entry.time < vocal_start;
        let in_gap = silent_regions
            .iter()
            .any(|&(start, end)| start <= entry.time && entry.time <= end);
        if before_start || in_gap {
            entry.pitch = None;
        }
    }
}
