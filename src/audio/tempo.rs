//! Beat tracking by spectral flux onsets, reported as metadata only.

use rustfft::{num_complex::Complex, FftPlanner};

use super::decode::AudioData;

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = 1024;
/// Flux frames on each side of the local mean.
const LOCAL_WINDOW: usize = 20;
/// Minimum spacing between two onsets (seconds).
const MIN_BEAT_GAP: f64 = 0.1;
const DEFAULT_BPM: f64 = 120.0;

/// Tempo and beat positions of a song.
#[derive(Debug, Clone, PartialEq)]
pub struct Rhythm {
    pub bpm: f64,
    pub beat_times: Vec<f64>,
}

/// Anything that can estimate `(bpm, beat_times)` from decoded audio.
pub trait TempoExtractor {
    fn extract(&self, audio: &AudioData) -> Rhythm;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpectralFluxTempo;

impl TempoExtractor for SpectralFluxTempo {
    fn extract(&self, audio: &AudioData) -> Rhythm {
        let flux = spectral_flux(&audio.samples, audio.sample_rate);
        let beat_times = detect_beats(&flux);
        let bpm = estimate_tempo(&beat_times);
        log::info!("Rhythm: {:.1} BPM, {} beats", bpm, beat_times.len());
        Rhythm { bpm, beat_times }
    }
}

/// `(time, flux)` per hop: summed positive magnitude change between
/// consecutive Hann-windowed spectra.
pub fn spectral_flux(samples: &[f32], sample_rate: u32) -> Vec<(f64, f32)> {
    if sample_rate == 0 || samples.len() < FFT_SIZE {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);
    let hann = hann_window(FFT_SIZE);

    let mut prev_magnitudes = vec![0.0f32; FFT_SIZE / 2];
    let mut flux_values = Vec::with_capacity(samples.len() / HOP_SIZE);

    let mut pos = 0;
    while pos + FFT_SIZE <= samples.len() {
        let mut buffer: Vec<Complex<f32>> = samples[pos..pos + FFT_SIZE]
            .iter()
            .zip(&hann)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        fft.process(&mut buffer);

        let magnitudes: Vec<f32> = buffer[..FFT_SIZE / 2].iter().map(|c| c.norm()).collect();
        let flux: f32 = magnitudes
            .iter()
            .zip(&prev_magnitudes)
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .sum();

        flux_values.push((pos as f64 / sample_rate as f64, flux));
        prev_magnitudes = magnitudes;
        pos += HOP_SIZE;
    }

    flux_values
}

/// Local flux peaks above an adaptive threshold, at least
/// `MIN_BEAT_GAP` apart.
pub fn detect_beats(flux_values: &[(f64, f32)]) -> Vec<f64> {
    let mut beat_times: Vec<f64> = Vec::new();

    for i in 0..flux_values.len() {
        let start = i.saturating_sub(LOCAL_WINDOW);
        let end = (i + LOCAL_WINDOW + 1).min(flux_values.len());
        let local_mean: f32 =
            flux_values[start..end].iter().map(|(_, f)| f).sum::<f32>() / (end - start) as f32;
        let threshold = local_mean * 1.5 + 0.01;

        let (time, flux) = flux_values[i];
        if flux <= threshold {
            continue;
        }

        let is_peak = (i == 0 || flux >= flux_values[i - 1].1)
            && (i + 1 == flux_values.len() || flux >= flux_values[i + 1].1);
        let far_enough = beat_times.last().map_or(true, |&last| time - last > MIN_BEAT_GAP);

        if is_peak && far_enough {
            beat_times.push(time);
        }
    }

    beat_times
}

/// Median inter-beat interval in the 60-200 BPM range, 120 BPM when there
/// is not enough to go on.
pub fn estimate_tempo(beat_times: &[f64]) -> f64 {
    let mut reasonable: Vec<f64> = beat_times
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&i| (0.3..=1.0).contains(&i))
        .collect();

    if reasonable.is_empty() {
        return DEFAULT_BPM;
    }

    reasonable.sort_by(|a, b| a.total_cmp(b));
    60.0 / reasonable[reasonable.len() / 2]
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}
