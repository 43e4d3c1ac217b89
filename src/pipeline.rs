//! Batch runs: one song in, one persisted timeline out.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use crate::audio::decode::AudioDecoder;
use crate::audio::silence;
use crate::audio::tempo::TempoExtractor;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::midi::parse::{self, MidiSong};
use crate::midi::select::{self, Selection, TrackSelector};
use crate::pitch::detector::{PitchDetector, PitchSource, PitchSourceChain};
use crate::pitch::yin::YinDetector;
use crate::score::{ScoreSession, SessionSummary};
use crate::separate::VocalSeparator;
use crate::timeline::builder::{
    gate_quiet_windows, mask_vocal_silence, AudioTimelineBuilder, MidiTimelineBuilder, VOICING_PERCENTILE,
};
use crate::timeline::store::{Metadata, SourceType, TimelineFile};
use crate::timeline::Timeline;

/// Pitch sources by name, tried in the given order.
pub fn build_pitch_source(names: &[String], volume_threshold: f32) -> Result<PitchSourceChain> {
    let mut sources: Vec<Box<dyn PitchSource>> = Vec::with_capacity(names.len());
    for name in names {
        match name.as_str() {
            "autocorrelation" => sources.push(Box::new(PitchDetector::new(volume_threshold))),
            "autocorrelation_integer" => {
                sources.push(Box::new(PitchDetector::integer_period(volume_threshold)))
            }
            "yin" => sources.push(Box::new(YinDetector::new(volume_threshold))),
            other => anyhow::bail!(
                "Unknown pitch detector '{}'. Valid names: autocorrelation, autocorrelation_integer, yin",
                other
            ),
        }
    }
    if sources.is_empty() {
        anyhow::bail!("At least one pitch detector must be configured");
    }
    Ok(PitchSourceChain::new(sources))
}

pub fn progress_bar(len: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let template = format!(
        "[{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos}}/{{len}} {} ({{eta}} remaining)",
        unit
    );
    if let Ok(style) = ProgressStyle::default_bar().template(&template) {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Collaborators and settings shared by every run.
pub struct Pipeline<'a> {
    pub settings: &'a AnalysisConfig,
    pub decoder: &'a dyn AudioDecoder,
    pub tempo: &'a dyn TempoExtractor,
    pub source: &'a dyn PitchSource,
    pub show_progress: bool,
}

impl<'a> Pipeline<'a> {
    /// MIDI run. Picks the vocal track unless `track` names one.
    pub fn analyze_midi(&self, path: &Path, track: Option<usize>, resolution: f64) -> Result<TimelineFile> {
        log::info!("MIDI analysis: {}", path.display());
        let song = parse::parse_file(path)?;
        if song.tracks.is_empty() {
            return Err(AnalysisError::NoTracks.into());
        }

        let track_id = match track {
            Some(index) => {
                if index >= song.tracks.len() {
                    return Err(AnalysisError::TrackOutOfRange {
                        index,
                        count: song.tracks.len(),
                    }
                    .into());
                }
                log::info!("Using track {} as requested", index);
                index
            }
            None => {
                let selection = TrackSelector::new().select_with_report(&song.tracks)?;
                select::log_selection(&selection, &song.tracks);
                selection.track_id
            }
        };

        let vocal = &song.tracks[track_id];
        let builder = MidiTimelineBuilder::new(vocal)?;
        log::info!(
            "Track {} ({}): {} notes, vocal start {:.2}s, avg gap {:.3}s, instrumental threshold {:.3}s",
            track_id,
            vocal.name,
            vocal.notes.len(),
            builder.vocal_start(),
            builder.avg_gap(),
            builder.instrumental_threshold()
        );

        let timeline = builder.produce(song.duration, resolution)?;
        timeline.log_stats();

        Ok(TimelineFile::new(
            &timeline,
            Metadata {
                bpm: None,
                beat_times: None,
                source_file: Some(path.display().to_string()),
                source_type: Some(SourceType::Midi),
                vocal_start_time: Some(builder.vocal_start()),
            },
        ))
    }

    /// Selection report without building a timeline.
    pub fn inspect_tracks(&self, path: &Path) -> Result<(MidiSong, Selection)> {
        let song = parse::parse_file(path)?;
        let selection = TrackSelector::new().select_with_report(&song.tracks)?;
        Ok((song, selection))
    }

    fn pitch_timeline(&self, samples: &[f32], sample_rate: u32) -> Result<Timeline> {
        let mut builder = AudioTimelineBuilder::new(self.settings.window_size, self.settings.hop_size);
        if self.show_progress {
            builder = builder.with_progress(progress_bar(0, "windows"));
        }
        log::info!(
            "Detecting pitch: window {:.3}s, hop {:.3}s, source {}",
            self.settings.window_size,
            self.settings.hop_size,
            self.source.name()
        );
        let timeline = builder.build(samples, sample_rate, self.source)?;
        Ok(timeline)
    }

    /// Windowed pitch detection over a whole recording.
    pub fn analyze_audio(&self, path: &Path) -> Result<TimelineFile> {
        log::info!("Audio analysis: {}", path.display());
        let audio = self.decoder.decode(path)?;
        let timeline = self.pitch_timeline(&audio.samples, audio.sample_rate)?;
        timeline.log_stats();
        let rhythm = self.tempo.extract(&audio);

        Ok(TimelineFile::new(
            &timeline,
            Metadata {
                bpm: Some(rhythm.bpm),
                beat_times: Some(rhythm.beat_times),
                source_file: Some(path.display().to_string()),
                source_type: Some(SourceType::VocalAudio),
                vocal_start_time: None,
            },
        ))
    }

    /// Audio run on an isolated vocal stem: silence before the first sung
    /// phrase and between phrases is masked out, as are the quietest windows.
    pub fn analyze_vocal(&self, path: &Path) -> Result<TimelineFile> {
        log::info!("Vocal analysis: {}", path.display());
        let audio = self.decoder.decode(path)?;
        let mut timeline = self.pitch_timeline(&audio.samples, audio.sample_rate)?;

        let intervals =
            silence::non_silent_intervals(&audio.samples, audio.sample_rate, self.settings.silence_top_db);
        let vocal_start = silence::vocal_start_time(&intervals);
        let gaps = silence::silent_gaps(&intervals);
        if intervals.is_empty() {
            log::warn!("No vocals found in {}, starting at 0s", path.display());
        }
        log::info!("Vocal start {:.2}s, {} silent gaps", vocal_start, gaps.len());

        mask_vocal_silence(&mut timeline, vocal_start, &gaps);
        let levels = AudioTimelineBuilder::new(self.settings.window_size, self.settings.hop_size)
            .window_levels(&audio.samples, audio.sample_rate)?;
        let gated = gate_quiet_windows(&mut timeline, &levels, VOICING_PERCENTILE);
        log::debug!("{} windows below the {}th level percentile unvoiced", gated, VOICING_PERCENTILE);
        timeline.log_stats();
        let rhythm = self.tempo.extract(&audio);

        Ok(TimelineFile::new(
            &timeline,
            Metadata {
                bpm: Some(rhythm.bpm),
                beat_times: Some(rhythm.beat_times),
                source_file: Some(path.display().to_string()),
                source_type: Some(SourceType::VocalAudioOnly),
                vocal_start_time: Some(vocal_start),
            },
        ))
    }

    /// MIDI when one is given and it works out, otherwise separate the
    /// vocals from `input` and analyze the stem.
    pub fn auto(
        &self,
        input: &Path,
        midi: Option<&Path>,
        resolution: f64,
        separator: &dyn VocalSeparator,
    ) -> Result<TimelineFile> {
        if let Some(midi) = midi {
            if midi.exists() {
                match self.analyze_midi(midi, None, resolution) {
                    Ok(file) => return Ok(file),
                    Err(err) => log::warn!("MIDI analysis failed ({:#}), using audio instead", err),
                }
            } else {
                log::warn!("MIDI file not found: {}, using audio instead", midi.display());
            }
        }

        let vocals = separator
            .separate(input)
            .with_context(|| format!("Vocal separation failed for {}", input.display()))?;
        self.analyze_vocal(&vocals)
    }

    /// Score a recorded performance against a saved timeline, one sample
    /// per reference entry.
    pub fn replay(&self, reference: &TimelineFile, recording: &Path) -> Result<SessionSummary> {
        let reference = reference.to_timeline();
        let audio = self.decoder.decode(recording)?;

        let mut builder = AudioTimelineBuilder::new(self.settings.window_size, reference.resolution);
        if self.show_progress {
            builder = builder.with_progress(progress_bar(0, "windows"));
        }
        let performance = builder.build(&audio.samples, audio.sample_rate, self.source)?;

        let mut session = ScoreSession::new(&reference);
        for entry in &performance.entries {
            session.record(entry.time, entry.pitch);
        }
        let summary = session.summary();
        log::info!(
            "Replay: mean score {:.1} over {} scored samples ({} skipped)",
            summary.mean_score,
            summary.scored,
            summary.skipped
        );
        Ok(summary)
    }
}
