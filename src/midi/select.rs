//! Picks the track most likely to carry the sung melody.
//!
//! Drum tracks and tracks with too few notes are skipped. Every remaining
//! track is profiled by how much its notes overlap (chords) and how high it
//! sits, then classified. Monophonic, mid-to-high tracks are vocal
//! candidates and the least chordal one wins.

use serde::Serialize;
use std::fmt;

use super::note::Track;
use crate::error::AnalysisError;

/// Tracks with fewer notes carry too little signal to judge.
pub const MIN_NOTES: usize = 50;
/// Overlaps shorter than this are near-simultaneous note-offs, not chords.
pub const OVERLAP_TOLERANCE: f64 = 0.05;
/// Above this polyphony rate a track is accompaniment.
pub const INSTRUMENT_POLYPHONY: f64 = 0.3;
/// Below this mean MIDI pitch a track is a bass line.
pub const BASS_PITCH: f64 = 40.0;
/// Above this polyphony rate a high track is only an uncertain candidate.
pub const UNCERTAIN_POLYPHONY: f64 = 0.1;
pub const UNCERTAIN_MIN_PITCH: f64 = 60.0;
/// Fallback selection prefers tracks at least this high.
pub const FALLBACK_MIN_PITCH: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Instrument,
    Bass,
    VocalCandidate,
    VocalCandidateUncertain,
}

impl Classification {
    pub fn is_candidate(self) -> bool {
        matches!(self, Self::VocalCandidate | Self::VocalCandidateUncertain)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Instrument => "instrument (chords)",
            Self::Bass => "bass",
            Self::VocalCandidate => "vocal candidate",
            Self::VocalCandidateUncertain => "vocal candidate (some chords)",
        };
        f.write_str(label)
    }
}

/// Profile of one scored track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackCandidate {
    pub track_id: usize,
    pub name: String,
    pub note_count: usize,
    pub polyphony_rate: f64,
    pub avg_pitch: f64,
    pub classification: Classification,
    /// Only meaningful for vocal candidates, 0.0 otherwise.
    pub score: f64,
}

/// Why a track was not scored at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Drums,
    TooFewNotes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Highest-scoring vocal candidate.
    Candidate,
    /// No candidate qualified; best-effort pick among tracks with notes.
    Fallback,
}

/// Outcome of a selection run, including the table used to reach it.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub track_id: usize,
    pub method: SelectionMethod,
    pub candidates: Vec<TrackCandidate>,
    pub skipped: Vec<(usize, SkipReason)>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackSelector;

impl TrackSelector {
    pub fn new() -> Self {
        Self
    }

    /// Index of the vocal track.
    pub fn select(&self, tracks: &[Track]) -> Result<usize, AnalysisError> {
        self.select_with_report(tracks).map(|s| s.track_id)
    }

    pub fn select_with_report(&self, tracks: &[Track]) -> Result<Selection, AnalysisError> {
        if tracks.is_empty() {
            return Err(AnalysisError::NoTracks);
        }

        let mut skipped = Vec::new();
        let mut candidates = Vec::new();

        for track in tracks {
            if track.is_drum {
                skipped.push((track.index, SkipReason::Drums));
                continue;
            }
            if track.notes.len() < MIN_NOTES {
                skipped.push((track.index, SkipReason::TooFewNotes));
                continue;
            }
            candidates.push(profile(track));
        }

        let best = candidates
            .iter()
            .filter(|c| c.classification.is_candidate())
            .fold(None::<&TrackCandidate>, |best, c| match best {
                Some(b) if b.score >= c.score => Some(b),
                _ => Some(c),
            });

        if let Some(best) = best {
            return Ok(Selection {
                track_id: best.track_id,
                method: SelectionMethod::Candidate,
                candidates,
                skipped,
            });
        }

        let track_id = fallback(tracks).ok_or(AnalysisError::NoNotes)?;
        Ok(Selection {
            track_id,
            method: SelectionMethod::Fallback,
            candidates,
            skipped,
        })
    }
}

/// Profile and classify one track.
pub fn profile(track: &Track) -> TrackCandidate {
    let polyphony_rate = polyphony_rate(track);
    let avg_pitch = track.average_pitch();
    let note_count = track.notes.len();
    let classification = classify(polyphony_rate, avg_pitch);
    let score = if classification.is_candidate() {
        (1.0 - polyphony_rate) * 100.0 + note_count as f64 / 100.0
    } else {
        0.0
    };

    TrackCandidate {
        track_id: track.index,
        name: track.name.clone(),
        note_count,
        polyphony_rate,
        avg_pitch,
        classification,
        score,
    }
}

pub fn classify(polyphony_rate: f64, avg_pitch: f64) -> Classification {
    if polyphony_rate > INSTRUMENT_POLYPHONY {
        Classification::Instrument
    } else if avg_pitch < BASS_PITCH {
        Classification::Bass
    } else if polyphony_rate > UNCERTAIN_POLYPHONY && avg_pitch >= UNCERTAIN_MIN_PITCH {
        Classification::VocalCandidateUncertain
    } else {
        Classification::VocalCandidate
    }
}

/// Share of the track's span where consecutive notes (by start time)
/// overlap by more than [`OVERLAP_TOLERANCE`], clamped to `[0, 1]`.
pub fn polyphony_rate(track: &Track) -> f64 {
    let notes = track.sorted_notes();
    let (Some(first), Some(last)) = (notes.first(), notes.last()) else {
        return 0.0;
    };

    let total_duration = last.end - first.start;
    if total_duration <= 0.0 {
        return 0.0;
    }

    let overlap_duration: f64 = notes
        .windows(2)
        .filter(|pair| pair[0].end > pair[1].start + OVERLAP_TOLERANCE)
        .map(|pair| pair[0].end.min(pair[1].end) - pair[1].start)
        .sum();

    (overlap_duration / total_duration).clamp(0.0, 1.0)
}

/// Among tracks with notes, the busiest one sitting at or above
/// [`FALLBACK_MIN_PITCH`]; failing that, the busiest one overall.
fn fallback(tracks: &[Track]) -> Option<usize> {
    let with_notes = || tracks.iter().filter(|t| !t.notes.is_empty());

    busiest(with_notes().filter(|t| t.average_pitch() >= FALLBACK_MIN_PITCH))
        .or_else(|| busiest(with_notes()))
}

/// Track with the most notes; the first one on ties.
fn busiest<'a>(pool: impl Iterator<Item = &'a Track>) -> Option<usize> {
    pool.fold(None::<&Track>, |best, t| match best {
        Some(b) if b.notes.len() >= t.notes.len() => Some(b),
        _ => Some(t),
    })
    .map(|t| t.index)
}

/// Log the candidate table the way the `tracks` command prints it.
pub fn log_selection(selection: &Selection, tracks: &[Track]) {
    log::info!(
        "{:<6} | {:<16} | {:>6} | {:>10} | {:>9} | {}",
        "Track", "Name", "Notes", "Polyphony", "Avg pitch", "Verdict"
    );
    for track in tracks {
        if let Some(c) = selection.candidates.iter().find(|c| c.track_id == track.index) {
            log::info!(
                "{:<6} | {:<16.16} | {:>6} | {:>9.1}% | {:>9.1} | {}",
                c.track_id,
                c.name,
                c.note_count,
                c.polyphony_rate * 100.0,
                c.avg_pitch,
                c.classification
            );
        } else if let Some((_, reason)) = selection.skipped.iter().find(|(i, _)| *i == track.index) {
            let verdict = match reason {
                SkipReason::Drums => "skipped: drums",
                SkipReason::TooFewNotes => "skipped: too few notes",
            };
            log::info!(
                "{:<6} | {:<16.16} | {:>6} | {:>10} | {:>9} | {}",
                track.index,
                track.name,
                track.notes.len(),
                "-",
                "-",
                verdict
            );
        }
    }

    match selection.method {
        SelectionMethod::Candidate => {
            log::info!("Vocal track: {}", selection.track_id)
        }
        SelectionMethod::Fallback => log::warn!(
            "No vocal candidate found, falling back to track {}",
            selection.track_id
        ),
    }
}
