use serde::{Deserialize, Serialize};

/// One sounding note, in seconds from the start of the song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub start: f64,
    pub end: f64,
    pub pitch: u8,
    pub velocity: u8,
    pub track_id: usize,
    pub is_drum: bool,
}

impl Note {
    /// Sounding at `t`? Start inclusive, end exclusive.
    pub fn is_active_at(&self, t: f64) -> bool {
        self.start <= t && t < self.end
    }
}

/// All notes of one MIDI track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub index: usize,
    /// Taken from the track name event, `"Track {index}"` when absent.
    pub name: String,
    pub is_drum: bool,
    pub notes: Vec<Note>,
}

impl Track {
    pub fn new(index: usize, name: Option<String>, is_drum: bool, notes: Vec<Note>) -> Self {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_track_name(index));
        Self {
            index,
            name,
            is_drum,
            notes,
        }
    }

    pub fn last_end(&self) -> Option<f64> {
        self.notes.iter().map(|n| n.end).reduce(f64::max)
    }

    pub fn average_pitch(&self) -> f64 {
        if self.notes.is_empty() {
            return 0.0;
        }
        self.notes.iter().map(|n| n.pitch as f64).sum::<f64>() / self.notes.len() as f64
    }

    /// Notes ordered by start time (stable for equal starts).
    pub fn sorted_notes(&self) -> Vec<Note> {
        let mut notes = self.notes.clone();
        notes.sort_by(|a, b| a.start.total_cmp(&b.start));
        notes
    }
}

pub fn default_track_name(index: usize) -> String {
    format!("Track {}", index)
}

/// Equal temperament, A4 (note 69) = 440 Hz.
pub fn midi_to_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reference_frequencies() {
        assert_relative_eq!(midi_to_frequency(69), 440.0);
        assert_relative_eq!(midi_to_frequency(81), 880.0, epsilon = 1e-9);
        assert_relative_eq!(midi_to_frequency(60), 261.6256, epsilon = 1e-4);
    }

    #[test]
    fn track_name_defaults() {
        assert_eq!(Track::new(3, None, false, vec![]).name, "Track 3");
        assert_eq!(Track::new(2, Some("  ".into()), false, vec![]).name, "Track 2");
        assert_eq!(Track::new(1, Some("Vocal".into()), false, vec![]).name, "Vocal");
    }

    #[test]
    fn activity_is_half_open() {
        let note = Note {
            start: 1.0,
            end: 2.0,
            pitch: 60,
            velocity: 100,
            track_id: 0,
            is_drum: false,
        };
        assert!(note.is_active_at(1.0));
        assert!(note.is_active_at(1.999));
        assert!(!note.is_active_at(2.0));
        assert!(!note.is_active_at(0.999));
    }
}
