use anyhow::{Context, Result};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::BTreeMap;
use std::path::Path;

use super::note::{Note, Track};

const DEFAULT_TEMPO_USEC: u32 = 500_000;
const DRUM_CHANNEL: u8 = 9;

/// Notes of a Standard MIDI File, timed in seconds. Each channel of each SMF
/// track becomes its own `Track`; SMF tracks without notes are kept empty.
#[derive(Debug, Clone)]
pub struct MidiSong {
    pub tracks: Vec<Track>,
    /// Latest note end across all tracks.
    pub duration: f64,
}

impl MidiSong {
    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }
}

pub fn parse_file(path: &Path) -> Result<MidiSong> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read MIDI file: {}", path.display()))?;
    let song = parse_bytes(&bytes)
        .with_context(|| format!("Failed to parse MIDI file: {}", path.display()))?;

    log::info!(
        "Loaded MIDI: {} tracks, {} notes, {:.2}s",
        song.tracks.len(),
        song.note_count(),
        song.duration
    );
    Ok(song)
}

pub fn parse_bytes(bytes: &[u8]) -> Result<MidiSong> {
    let smf = Smf::parse(bytes).context("Invalid Standard MIDI File")?;
    let clock = TickClock::from_smf(&smf);

    let song_end_tick = smf
        .tracks
        .iter()
        .map(|track| track.iter().map(|e| e.delta.as_int() as u64).sum::<u64>())
        .max()
        .unwrap_or(0);

    let mut active = ActiveNotes::default();
    let mut tracks = Vec::with_capacity(smf.tracks.len());

    for (smf_track, events) in smf.tracks.iter().enumerate() {
        let mut tick: u64 = 0;
        let mut name = None;
        let mut by_channel: BTreeMap<u8, Vec<Note>> = BTreeMap::new();

        for event in events {
            tick += event.delta.as_int() as u64;

            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) if name.is_none() => {
                    name = Some(String::from_utf8_lossy(raw).into_owned());
                }
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            active.press((smf_track, channel, key.as_int()), tick, vel.as_int());
                        }
                        MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                            let slot = (smf_track, channel, key.as_int());
                            if let Some((onset, velocity)) = active.release(slot) {
                                by_channel
                                    .entry(channel)
                                    .or_default()
                                    .extend(make_note(&clock, slot, onset, tick, velocity));
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        for (slot, onset, velocity) in active.drain_track(smf_track) {
            by_channel
                .entry(slot.1)
                .or_default()
                .extend(make_note(&clock, slot, onset, song_end_tick, velocity));
        }
        by_channel.retain(|_, notes| !notes.is_empty());

        if by_channel.is_empty() {
            log::debug!("Track {}: {:?}, no notes", tracks.len(), name);
            tracks.push(Track::new(tracks.len(), name, false, Vec::new()));
            continue;
        }

        for (channel, mut notes) in by_channel {
            let index = tracks.len();
            let is_drum = channel == DRUM_CHANNEL;
            for note in &mut notes {
                note.track_id = index;
                note.is_drum = is_drum;
            }
            notes.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));

            log::debug!(
                "Track {} (SMF track {}, channel {}): {:?}, {} notes{}",
                index,
                smf_track,
                channel,
                name,
                notes.len(),
                if is_drum { " (drums)" } else { "" }
            );
            tracks.push(Track::new(index, name.clone(), is_drum, notes));
        }
    }

    let duration = tracks
        .iter()
        .filter_map(Track::last_end)
        .fold(0.0f64, f64::max);

    Ok(MidiSong { tracks, duration })
}

fn make_note(
    clock: &TickClock,
    (_, _, key): NoteSlot,
    onset: u64,
    offset: u64,
    velocity: u8,
) -> Option<Note> {
    let start = clock.seconds(onset);
    let end = clock.seconds(offset);
    (end > start).then_some(Note {
        start,
        end,
        pitch: key,
        velocity,
        track_id: 0,
        is_drum: false,
    })
}

/// `(smf_track, channel, key)`
type NoteSlot = (usize, u8, u8);

/// Notes currently held down, scoped to one parse pass. Repeated note-ons on
/// the same slot stack and are released last-in first-out.
#[derive(Default)]
struct ActiveNotes {
    held: BTreeMap<NoteSlot, Vec<(u64, u8)>>,
}

impl ActiveNotes {
    fn press(&mut self, slot: NoteSlot, tick: u64, velocity: u8) {
        self.held.entry(slot).or_default().push((tick, velocity));
    }

    fn release(&mut self, slot: NoteSlot) -> Option<(u64, u8)> {
        let stack = self.held.get_mut(&slot)?;
        let held = stack.pop();
        if stack.is_empty() {
            self.held.remove(&slot);
        }
        held
    }

    fn drain_track(&mut self, smf_track: usize) -> Vec<(NoteSlot, u64, u8)> {
        let slots: Vec<NoteSlot> = self
            .held
            .keys()
            .filter(|(t, _, _)| *t == smf_track)
            .copied()
            .collect();

        let mut drained = Vec::new();
        for slot in slots {
            if let Some(stack) = self.held.remove(&slot) {
                drained.extend(stack.into_iter().map(|(tick, vel)| (slot, tick, vel)));
            }
        }
        drained
    }
}

/// Converts ticks to seconds through the song's tempo map.
struct TickClock {
    ticks_per_beat: Option<f64>,
    ticks_per_second: f64,
    /// (tick, microseconds per beat, seconds at that tick), sorted by tick.
    segments: Vec<(u64, u32, f64)>,
}

impl TickClock {
    fn from_smf(smf: &Smf) -> Self {
        match smf.header.timing {
            Timing::Metrical(ppq) => {
                let mut changes: Vec<(u64, u32)> = Vec::new();
                for track in &smf.tracks {
                    let mut tick = 0u64;
                    for event in track {
                        tick += event.delta.as_int() as u64;
                        if let TrackEventKind::Meta(MetaMessage::Tempo(t)) = event.kind {
                            changes.push((tick, t.as_int()));
                        }
                    }
                }
                Self::metrical(ppq.as_int(), changes)
            }
            Timing::Timecode(fps, subframe) => Self {
                ticks_per_beat: None,
                ticks_per_second: fps.as_f32() as f64 * subframe as f64,
                segments: Vec::new(),
            },
        }
    }

    fn metrical(ppq: u16, mut changes: Vec<(u64, u32)>) -> Self {
        let ppq = ppq.max(1) as f64;
        // Stable sort: a later track's change at the same tick wins.
        changes.sort_by_key(|(tick, _)| *tick);

        let mut segments: Vec<(u64, u32, f64)> = vec![(0, DEFAULT_TEMPO_USEC, 0.0)];
        for (tick, usec) in changes {
            let (last_tick, last_usec, last_secs) = segments[segments.len() - 1];
            if tick == last_tick {
                let idx = segments.len() - 1;
                segments[idx].1 = usec;
                continue;
            }
            let secs = last_secs + (tick - last_tick) as f64 * last_usec as f64 / 1e6 / ppq;
            segments.push((tick, usec, secs));
        }

        Self {
            ticks_per_beat: Some(ppq),
            ticks_per_second: 0.0,
            segments,
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        let Some(ppq) = self.ticks_per_beat else {
            return if self.ticks_per_second > 0.0 {
                tick as f64 / self.ticks_per_second
            } else {
                0.0
            };
        };
        let idx = self.segments.partition_point(|(t, _, _)| *t <= tick);
        let (seg_tick, usec, secs) = self.segments[idx.saturating_sub(1)];
        secs + (tick - seg_tick) as f64 * usec as f64 / 1e6 / ppq
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

    /// `(start_tick, end_tick, key, channel)`
    pub type TickNote = (u64, u64, u8, u8);

    pub fn track_events(name: Option<&'static str>, notes: &[TickNote]) -> Vec<TrackEvent<'static>> {
        // (tick, is_on, key, channel); offs sort before ons at the same tick
        let mut raw: Vec<(u64, bool, u8, u8)> = Vec::new();
        for &(start, end, key, channel) in notes {
            raw.push((start, true, key, channel));
            raw.push((end, false, key, channel));
        }
        raw.sort_by_key(|&(tick, on, _, _)| (tick, on));

        let mut events = Vec::new();
        if let Some(name) = name {
            events.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
            });
        }
        let mut last = 0u64;
        for (tick, on, key, channel) in raw {
            let message = if on {
                MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(100) }
            } else {
                MidiMessage::NoteOff { key: u7::new(key), vel: u7::new(0) }
            };
            events.push(TrackEvent {
                delta: u28::new((tick - last) as u32),
                kind: TrackEventKind::Midi { channel: u4::new(channel), message },
            });
            last = tick;
        }
        events.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        events
    }

    pub fn tempo_track(changes: &[(u64, u32)]) -> Vec<TrackEvent<'static>> {
        let mut events = Vec::new();
        let mut last = 0u64;
        for &(tick, usec) in changes {
            events.push(TrackEvent {
                delta: u28::new((tick - last) as u32),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(usec))),
            });
            last = tick;
        }
        events.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        events
    }

    pub fn smf(tracks: Vec<Vec<TrackEvent<'static>>>) -> Smf<'static> {
        let mut smf = Smf::new(Header::new(Format::Parallel, Timing::Metrical(u15::new(480))));
        smf.tracks = tracks;
        smf
    }

    pub fn to_bytes(smf: &Smf) -> Vec<u8> {
        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).expect("write smf");
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_tempo_timing() {
        // 480 ticks per beat at 120 BPM: one beat is half a second.
        let smf = smf(vec![track_events(Some("Lead"), &[(0, 480, 60, 0), (960, 1440, 64, 0)])]);
        let song = parse_bytes(&to_bytes(&smf)).unwrap();

        assert_eq!(song.tracks.len(), 1);
        let track = &song.tracks[0];
        assert_eq!(track.name, "Lead");
        assert!(!track.is_drum);
        assert_eq!(track.notes.len(), 2);
        assert_relative_eq!(track.notes[0].end, 0.5);
        assert_relative_eq!(track.notes[1].start, 1.0);
        assert_relative_eq!(song.duration, 1.5);
    }

    #[test]
    fn tempo_change_mid_note() {
        // 120 BPM for the first beat, then 60 BPM.
        let smf = smf(vec![
            tempo_track(&[(0, 500_000), (480, 1_000_000)]),
            track_events(None, &[(0, 960, 67, 0)]),
        ]);
        let song = parse_bytes(&to_bytes(&smf)).unwrap();
        let note = &song.tracks[1].notes[0];
        assert_relative_eq!(note.start, 0.0);
        assert_relative_eq!(note.end, 1.5);
        assert_eq!(song.tracks[1].name, "Track 1");
        assert!(song.tracks[0].notes.is_empty());
    }

    #[test]
    fn drum_channel_marks_track() {
        let smf = smf(vec![
            track_events(Some("Kit"), &[(0, 120, 36, 9), (240, 360, 38, 9)]),
            track_events(Some("Keys"), &[(0, 480, 60, 0)]),
        ]);
        let song = parse_bytes(&to_bytes(&smf)).unwrap();
        assert!(song.tracks[0].is_drum);
        assert!(song.tracks[0].notes.iter().all(|n| n.is_drum));
        assert!(!song.tracks[1].is_drum);
    }

    #[test]
    fn same_key_on_two_channels_kept_apart() {
        let smf = smf(vec![track_events(None, &[(0, 960, 60, 0), (480, 720, 60, 1)])]);
        let song = parse_bytes(&to_bytes(&smf)).unwrap();
        assert_eq!(song.tracks.len(), 2);
        assert_relative_eq!(song.tracks[0].notes[0].end, 1.0);
        assert_relative_eq!(song.tracks[1].notes[0].start, 0.5);
        assert_relative_eq!(song.tracks[1].notes[0].end, 0.75);
    }

    #[test]
    fn single_track_file_splits_by_channel() {
        // Format 0 style: melody, chords and percussion share one SMF track.
        let mut notes: Vec<TickNote> = Vec::new();
        for i in 0..8u64 {
            notes.push((i * 240, i * 240 + 200, 64, 0));
            notes.push((i * 240, i * 240 + 220, 48, 1));
            notes.push((i * 240, i * 240 + 220, 55, 1));
            notes.push((i * 240 + 60, i * 240 + 100, 81, 9));
        }
        let smf = smf(vec![track_events(Some("Song"), &notes)]);
        let song = parse_bytes(&to_bytes(&smf)).unwrap();

        assert_eq!(song.tracks.len(), 3);
        let drums: Vec<bool> = song.tracks.iter().map(|t| t.is_drum).collect();
        assert_eq!(drums, vec![false, false, true]);
        for (index, track) in song.tracks.iter().enumerate() {
            assert_eq!(track.index, index);
            assert_eq!(track.name, "Song");
            assert!(track.notes.iter().all(|n| n.track_id == index));
            assert!(track.notes.iter().all(|n| n.is_drum == track.is_drum));
        }
        assert!(song.tracks[0].notes.iter().all(|n| n.pitch == 64));
        assert_eq!(song.tracks[1].notes.len(), 16);
        assert!(song.tracks[2].notes.iter().all(|n| n.pitch == 81));
    }

    #[test]
    fn unterminated_note_runs_to_song_end() {
        let mut held = track_events(None, &[]);
        held.insert(
            0,
            midly::TrackEvent {
                delta: midly::num::u28::new(0),
                kind: TrackEventKind::Midi {
                    channel: midly::num::u4::new(0),
                    message: MidiMessage::NoteOn {
                        key: midly::num::u7::new(72),
                        vel: midly::num::u7::new(90),
                    },
                },
            },
        );
        let smf = smf(vec![held, track_events(None, &[(0, 1920, 48, 0)])]);
        let song = parse_bytes(&to_bytes(&smf)).unwrap();
        let note = &song.tracks[0].notes[0];
        assert_eq!(note.pitch, 72);
        assert_relative_eq!(note.end, 2.0);
        assert_relative_eq!(song.duration, 2.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_bytes(b"not a midi file").is_err());
    }

    #[test]
    fn parse_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mid");
        smf(vec![track_events(Some("Voice"), &[(0, 240, 62, 0)])])
            .save(&path)
            .unwrap();
        let song = parse_file(&path).unwrap();
        assert_eq!(song.tracks[0].name, "Voice");
        assert_relative_eq!(song.duration, 0.25);
    }
}
