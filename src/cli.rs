use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config;

#[derive(Parser, Debug)]
#[command(name = "pitchline", about = "Reference pitch timelines and pitch scoring for karaoke")]
pub struct Cli {
    /// Timeline JSON written by analysis commands
    #[arg(short, long, global = true, default_value_os_t = config::default_output_path())]
    pub output: PathBuf,

    /// Config file (default: ./pitchline.toml, then ~/.config/pitchline/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the timeline from a MIDI file
    Midi {
        file: PathBuf,

        /// Vocal track index (default: pick automatically)
        #[arg(long)]
        track: Option<usize>,

        /// Seconds between timeline entries
        #[arg(long, default_value_t = config::default_resolution())]
        resolution: f64,
    },

    /// Detect pitch over a whole recording
    Audio {
        file: PathBuf,

        /// Analysis window (seconds)
        #[arg(long, default_value_t = config::default_window_size())]
        window: f64,

        /// Step between windows (seconds)
        #[arg(long, default_value_t = config::default_hop_size())]
        hop: f64,
    },

    /// Detect pitch on an isolated vocal stem, masking silence
    Vocal { file: PathBuf },

    /// Use the MIDI file if given, else separate vocals from the recording
    Auto {
        file: PathBuf,

        #[arg(long)]
        midi: Option<PathBuf>,
    },

    /// Show how each MIDI track was classified
    Tracks { file: PathBuf },

    /// Score one live request (JSON file, or - for stdin)
    Score {
        #[arg(long)]
        request: PathBuf,
    },

    /// Score a recorded performance against a saved timeline
    Replay {
        timeline: PathBuf,
        recording: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_defaults() {
        let cli = Cli::try_parse_from(["pitchline", "midi", "song.mid"]).unwrap();
        assert_eq!(cli.output, config::default_output_path());
        match cli.command {
            Command::Midi { file, track, resolution } => {
                assert_eq!(file, PathBuf::from("song.mid"));
                assert_eq!(track, None);
                assert_eq!(resolution, 0.05);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pitchline", "audio", "vocals.wav", "--hop", "0.02", "-o", "out.json", "--quiet",
        ])
        .unwrap();
        assert_eq!(cli.output, PathBuf::from("out.json"));
        assert!(cli.quiet);
        assert!(matches!(cli.command, Command::Audio { hop, window, .. } if hop == 0.02 && window == 0.1));
    }

    #[test]
    fn auto_and_replay() {
        let cli = Cli::try_parse_from(["pitchline", "auto", "song.mp4", "--midi", "song.mid"]).unwrap();
        assert!(matches!(cli.command, Command::Auto { midi: Some(_), .. }));

        let cli = Cli::try_parse_from(["pitchline", "replay", "pitch.json", "take1.wav"]).unwrap();
        assert!(matches!(cli.command, Command::Replay { .. }));

        assert!(Cli::try_parse_from(["pitchline", "score"]).is_err());
    }
}
