mod audio;
mod cli;
mod config;
mod error;
mod midi;
mod pipeline;
mod pitch;
mod score;
mod separate;
mod timeline;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::Path;

use audio::decode::SymphoniaDecoder;
use audio::tempo::SpectralFluxTempo;
use cli::{Cli, Command};
use config::Config;
use pipeline::Pipeline;
use pitch::detector::PitchDetector;
use score::LiveRequest;
use separate::CommandSeparator;
use timeline::store::TimelineFile;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    let mut cfg = Config::default();
    if let Some(path) = config::find_config_path(cli.config.as_deref()) {
        if let Some(loaded) = config::load_config(&path) {
            log::info!("Loaded config from {}", path.display());
            cfg = loaded;
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    // Config values apply only when the CLI is at its default
    if cli.output == config::default_output_path() {
        cli.output = cfg.output.path.clone();
    }
    match &mut cli.command {
        Command::Midi { resolution, .. } => {
            if *resolution == config::default_resolution() {
                *resolution = cfg.analysis.resolution;
            }
        }
        Command::Audio { window, hop, .. } => {
            if *window != config::default_window_size() {
                cfg.analysis.window_size = *window;
            }
            if *hop != config::default_hop_size() {
                cfg.analysis.hop_size = *hop;
            }
        }
        _ => {}
    }

    let source = pipeline::build_pitch_source(&cfg.analysis.detectors, cfg.analysis.volume_threshold)?;
    let pipeline = Pipeline {
        settings: &cfg.analysis,
        decoder: &SymphoniaDecoder,
        tempo: &SpectralFluxTempo,
        source: &source,
        show_progress: !cli.quiet,
    };

    match &cli.command {
        Command::Midi { file, track, resolution } => {
            require_file(file)?;
            let result = pipeline.analyze_midi(file, *track, *resolution)?;
            result.save(&cli.output, cfg.output.pretty)?;
        }
        Command::Audio { file, .. } => {
            require_file(file)?;
            let result = pipeline.analyze_audio(file)?;
            result.save(&cli.output, cfg.output.pretty)?;
        }
        Command::Vocal { file } => {
            require_file(file)?;
            let result = pipeline.analyze_vocal(file)?;
            result.save(&cli.output, cfg.output.pretty)?;
        }
        Command::Auto { file, midi } => {
            require_file(file)?;
            let separator = CommandSeparator::from_config(&cfg.separator);
            let result = pipeline.auto(file, midi.as_deref(), cfg.analysis.resolution, &separator)?;
            result.save(&cli.output, cfg.output.pretty)?;
        }
        Command::Tracks { file } => {
            require_file(file)?;
            let (song, selection) = pipeline.inspect_tracks(file)?;
            midi::select::log_selection(&selection, &song.tracks);
            println!("{}", serde_json::to_string_pretty(&selection)?);
        }
        Command::Score { request } => {
            let json = read_request(request)?;
            let request = LiveRequest::from_json(&json)?;
            let detector = PitchDetector::new(cfg.analysis.live_volume_threshold);
            let response = score::respond(&request, &detector)?;
            println!("{}", serde_json::to_string(&response)?);
        }
        Command::Replay { timeline, recording } => {
            require_file(recording)?;
            let reference = TimelineFile::load(timeline)?;
            let summary = pipeline.replay(&reference, recording)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn require_file(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Input file not found: {}", path.display());
    }
    Ok(())
}

fn read_request(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut json = String::new();
        std::io::stdin()
            .read_to_string(&mut json)
            .context("Failed to read request from stdin")?;
        return Ok(json);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request: {}", path.display()))
}
