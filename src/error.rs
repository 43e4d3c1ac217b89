use thiserror::Error;

/// Failures the analysis core reports to its caller.
///
/// A quiet buffer is not an error: the detector answers `None` for it.
#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("audio buffer is empty")]
    EmptyBuffer,

    #[error("not enough samples: need at least {needed}, got {got}")]
    InsufficientSamples { needed: usize, got: usize },

    #[error("no tracks to analyze")]
    NoTracks,

    #[error("no track contains any notes")]
    NoNotes,

    #[error("track {index} does not exist ({count} tracks available)")]
    TrackOutOfRange { index: usize, count: usize },

    #[error("timeline resolution must be a positive number of seconds")]
    InvalidResolution,

    #[error("song duration must be a non-negative number of seconds")]
    InvalidDuration,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
