use thiserror::Error;

/// Errors raised while building an engine's static data.
///
/// The render path itself never fails; everything here is caught once,
/// when the keymap and wavetable are assembled.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("keymap has no pitch bands")]
    EmptyKeymap,

    #[error("pitch band {index} (high note {high}) is not above the previous band (high note {previous})")]
    UnsortedKeymap { index: usize, high: i32, previous: i32 },

    #[error("highest pitch band ends at note {high}, must reach at least {required}")]
    IncompleteCoverage { high: i32, required: i32 },

    #[error("band {band} layer {layer}: {reason}")]
    InvalidRegion {
        band: usize,
        layer: usize,
        reason: &'static str,
    },

    #[error("band {band} layer {layer}: region end {end} outside waveform of {len} samples")]
    RegionOutOfBounds {
        band: usize,
        layer: usize,
        end: usize,
        len: usize,
    },

    #[error("invalid sample rate {0}")]
    InvalidSampleRate(f32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
