pub mod dsp;
pub mod error;
pub mod params;
pub mod preset;

use std::sync::Arc;

use crate::dsp::engine::{Engine, EngineConfig};
use crate::dsp::keymap::{Keymap, STANDARD_TABLE_RATE};
use crate::dsp::renderer::TimedNote;
use crate::dsp::wavetable::Wavetable;
use wasm_bindgen::prelude::*;

pub use crate::dsp::events::EngineEvent;
pub use crate::error::EngineError;
pub use crate::params::{DerivedParams, ParamId, Params};
pub use crate::preset::Program;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the epiano-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: the factory program bank as an array of
/// `{ name, params }` objects.
#[wasm_bindgen]
pub fn factory_programs() -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(&preset::factory_programs())
        .map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// Build an engine over the standard keymap from raw little-endian 16-bit
/// waveform bytes.
pub fn standard_engine(table_bytes: &[u8], sample_rate: f32) -> Result<Engine, EngineError> {
    let table = Wavetable::from_le_bytes(table_bytes, STANDARD_TABLE_RATE, Keymap::standard())?;
    Engine::new(
        Arc::new(table),
        EngineConfig {
            sample_rate,
            ..EngineConfig::default()
        },
    )
}

/// WASM-exposed: render a note list with a program to a WAV byte array.
///
/// `table_bytes` is the standard waveform as little-endian 16-bit samples,
/// `program_json` a serialized [`Program`], and `notes` an array of
/// `{ start, length, note, velocity, slot }` objects in frames.
#[wasm_bindgen]
pub fn render_program_wav(
    table_bytes: &[u8],
    program_json: &str,
    notes: JsValue,
    total_frames: usize,
    sample_rate: f32,
) -> Result<Vec<u8>, JsValue> {
    let program = Program::from_json(program_json).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    let notes: Vec<TimedNote> =
        serde_wasm_bindgen::from_value(notes).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    let mut engine =
        standard_engine(table_bytes, sample_rate).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    engine.load_program(&program);
    Ok(dsp::renderer::render_wav(&mut engine, &notes, total_frames, 256))
}
