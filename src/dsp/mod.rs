//! DSP Engine — sample-playback electric piano.
//!
//! A shared [`wavetable::Wavetable`] holds the recorded keygroups; each
//! [`engine::Engine`] owns a fixed pool of voices that play them back,
//! driven by sample-accurate events from its block queue.

pub mod engine;
pub mod events;
pub mod filter;
pub mod keymap;
pub mod lfo;
pub mod renderer;
pub mod voice;
pub mod wavetable;
