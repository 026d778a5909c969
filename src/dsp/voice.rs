//! Voice — one sounding (or decaying) note.
//!
//! A voice walks through its keygroup region with a 16.16 fixed-point
//! phase accumulator, wraps back by the loop length whenever it passes the
//! region end, and interpolates between neighbouring table samples. Its
//! amplitude decays exponentially from a velocity-dependent start level;
//! note-off swaps the decay coefficient for a faster release.

use crate::params::DerivedParams;

use super::filter::VoiceLowpass;
use super::wavetable::Wavetable;

/// Envelope level below which a voice is considered silent.
pub const SILENCE: f32 = 0.0001;

/// Note number used in the release curve of a pedal-held voice.
pub const SUSTAIN_NOTE: i32 = 128;

/// Decay coefficient of a voice cut by all-notes-off.
const IDLE_DECAY: f32 = 0.99;

/// Fixed-point shift of the phase accumulator.
const FRAC_BITS: u32 = 16;
const FRAC_MASK: u32 = (1 << FRAC_BITS) - 1;

/// Largest phase increment the accumulator can take without overflowing.
const MAX_DELTA: u32 = u32::MAX - FRAC_MASK;

/// What a voice slot is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceNote {
    /// Silent; free for the next note-on.
    Free,
    /// Sounding, triggered by this note.
    Held(u8),
    /// Key released while the sustain pedal was down.
    Sustained,
}

/// Everything a note-on needs besides the note itself.
pub struct TriggerContext<'a> {
    pub table: &'a Wavetable,
    pub derived: &'a DerivedParams,
    /// Engine output rate.
    pub sample_rate: f32,
    /// Channel volume, sets the pan gains.
    pub volume: f32,
    /// Muffle depth in cutoff units.
    pub muff: f32,
}

#[derive(Debug, Clone)]
pub struct Voice {
    /// Playback rate, 16.16 fixed point.
    delta: u32,
    /// Fractional phase, low 16 bits only.
    frac: u32,
    position: usize,
    /// Last position before wrapping (region end - 1).
    end: usize,
    loop_len: usize,

    env: f32,
    decay: f32,

    lowpass: VoiceLowpass,
    cutoff: f32,

    gain_left: f32,
    gain_right: f32,

    note: VoiceNote,
}

impl Default for Voice {
    fn default() -> Self {
        Voice::new()
    }
}

impl Voice {
    pub fn new() -> Self {
        Voice {
            delta: 0,
            frac: 0,
            position: 0,
            end: 0,
            loop_len: 0,
            env: 0.0,
            decay: IDLE_DECAY,
            lowpass: VoiceLowpass::new(),
            cutoff: 0.0,
            gain_left: 0.0,
            gain_right: 0.0,
            note: VoiceNote::Free,
        }
    }

    /// Start a note. Returns `false` if the keymap has no region for it.
    pub fn note_on(&mut self, note: u8, velocity: u8, ctx: &TriggerContext<'_>) -> bool {
        let d = ctx.derived;
        let inv_fs = 1.0 / ctx.sample_rate;
        let n = note as i32;

        let zone = match ctx.table.keymap().find(n, velocity, d.hardness_offset(velocity)) {
            Some(zone) => zone,
            None => return false,
        };

        // Pitch offset in semitones: fine tune, a per-note random detune
        // that repeats every 13 squared-distances from middle C, and stretch.
        let k = (n - 60) * (n - 60);
        let mut tune = d.fine + d.random * ((k % 13) as f32 - 6.5);
        if n > 60 {
            tune += d.stretch * k as f32;
        }
        tune += (n - zone.root) as f32;

        let rate = ctx.table.sample_rate() * inv_fs * (0.05776226505 * tune as f64).exp() as f32;
        self.delta = ((65536.0 * rate) as u32).min(MAX_DELTA);
        self.frac = 0;
        self.position = zone.region.start;
        self.end = zone.region.end - 1;
        self.loop_len = zone.region.loop_len;

        self.env = (3.0 + 2.0 * d.velsens) * (0.0078 * velocity as f32).powf(d.velsens);
        if n > 60 {
            // High notes quieter.
            self.env *= (0.01 * (60 - n) as f32).exp();
        }

        let mut cutoff = 50.0 + d.muffle_depth * ctx.muff + d.muff_vel * (velocity as f32 - 64.0);
        cutoff = cutoff.max(55.0 + 0.4 * n as f32).min(210.0);
        self.cutoff = cutoff * cutoff * inv_fs;
        self.lowpass.reset();

        self.note = VoiceNote::Held(note);

        let pan_note = n.clamp(12, 108);
        let vol = ctx.volume;
        self.gain_right = vol + vol * d.width * (pan_note - 60) as f32;
        self.gain_left = vol + vol - self.gain_right;

        // Very low notes would ring almost forever.
        let decay_note = pan_note.max(44);
        self.decay = (-(inv_fs as f64) * (-1.0 + 0.03 * decay_note as f64 - d.decay_shape).exp()).exp() as f32;
        true
    }

    /// Key released. With the pedal down the voice keeps its decay and is
    /// marked sustained; otherwise it switches to the release curve.
    pub fn note_off(&mut self, sustain: bool, derived: &DerivedParams, sample_rate: f32) {
        let n = match self.note {
            VoiceNote::Free => return,
            VoiceNote::Held(n) => n as i32,
            VoiceNote::Sustained => SUSTAIN_NOTE,
        };
        if sustain {
            self.note = VoiceNote::Sustained;
        } else {
            self.decay = release_coefficient(n, derived, sample_rate);
        }
    }

    /// Pedal lifted: a sustained voice starts its release.
    pub fn release_sustained(&mut self, derived: &DerivedParams, sample_rate: f32) {
        if self.note == VoiceNote::Sustained {
            self.decay = release_coefficient(SUSTAIN_NOTE, derived, sample_rate);
        }
    }

    /// Render one sample, returning the (left, right) contribution.
    ///
    /// Must only be called on a voice that is not free.
    #[inline]
    pub fn render(&mut self, table: &Wavetable, overdrive: f32, lowpass: bool) -> (f32, f32) {
        self.frac += self.delta;
        self.position += (self.frac >> FRAC_BITS) as usize;
        self.frac &= FRAC_MASK;
        while self.position > self.end {
            self.position -= self.loop_len;
        }

        let i = table.interpolate(self.position, self.frac);
        let mut x = self.env * i as f32 / 32768.0;

        self.env *= self.decay;

        if x > 0.0 {
            x -= overdrive * x * x;
            if x < -self.env {
                x = -self.env;
            }
        }

        if lowpass {
            x = self.lowpass.process(x, self.cutoff);
        }

        (self.gain_left * x, self.gain_right * x)
    }

    /// Free the voice if its envelope has died away. Returns `true` if it
    /// was freed by this call.
    pub fn free_if_silent(&mut self) -> bool {
        if self.note != VoiceNote::Free && self.env < SILENCE {
            self.silence();
            return true;
        }
        self.lowpass.flush();
        false
    }

    /// Cut the voice immediately.
    pub fn kill(&mut self) {
        self.silence();
        self.decay = IDLE_DECAY;
    }

    fn silence(&mut self) {
        self.note = VoiceNote::Free;
        self.env = 0.0;
        self.lowpass.reset();
    }

    pub fn is_free(&self) -> bool {
        self.note == VoiceNote::Free
    }

    pub fn note(&self) -> VoiceNote {
        self.note
    }

    pub fn envelope(&self) -> f32 {
        self.env
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    pub fn gains(&self) -> (f32, f32) {
        (self.gain_left, self.gain_right)
    }

    /// Playback rate in 16.16 fixed point.
    pub fn delta(&self) -> u32 {
        self.delta
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn loop_bounds(&self) -> (usize, usize) {
        (self.end, self.loop_len)
    }

    pub fn lowpass_states(&self) -> (f32, f32) {
        self.lowpass.states()
    }
}

/// Per-sample decay used after a key is released.
pub fn release_coefficient(note: i32, derived: &DerivedParams, sample_rate: f32) -> f32 {
    let inv_fs = 1.0 / sample_rate;
    (-(inv_fs as f64) * (6.0 + 0.01 * note as f64 - derived.release_shape).exp()).exp() as f32
}
