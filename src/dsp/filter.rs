//! One-pole filters used by the voices and the output stage.

/// States smaller than this are flushed to exact zero between blocks.
pub const DENORMAL_FLOOR: f32 = 1.0e-10;

/// Flush a filter state to zero once it is too small to matter.
#[inline]
pub fn flush_denormal(x: &mut f32) {
    if x.abs() < DENORMAL_FLOOR {
        *x = 0.0;
    }
}

/// One-pole treble shelf for one output channel.
///
/// Tracks a lowpassed copy of the signal and adds (or, for negative gain,
/// removes) the difference between the input and that copy.
#[derive(Debug, Clone, Default)]
pub struct TrebleShelf {
    state: f32,
}

impl TrebleShelf {
    pub fn new() -> Self {
        TrebleShelf { state: 0.0 }
    }

    /// `coeff` is the one-pole smoothing factor, `gain` the shelf gain.
    #[inline]
    pub fn process(&mut self, input: f32, coeff: f32, gain: f32) -> f32 {
        self.state += coeff * (input - self.state);
        input + gain * (input - self.state)
    }

    pub fn state(&self) -> f32 {
        self.state
    }

    pub fn flush(&mut self) {
        flush_denormal(&mut self.state);
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

/// Per-voice one-pole lowpass with a one-sample input memory.
#[derive(Debug, Clone, Default)]
pub struct VoiceLowpass {
    state0: f32,
    state1: f32,
}

impl VoiceLowpass {
    pub fn new() -> Self {
        VoiceLowpass {
            state0: 0.0,
            state1: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, input: f32, cutoff: f32) -> f32 {
        self.state0 += cutoff * (input + self.state1 - self.state0);
        self.state1 = input;
        self.state0
    }

    pub fn states(&self) -> (f32, f32) {
        (self.state0, self.state1)
    }

    pub fn flush(&mut self) {
        flush_denormal(&mut self.state0);
        flush_denormal(&mut self.state1);
    }

    pub fn reset(&mut self) {
        self.state0 = 0.0;
        self.state1 = 0.0;
    }
}
