//! User-facing controls and the coefficients derived from them.
//!
//! All twelve controls are normalized to [0, 1]. Nothing here runs per
//! sample: the engine rebuilds [`DerivedParams`] only when a control value
//! actually changes.

use serde::{Deserialize, Serialize};

/// Number of user-facing controls.
pub const NUM_PARAMS: usize = 12;

/// Largest number of simultaneously sounding voices.
pub const MAX_VOICES: usize = 32;

/// Identifies one of the twelve controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamId {
    Decay,
    Release,
    Hardness,
    TrebleBoost,
    Modulation,
    LfoRate,
    VelocitySense,
    StereoWidth,
    Polyphony,
    FineTune,
    RandomTune,
    Overdrive,
}

impl ParamId {
    pub const ALL: [ParamId; NUM_PARAMS] = [
        ParamId::Decay,
        ParamId::Release,
        ParamId::Hardness,
        ParamId::TrebleBoost,
        ParamId::Modulation,
        ParamId::LfoRate,
        ParamId::VelocitySense,
        ParamId::StereoWidth,
        ParamId::Polyphony,
        ParamId::FineTune,
        ParamId::RandomTune,
        ParamId::Overdrive,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            ParamId::Decay => "Envelope Decay",
            ParamId::Release => "Envelope Release",
            ParamId::Hardness => "Hardness",
            ParamId::TrebleBoost => "Treble Boost",
            ParamId::Modulation => "Modulation",
            ParamId::LfoRate => "LFO Rate",
            ParamId::VelocitySense => "Velocity Sense",
            ParamId::StereoWidth => "Stereo Width",
            ParamId::Polyphony => "Polyphony",
            ParamId::FineTune => "Fine Tuning",
            ParamId::RandomTune => "Random Tuning",
            ParamId::Overdrive => "Overdrive",
        }
    }
}

/// Snapshot of the twelve normalized controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Params {
    pub decay: f32,
    pub release: f32,
    /// Shifts keygroup boundaries, trading between softer and harder samples.
    pub hardness: f32,
    pub treble_boost: f32,
    /// Tremolo (above 0.5) or auto-pan (below 0.5) depth; also opens the tone.
    pub modulation: f32,
    pub lfo_rate: f32,
    pub velocity_sense: f32,
    pub stereo_width: f32,
    pub polyphony: f32,
    pub fine_tune: f32,
    pub random_tune: f32,
    pub overdrive: f32,
}

impl Default for Params {
    fn default() -> Self {
        Params::from_array([
            0.500, 0.500, 0.500, 0.500, 0.500, 0.650, 0.250, 0.500, 0.50, 0.500, 0.146, 0.000,
        ])
    }
}

impl Params {
    /// Build from values in [`ParamId::ALL`] order.
    pub fn from_array(v: [f32; NUM_PARAMS]) -> Self {
        Params {
            decay: v[0],
            release: v[1],
            hardness: v[2],
            treble_boost: v[3],
            modulation: v[4],
            lfo_rate: v[5],
            velocity_sense: v[6],
            stereo_width: v[7],
            polyphony: v[8],
            fine_tune: v[9],
            random_tune: v[10],
            overdrive: v[11],
        }
    }

    pub fn to_array(&self) -> [f32; NUM_PARAMS] {
        ParamId::ALL.map(|id| self.get(id))
    }

    pub fn get(&self, id: ParamId) -> f32 {
        match id {
            ParamId::Decay => self.decay,
            ParamId::Release => self.release,
            ParamId::Hardness => self.hardness,
            ParamId::TrebleBoost => self.treble_boost,
            ParamId::Modulation => self.modulation,
            ParamId::LfoRate => self.lfo_rate,
            ParamId::VelocitySense => self.velocity_sense,
            ParamId::StereoWidth => self.stereo_width,
            ParamId::Polyphony => self.polyphony,
            ParamId::FineTune => self.fine_tune,
            ParamId::RandomTune => self.random_tune,
            ParamId::Overdrive => self.overdrive,
        }
    }

    pub fn set(&mut self, id: ParamId, value: f32) {
        let slot = match id {
            ParamId::Decay => &mut self.decay,
            ParamId::Release => &mut self.release,
            ParamId::Hardness => &mut self.hardness,
            ParamId::TrebleBoost => &mut self.treble_boost,
            ParamId::Modulation => &mut self.modulation,
            ParamId::LfoRate => &mut self.lfo_rate,
            ParamId::VelocitySense => &mut self.velocity_sense,
            ParamId::StereoWidth => &mut self.stereo_width,
            ParamId::Polyphony => &mut self.polyphony,
            ParamId::FineTune => &mut self.fine_tune,
            ParamId::RandomTune => &mut self.random_tune,
            ParamId::Overdrive => &mut self.overdrive,
        };
        *slot = value;
    }

    /// Every control limited to 0..=1. NaN reads as 0.
    pub fn clamped(&self) -> Self {
        Params::from_array(self.to_array().map(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }))
    }

    /// Polyphony setting (0.5 maps to 16 voices).
    pub fn with_polyphony(mut self, voices: usize) -> Self {
        let voices = voices.clamp(1, MAX_VOICES);
        // Lands strictly inside the step so the truncation in DerivedParams
        // gives back exactly `voices`.
        self.polyphony = ((voices - 1) as f32 + 0.5) / 31.9;
        self
    }
}

/// Coefficients computed from [`Params`] at a given sample rate.
///
/// `DerivedParams::new` is pure: equal inputs give bit-identical outputs.
/// Controls outside 0..=1 are clamped first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedParams {
    /// Keygroup boundary shift in semitones, from hardness.
    pub size: i32,
    /// Extra boundary shift per velocity step above 40.
    pub size_vel: f32,
    /// `2 * decay`, subtracted inside the decay exponent.
    pub decay_shape: f64,
    /// `5 * release`, subtracted inside the release exponent.
    pub release_shape: f64,
    /// Treble shelf gain; negative values cut.
    pub treble: f32,
    /// One-pole coefficient of the treble shelf.
    pub treble_coeff: f32,
    pub lfo_left: f32,
    pub lfo_right: f32,
    /// Per-sample rotation of the LFO quadrature pair.
    pub lfo_increment: f32,
    /// Restart the LFO phase when a note arrives on a silent engine.
    pub lfo_reset: bool,
    /// `modulation²`, scales the muffle term of the voice cutoff.
    pub muffle_depth: f32,
    /// Cutoff change per velocity step away from 64.
    pub muff_vel: f32,
    /// Velocity curve exponent.
    pub velsens: f32,
    pub width: f32,
    /// Number of addressable voice slots, 1..=MAX_VOICES.
    pub polyphony: usize,
    pub fine: f32,
    pub random: f32,
    pub stretch: f32,
    pub overdrive: f32,
}

impl DerivedParams {
    pub fn new(params: &Params, sample_rate: f32) -> Self {
        let params = &params.clamped();
        let inv_fs = 1.0 / sample_rate;

        let treble_freq = if params.treble_boost > 0.5 { 14000.0 } else { 5000.0 };

        let lfo_left = params.modulation + params.modulation - 1.0;
        let lfo_right = if params.modulation < 0.5 { -lfo_left } else { lfo_left };

        let mut velsens = 1.0 + params.velocity_sense + params.velocity_sense;
        if params.velocity_sense < 0.25 {
            velsens -= 0.75 - 3.0 * params.velocity_sense;
        }

        let polyphony = (1 + (31.9 * params.polyphony) as i64).clamp(1, MAX_VOICES as i64) as usize;

        DerivedParams {
            size: (12.0 * params.hardness - 6.0) as i32,
            // Never set by the instrument; left at zero.
            size_vel: 0.0,
            decay_shape: (2.0 * params.decay) as f64,
            release_shape: 5.0 * params.release as f64,
            treble: 4.0 * params.treble_boost * params.treble_boost - 1.0,
            treble_coeff: 1.0 - (-inv_fs * treble_freq).exp(),
            lfo_left,
            lfo_right,
            lfo_increment: lfo_increment(params.lfo_rate, sample_rate),
            lfo_reset: params.modulation > 0.5,
            muffle_depth: params.modulation * params.modulation,
            muff_vel: 0.0,
            velsens,
            width: 0.03 * params.stereo_width,
            polyphony,
            fine: params.fine_tune - 0.5,
            random: 0.077 * params.random_tune * params.random_tune,
            // The stretch control was repurposed as overdrive.
            stretch: 0.0,
            overdrive: 1.8 * params.overdrive,
        }
    }

    /// Hardness offset applied to keygroup boundaries for this velocity.
    pub fn hardness_offset(&self, velocity: u8) -> i32 {
        let mut s = self.size;
        if velocity > 40 {
            s += (self.size_vel * (velocity as f32 - 40.0)) as i32;
        }
        s
    }
}

/// LFO rotation per sample for a normalized rate control.
pub fn lfo_increment(rate: f32, sample_rate: f32) -> f32 {
    6.283 * (1.0 / sample_rate) * (6.22 * rate - 2.61).exp()
}
