//! Keygroup map — static mapping from (note, velocity) to a waveform region.
//!
//! The note range is split into pitch bands. Each band carries one root
//! note and three velocity layers; the hardness control slides every band
//! boundary up or down by a few semitones before the lookup.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Highest MIDI note an event can carry.
pub const MAX_NOTE: i32 = 127;

/// Largest downward boundary shift the hardness control can produce.
pub const MAX_HARDNESS_SHIFT: i32 = 6;

/// Velocity layers per pitch band.
pub const LAYERS: usize = 3;

/// Above this velocity the mid layer is used.
pub const MID_VELOCITY: u8 = 48;
/// Above this velocity the high layer is used.
pub const HIGH_VELOCITY: u8 = 80;

/// Samples touched by the loop crossfade, plus a guard sample.
pub const CROSSFADE_SPAN: usize = 52;

/// One stretch of the waveform table with its sustain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    /// First sample of the region.
    pub start: usize,
    /// Last sample of the region; the loop wraps back from here.
    pub end: usize,
    /// Distance from the loop end back to the loop start.
    pub loop_len: usize,
    /// Whether the loop seam gets blended when the table is built.
    #[serde(default = "default_crossfade")]
    pub crossfade: bool,
}

fn default_crossfade() -> bool {
    true
}

impl Region {
    pub const fn new(start: usize, end: usize, loop_len: usize) -> Self {
        Region {
            start,
            end,
            loop_len,
            crossfade: true,
        }
    }

    /// Same region, stored pre-looped (no seam blending).
    pub const fn without_crossfade(self) -> Self {
        Region {
            crossfade: false,
            ..self
        }
    }

    fn check(&self) -> Result<(), &'static str> {
        if self.start > self.end {
            return Err("start is after end");
        }
        if self.loop_len == 0 {
            return Err("loop length is zero");
        }
        let span = self.end - self.start;
        if self.loop_len >= span {
            return Err("loop is longer than the region");
        }
        if self.crossfade && self.loop_len + CROSSFADE_SPAN > span {
            return Err("no room before the loop for the crossfade");
        }
        Ok(())
    }
}

/// A pitch band: root note, upper boundary and three velocity layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PitchBand {
    /// Note the band's samples were recorded at.
    pub root: i32,
    /// Highest note (before the hardness shift) this band plays.
    pub high: i32,
    /// Low, mid and high velocity regions.
    pub layers: [Region; LAYERS],
}

/// Result of a keymap lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub band: usize,
    pub layer: usize,
    pub root: i32,
    pub region: Region,
}

/// Validated, sorted list of pitch bands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PitchBand>", into = "Vec<PitchBand>")]
pub struct Keymap {
    bands: Vec<PitchBand>,
}

impl Keymap {
    /// Validate and build a keymap.
    ///
    /// Bands must be strictly ascending by `high` and the top band must
    /// still cover note 127 at the softest hardness setting, so a lookup can
    /// never fall off the end.
    pub fn new(bands: Vec<PitchBand>) -> Result<Self, EngineError> {
        let last = bands.last().ok_or(EngineError::EmptyKeymap)?;
        for (index, pair) in bands.windows(2).enumerate() {
            if pair[1].high <= pair[0].high {
                return Err(EngineError::UnsortedKeymap {
                    index: index + 1,
                    high: pair[1].high,
                    previous: pair[0].high,
                });
            }
        }
        let required = MAX_NOTE + MAX_HARDNESS_SHIFT;
        if last.high < required {
            return Err(EngineError::IncompleteCoverage {
                high: last.high,
                required,
            });
        }
        for (band, b) in bands.iter().enumerate() {
            for (layer, region) in b.layers.iter().enumerate() {
                region
                    .check()
                    .map_err(|reason| EngineError::InvalidRegion { band, layer, reason })?;
            }
        }
        Ok(Keymap { bands })
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn bands(&self) -> &[PitchBand] {
        &self.bands
    }

    /// Iterate every region with its (band, layer) position.
    pub fn regions(&self) -> impl Iterator<Item = (usize, usize, &Region)> {
        self.bands
            .iter()
            .enumerate()
            .flat_map(|(b, band)| band.layers.iter().enumerate().map(move |(l, r)| (b, l, r)))
    }

    /// Find the band and velocity layer for a note.
    ///
    /// `offset` is the hardness shift added to every band boundary.
    pub fn find(&self, note: i32, velocity: u8, offset: i32) -> Option<Zone> {
        let band = self.bands.iter().position(|b| note <= b.high.saturating_add(offset))?;
        let layer = velocity_layer(velocity);
        let b = &self.bands[band];
        Some(Zone {
            band,
            layer,
            root: b.root,
            region: b.layers[layer],
        })
    }

    /// The 11-band layout of the electric piano waveform (recorded at
    /// 32 kHz, [`STANDARD_TABLE_LEN`] samples).
    pub fn standard() -> Self {
        // Layout is fixed and satisfies every check in `new`.
        Keymap {
            bands: STANDARD_BANDS.to_vec(),
        }
    }
}

impl TryFrom<Vec<PitchBand>> for Keymap {
    type Error = EngineError;

    fn try_from(bands: Vec<PitchBand>) -> Result<Self, Self::Error> {
        Keymap::new(bands)
    }
}

impl From<Keymap> for Vec<PitchBand> {
    fn from(map: Keymap) -> Self {
        map.bands
    }
}

/// Velocity layer index: 0 soft, 1 mid, 2 hard.
pub fn velocity_layer(velocity: u8) -> usize {
    let mut layer = 0;
    if velocity > MID_VELOCITY {
        layer += 1;
    }
    if velocity > HIGH_VELOCITY {
        layer += 1;
    }
    layer
}

// ── Standard electric piano layout ──────────────────────────

/// Sample count of the standard electric piano waveform.
pub const STANDARD_TABLE_LEN: usize = 422_414;

/// Sample rate the standard waveform was recorded at.
pub const STANDARD_TABLE_RATE: f32 = 32_000.0;

const fn band(root: i32, high: i32, layers: [Region; LAYERS]) -> PitchBand {
    PitchBand { root, high, layers }
}

// Only the first 28 regions (bands C1..G5 minus the G5 ghost) get their loop
// seams blended; the top regions are stored pre-looped.
static STANDARD_BANDS: [PitchBand; 11] = [
    band(36, 39, [Region::new(0, 8476, 4400), Region::new(8477, 16248, 4903), Region::new(16249, 34565, 6398)]),
    band(43, 45, [Region::new(34566, 41384, 3938), Region::new(41385, 45760, 1633), Region::new(45761, 65211, 5245)]),
    band(48, 51, [Region::new(65212, 72897, 2937), Region::new(72898, 78626, 2203), Region::new(78627, 100387, 6368)]),
    band(55, 57, [Region::new(100388, 116297, 10452), Region::new(116298, 127661, 5217), Region::new(127662, 144113, 3099)]),
    band(60, 63, [Region::new(144114, 152863, 4284), Region::new(152864, 173107, 3916), Region::new(173108, 192734, 2937)]),
    band(67, 69, [Region::new(192735, 204598, 4732), Region::new(204599, 218995, 4733), Region::new(218996, 233801, 2285)]),
    band(72, 75, [Region::new(233802, 248011, 4098), Region::new(248012, 265287, 4099), Region::new(265288, 282255, 3609)]),
    band(79, 81, [Region::new(282256, 293776, 2446), Region::new(293777, 312566, 6278), Region::new(312567, 330200, 2283)]),
    band(84, 87, [Region::new(330201, 348889, 2689), Region::new(348890, 365675, 4370), Region::new(365676, 383661, 5225)]),
    band(91, 93, [
        Region::new(383662, 393372, 2811),
        Region::new(383662, 393372, 2811).without_crossfade(),
        Region::new(393373, 406045, 4522).without_crossfade(),
    ]),
    band(96, 999, [
        Region::new(406046, 414486, 2306).without_crossfade(),
        Region::new(406046, 414486, 2306).without_crossfade(),
        Region::new(414487, 422408, 2169).without_crossfade(),
    ]),
];
