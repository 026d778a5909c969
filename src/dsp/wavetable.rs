//! Immutable waveform table shared by every voice.
//!
//! Holds signed 16-bit samples plus the keymap describing where each
//! keygroup's region and loop live. Loop seams are crossfaded once, when
//! the table is built; after that the data never changes.

use crate::error::EngineError;

use super::keymap::{Keymap, STANDARD_TABLE_RATE};

/// Per-sample step of the loop crossfade weight (50 samples from 1 to 0).
const CROSSFADE_STEP: f32 = 0.02;

#[derive(Debug, Clone)]
pub struct Wavetable {
    samples: Vec<i16>,
    sample_rate: f32,
    keymap: Keymap,
}

impl Wavetable {
    /// Build a table, checking every region fits, and blend loop seams.
    ///
    /// Interpolation reads one sample past a voice's wrap point, so each
    /// region's `end` itself must be a valid index.
    pub fn new(samples: Vec<i16>, sample_rate: f32, keymap: Keymap) -> Result<Self, EngineError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(EngineError::InvalidSampleRate(sample_rate));
        }
        for (band, layer, region) in keymap.regions() {
            if region.end >= samples.len() {
                return Err(EngineError::RegionOutOfBounds {
                    band,
                    layer,
                    end: region.end,
                    len: samples.len(),
                });
            }
        }

        let mut table = Wavetable {
            samples,
            sample_rate,
            keymap,
        };
        table.crossfade_loops();
        log::info!(
            "wavetable ready: {} samples at {} Hz, {} pitch bands",
            table.samples.len(),
            table.sample_rate,
            table.keymap.bands().len()
        );
        Ok(table)
    }

    /// Table laid out with [`Keymap::standard`], recorded at 32 kHz.
    pub fn standard(samples: Vec<i16>) -> Result<Self, EngineError> {
        Wavetable::new(samples, STANDARD_TABLE_RATE, Keymap::standard())
    }

    /// Build from raw little-endian 16-bit PCM bytes. A trailing odd byte
    /// is ignored.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: f32, keymap: Keymap) -> Result<Self, EngineError> {
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Wavetable::new(samples, sample_rate, keymap)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Rate the waveform was recorded at.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    /// Linear interpolation between `pos` and `pos + 1`, with `frac` a
    /// 16-bit fraction. Integer arithmetic, as the voices expect.
    #[inline]
    pub fn interpolate(&self, pos: usize, frac: u32) -> i32 {
        let a = self.samples[pos] as i64;
        let b = self.samples[pos + 1] as i64;
        (a + ((frac as i64 * (b - a)) >> 16)) as i32
    }

    /// Blend the samples ending each loop with those ending just before
    /// the loop start, so the wrap is seamless.
    fn crossfade_loops(&mut self) {
        let regions: Vec<_> = self
            .keymap
            .regions()
            .filter(|(_, _, r)| r.crossfade)
            .map(|(_, _, r)| *r)
            .collect();

        for region in regions {
            let mut p0 = region.end;
            let mut p1 = region.end - region.loop_len;
            let mut xf = 1.0_f32;
            while xf > 0.0 {
                let blended = (1.0 - xf) * self.samples[p0] as f32 + xf * self.samples[p1] as f32;
                self.samples[p0] = blended as i16;
                p0 -= 1;
                p1 -= 1;
                xf -= CROSSFADE_STEP;
            }
        }
    }
}
