//! Audio Engine — renders queued note events into stereo blocks.
//!
//! The host queues events with sample offsets, then calls
//! [`Engine::process`] once per block. The block is rendered segment by
//! segment; at each event boundary exactly one event is applied to the
//! voice pool before rendering resumes. After every voice has been mixed,
//! each sample passes through the treble shelf and the tremolo/auto-pan LFO.
//!
//! Nothing in `process` allocates: the voice pool is a fixed array and the
//! event queue never grows past the capacity it was built with.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::params::{DerivedParams, MAX_VOICES, ParamId, Params};
use crate::preset::Program;

use super::events::{EVENT_CAPACITY, EngineEvent, EventQueue, QueueToken};
use super::filter::TrebleShelf;
use super::lfo::QuadratureLfo;
use super::voice::{TriggerContext, Voice};
use super::wavetable::Wavetable;

/// Muffle depth restored by all-notes-off.
const DEFAULT_MUFF: f32 = 160.0;

/// Channel volume before any volume event arrives.
const DEFAULT_VOLUME: f32 = 0.2;

/// Below this the mod wheel leaves the LFO depth alone.
const MOD_WHEEL_THRESHOLD: f32 = 0.05;

/// Configuration fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f32,
    /// Events accepted per block.
    pub event_capacity: usize,
    /// Run each voice through its one-pole lowpass. Off by default: the
    /// electric piano computes the cutoff but mixes voices unfiltered.
    pub voice_lowpass: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44100.0,
            event_capacity: EVENT_CAPACITY,
            voice_lowpass: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// The electric piano voice engine.
#[derive(Debug)]
pub struct Engine {
    table: Arc<Wavetable>,
    config: EngineConfig,

    params: Params,
    derived: DerivedParams,

    voices: [Voice; MAX_VOICES],
    queue: EventQueue,

    sustain: bool,
    volume: f32,
    muff: f32,
    /// Current (left, right) LFO depth; the mod wheel can override it.
    lfo_depth: (f32, f32),

    treble_left: TrebleShelf,
    treble_right: TrebleShelf,
    lfo: QuadratureLfo,
}

impl Engine {
    pub fn new(table: Arc<Wavetable>, config: EngineConfig) -> Result<Self, EngineError> {
        if !(config.sample_rate.is_finite() && config.sample_rate > 0.0) {
            return Err(EngineError::InvalidSampleRate(config.sample_rate));
        }
        let params = Params::default();
        let derived = DerivedParams::new(&params, config.sample_rate);
        log::info!(
            "electric piano engine at {} Hz, {} voice slots, {} events per block",
            config.sample_rate,
            MAX_VOICES,
            config.event_capacity
        );
        Ok(Engine {
            table,
            config,
            params,
            derived,
            voices: std::array::from_fn(|_| Voice::new()),
            queue: EventQueue::with_capacity(config.event_capacity.max(1)),
            sustain: false,
            volume: DEFAULT_VOLUME,
            muff: DEFAULT_MUFF,
            lfo_depth: (derived.lfo_left, derived.lfo_right),
            treble_left: TrebleShelf::new(),
            treble_right: TrebleShelf::new(),
            lfo: QuadratureLfo::new(),
        })
    }

    // ── Parameters ──────────────────────────────────────────

    /// Replace the control snapshot. Coefficients are only recomputed if a
    /// value actually changed.
    pub fn set_params(&mut self, params: Params) {
        if params == self.params {
            return;
        }
        self.params = params;
        self.update();
    }

    pub fn set_param(&mut self, id: ParamId, value: f32) {
        let mut params = self.params;
        params.set(id, value);
        self.set_params(params);
    }

    pub fn load_program(&mut self, program: &Program) {
        log::info!("loading program \"{}\"", program.name);
        self.set_params(program.params);
    }

    fn update(&mut self) {
        self.derived = DerivedParams::new(&self.params, self.config.sample_rate);
        self.lfo_depth = (self.derived.lfo_left, self.derived.lfo_right);
        log::debug!("parameters changed, polyphony {}", self.derived.polyphony);
    }

    // ── Events ──────────────────────────────────────────────

    /// Queue an event for the next block. Returns `false` if the queue is
    /// full and the event was dropped.
    pub fn queue_event(&mut self, offset: usize, event: EngineEvent) -> bool {
        self.queue.push(offset, event)
    }

    pub fn note_on(&mut self, offset: usize, note: u8, velocity: u8, slot: usize) -> bool {
        self.queue_event(offset, EngineEvent::note_on(note, velocity, slot))
    }

    pub fn note_off(&mut self, offset: usize, slot: usize) -> bool {
        self.queue_event(offset, EngineEvent::note_off(slot))
    }

    /// Apply every queued event now, in queue order, without rendering.
    /// Offsets are ignored.
    pub fn apply_events(&mut self) {
        let mut queue = std::mem::replace(&mut self.queue, EventQueue::with_capacity(0));
        for &(_, event) in queue.entries() {
            self.dispatch(event);
        }
        queue.clear();
        self.queue = queue;
    }

    // ── Rendering ───────────────────────────────────────────

    /// Render one block. Both buffers are overwritten; if their lengths
    /// differ only the common prefix is rendered. Queued events are
    /// consumed; events at or past the block end are discarded.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());

        // Swap in an unallocated queue while the real one is read.
        let mut queue = std::mem::replace(&mut self.queue, EventQueue::with_capacity(0));
        let mut frame = 0;
        for token in queue.tokens(frames) {
            match token {
                QueueToken::Segment(n) => {
                    let end = frame + n;
                    self.render(&mut left[frame..end], &mut right[frame..end]);
                    frame = end;
                }
                QueueToken::Event(event) => self.dispatch(event),
            }
        }
        queue.clear();
        self.queue = queue;

        self.end_block();
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let table = &*self.table;
        let overdrive = self.derived.overdrive;
        let lowpass = self.config.voice_lowpass;
        let treble = self.derived.treble;
        let treble_coeff = self.derived.treble_coeff;
        let lfo_increment = self.derived.lfo_increment;
        let (lmod, rmod) = self.lfo_depth;

        for (out_l, out_r) in left.iter_mut().zip(right.iter_mut()) {
            let mut l = 0.0_f32;
            let mut r = 0.0_f32;
            for voice in self.voices.iter_mut().filter(|v| !v.is_free()) {
                let (vl, vr) = voice.render(table, overdrive, lowpass);
                l += vl;
                r += vr;
            }

            l = self.treble_left.process(l, treble_coeff, treble);
            r = self.treble_right.process(r, treble_coeff, treble);

            let lfo = self.lfo.advance(lfo_increment);
            l += l * lmod * lfo;
            r += r * rmod * lfo;

            *out_l = l;
            *out_r = r;
        }
    }

    fn dispatch(&mut self, event: EngineEvent) {
        let sample_rate = self.config.sample_rate;
        match event {
            EngineEvent::Note { note, velocity, slot } => {
                if slot >= self.derived.polyphony {
                    log::warn!(
                        "note {note} on slot {slot} ignored, polyphony is {}",
                        self.derived.polyphony
                    );
                    return;
                }
                if self.derived.lfo_reset && self.active_voices() == 0 {
                    self.lfo.reset_phase();
                }
                let voice = &mut self.voices[slot];
                if velocity > 0 {
                    let ctx = TriggerContext {
                        table: &self.table,
                        derived: &self.derived,
                        sample_rate,
                        volume: self.volume,
                        muff: self.muff,
                    };
                    if !voice.note_on(note.min(127), velocity.min(127), &ctx) {
                        log::warn!("no keygroup for note {note}, slot {slot} left unchanged");
                    }
                } else {
                    voice.note_off(self.sustain, &self.derived, sample_rate);
                }
            }
            EngineEvent::Sustain(down) => {
                self.sustain = down;
                if !down {
                    for voice in self.voices.iter_mut() {
                        voice.release_sustained(&self.derived, sample_rate);
                    }
                }
            }
            EngineEvent::ModWheel(value) => {
                let depth = 0.0078 * value as f32;
                if depth > MOD_WHEEL_THRESHOLD {
                    let right = if self.params.clamped().modulation < 0.5 { -depth } else { depth };
                    self.lfo_depth = (depth, right);
                }
            }
            EngineEvent::Volume(value) => {
                let v = value as f32;
                self.volume = 0.00002 * v * v;
            }
            EngineEvent::AllNotesOff => {
                for voice in self.voices.iter_mut() {
                    voice.kill();
                }
                self.sustain = false;
                self.muff = DEFAULT_MUFF;
            }
        }
    }

    /// Flush tiny filter states and free voices that have gone silent.
    fn end_block(&mut self) {
        self.treble_left.flush();
        self.treble_right.flush();
        for (slot, voice) in self.voices.iter_mut().enumerate() {
            if voice.free_if_silent() {
                log::debug!("voice {slot} silent, freed");
            }
        }
    }

    /// Stop everything and return to the power-on state, keeping the
    /// current parameters.
    pub fn reset(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.kill();
        }
        self.queue.clear();
        self.sustain = false;
        self.volume = DEFAULT_VOLUME;
        self.muff = DEFAULT_MUFF;
        self.lfo_depth = (self.derived.lfo_left, self.derived.lfo_right);
        self.treble_left.reset();
        self.treble_right.reset();
        self.lfo = QuadratureLfo::new();
    }

    // ── Inspection ──────────────────────────────────────────

    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<Wavetable> {
        &self.table
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn derived(&self) -> &DerivedParams {
        &self.derived
    }

    pub fn voice(&self, slot: usize) -> Option<&Voice> {
        self.voices.get(slot)
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Voices currently sounding or decaying.
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_free()).count()
    }

    pub fn sustain(&self) -> bool {
        self.sustain
    }

    pub fn lfo_depth(&self) -> (f32, f32) {
        self.lfo_depth
    }

    pub fn lfo(&self) -> &QuadratureLfo {
        &self.lfo
    }

    pub fn treble_states(&self) -> (f32, f32) {
        (self.treble_left.state(), self.treble_right.state())
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Events the queue holds before it starts dropping.
    pub fn event_capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::keymap::STANDARD_TABLE_LEN;
    use crate::dsp::voice::{SUSTAIN_NOTE, VoiceNote, release_coefficient};
    use crate::preset::factory_program;

    const BLOCK: usize = 256;

    fn test_table() -> Arc<Wavetable> {
        let data = (0..STANDARD_TABLE_LEN)
            .map(|i| ((i as f32 * 0.085).sin() * 16000.0) as i16)
            .collect();
        Arc::new(Wavetable::standard(data).unwrap())
    }

    fn engine_with(voices: usize) -> Engine {
        let mut engine = Engine::new(test_table(), EngineConfig::default()).unwrap();
        engine.set_params(Params::default().with_polyphony(voices));
        engine
    }

    fn block(engine: &mut Engine) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; BLOCK];
        let mut right = vec![0.0; BLOCK];
        engine.process(&mut left, &mut right);
        (left, right)
    }

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s * s).sum()
    }

    #[test]
    fn rejects_bad_sample_rate() {
        let config = EngineConfig {
            sample_rate: -1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::new(test_table(), config),
            Err(EngineError::InvalidSampleRate(_))
        ));
    }

    #[test]
    fn silent_engine_renders_zeros() {
        let mut engine = engine_with(8);
        let mut left = vec![1.0; BLOCK];
        let mut right = vec![-1.0; BLOCK];
        engine.process(&mut left, &mut right);
        assert!(left.iter().all(|&s| s == 0.0));
        assert!(right.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn single_note_is_audible_and_bounded() {
        let mut engine = engine_with(8);
        assert_eq!(engine.derived().polyphony, 8);
        engine.note_on(0, 60, 100, 0);
        let (left, right) = block(&mut engine);

        assert!(energy(&left) > 0.0, "left channel silent");
        assert!(energy(&right) > 0.0, "right channel silent");
        for (&l, &r) in left.iter().zip(right.iter()) {
            assert!(l.is_finite() && r.is_finite());
            assert!(l.abs() < 2.0 && r.abs() < 2.0, "sample out of range: {l}, {r}");
        }
        assert_eq!(engine.voice(0).unwrap().note(), VoiceNote::Held(60));
        assert_eq!(engine.active_voices(), 1);
    }

    #[test]
    fn mid_block_event_resumes_rendering() {
        let mut both = engine_with(8);
        both.note_on(0, 60, 100, 0);
        both.note_on(128, 67, 100, 1);
        let (both_l, _) = block(&mut both);

        let mut first_only = engine_with(8);
        first_only.note_on(0, 60, 100, 0);
        let (first_l, _) = block(&mut first_only);

        // Identical until the second event, different after it.
        assert_eq!(&both_l[..128], &first_l[..128]);
        let second: Vec<f32> = both_l[128..]
            .iter()
            .zip(&first_l[128..])
            .map(|(a, b)| a - b)
            .collect();
        assert!(energy(&first_l[..128]) > 0.0, "first note contributed nothing");
        assert!(energy(&second) > 0.0, "second note contributed nothing");
        assert_eq!(both.active_voices(), 2);
    }

    #[test]
    fn note_off_in_same_block_never_raises_envelope() {
        let mut engine = engine_with(8);
        engine.note_on(0, 60, 100, 0);
        engine.note_off(100, 0);
        block(&mut engine);

        let d = *engine.derived();
        let voice = engine.voice(0).unwrap();
        assert_eq!(voice.decay(), release_coefficient(60, &d, 44100.0));

        let mut prev = voice.envelope();
        for _ in 0..10 {
            block(&mut engine);
            let env = engine.voice(0).unwrap().envelope();
            assert!(env <= prev, "envelope rose from {prev} to {env}");
            prev = env;
        }
    }

    #[test]
    fn slot_outside_polyphony_is_ignored() {
        let mut engine = engine_with(8);
        engine.note_on(0, 60, 100, 8);
        engine.note_on(0, 60, 100, 1000);
        let (left, right) = block(&mut engine);
        assert_eq!(engine.active_voices(), 0);
        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn retrigger_reuses_named_slot() {
        let mut engine = engine_with(8);
        engine.note_on(0, 60, 100, 3);
        engine.note_on(64, 72, 90, 3);
        block(&mut engine);
        assert_eq!(engine.active_voices(), 1);
        assert_eq!(engine.voice(3).unwrap().note(), VoiceNote::Held(72));
    }

    #[test]
    fn sustain_pedal_holds_then_releases() {
        let mut engine = engine_with(8);
        engine.queue_event(0, EngineEvent::Sustain(true));
        engine.note_on(0, 60, 100, 0);
        block(&mut engine);
        let held_decay = engine.voice(0).unwrap().decay();

        engine.note_off(0, 0);
        block(&mut engine);
        let voice = engine.voice(0).unwrap();
        assert_eq!(voice.note(), VoiceNote::Sustained);
        assert_eq!(voice.decay(), held_decay);

        engine.queue_event(10, EngineEvent::Sustain(false));
        block(&mut engine);
        let d = *engine.derived();
        assert!(!engine.sustain());
        assert_eq!(
            engine.voice(0).unwrap().decay(),
            release_coefficient(SUSTAIN_NOTE, &d, 44100.0)
        );
    }

    #[test]
    fn released_notes_fade_to_exact_silence() {
        let mut engine = engine_with(8);
        engine.note_on(0, 60, 127, 0);
        engine.note_off(200, 0);
        block(&mut engine);
        assert_ne!(engine.treble_states(), (0.0, 0.0));

        for _ in 0..200 {
            block(&mut engine);
        }
        assert_eq!(engine.active_voices(), 0);
        assert_eq!(engine.voice(0).unwrap().envelope(), 0.0);
        assert_eq!(engine.treble_states(), (0.0, 0.0));
        let (left, right) = block(&mut engine);
        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn unchanged_params_skip_update() {
        let mut engine = engine_with(8);
        let before = *engine.derived();
        engine.set_params(*engine.params());
        assert_eq!(*engine.derived(), before);

        engine.set_param(ParamId::TrebleBoost, 0.9);
        assert_ne!(engine.derived().treble, before.treble);
        let again = *engine.derived();
        engine.set_param(ParamId::TrebleBoost, 0.9);
        assert_eq!(*engine.derived(), again);
    }

    #[test]
    fn wild_control_values_render_safely() {
        for id in ParamId::ALL {
            for value in [1e9, -1e9, f32::NAN, f32::INFINITY] {
                let mut engine = engine_with(8);
                engine.set_param(id, value);
                engine.note_on(0, 60, 100, 0);
                engine.note_on(10, 127, 127, 1);
                engine.note_on(20, 0, 1, 2);
                for _ in 0..4 {
                    let (left, right) = block(&mut engine);
                    assert!(
                        left.iter().chain(&right).all(|s| s.is_finite()),
                        "{id:?} = {value} rendered non-finite audio"
                    );
                }
            }
        }
    }

    #[test]
    fn identical_input_renders_identically() {
        let run = || {
            let mut engine = engine_with(16);
            engine.set_param(ParamId::Overdrive, 0.7);
            engine.set_param(ParamId::Modulation, 0.8);
            engine.note_on(5, 48, 70, 0);
            engine.note_on(40, 64, 110, 1);
            engine.note_on(90, 81, 30, 2);
            let mut out = Vec::new();
            for _ in 0..4 {
                let (l, r) = block(&mut engine);
                out.extend(l);
                out.extend(r);
            }
            out
        };
        let a = run();
        let b = run();
        assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn all_notes_off_silences_immediately() {
        let mut engine = engine_with(8);
        engine.queue_event(0, EngineEvent::Sustain(true));
        engine.note_on(0, 60, 100, 0);
        engine.note_on(0, 64, 100, 1);
        engine.queue_event(50, EngineEvent::AllNotesOff);
        let (left, _) = block(&mut engine);
        assert_eq!(engine.active_voices(), 0);
        assert!(!engine.sustain());
        assert!(energy(&left[..50]) > 0.0);
        assert!(left[50..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn volume_event_scales_new_notes() {
        let mut engine = engine_with(8);
        engine.queue_event(0, EngineEvent::Volume(127));
        engine.note_on(1, 60, 100, 0);
        block(&mut engine);
        let (l, r) = engine.voice(0).unwrap().gains();
        let expected = 0.00002 * 127.0 * 127.0;
        assert!((l - expected).abs() < 1e-6 && (r - expected).abs() < 1e-6);
    }

    #[test]
    fn mod_wheel_overrides_lfo_depth() {
        let mut engine = engine_with(8);
        engine.set_param(ParamId::Modulation, 0.25);
        engine.queue_event(0, EngineEvent::ModWheel(2));
        block(&mut engine);
        assert_eq!(engine.lfo_depth(), (engine.derived().lfo_left, engine.derived().lfo_right));

        engine.queue_event(0, EngineEvent::ModWheel(100));
        block(&mut engine);
        let (l, r) = engine.lfo_depth();
        assert!((l - 0.78).abs() < 1e-6);
        assert_eq!(r, -l);

        engine.set_param(ParamId::Modulation, 0.3);
        assert_eq!(engine.lfo_depth(), (engine.derived().lfo_left, engine.derived().lfo_right));
    }

    #[test]
    fn lfo_restarts_for_first_note_when_tremolo_is_on() {
        let mut engine = engine_with(8);
        engine.set_param(ParamId::Modulation, 0.75);
        block(&mut engine);

        engine.note_on(0, 60, 100, 0);
        block(&mut engine);

        let mut expected = QuadratureLfo::new();
        expected.reset_phase();
        for _ in 0..BLOCK {
            expected.advance(engine.derived().lfo_increment);
        }
        assert_eq!(engine.lfo().state(), expected.state());
    }

    #[test]
    fn events_past_block_end_are_discarded() {
        let mut engine = engine_with(8);
        engine.note_on(BLOCK, 60, 100, 0);
        block(&mut engine);
        assert_eq!(engine.pending_events(), 0);
        block(&mut engine);
        assert_eq!(engine.active_voices(), 0);
    }

    #[test]
    fn apply_events_dispatches_without_rendering() {
        let mut engine = engine_with(8);
        engine.note_on(200, 60, 100, 0);
        engine.queue_event(10, EngineEvent::Sustain(true));
        engine.apply_events();
        assert_eq!(engine.pending_events(), 0);
        assert!(engine.sustain());
        assert_eq!(engine.voice(0).unwrap().note(), VoiceNote::Held(60));
        assert_eq!(engine.treble_states(), (0.0, 0.0));
    }

    #[test]
    fn mismatched_buffers_render_common_prefix() {
        let mut engine = engine_with(8);
        engine.note_on(0, 60, 100, 0);
        let mut left = vec![0.0; 64];
        let mut right = vec![9.0; 100];
        engine.process(&mut left, &mut right);
        assert!(right[64..].iter().all(|&s| s == 9.0));
        assert!(energy(&right[..64]) > 0.0);
    }

    #[test]
    fn voice_lowpass_darkens_output() {
        let config = EngineConfig {
            voice_lowpass: true,
            ..EngineConfig::default()
        };
        let mut filtered = Engine::new(test_table(), config).unwrap();
        let mut plain = engine_with(16);
        for engine in [&mut filtered, &mut plain] {
            engine.note_on(0, 60, 100, 0);
        }
        let (a, _) = block(&mut filtered);
        let (b, _) = block(&mut plain);
        assert!(energy(&a) > 0.0);
        assert_ne!(a, b);
    }

    #[test]
    fn loading_program_applies_params() {
        let mut engine = engine_with(8);
        let bright = factory_program("Bright").unwrap();
        engine.load_program(&bright);
        assert_eq!(*engine.params(), bright.params);
        assert_eq!(engine.derived().size, 6);
    }

    #[test]
    fn reset_returns_to_power_on_state() {
        let mut engine = engine_with(8);
        engine.note_on(0, 60, 100, 0);
        engine.queue_event(0, EngineEvent::Volume(10));
        block(&mut engine);
        engine.note_on(3, 62, 100, 1);
        engine.reset();
        assert_eq!(engine.active_voices(), 0);
        assert_eq!(engine.pending_events(), 0);
        assert_eq!(engine.treble_states(), (0.0, 0.0));
        let (left, _) = block(&mut engine);
        assert!(left.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn config_from_json() {
        let config = EngineConfig::from_json(r#"{"sampleRate": 48000, "voiceLowpass": true}"#).unwrap();
        assert_eq!(config.sample_rate, 48000.0);
        assert!(config.voice_lowpass);
        assert_eq!(config.event_capacity, EVENT_CAPACITY);
    }
}
