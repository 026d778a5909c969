//! Offline renderer — plays a list of timed notes through an engine and
//! returns stereo buffers or a WAV byte buffer.

use serde::{Deserialize, Serialize};

use super::engine::Engine;
use super::events::EngineEvent;

/// A note on an absolute sample timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedNote {
    /// Frame of the note-on.
    pub start: usize,
    /// Frames until the note-off.
    pub length: usize,
    pub note: u8,
    pub velocity: u8,
    /// Voice slot the note plays on.
    pub slot: usize,
}

impl TimedNote {
    pub fn new(start: usize, length: usize, note: u8, velocity: u8, slot: usize) -> Self {
        TimedNote {
            start,
            length,
            note,
            velocity,
            slot,
        }
    }
}

/// Render `total_frames` of audio, feeding note-ons and note-offs to the
/// engine in blocks of `block_size`.
///
/// At equal frames a note-off is queued before a note-on, so a slot can be
/// released and retriggered on the same sample. When a block holds more
/// events than the engine queue, the block is split at the frame that
/// would overflow it, so no event is lost or moved.
pub fn render_notes(
    engine: &mut Engine,
    notes: &[TimedNote],
    total_frames: usize,
    block_size: usize,
) -> (Vec<f32>, Vec<f32>) {
    let block_size = block_size.max(1);
    let capacity = engine.event_capacity();

    let mut timeline: Vec<(usize, bool, EngineEvent)> = Vec::with_capacity(notes.len() * 2);
    for n in notes {
        timeline.push((n.start, true, EngineEvent::note_on(n.note, n.velocity, n.slot)));
        timeline.push((n.start.saturating_add(n.length), false, EngineEvent::note_off(n.slot)));
    }
    timeline.sort_by_key(|&(frame, is_on, _)| (frame, is_on));

    let mut left = vec![0.0_f32; total_frames];
    let mut right = vec![0.0_f32; total_frames];

    let mut next = 0;
    let mut block_start = 0;
    while block_start < total_frames {
        let block_end = block_start.saturating_add(block_size).min(total_frames);
        let mut cursor = block_start;

        while let Some(&(frame, _, _)) = timeline.get(next) {
            if frame >= block_end {
                break;
            }
            let group = timeline[next..].iter().take_while(|e| e.0 == frame).count();

            // Play what is queued so far if this frame's events won't fit.
            if frame > cursor && engine.pending_events() + group > capacity {
                engine.process(&mut left[cursor..frame], &mut right[cursor..frame]);
                cursor = frame;
            }

            for &(_, _, event) in &timeline[next..next + group] {
                if engine.pending_events() >= capacity {
                    // Everything queued is due at this same frame.
                    engine.apply_events();
                }
                engine.queue_event(frame - cursor, event);
            }
            next += group;
        }

        engine.process(&mut left[cursor..block_end], &mut right[cursor..block_end]);
        block_start = block_end;
    }

    log::debug!(
        "rendered {} notes into {} frames ({} events past the end unused)",
        notes.len(),
        total_frames,
        timeline.len() - next
    );
    (left, right)
}

/// Render timed notes to a WAV file as bytes (16-bit stereo PCM).
pub fn render_wav(
    engine: &mut Engine,
    notes: &[TimedNote],
    total_frames: usize,
    block_size: usize,
) -> Vec<u8> {
    let (left, right) = render_notes(engine, notes, total_frames, block_size);
    encode_stereo_wav(&left, &right, engine.sample_rate() as u32)
}

const WAV_HEADER_LEN: usize = 44;
const CHANNELS: u16 = 2;
const BYTES_PER_SAMPLE: u16 = 2;

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Interleave two channels into a 16-bit PCM WAV image.
fn encode_stereo_wav(left: &[f32], right: &[f32], sample_rate: u32) -> Vec<u8> {
    let frames = left.len().min(right.len());
    let block_align = CHANNELS * BYTES_PER_SAMPLE;
    let data_len = (frames * block_align as usize) as u32;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);
    wav.extend(b"RIFF");
    wav.extend((WAV_HEADER_LEN as u32 - 8 + data_len).to_le_bytes());
    wav.extend(b"WAVEfmt ");
    wav.extend(16u32.to_le_bytes());
    wav.extend(1u16.to_le_bytes()); // integer PCM
    wav.extend(CHANNELS.to_le_bytes());
    wav.extend(sample_rate.to_le_bytes());
    wav.extend((sample_rate * block_align as u32).to_le_bytes());
    wav.extend(block_align.to_le_bytes());
    wav.extend((8 * BYTES_PER_SAMPLE).to_le_bytes());
    wav.extend(b"data");
    wav.extend(data_len.to_le_bytes());

    for (&l, &r) in left.iter().zip(right) {
        wav.extend(to_i16(l).to_le_bytes());
        wav.extend(to_i16(r).to_le_bytes());
    }
    wav
}
