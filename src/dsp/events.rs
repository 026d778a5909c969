//! Per-block event queue.
//!
//! Hosts push events with their sample offset inside the coming block. The
//! scheduler then reads the queue as a stream of [`QueueToken`]s: a
//! segment of samples to render, the event due at its end, the next
//! segment, and so on. The stream simply ends after the last segment; no
//! sentinel value is stored.

/// Events the queue holds per block before it starts dropping.
pub const EVENT_CAPACITY: usize = 40;

/// Something that happens at a sample offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Note-on, or note-off for the slot's sounding note when `velocity == 0`.
    Note { note: u8, velocity: u8, slot: usize },
    /// Sustain pedal down (`true`) or up.
    Sustain(bool),
    /// Modulation wheel position, 0-127.
    ModWheel(u8),
    /// Channel volume, 0-127.
    Volume(u8),
    /// Silence every voice at once.
    AllNotesOff,
}

impl EngineEvent {
    pub fn note_on(note: u8, velocity: u8, slot: usize) -> Self {
        EngineEvent::Note { note, velocity, slot }
    }

    pub fn note_off(slot: usize) -> Self {
        EngineEvent::Note {
            note: 0,
            velocity: 0,
            slot,
        }
    }
}

/// One step of the block schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueToken {
    /// Render this many samples.
    Segment(usize),
    /// Apply this event before rendering on.
    Event(EngineEvent),
}

/// Fixed-capacity, offset-ordered list of events for one block.
#[derive(Debug, Clone)]
pub struct EventQueue {
    entries: Vec<(usize, EngineEvent)>,
}

impl Default for EventQueue {
    fn default() -> Self {
        EventQueue::with_capacity(EVENT_CAPACITY)
    }
}

impl EventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        EventQueue {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Queue an event. Offsets must not go backwards; an earlier offset
    /// than the last queued one is moved up to it so queue order is kept.
    /// Returns `false` if the queue is full and the event was dropped.
    pub fn push(&mut self, offset: usize, event: EngineEvent) -> bool {
        if self.entries.len() == self.entries.capacity() {
            log::warn!("event queue full ({} events), dropping {event:?} at {offset}", self.entries.len());
            return false;
        }
        let last = self.entries.last().map_or(0, |&(o, _)| o);
        let offset = if offset < last {
            log::debug!("event at {offset} queued after one at {last}, moved to {last}");
            last
        } else {
            offset
        };
        self.entries.push((offset, event));
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn entries(&self) -> &[(usize, EngineEvent)] {
        &self.entries
    }

    /// Schedule for a block of `block_size` samples. Events at or past the
    /// end of the block are not part of it and are skipped.
    pub fn tokens(&self, block_size: usize) -> Tokens<'_> {
        Tokens {
            entries: &self.entries,
            next: 0,
            frame: 0,
            block_size,
            pending: None,
        }
    }
}

/// Iterator over a block schedule. Zero-length segments are not emitted,
/// so events sharing an offset come out back to back.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    entries: &'a [(usize, EngineEvent)],
    next: usize,
    frame: usize,
    block_size: usize,
    pending: Option<EngineEvent>,
}

impl Iterator for Tokens<'_> {
    type Item = QueueToken;

    fn next(&mut self) -> Option<QueueToken> {
        if let Some(event) = self.pending.take() {
            return Some(QueueToken::Event(event));
        }

        if let Some(&(offset, event)) = self.entries.get(self.next) {
            if offset < self.block_size {
                self.next += 1;
                let len = offset.saturating_sub(self.frame);
                self.frame = self.frame.max(offset);
                if len == 0 {
                    return Some(QueueToken::Event(event));
                }
                self.pending = Some(event);
                return Some(QueueToken::Segment(len));
            }
            log::debug!(
                "{} event(s) at or past block end {} skipped",
                self.entries.len() - self.next,
                self.block_size
            );
            self.next = self.entries.len();
        }

        if self.frame < self.block_size {
            let len = self.block_size - self.frame;
            self.frame = self.block_size;
            return Some(QueueToken::Segment(len));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments_total(tokens: &[QueueToken]) -> usize {
        tokens
            .iter()
            .map(|t| match t {
                QueueToken::Segment(n) => *n,
                QueueToken::Event(_) => 0,
            })
            .sum()
    }

    #[test]
    fn empty_queue_is_one_segment() {
        let q = EventQueue::default();
        let tokens: Vec<_> = q.tokens(256).collect();
        assert_eq!(tokens, vec![QueueToken::Segment(256)]);
    }

    #[test]
    fn zero_block_yields_nothing() {
        let mut q = EventQueue::default();
        q.push(0, EngineEvent::note_on(60, 100, 0));
        assert_eq!(q.tokens(0).count(), 0);
    }

    #[test]
    fn events_split_the_block() {
        let mut q = EventQueue::default();
        let a = EngineEvent::note_on(60, 100, 0);
        let b = EngineEvent::note_on(64, 100, 1);
        q.push(0, a);
        q.push(128, b);
        let tokens: Vec<_> = q.tokens(256).collect();
        assert_eq!(
            tokens,
            vec![
                QueueToken::Event(a),
                QueueToken::Segment(128),
                QueueToken::Event(b),
                QueueToken::Segment(128),
            ]
        );
    }

    #[test]
    fn segments_always_cover_the_block() {
        let mut q = EventQueue::default();
        for offset in [3, 3, 17, 90, 255] {
            q.push(offset, EngineEvent::Sustain(true));
        }
        let tokens: Vec<_> = q.tokens(256).collect();
        assert_eq!(segments_total(&tokens), 256);
        let events = tokens.iter().filter(|t| matches!(t, QueueToken::Event(_))).count();
        assert_eq!(events, 5);
    }

    #[test]
    fn same_offset_keeps_queue_order() {
        let mut q = EventQueue::default();
        q.push(10, EngineEvent::note_on(60, 90, 0));
        q.push(10, EngineEvent::note_off(0));
        let tokens: Vec<_> = q.tokens(64).collect();
        assert_eq!(tokens[1], QueueToken::Event(EngineEvent::note_on(60, 90, 0)));
        assert_eq!(tokens[2], QueueToken::Event(EngineEvent::note_off(0)));
    }

    #[test]
    fn backwards_offset_is_moved_up() {
        let mut q = EventQueue::default();
        q.push(50, EngineEvent::Volume(100));
        q.push(20, EngineEvent::Volume(50));
        assert_eq!(q.entries()[1].0, 50);
    }

    #[test]
    fn events_past_block_end_are_skipped() {
        let mut q = EventQueue::default();
        q.push(10, EngineEvent::AllNotesOff);
        q.push(64, EngineEvent::ModWheel(3));
        q.push(80, EngineEvent::ModWheel(4));
        let tokens: Vec<_> = q.tokens(64).collect();
        assert_eq!(
            tokens,
            vec![
                QueueToken::Segment(10),
                QueueToken::Event(EngineEvent::AllNotesOff),
                QueueToken::Segment(54),
            ]
        );
    }

    #[test]
    fn full_queue_drops_without_growing() {
        let mut q = EventQueue::with_capacity(4);
        let cap = q.capacity();
        for i in 0..cap {
            assert!(q.push(i, EngineEvent::Sustain(false)));
        }
        assert!(!q.push(cap, EngineEvent::Sustain(true)));
        assert_eq!(q.len(), cap);
        assert_eq!(q.capacity(), cap);
    }

    #[test]
    fn clear_empties_queue() {
        let mut q = EventQueue::default();
        q.push(0, EngineEvent::AllNotesOff);
        q.clear();
        assert!(q.is_empty());
        assert!(q.capacity() >= EVENT_CAPACITY);
    }
}
