//! Telemetry from the audio thread
//!
//! Position, transport state, and peak levels flow out of the callback
//! through a bounded `rtrb` ring. On overflow new samples are dropped; the
//! next emission refreshes the reading, so a slow consumer only loses
//! intermediate meter frames, never the latest state for long.

use std::sync::Arc;

use crate::song::DecodedSong;
use crate::types::{PlaybackState, MAX_STEMS};

/// Peak levels for one telemetry window
///
/// Fixed-size so the event is `Copy` and never allocates on the audio
/// thread; `stem_count` says how many slots are meaningful.
#[derive(Debug, Clone, Copy)]
pub struct LevelFrame {
    pub master: f32,
    pub stem_count: usize,
    pub stems: [f32; MAX_STEMS],
}

impl LevelFrame {
    pub fn silent(stem_count: usize) -> Self {
        Self {
            master: 0.0,
            stem_count,
            stems: [0.0; MAX_STEMS],
        }
    }

    /// Reset peaks, keeping the stem count
    pub fn reset(&mut self) {
        self.master = 0.0;
        self.stems = [0.0; MAX_STEMS];
    }
}

/// Events published by the audio thread
#[derive(Debug, Clone, Copy)]
pub enum EngineEvent {
    /// Transport position in frames at the canonical rate
    Position { frame: u64 },
    /// Transport state change
    State { state: PlaybackState },
    /// Peak meters since the previous levels event
    Levels(LevelFrame),
}

/// Capacity of the telemetry ring
///
/// At one position + one levels event per 50 ms, 256 slots buffer several
/// seconds of consumer stall.
pub const TELEMETRY_QUEUE_CAPACITY: usize = 256;

/// Create the telemetry channel (audio side, control side)
pub fn telemetry_channel() -> (rtrb::Producer<EngineEvent>, rtrb::Consumer<EngineEvent>) {
    rtrb::RingBuffer::new(TELEMETRY_QUEUE_CAPACITY)
}

/// Capacity of the retired-song ring; more in-flight replaced songs than
/// this cannot accumulate between pump ticks in practice.
pub const RETIRED_QUEUE_CAPACITY: usize = 16;

/// Channel carrying replaced songs off the audio thread
///
/// Dropping the final `Arc<DecodedSong>` frees hundreds of megabytes, which
/// must never happen inside the callback. `LoadSong` pushes the outgoing song
/// here and a control thread performs the drop.
pub fn retired_channel() -> (rtrb::Producer<Arc<DecodedSong>>, rtrb::Consumer<Arc<DecodedSong>>) {
    rtrb::RingBuffer::new(RETIRED_QUEUE_CAPACITY)
}
