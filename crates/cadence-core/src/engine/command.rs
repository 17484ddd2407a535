//! Lock-free command queue for the real-time engine
//!
//! The control plane pushes commands into a bounded `rtrb` ring; the audio
//! thread drains them at buffer boundaries. Push and pop are wait-free and
//! allocation-free, so neither side can stall the other: a held UI mutex can
//! never turn into an audible dropout.

use std::sync::Arc;

use crate::song::DecodedSong;

/// Commands sent from control threads to the audio thread
///
/// Each variant is one atomic state change, applied at the next buffer
/// boundary. Stems are addressed by index into the active song's stem list;
/// the control plane owns the id -> index mapping.
pub enum EngineCommand {
    /// Install a new song. Transport goes to Stopped at frame 0; an explicit
    /// `Play` follows. The `Arc` keeps the command pointer-sized.
    LoadSong(Arc<DecodedSong>),
    /// Start playback (from Stopped: restart at frame 0)
    Play,
    /// Pause, keeping the position
    Pause,
    /// Stop and rewind to frame 0
    Stop,
    /// Jump to a frame (clamped to the song length)
    Seek { frame: u64 },
    /// Set one stem's gain (clamped to 0.0 - 1.0)
    SetStemGain { stem: usize, gain: f32 },
    /// Set one stem's mute flag
    SetStemMute { stem: usize, muted: bool },
    /// Set one stem's solo flag
    SetStemSolo { stem: usize, soloed: bool },
    /// Set the master gain (clamped to 0.0 - 1.0)
    SetMasterGain { gain: f32 },
}

/// Capacity of the command ring
///
/// Restoring a saved mix can burst one command per stem plus transport;
/// 1024 slots leave generous headroom at negligible memory cost.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Create the command channel (control side, audio side)
pub fn command_channel() -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_roundtrip() {
        let (mut tx, mut rx) = command_channel();

        tx.push(EngineCommand::Play).unwrap();
        tx.push(EngineCommand::Seek { frame: 480 }).unwrap();

        assert!(matches!(rx.pop().unwrap(), EngineCommand::Play));
        assert!(matches!(rx.pop().unwrap(), EngineCommand::Seek { frame: 480 }));
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_command_stays_small() {
        // Keep the enum within a few words so the ring stays cache-friendly.
        // The largest variants are SetStemGain/SetStemMute (index + value).
        let size = std::mem::size_of::<EngineCommand>();
        assert!(size <= 24, "EngineCommand is {} bytes, expected <= 24", size);
    }

    #[test]
    fn test_ring_reports_full() {
        let (mut tx, _rx) = command_channel();
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            tx.push(EngineCommand::Play).unwrap();
        }
        assert!(tx.push(EngineCommand::Play).is_err());
    }
}
