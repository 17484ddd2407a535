//! Real-time mixing core
//!
//! [`PlaybackEngine`] owns the whole playback state and is touched only by
//! the audio thread. Control threads reach it exclusively through the command
//! ring; state flows back through the telemetry ring. The hot path never
//! allocates, locks, or touches the filesystem.

use std::sync::Arc;

use crate::song::DecodedSong;
use crate::types::{PlaybackState, StereoSample, MAX_STEMS, SAMPLE_RATE};

use super::command::EngineCommand;
use super::telemetry::{EngineEvent, LevelFrame};

/// Maximum buffer size to pre-allocate for real-time safety
///
/// Covers all common host configurations (64 .. 4096 frames); pre-allocating
/// to this size eliminates allocations in the audio callback.
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Commands applied per callback invocation
///
/// Bounds worst-case drain time; the ring preserves the rest for the next
/// callback in FIFO order.
const COMMAND_DRAIN_BUDGET: usize = 64;

/// Emit position/levels at most once per 50ms of output
const TELEMETRY_INTERVAL_FRAMES: u64 = SAMPLE_RATE as u64 * 50 / 1000;

/// Runtime mix state for one stem
struct StemMix {
    /// Requested gain (0.0 - 1.0)
    gain: f32,
    muted: bool,
    soloed: bool,
    /// Gain currently applied at the write head; ramps toward the effective
    /// target across one buffer
    ramp_gain: f32,
}

impl StemMix {
    /// Audibility rule: mute always silences; when anything is soloed, only
    /// soloed stems pass.
    fn effective_gain(&self, any_solo: bool) -> f32 {
        if self.muted || (any_solo && !self.soloed) {
            0.0
        } else {
            self.gain
        }
    }
}

/// The real-time playback engine
pub struct PlaybackEngine {
    song: Option<Arc<DecodedSong>>,
    state: PlaybackState,
    /// Transport position in frames, always in [0, song.frames]
    position: u64,
    stems: Vec<StemMix>,
    master_gain: f32,
    master_ramp: f32,
    levels: LevelFrame,
    frames_since_telemetry: u64,
    events: rtrb::Producer<EngineEvent>,
    retired: rtrb::Producer<Arc<DecodedSong>>,
}

impl PlaybackEngine {
    pub fn new(
        events: rtrb::Producer<EngineEvent>,
        retired: rtrb::Producer<Arc<DecodedSong>>,
    ) -> Self {
        Self {
            song: None,
            state: PlaybackState::Stopped,
            position: 0,
            stems: Vec::with_capacity(MAX_STEMS),
            master_gain: 1.0,
            master_ramp: 1.0,
            levels: LevelFrame::silent(0),
            frames_since_telemetry: 0,
            events,
            retired,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Transport position in frames
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn has_song(&self) -> bool {
        self.song.is_some()
    }

    /// Drain pending commands, bounded per invocation
    ///
    /// Call at the start of each audio callback, before [`Self::process`].
    pub fn process_commands(&mut self, commands: &mut rtrb::Consumer<EngineCommand>) {
        for _ in 0..COMMAND_DRAIN_BUDGET {
            match commands.pop() {
                Ok(command) => self.apply(command),
                Err(_) => break,
            }
        }
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::LoadSong(song) => self.load_song(song),
            EngineCommand::Play => {
                if self.song.is_none() || self.state == PlaybackState::Playing {
                    return;
                }
                if self.state == PlaybackState::Stopped {
                    self.position = 0;
                    self.emit(EngineEvent::Position { frame: 0 });
                }
                self.set_state(PlaybackState::Playing);
            }
            EngineCommand::Pause => {
                if self.state == PlaybackState::Playing {
                    self.set_state(PlaybackState::Paused);
                }
            }
            EngineCommand::Stop => {
                self.position = 0;
                self.emit(EngineEvent::Position { frame: 0 });
                self.set_state(PlaybackState::Stopped);
            }
            EngineCommand::Seek { frame } => {
                if let Some(song) = &self.song {
                    self.position = frame.min(song.frames);
                    self.emit(EngineEvent::Position { frame: self.position });
                }
            }
            EngineCommand::SetStemGain { stem, gain } => {
                if let Some(mix) = self.stems.get_mut(stem) {
                    mix.gain = gain.clamp(0.0, 1.0);
                }
            }
            EngineCommand::SetStemMute { stem, muted } => {
                if let Some(mix) = self.stems.get_mut(stem) {
                    mix.muted = muted;
                }
            }
            EngineCommand::SetStemSolo { stem, soloed } => {
                if let Some(mix) = self.stems.get_mut(stem) {
                    mix.soloed = soloed;
                }
            }
            EngineCommand::SetMasterGain { gain } => {
                self.master_gain = gain.clamp(0.0, 1.0);
            }
        }
    }

    fn load_song(&mut self, song: Arc<DecodedSong>) {
        // The outgoing song's final drop can free hundreds of megabytes;
        // hand it to a control thread. If the ring is somehow full the
        // inline drop is still correct, just not RT-polite.
        if let Some(old) = self.song.take() {
            let _ = self.retired.push(old);
        }

        self.stems.clear();
        for stem in song.stems.iter().take(MAX_STEMS) {
            let gain = stem.default_gain.clamp(0.0, 1.0);
            self.stems.push(StemMix {
                gain,
                muted: stem.default_muted,
                soloed: false,
                // Fresh songs start at their target; nothing to ramp from.
                ramp_gain: if stem.default_muted { 0.0 } else { gain },
            });
        }
        self.levels = LevelFrame::silent(self.stems.len());

        self.song = Some(song);
        self.position = 0;
        self.emit(EngineEvent::Position { frame: 0 });
        self.set_state(PlaybackState::Stopped);
    }

    /// Fill one buffer of interleaved stereo output
    pub fn process(&mut self, output: &mut [f32]) {
        debug_assert!(output.len() % 2 == 0);
        output.fill(0.0);

        // Zero-copy frame view of the interleaved buffer.
        let out: &mut [StereoSample] = bytemuck::cast_slice_mut(output);
        let frames = out.len();
        if frames == 0 {
            return;
        }

        if self.state != PlaybackState::Playing {
            return;
        }
        let song = match &self.song {
            Some(song) => song.clone(),
            None => return,
        };

        let any_solo = self.stems.iter().any(|s| s.soloed);
        let start = self.position;

        for (idx, (mix, stem)) in self.stems.iter_mut().zip(song.stems.iter()).enumerate() {
            let target = mix.effective_gain(any_solo);
            let step = (target - mix.ramp_gain) / frames as f32;
            let mut gain = mix.ramp_gain;

            let available = stem.frames.saturating_sub(start) as usize;
            let n = available.min(frames);
            if n > 0 {
                let pcm: &[StereoSample] = bytemuck::cast_slice(&stem.pcm);
                let mut peak = self.levels.stems[idx];

                for (frame, sample) in out[..n].iter_mut().zip(&pcm[start as usize..]) {
                    gain += step;
                    let scaled = *sample * gain;
                    *frame += scaled;
                    peak = peak.max(scaled.peak());
                }

                self.levels.stems[idx] = peak;
            }
            // The ramp completes this buffer even for stems that ran out of
            // frames, so the next buffer starts from the target.
            mix.ramp_gain = target;
        }

        // Master bus: ramped gain, then the hard [-1, 1] safety clamp.
        let master_step = (self.master_gain - self.master_ramp) / frames as f32;
        let mut master = self.master_ramp;
        let mut master_peak = self.levels.master;
        for frame in out.iter_mut() {
            master += master_step;
            *frame = StereoSample::new(
                (frame.left * master).clamp(-1.0, 1.0),
                (frame.right * master).clamp(-1.0, 1.0),
            );
            master_peak = master_peak.max(frame.peak());
        }
        self.master_ramp = self.master_gain;
        self.levels.master = master_peak;

        self.position = (start + frames as u64).min(song.frames);
        if self.position >= song.frames {
            // Natural end behaves exactly like Stop.
            self.position = 0;
            self.emit(EngineEvent::Position { frame: 0 });
            self.set_state(PlaybackState::Stopped);
        }

        self.frames_since_telemetry += frames as u64;
        if self.frames_since_telemetry >= TELEMETRY_INTERVAL_FRAMES {
            self.frames_since_telemetry = 0;
            self.emit(EngineEvent::Position { frame: self.position });
            self.emit(EngineEvent::Levels(self.levels));
            self.levels.reset();
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            self.state = state;
            self.emit(EngineEvent::State { state });
        }
    }

    fn emit(&mut self, event: EngineEvent) {
        // Drop-on-full: the consumer refreshes from the next emission.
        let _ = self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::command::command_channel;
    use crate::engine::telemetry::{retired_channel, telemetry_channel, TELEMETRY_QUEUE_CAPACITY};
    use crate::song::DecodedStem;

    struct Harness {
        engine: PlaybackEngine,
        commands_tx: rtrb::Producer<EngineCommand>,
        commands_rx: rtrb::Consumer<EngineCommand>,
        telemetry_rx: rtrb::Consumer<EngineEvent>,
        retired_rx: rtrb::Consumer<Arc<DecodedSong>>,
    }

    impl Harness {
        fn new() -> Self {
            let (commands_tx, commands_rx) = command_channel();
            let (telemetry_tx, telemetry_rx) = telemetry_channel();
            let (retired_tx, retired_rx) = retired_channel();
            Self {
                engine: PlaybackEngine::new(telemetry_tx, retired_tx),
                commands_tx,
                commands_rx,
                telemetry_rx,
                retired_rx,
            }
        }

        fn send(&mut self, command: EngineCommand) {
            self.commands_tx.push(command).unwrap();
        }

        fn run(&mut self, frames: usize) -> Vec<f32> {
            let mut output = vec![0.0f32; frames * 2];
            self.engine.process_commands(&mut self.commands_rx);
            self.engine.process(&mut output);
            output
        }

        fn drain_telemetry(&mut self) -> Vec<EngineEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.telemetry_rx.pop() {
                events.push(event);
            }
            events
        }
    }

    fn constant_stem(id: &str, value: f32, frames: u64) -> DecodedStem {
        let mut pcm = Vec::with_capacity((frames * 2) as usize);
        for _ in 0..frames {
            pcm.push(value);
            pcm.push(value);
        }
        DecodedStem {
            id: id.to_string(),
            name: id.to_string(),
            default_gain: 1.0,
            default_muted: false,
            pcm,
            frames,
        }
    }

    fn song(stems: Vec<DecodedStem>) -> Arc<DecodedSong> {
        Arc::new(DecodedSong::new("song".to_string(), stems))
    }

    #[test]
    fn test_idle_engine_outputs_silence() {
        let mut h = Harness::new();
        let out = h.run(256);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(h.engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_load_requires_explicit_play() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![constant_stem("a", 0.5, 48_000)])));
        let out = h.run(256);

        assert_eq!(h.engine.state(), PlaybackState::Stopped);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_stems_sum_into_output() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![
            constant_stem("a", 0.5, 48_000),
            constant_stem("b", 0.25, 48_000),
        ])));
        h.send(EngineCommand::Play);
        let out = h.run(256);

        for &s in &out {
            assert!((s - 0.75).abs() < 1e-6);
        }
        assert_eq!(h.engine.position(), 256);
    }

    #[test]
    fn test_solo_silences_everything_else() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![
            constant_stem("a", 0.5, 48_000),
            constant_stem("b", 0.25, 48_000),
            constant_stem("c", 0.125, 48_000),
        ])));
        h.send(EngineCommand::Play);
        h.run(64);

        h.send(EngineCommand::SetStemSolo { stem: 1, soloed: true });
        // First buffer after the change ramps; the one after is settled.
        h.run(64);
        let out = h.run(64);

        for &s in &out {
            assert!((s - 0.25).abs() < 1e-6, "expected only stem b, got {}", s);
        }
    }

    #[test]
    fn test_mute_wins_over_solo() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![
            constant_stem("a", 0.5, 48_000),
            constant_stem("b", 0.25, 48_000),
        ])));
        h.send(EngineCommand::Play);
        h.send(EngineCommand::SetStemSolo { stem: 0, soloed: true });
        h.send(EngineCommand::SetStemMute { stem: 0, muted: true });
        h.run(64);
        let out = h.run(64);

        // Stem a is muted despite its solo; stem b is not soloed. Silence.
        assert!(out.iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn test_muted_stem_contributes_nothing_regardless_of_gain() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![
            constant_stem("a", 0.5, 48_000),
            constant_stem("b", 0.25, 48_000),
        ])));
        h.send(EngineCommand::SetStemMute { stem: 0, muted: true });
        h.send(EngineCommand::SetStemGain { stem: 0, gain: 1.0 });
        h.send(EngineCommand::Play);
        h.run(64);
        let out = h.run(64);

        for &s in &out {
            assert!((s - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_output_is_clamped() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![
            constant_stem("a", 0.9, 48_000),
            constant_stem("b", 0.9, 48_000),
        ])));
        h.send(EngineCommand::Play);
        let out = h.run(256);

        for &s in &out {
            assert!((-1.0..=1.0).contains(&s));
            assert!((s - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_gain_ramps_across_one_buffer() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![constant_stem("a", 1.0, 48_000)])));
        h.send(EngineCommand::Play);
        h.run(64);

        h.send(EngineCommand::SetStemGain { stem: 0, gain: 0.0 });
        let out = h.run(64);

        // Early samples still audible, last sample at the new target.
        assert!(out[0].abs() > 0.5);
        assert!(out[out.len() - 1].abs() < 1e-3);

        // Fully settled afterwards.
        let next = h.run(64);
        assert!(next.iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn test_master_gain_scales_and_meters() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![constant_stem("a", 0.8, 48_000)])));
        h.send(EngineCommand::SetMasterGain { gain: 0.5 });
        h.send(EngineCommand::Play);
        h.run(64);
        let out = h.run(64);

        for &s in &out {
            assert!((s - 0.4).abs() < 1e-3);
        }
    }

    #[test]
    fn test_transport_semantics() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![constant_stem("a", 0.5, 48_000)])));

        // Play from stopped starts at 0
        h.send(EngineCommand::Play);
        h.run(100);
        assert_eq!(h.engine.position(), 100);
        assert_eq!(h.engine.state(), PlaybackState::Playing);

        // Pause keeps position
        h.send(EngineCommand::Pause);
        h.run(100);
        assert_eq!(h.engine.position(), 100);
        assert_eq!(h.engine.state(), PlaybackState::Paused);

        // Resume keeps position
        h.send(EngineCommand::Play);
        h.run(100);
        assert_eq!(h.engine.position(), 200);

        // Stop rewinds
        h.send(EngineCommand::Stop);
        h.run(10);
        assert_eq!(h.engine.position(), 0);
        assert_eq!(h.engine.state(), PlaybackState::Stopped);

        // Play from stopped restarts at 0 even after a stopped-state seek
        h.send(EngineCommand::Seek { frame: 500 });
        h.send(EngineCommand::Play);
        h.run(10);
        assert_eq!(h.engine.position(), 10);
    }

    #[test]
    fn test_seek_clamps_to_song_length() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![constant_stem("a", 0.5, 1000)])));
        h.send(EngineCommand::Play);
        h.run(10);

        h.send(EngineCommand::Seek { frame: 99_999 });
        h.engine.process_commands(&mut h.commands_rx);
        assert_eq!(h.engine.position(), 1000);

        // Playing at the clamped end: the next callback stops.
        let out = h.run(64);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(h.engine.state(), PlaybackState::Stopped);
        assert_eq!(h.engine.position(), 0);
    }

    #[test]
    fn test_end_of_song_stops_and_zero_fills() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![constant_stem("a", 0.5, 100)])));
        h.send(EngineCommand::Play);

        let out = h.run(64);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));

        // 36 frames of audio remain; the rest of the buffer is silence.
        let out = h.run(64);
        for (i, frame) in out.chunks_exact(2).enumerate() {
            if i < 36 {
                assert!((frame[0] - 0.5).abs() < 1e-6);
            } else {
                assert_eq!(frame[0], 0.0);
            }
        }
        assert_eq!(h.engine.state(), PlaybackState::Stopped);
        assert_eq!(h.engine.position(), 0);
    }

    #[test]
    fn test_short_stem_goes_silent_before_song_end() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![
            constant_stem("long", 0.5, 200),
            constant_stem("short", 0.25, 50),
        ])));
        h.send(EngineCommand::Play);

        let out = h.run(100);
        for (i, frame) in out.chunks_exact(2).enumerate() {
            let expected = if i < 50 { 0.75 } else { 0.5 };
            assert!(
                (frame[0] - expected).abs() < 1e-6,
                "frame {}: {} != {}",
                i,
                frame[0],
                expected
            );
        }
    }

    #[test]
    fn test_load_song_retires_previous() {
        let mut h = Harness::new();
        let first = song(vec![constant_stem("a", 0.5, 1000)]);
        h.send(EngineCommand::LoadSong(first.clone()));
        h.run(10);

        h.send(EngineCommand::LoadSong(song(vec![constant_stem("b", 0.25, 1000)])));
        h.run(10);

        let retired = h.retired_rx.pop().unwrap();
        assert!(Arc::ptr_eq(&retired, &first));
        assert_eq!(h.engine.position(), 0);
        assert_eq!(h.engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_load_song_applies_stem_defaults() {
        let mut h = Harness::new();
        let mut quiet = constant_stem("quiet", 1.0, 48_000);
        quiet.default_gain = 0.5;
        let mut silent = constant_stem("silent", 1.0, 48_000);
        silent.default_muted = true;

        h.send(EngineCommand::LoadSong(song(vec![quiet, silent])));
        h.send(EngineCommand::Play);
        let out = h.run(64);

        for &s in &out {
            assert!((s - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_telemetry_cadence_and_levels() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![constant_stem("a", 0.5, 96_000)])));
        h.send(EngineCommand::Play);

        // One second of audio in 512-frame buffers.
        for _ in 0..(48_000 / 512) {
            h.run(512);
        }

        let events = h.drain_telemetry();
        let positions = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Position { .. }))
            .count();
        let levels: Vec<&LevelFrame> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Levels(frame) => Some(frame),
                _ => None,
            })
            .collect();

        // ~20 telemetry windows per second (plus transport-change emissions)
        assert!((15..=25).contains(&levels.len()), "{} level frames", levels.len());
        assert!(positions >= levels.len());

        for frame in levels {
            assert_eq!(frame.stem_count, 1);
            assert!((frame.stems[0] - 0.5).abs() < 1e-3);
            assert!((frame.master - 0.5).abs() < 1e-3);
        }

        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::State {
                state: PlaybackState::Playing
            }
        )));
    }

    #[test]
    fn test_command_drain_budget_is_bounded() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![constant_stem("a", 0.5, 48_000)])));
        h.run(1);

        // 64 filler commands, then Play: the budget defers Play one callback.
        for _ in 0..64 {
            h.send(EngineCommand::SetMasterGain { gain: 1.0 });
        }
        h.send(EngineCommand::Play);

        h.run(16);
        assert_eq!(h.engine.state(), PlaybackState::Stopped);
        h.run(16);
        assert_eq!(h.engine.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_telemetry_overflow_drops_newest_without_blocking() {
        let mut h = Harness::new();
        h.send(EngineCommand::LoadSong(song(vec![constant_stem(
            "a",
            0.5,
            48_000 * 120,
        )])));
        h.send(EngineCommand::Play);

        // Never drain telemetry; the engine must keep running regardless.
        for _ in 0..(TELEMETRY_QUEUE_CAPACITY * 2) {
            h.engine.process_commands(&mut h.commands_rx);
            let mut out = vec![0.0f32; 4800 * 2];
            h.engine.process(&mut out);
        }
        assert_eq!(h.engine.state(), PlaybackState::Playing);
    }
}
