//! Output driver
//!
//! Owns the host audio stream and services the mixer from the host's
//! real-time callback. cpal streams are not `Send`, so their whole lifecycle
//! is confined to one supervisor thread; the rest of the engine talks to it
//! over a mailbox.
//!
//! The engine state ([`CallbackState`]) is a single box owned by exactly one
//! party at a time: the active stream's data callback, or the supervisor
//! while no stream holds it. It moves between them over capacity-1 wait-free
//! rings, so the callback never takes a lock - "never block the callback" is
//! a structural property, not a per-call discipline. A device switch starts
//! the new stream (silent until the state arrives), retires the old one,
//! reclaims the state from it, and hands it to the new stream; transport,
//! mix, and the loaded song survive every switch untouched.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::engine::{EngineCommand, PlaybackEngine, MAX_BUFFER_SIZE};
use crate::types::{StereoBuffer, SAMPLE_RATE};

use super::device::find_output_device;
use super::error::{AudioError, AudioResult};

/// Timeout for device resolution and config negotiation
const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Canonical frames pulled from the engine per resampler refill
const REFILL_FRAMES: usize = 512;

/// Polls (10ms apart) waiting for a dropped stream to return the state
const RECLAIM_POLLS: usize = 100;

/// What the driver should open
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Preferred device name (None = system default)
    pub device_name: Option<String>,
    /// Requested buffer size in frames
    pub buffer_size: u32,
    /// Requested device sample rate
    pub sample_rate: u32,
}

/// What the driver actually opened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub device_name: String,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub channels: u16,
}

/// Asynchronous notices from the host
#[derive(Debug, Clone)]
pub enum DriverNotice {
    /// The host reported a stream error (typically a lost device)
    DeviceLost { message: String },
}

// ---------------------------------------------------------------------------
// Callback state
// ---------------------------------------------------------------------------

/// Output-boundary resampler (canonical rate -> device rate)
///
/// Decoded data stays at the canonical rate; when the device cannot run at
/// 48kHz the callback pulls canonical frames through this linear resampler.
/// The queue is pre-allocated and compacted in place, so the hot path stays
/// allocation-free.
struct OutputResampler {
    /// Canonical frames advanced per device frame
    step: f64,
    /// Fractional read position; index 0 is the queue head
    pos: f64,
    /// Interleaved canonical frames not yet fully consumed
    queue: Vec<f32>,
}

impl OutputResampler {
    fn new(device_rate: u32) -> Self {
        Self {
            step: SAMPLE_RATE as f64 / device_rate as f64,
            pos: 0.0,
            queue: Vec::with_capacity((REFILL_FRAMES + 4) * 2),
        }
    }

    fn queue_frames(&self) -> usize {
        self.queue.len() / 2
    }

    /// Drop fully consumed frames, then pull one refill block from the engine
    fn refill(&mut self, engine: &mut PlaybackEngine) {
        let consumed = (self.pos.floor() as usize).min(self.queue_frames());
        self.queue.drain(..consumed * 2);
        self.pos -= consumed as f64;

        let old_len = self.queue.len();
        self.queue.resize(old_len + REFILL_FRAMES * 2, 0.0);
        engine.process(&mut self.queue[old_len..]);
    }

    /// Produce the next device-rate frame
    fn next_frame(&mut self, engine: &mut PlaybackEngine) -> (f32, f32) {
        while (self.pos.floor() as usize) + 1 >= self.queue_frames() {
            self.refill(engine);
        }

        let idx = self.pos.floor() as usize;
        let frac = (self.pos - idx as f64) as f32;
        let base = idx * 2;

        let left = self.queue[base] + (self.queue[base + 2] - self.queue[base]) * frac;
        let right = self.queue[base + 1] + (self.queue[base + 3] - self.queue[base + 1]) * frac;

        self.pos += self.step;
        (left, right)
    }
}

/// Everything the audio callback needs: the engine, its command inbox, and
/// the output-rate conversion state
///
/// Owned exclusively by whichever stream callback currently renders (or by
/// the supervisor between streams); no other thread ever touches it.
pub struct CallbackState {
    engine: PlaybackEngine,
    commands: rtrb::Consumer<EngineCommand>,
    device_rate: u32,
    /// Canonical-rate mix scratch for the passthrough path; pre-allocated,
    /// resized only within capacity
    scratch: StereoBuffer,
    resampler: OutputResampler,
}

impl CallbackState {
    pub fn new(engine: PlaybackEngine, commands: rtrb::Consumer<EngineCommand>) -> Self {
        Self {
            engine,
            commands,
            device_rate: SAMPLE_RATE,
            scratch: StereoBuffer::silence(MAX_BUFFER_SIZE),
            resampler: OutputResampler::new(SAMPLE_RATE),
        }
    }

    /// Called by the supervisor (while it owns the state) when the target
    /// stream's rate changes
    fn set_device_rate(&mut self, rate: u32) {
        if self.device_rate != rate {
            log::info!(
                "device runs at {}Hz; resampling at the output boundary (canonical {}Hz)",
                rate,
                SAMPLE_RATE
            );
        }
        self.device_rate = rate;
        self.resampler = OutputResampler::new(rate);
    }

    /// Fill one host buffer (interleaved, `channels` per frame)
    pub fn render(&mut self, data: &mut [f32], channels: usize) {
        self.engine.process_commands(&mut self.commands);

        let frames = data.len() / channels.max(1);

        if self.device_rate == SAMPLE_RATE {
            let mut done = 0;
            while done < frames {
                let block = (frames - done).min(MAX_BUFFER_SIZE);
                self.scratch.set_len_from_capacity(block);
                self.engine.process(self.scratch.as_interleaved_mut());

                for (i, sample) in self.scratch.as_slice().iter().enumerate() {
                    write_frame(
                        &mut data[(done + i) * channels..(done + i + 1) * channels],
                        sample.left,
                        sample.right,
                    );
                }
                done += block;
            }
        } else {
            for i in 0..frames {
                let (left, right) = self.resampler.next_frame(&mut self.engine);
                write_frame(&mut data[i * channels..(i + 1) * channels], left, right);
            }
        }
    }
}

/// Map a stereo frame onto however many channels the device has
#[inline]
fn write_frame(frame: &mut [f32], left: f32, right: f32) {
    frame[0] = left;
    if frame.len() > 1 {
        frame[1] = right;
    }
    for extra in frame.iter_mut().skip(2) {
        *extra = 0.0;
    }
}

// ---------------------------------------------------------------------------
// State handover
// ---------------------------------------------------------------------------

/// The callback side of the state handover
///
/// Starts empty; the supervisor pushes the state box once the stream is
/// running. Until it arrives (and again after it is given back) the callback
/// renders silence. Dropping the slot - cpal destroys the data callback when
/// the `Stream` drops, after the callback has stopped running - returns the
/// state over the home ring, so the supervisor can reclaim it without any
/// shared lock.
struct StateSlot {
    state: Option<Box<CallbackState>>,
    incoming: rtrb::Consumer<Box<CallbackState>>,
    home: rtrb::Producer<Box<CallbackState>>,
}

impl StateSlot {
    /// The state, once delivered (wait-free)
    fn get(&mut self) -> Option<&mut CallbackState> {
        if self.state.is_none() {
            if let Ok(state) = self.incoming.pop() {
                self.state = Some(state);
            }
        }
        self.state.as_deref_mut()
    }
}

impl Drop for StateSlot {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            let _ = self.home.push(state);
        }
    }
}

/// A freshly built (not yet playing) stream plus its handover endpoints
struct BuiltStream {
    stream: Stream,
    /// Supervisor -> callback: deliver the state after `play()` succeeds
    deliver: rtrb::Producer<Box<CallbackState>>,
    /// Callback -> supervisor: the state comes back when the stream drops
    reclaim: rtrb::Consumer<Box<CallbackState>>,
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Negotiated {
    device_name: String,
    channels: u16,
    sample_rate: u32,
    buffer_size: u32,
}

/// Pick the best output configuration for a device
///
/// Prefers f32 stereo at the requested rate; falls back to the device's
/// maximum rate (the callback resamples at the output boundary).
fn negotiate(request: &StreamRequest) -> AudioResult<Negotiated> {
    let device = find_output_device(request.device_name.as_deref())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();
    if configs.is_empty() {
        return Err(AudioError::ConfigError(
            "no supported output configurations".to_string(),
        ));
    }

    let best = configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() >= 2)
        .find(|c| {
            request.sample_rate >= c.min_sample_rate().0
                && request.sample_rate <= c.max_sample_rate().0
        })
        .or_else(|| configs.iter().find(|c| c.channels() >= 2))
        .or_else(|| configs.first())
        .ok_or_else(|| AudioError::ConfigError("no suitable output configuration".to_string()))?;

    let sample_rate = if request.sample_rate >= best.min_sample_rate().0
        && request.sample_rate <= best.max_sample_rate().0
    {
        request.sample_rate
    } else {
        let fallback = best.max_sample_rate().0;
        log::warn!(
            "device '{}' does not support {}Hz, using {}Hz",
            device_name,
            request.sample_rate,
            fallback
        );
        fallback
    };

    Ok(Negotiated {
        device_name,
        channels: best.channels(),
        sample_rate,
        buffer_size: request.buffer_size.clamp(64, MAX_BUFFER_SIZE as u32),
    })
}

/// Run negotiation on a helper thread so a wedged host cannot hang the
/// control plane past the open timeout
fn negotiate_with_timeout(request: &StreamRequest) -> AudioResult<Negotiated> {
    let (tx, rx) = bounded(1);
    let request = request.clone();
    thread::Builder::new()
        .name("audio-negotiate".to_string())
        .spawn(move || {
            let _ = tx.send(negotiate(&request));
        })
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

    match rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
        Ok(result) => result,
        Err(_) => Err(AudioError::DeviceUnavailable(format!(
            "device negotiation timed out after {:?}",
            DEVICE_OPEN_TIMEOUT
        ))),
    }
}

/// Build one stream with fresh handover rings
fn try_build(
    device: &cpal::Device,
    config: &StreamConfig,
    notices: &Sender<DriverNotice>,
) -> Result<BuiltStream, cpal::BuildStreamError> {
    let channels = config.channels as usize;
    let (deliver, incoming) = rtrb::RingBuffer::new(1);
    let (home, reclaim) = rtrb::RingBuffer::new(1);
    let mut slot = StateSlot {
        state: None,
        incoming,
        home,
    };
    let notice_tx = notices.clone();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match slot.get() {
            Some(state) => state.render(data, channels),
            None => data.fill(0.0),
        },
        move |err: cpal::StreamError| {
            log::error!("audio stream error: {}", err);
            let _ = notice_tx.send(DriverNotice::DeviceLost {
                message: err.to_string(),
            });
        },
        None,
    )?;

    Ok(BuiltStream {
        stream,
        deliver,
        reclaim,
    })
}

fn build_stream(negotiated: &Negotiated, notices: &Sender<DriverNotice>) -> AudioResult<BuiltStream> {
    let device = find_output_device(Some(&negotiated.device_name))?;

    let config = StreamConfig {
        channels: negotiated.channels,
        sample_rate: cpal::SampleRate(negotiated.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(negotiated.buffer_size),
    };

    match try_build(&device, &config, notices) {
        Ok(built) => Ok(built),
        Err(e) => {
            // Some hosts reject fixed buffer sizes; retry with the default.
            log::warn!("fixed buffer size rejected ({}), retrying with default", e);
            let fallback = StreamConfig {
                buffer_size: cpal::BufferSize::Default,
                ..config
            };
            try_build(&device, &fallback, notices)
                .map_err(|e| AudioError::StreamBuildError(e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

enum DriverCommand {
    Configure {
        request: StreamRequest,
        reply: Sender<AudioResult<StreamInfo>>,
    },
    Stop {
        reply: Sender<()>,
    },
    /// Render on the parked state, standing in for the host callback on
    /// machines without audio hardware
    #[cfg(test)]
    Render {
        frames: usize,
        reply: Sender<()>,
    },
    Shutdown,
}

/// Handle to the stream supervisor thread
pub struct OutputDriver {
    mailbox: Sender<DriverCommand>,
    handle: Option<JoinHandle<()>>,
}

impl OutputDriver {
    /// Spawn the supervisor, which takes ownership of the callback state.
    /// It starts with no stream; call [`Self::configure`] to open one.
    pub fn spawn(state: CallbackState, notices: Sender<DriverNotice>) -> Self {
        let (mailbox, inbox) = crossbeam_channel::unbounded();

        let handle = thread::Builder::new()
            .name("audio-driver".to_string())
            .spawn(move || supervisor_loop(inbox, Box::new(state), notices))
            .expect("failed to spawn audio driver thread");

        Self {
            mailbox,
            handle: Some(handle),
        }
    }

    /// Open (or replace) the stream per `request`
    ///
    /// On failure the previous stream, if any, keeps running.
    pub fn configure(&self, request: StreamRequest) -> AudioResult<StreamInfo> {
        let (reply, rx) = bounded(1);
        self.mailbox
            .send(DriverCommand::Configure { request, reply })
            .map_err(|_| AudioError::DeviceUnavailable("audio driver thread gone".to_string()))?;
        rx.recv()
            .map_err(|_| AudioError::DeviceUnavailable("audio driver thread gone".to_string()))?
    }

    /// Tear down the active stream
    pub fn stop(&self) {
        let (reply, rx) = bounded(1);
        if self.mailbox.send(DriverCommand::Stop { reply }).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Drive the parked callback state synthetically (no-op while a real
    /// stream owns the state)
    #[cfg(test)]
    pub(crate) fn drive(&self, frames: usize) {
        let (reply, rx) = bounded(1);
        if self.mailbox.send(DriverCommand::Render { frames, reply }).is_ok() {
            let _ = rx.recv();
        }
    }
}

impl Drop for OutputDriver {
    fn drop(&mut self) {
        let _ = self.mailbox.send(DriverCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A playing stream that currently owns the callback state
struct ActiveStream {
    stream: Stream,
    reclaim: rtrb::Consumer<Box<CallbackState>>,
}

fn supervisor_loop(
    inbox: Receiver<DriverCommand>,
    state: Box<CallbackState>,
    notices: Sender<DriverNotice>,
) {
    log::info!("audio driver thread started");
    // The state lives here whenever no stream holds it.
    let mut parked: Option<Box<CallbackState>> = Some(state);
    let mut current: Option<ActiveStream> = None;

    while let Ok(command) = inbox.recv() {
        match command {
            DriverCommand::Configure { request, reply } => {
                let result = open_stream(&request, &notices, &mut parked, &mut current);
                let _ = reply.send(result);
            }
            DriverCommand::Stop { reply } => {
                if retire_stream(&mut parked, &mut current) {
                    log::info!("audio stream stopped");
                }
                let _ = reply.send(());
            }
            #[cfg(test)]
            DriverCommand::Render { frames, reply } => {
                if let Some(state) = parked.as_mut() {
                    let mut data = vec![0.0f32; frames * 2];
                    state.render(&mut data, 2);
                }
                let _ = reply.send(());
            }
            DriverCommand::Shutdown => break,
        }
    }

    retire_stream(&mut parked, &mut current);
    log::info!("audio driver thread shutting down");
}

/// Drop the active stream, if any, and park its state again
fn retire_stream(
    parked: &mut Option<Box<CallbackState>>,
    current: &mut Option<ActiveStream>,
) -> bool {
    match current.take() {
        Some(active) => {
            let ActiveStream { stream, mut reclaim } = active;
            drop(stream);
            if let Some(state) = reclaim_state(&mut reclaim) {
                *parked = Some(state);
            }
            true
        }
        None => false,
    }
}

/// Wait for a dropped stream's callback to hand the state home
///
/// The send usually happens synchronously inside the `Stream` drop; the poll
/// loop covers hosts that tear the callback thread down asynchronously.
fn reclaim_state(
    reclaim: &mut rtrb::Consumer<Box<CallbackState>>,
) -> Option<Box<CallbackState>> {
    for _ in 0..RECLAIM_POLLS {
        if let Ok(state) = reclaim.pop() {
            return Some(state);
        }
        thread::sleep(Duration::from_millis(10));
    }
    log::error!("retired stream never returned the callback state");
    None
}

/// Open a stream for `request`, replacing `current` only on success
fn open_stream(
    request: &StreamRequest,
    notices: &Sender<DriverNotice>,
    parked: &mut Option<Box<CallbackState>>,
    current: &mut Option<ActiveStream>,
) -> AudioResult<StreamInfo> {
    let negotiated = negotiate_with_timeout(request)?;
    let BuiltStream {
        stream,
        mut deliver,
        reclaim,
    } = build_stream(&negotiated, notices)?;

    // The new stream renders silence until the state is delivered, so the
    // outgoing stream keeps playing right up to the handover.
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    retire_stream(parked, current);

    if let Some(mut state) = parked.take() {
        state.set_device_rate(negotiated.sample_rate);
        if deliver.push(state).is_err() {
            // Capacity-1 ring with one push; cannot happen.
            log::error!("state delivery ring rejected the callback state");
        }
    } else {
        log::error!("no callback state available; stream will render silence");
    }

    let info = StreamInfo {
        device_name: negotiated.device_name,
        sample_rate: negotiated.sample_rate,
        buffer_size: negotiated.buffer_size,
        channels: negotiated.channels,
    };
    log::info!(
        "audio stream running on '{}' ({}Hz, {} frames, {} ch)",
        info.device_name,
        info.sample_rate,
        info.buffer_size,
        info.channels
    );

    *current = Some(ActiveStream { stream, reclaim });
    Ok(info)
}
