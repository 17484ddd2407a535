//! Stem decoding: audio file -> canonical PCM
//!
//! Decodes WAV/MP3/FLAC via symphonia, converts every packet to interleaved
//! stereo f32 and resamples it chunk-by-chunk to the engine's canonical rate.
//! A partial decode is never returned; any failure discards the whole stem.

mod resampler;

pub use resampler::LinearResampler;

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Decode errors
///
/// Payloads are plain strings so the error stays `Clone`; the song loader
/// fans a failed load out to every coalesced caller.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt audio stream: {0}")]
    CorruptStream(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Result of decoding one stem file
pub struct DecodedPcm {
    /// Interleaved stereo f32 at the requested target rate
    pub pcm: Vec<f32>,
    /// Number of stereo frames (pcm.len() / 2)
    pub frames: u64,
}

/// Decode an audio file to interleaved stereo f32 at `target_rate`
///
/// Channel policy: mono is duplicated into both channels; more than two
/// channels are downmixed by averaging all channels equally into both left
/// and right.
pub fn decode_stem_file(path: &Path, target_rate: u32) -> Result<DecodedPcm, DecodeError> {
    let src = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DecodeError::FileNotFound(path.display().to_string()),
        _ => DecodeError::Io(e.to_string()),
    })?;

    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(format!("failed to probe container: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::UnsupportedFormat("no supported audio track".to_string()))?;

    let track_id = track.id;
    let source_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::CorruptStream("sample rate not available".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(format!("failed to create decoder: {}", e)))?;

    let mut resampler = LinearResampler::new(source_rate, target_rate);
    let mut pcm: Vec<f32> = Vec::new();
    // Per-packet stereo conversion scratch, reused across packets.
    let mut chunk: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(DecodeError::CorruptStream("decoder reset required".to_string()));
            }
            Err(e) => {
                return Err(DecodeError::CorruptStream(format!("failed to read packet: {}", e)));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                chunk.clear();
                convert_to_stereo(decoded, &mut chunk)?;
                resampler.process_into(&chunk, &mut pcm);
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Recoverable per symphonia's contract; skip the packet.
                log::warn!("decode error in {}: {}, skipping packet", path.display(), e);
                continue;
            }
            Err(e) => {
                return Err(DecodeError::CorruptStream(format!("decoder error: {}", e)));
            }
        }
    }

    resampler.finish_into(&mut pcm);

    if pcm.is_empty() {
        return Err(DecodeError::CorruptStream("no audio frames decoded".to_string()));
    }

    let frames = (pcm.len() / 2) as u64;
    Ok(DecodedPcm { pcm, frames })
}

/// Convert a decoded symphonia buffer to interleaved stereo f32
fn convert_to_stereo(buffer: AudioBufferRef, out: &mut Vec<f32>) -> Result<(), DecodeError> {
    match buffer {
        AudioBufferRef::F32(buf) => {
            let channels = buf.spec().channels.count();
            interleave(buf.frames(), channels, out, |ch, frame| buf.chan(ch)[frame]);
            Ok(())
        }
        AudioBufferRef::S16(buf) => {
            let channels = buf.spec().channels.count();
            interleave(buf.frames(), channels, out, |ch, frame| {
                buf.chan(ch)[frame] as f32 / i16::MAX as f32
            });
            Ok(())
        }
        AudioBufferRef::S24(buf) => {
            let channels = buf.spec().channels.count();
            interleave(buf.frames(), channels, out, |ch, frame| {
                buf.chan(ch)[frame].inner() as f32 / 8_388_608.0
            });
            Ok(())
        }
        AudioBufferRef::S32(buf) => {
            let channels = buf.spec().channels.count();
            interleave(buf.frames(), channels, out, |ch, frame| {
                buf.chan(ch)[frame] as f32 / i32::MAX as f32
            });
            Ok(())
        }
        _ => Err(DecodeError::UnsupportedFormat(
            "unsupported sample format".to_string(),
        )),
    }
}

/// Interleave `frames` frames of `channels` channels into stereo
fn interleave<F>(frames: usize, channels: usize, out: &mut Vec<f32>, sample_at: F)
where
    F: Fn(usize, usize) -> f32,
{
    out.reserve(frames * 2);
    match channels {
        0 => {}
        1 => {
            for frame in 0..frames {
                let s = sample_at(0, frame);
                out.push(s);
                out.push(s);
            }
        }
        2 => {
            for frame in 0..frames {
                out.push(sample_at(0, frame));
                out.push(sample_at(1, frame));
            }
        }
        n => {
            // Downmix policy: all channels averaged equally into both outputs.
            let scale = 1.0 / n as f32;
            for frame in 0..frames {
                let mut acc = 0.0;
                for ch in 0..n {
                    acc += sample_at(ch, frame);
                }
                let s = acc * scale;
                out.push(s);
                out.push(s);
            }
        }
    }
}
