//! Native metadata extraction for files being imported

use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::ImportError;

/// Metadata read from a source file before decode
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: f64,
    pub file_size: i64,
}

/// Probe a file for sample rate, channel count, duration, and size
pub fn extract_metadata(file_path: &Path) -> Result<SourceMetadata, ImportError> {
    if !file_path.exists() {
        return Err(ImportError::FileNotFound(file_path.display().to_string()));
    }

    let file_size = std::fs::metadata(file_path)
        .map_err(|e| ImportError::MetadataExtraction(format!("failed to stat file: {}", e)))?
        .len() as i64;

    let file = File::open(file_path)
        .map_err(|e| ImportError::MetadataExtraction(format!("failed to open file: {}", e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = file_path.extension() {
        hint.with_extension(&extension.to_string_lossy());
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| ImportError::UnsupportedFormat(format!("failed to probe format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| ImportError::UnsupportedFormat("no audio track found".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| ImportError::MetadataExtraction("no sample rate found".to_string()))?;

    let channels = codec_params
        .channels
        .ok_or_else(|| ImportError::MetadataExtraction("no channel info found".to_string()))?
        .count() as u16;

    let duration = match codec_params.n_frames {
        Some(n_frames) => n_frames as f64 / sample_rate as f64,
        // Some MP3s carry no frame count in the header; count by decoding.
        None => duration_by_decoding(&mut format, track_id, &codec_params, sample_rate)?,
    };

    Ok(SourceMetadata {
        sample_rate,
        channels,
        duration,
        file_size,
    })
}

fn duration_by_decoding(
    format: &mut Box<dyn symphonia::core::formats::FormatReader>,
    track_id: u32,
    codec_params: &symphonia::core::codecs::CodecParameters,
    sample_rate: u32,
) -> Result<f64, ImportError> {
    let mut decoder = symphonia::default::get_codecs()
        .make(codec_params, &DecoderOptions::default())
        .map_err(|e| ImportError::MetadataExtraction(format!("failed to create decoder: {}", e)))?;

    let mut total_frames: u64 = 0;

    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(decoded) => total_frames += decoded.capacity() as u64,
                    Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                    Err(_) => break,
                }
            }
            Err(_) => break,
        }
    }

    Ok(total_frames as f64 / sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_extract_metadata_nonexistent_file() {
        let result = extract_metadata(&PathBuf::from("/nonexistent/file.wav"));
        assert!(matches!(result, Err(ImportError::FileNotFound(_))));
    }

    #[test]
    fn test_extract_metadata_from_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..44_100 {
            writer.write_sample(0i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let meta = extract_metadata(&path).unwrap();
        assert_eq!(meta.sample_rate, 44_100);
        assert_eq!(meta.channels, 2);
        assert!((meta.duration - 1.0).abs() < 0.01);
        assert!(meta.file_size > 0);
    }
}
