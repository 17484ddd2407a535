//! Linear resampler for interleaved stereo PCM
//!
//! Converts decoded audio to the canonical rate in chunks so memory stays
//! bounded by the decoder's packet size. The last input frame is carried
//! across calls so interpolation is continuous over chunk boundaries.

/// Streaming linear-interpolation resampler (stereo interleaved)
pub struct LinearResampler {
    source_rate: u32,
    target_rate: u32,
    /// Fractional read position into the conceptual input stream, relative to
    /// the carried frame (so 0.0 points at `carry`).
    position: f64,
    /// Last frame of the previous chunk, interpolated against the first frame
    /// of the next chunk.
    carry: Option<[f32; 2]>,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            source_rate,
            target_rate,
            position: 0.0,
            carry: None,
        }
    }

    /// Whether this resampler actually changes the rate
    pub fn is_passthrough(&self) -> bool {
        self.source_rate == self.target_rate
    }

    /// Resample one chunk of interleaved stereo input, appending to `output`
    pub fn process_into(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if self.is_passthrough() {
            output.extend_from_slice(input);
            return;
        }

        debug_assert!(input.len() % 2 == 0, "input must be interleaved stereo");
        let input_frames = input.len() / 2;
        if input_frames == 0 {
            return;
        }

        let ratio = self.source_rate as f64 / self.target_rate as f64;

        // Frame 0 of the virtual stream is the carried frame (if any),
        // followed by this chunk's frames.
        let carry_frames = usize::from(self.carry.is_some());
        let total_frames = carry_frames + input_frames;

        let frame_at = |idx: usize| -> [f32; 2] {
            if idx < carry_frames {
                self.carry.unwrap()
            } else {
                let base = (idx - carry_frames) * 2;
                [input[base], input[base + 1]]
            }
        };

        // Emit every output frame whose interpolation window [idx, idx+1]
        // fits inside the frames seen so far.
        while self.position.floor() as usize + 1 < total_frames {
            let src_idx = self.position.floor() as usize;
            let frac = (self.position - src_idx as f64) as f32;

            let s0 = frame_at(src_idx);
            let s1 = frame_at(src_idx + 1);
            output.push(s0[0] + (s1[0] - s0[0]) * frac);
            output.push(s0[1] + (s1[1] - s0[1]) * frac);

            self.position += ratio;
        }

        // Carry the final frame and rebase the position against it.
        self.carry = Some(frame_at(total_frames - 1));
        self.position -= (total_frames - 1) as f64;
    }

    /// Flush the tail: emit any output frames still owed against the carried
    /// frame (held, not interpolated). Call once after the last chunk.
    pub fn finish_into(&mut self, output: &mut Vec<f32>) {
        if self.is_passthrough() {
            return;
        }
        if let Some(last) = self.carry.take() {
            let ratio = self.source_rate as f64 / self.target_rate as f64;
            while self.position < 1.0 {
                output.push(last[0]);
                output.push(last[1]);
                self.position += ratio;
            }
        }
        self.position = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resample_all(resampler: &mut LinearResampler, input: &[f32], chunk_frames: usize) -> Vec<f32> {
        let mut output = Vec::new();
        for chunk in input.chunks(chunk_frames * 2) {
            resampler.process_into(chunk, &mut output);
        }
        resampler.finish_into(&mut output);
        output
    }

    #[test]
    fn test_passthrough_at_equal_rates() {
        let input: Vec<f32> = (0..96).map(|i| i as f32).collect();
        let mut r = LinearResampler::new(48_000, 48_000);
        let out = resample_all(&mut r, &input, 7);
        assert_eq!(out, input);
    }

    #[test]
    fn test_output_length_matches_rate_ratio() {
        // 4410 frames at 44.1kHz -> ~4800 frames at 48kHz
        let input = vec![0.25f32; 4410 * 2];
        let mut r = LinearResampler::new(44_100, 48_000);
        let out = resample_all(&mut r, &input, 512);

        let frames = out.len() / 2;
        let expected = (4410.0 * 48_000.0 / 44_100.0) as isize;
        assert!((frames as isize - expected).abs() <= 2, "got {} frames", frames);
    }

    #[test]
    fn test_constant_signal_stays_constant() {
        let input = vec![0.5f32; 1000 * 2];
        let mut r = LinearResampler::new(44_100, 48_000);
        let out = resample_all(&mut r, &input, 128);

        for &s in &out {
            assert!((s - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_chunking_matches_single_pass() {
        let input: Vec<f32> = (0..2000).map(|i| ((i as f32) * 0.013).sin()).collect();

        let mut whole = LinearResampler::new(32_000, 48_000);
        let expected = resample_all(&mut whole, &input, 1000);

        let mut chunked = LinearResampler::new(32_000, 48_000);
        let actual = resample_all(&mut chunked, &input, 64);

        assert_eq!(expected.len(), actual.len());
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_downsampling() {
        let input = vec![1.0f32; 9600 * 2];
        let mut r = LinearResampler::new(96_000, 48_000);
        let out = resample_all(&mut r, &input, 480);

        let frames = out.len() / 2;
        assert!((frames as isize - 4800).abs() <= 2, "got {} frames", frames);
    }
}
