//! Waveform peak precomputation for overview rendering.
//!
//! Produces the `min, max` bin pairs that back the `X.peaks.json` sidecar.
//! Rendering the bins is out of scope here; this module only computes them.

use serde::{Deserialize, Serialize};

/// Precomputed min/max bins covering a whole track, downsampled to `cols`
/// columns. Mirrors the `X.peaks.json` sidecar schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaveformPeaks {
    pub version: u32,
    pub sample_rate: u32,
    pub total_frames: u64,
    pub cols: usize,
    /// One `[min, max]` pair per column, each in [-1.0, 1.0].
    pub peaks: Vec<(f32, f32)>,
}

impl WaveformPeaks {
    pub const CURRENT_VERSION: u32 = 1;

    /// Downsample interleaved stereo samples into `cols` min/max bins.
    ///
    /// `samples` is interleaved stereo; each bin reports the min and max of
    /// the mono mixdown across its frame range, not just peak magnitude, so
    /// waveform renderers can draw both the positive and negative envelope.
    pub fn compute(samples: &[f32], sample_rate: u32, cols: usize) -> Self {
        let channels = 2usize;
        let total_frames = (samples.len() / channels) as u64;

        if samples.is_empty() || cols == 0 {
            return Self {
                version: Self::CURRENT_VERSION,
                sample_rate,
                total_frames,
                cols,
                peaks: Vec::new(),
            };
        }

        let frames_per_col = ((total_frames as usize) / cols).max(1);
        let mut peaks = Vec::with_capacity(cols);

        for col in 0..cols {
            let start_frame = col * frames_per_col;
            if start_frame as u64 >= total_frames {
                peaks.push((0.0, 0.0));
                continue;
            }
            let end_frame = ((col + 1) * frames_per_col).min(total_frames as usize);

            let mut min_v = f32::MAX;
            let mut max_v = f32::MIN;
            for frame in start_frame..end_frame {
                let idx = frame * channels;
                if idx + 1 >= samples.len() {
                    break;
                }
                let mono = (samples[idx] + samples[idx + 1]) * 0.5;
                min_v = min_v.min(mono);
                max_v = max_v.max(mono);
            }
            if min_v > max_v {
                peaks.push((0.0, 0.0));
            } else {
                peaks.push((min_v, max_v));
            }
        }

        Self {
            version: Self::CURRENT_VERSION,
            sample_rate,
            total_frames,
            cols,
            peaks,
        }
    }

    /// Bin index covering a normalized position in [0.0, 1.0].
    pub fn bin_at(&self, position: f64) -> Option<(f32, f32)> {
        if self.peaks.is_empty() {
            return None;
        }
        let idx = ((position.clamp(0.0, 1.0) * self.peaks.len() as f64) as usize)
            .min(self.peaks.len() - 1);
        Some(self.peaks[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_samples_produce_no_peaks() {
        let peaks = WaveformPeaks::compute(&[], 48000, 100);
        assert!(peaks.peaks.is_empty());
        assert_eq!(peaks.total_frames, 0);
    }

    #[test]
    fn full_scale_square_wave_saturates_bins() {
        let mut samples = Vec::new();
        for _ in 0..1000 {
            samples.push(1.0);
            samples.push(1.0);
            samples.push(-1.0);
            samples.push(-1.0);
        }
        let peaks = WaveformPeaks::compute(&samples, 48000, 10);
        assert_eq!(peaks.cols, 10);
        assert_eq!(peaks.peaks.len(), 10);
        for (min_v, max_v) in &peaks.peaks {
            assert!((*min_v - -1.0).abs() < 1e-6);
            assert!((*max_v - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn bin_at_clamps_to_range() {
        let peaks = WaveformPeaks {
            version: 1,
            sample_rate: 48000,
            total_frames: 100,
            cols: 3,
            peaks: vec![(-0.1, 0.1), (-0.5, 0.5), (-1.0, 1.0)],
        };
        assert_eq!(peaks.bin_at(0.0), Some((-0.1, 0.1)));
        assert_eq!(peaks.bin_at(1.0), Some((-1.0, 1.0)));
        assert_eq!(peaks.bin_at(2.0), Some((-1.0, 1.0)));
    }
}
