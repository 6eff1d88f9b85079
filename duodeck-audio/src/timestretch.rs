//! Block-oriented time-stretch contract sitting on top of the phase
//! vocoder: resample (key follows tempo) or phase-vocoder stretch (key
//! locked), with a silent fallback when stretch is unavailable.

use crate::timestretcher::{FftSize, PhaseVocoder};

/// Frame/hop the stretch path is fixed to: 1024 samples, 512 hop, 50%
/// overlap.
const STRETCH_FRAME_SIZE: usize = 1024;

pub struct TimeStretchEngine {
    vocoder: PhaseVocoder,
    stretch_available: bool,
    resample_phase: f32,
    pending_input: Vec<f32>,
}

impl TimeStretchEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            vocoder: PhaseVocoder::new(sample_rate as f32, FftSize::Small),
            stretch_available: true,
            resample_phase: 0.0,
            pending_input: Vec::with_capacity(STRETCH_FRAME_SIZE * 4),
        }
    }

    /// Set whether the stretch path can be used at all. When `false`,
    /// `set_key_lock(true)` upstream silently degrades to resample.
    pub fn set_stretch_available(&mut self, available: bool) {
        self.stretch_available = available;
    }

    pub fn stretch_capable(&self) -> bool {
        self.stretch_available
    }

    /// Reset all internal state on track change.
    pub fn reset(&mut self) {
        self.vocoder.reset();
        self.resample_phase = 0.0;
        self.pending_input.clear();
    }

    /// Process one block of interleaved stereo `input` at playback `ratio`
    /// (1.0 = source rate). `key_lock` selects the stretch path when
    /// available; output length is deterministic given input length and
    /// ratio for the resample path, and proportional for the stretch path.
    pub fn process(&mut self, input: &[f32], ratio: f32, key_lock: bool, output: &mut Vec<f32>) {
        output.clear();
        if key_lock && self.stretch_available {
            self.process_stretch(input, ratio, output);
        } else {
            self.process_resample(input, ratio, output);
        }
    }

    fn process_resample(&mut self, input: &[f32], ratio: f32, output: &mut Vec<f32>) {
        let frames_in = input.len() / 2;
        if frames_in == 0 || ratio <= 0.0 {
            return;
        }
        let frames_out = (frames_in as f32 / ratio).floor() as usize;
        for _ in 0..frames_out {
            let idx = self.resample_phase.floor() as usize;
            let frac = self.resample_phase.fract();
            if idx + 1 < frames_in {
                let l0 = input[idx * 2];
                let r0 = input[idx * 2 + 1];
                let l1 = input[(idx + 1) * 2];
                let r1 = input[(idx + 1) * 2 + 1];
                output.push(l0 + frac * (l1 - l0));
                output.push(r0 + frac * (r1 - r0));
            } else if idx < frames_in {
                output.push(input[idx * 2]);
                output.push(input[idx * 2 + 1]);
            } else {
                output.push(0.0);
                output.push(0.0);
            }
            self.resample_phase += ratio;
        }
        self.resample_phase = (self.resample_phase - frames_in as f32).max(0.0);
    }

    fn process_stretch(&mut self, input: &[f32], ratio: f32, output: &mut Vec<f32>) {
        self.vocoder.set_stretch_ratio(ratio);
        self.pending_input.extend_from_slice(input);

        if self.pending_input.len() / 2 < STRETCH_FRAME_SIZE * 2 {
            // Not enough buffered yet; the leftover carries to the next call.
            return;
        }

        let expected_output_frames =
            ((self.pending_input.len() / 2) as f32 / ratio).round() as usize;
        let mut produced = 0usize;
        let mut consumed_samples = 0usize;

        for chunk in self.pending_input.chunks(2) {
            if produced >= expected_output_frames {
                break;
            }
            let l = chunk[0];
            let r = chunk.get(1).copied().unwrap_or(0.0);
            consumed_samples += 2;
            if let Some((out_l, out_r)) = self.vocoder.process(l, r) {
                output.push(out_l);
                output.push(out_r);
                produced += 1;
            }
        }

        self.pending_input.drain(..consumed_samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_at_unity_ratio_passes_through_length() {
        let mut engine = TimeStretchEngine::new(48000);
        let input: Vec<f32> = (0..2048).map(|i| (i as f32 * 0.001).sin()).collect();
        let mut output = Vec::new();
        engine.process(&input, 1.0, false, &mut output);
        assert_eq!(output.len(), input.len());
    }

    #[test]
    fn resample_at_half_ratio_doubles_frame_count() {
        let mut engine = TimeStretchEngine::new(48000);
        let input = vec![0.5f32; 2048];
        let mut output = Vec::new();
        engine.process(&input, 0.5, false, &mut output);
        assert_eq!(output.len() / 2, (input.len() / 2) * 2);
    }

    #[test]
    fn fallback_when_stretch_unavailable_uses_resample_length() {
        let mut engine = TimeStretchEngine::new(48000);
        engine.set_stretch_available(false);
        let input = vec![0.5f32; 2048];
        let mut via_fallback = Vec::new();
        engine.process(&input, 1.0, true, &mut via_fallback);
        assert_eq!(via_fallback.len(), input.len());
        assert!(!engine.stretch_capable());
    }

    #[test]
    fn stretch_buffers_until_two_frames_available() {
        let mut engine = TimeStretchEngine::new(48000);
        let small_block = vec![0.1f32; 512]; // 256 frames < 2*1024
        let mut output = Vec::new();
        engine.process(&small_block, 1.0, true, &mut output);
        assert!(output.is_empty(), "should buffer below 2x frame size");
    }

    #[test]
    fn reset_clears_pending_input() {
        let mut engine = TimeStretchEngine::new(48000);
        let small_block = vec![0.1f32; 512];
        let mut output = Vec::new();
        engine.process(&small_block, 1.0, true, &mut output);
        engine.reset();
        assert!(engine.pending_input.is_empty());
    }
}
