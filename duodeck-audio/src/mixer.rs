//! The audio callback's final stage: per-deck gain, equal-power crossfade,
//! master gain, and a hard-clip safety limiter.
//!
//! Runs on the real-time audio thread: no allocation, no locks, every
//! operation below is an arithmetic pass over pre-sized buffers.

use std::sync::atomic::{AtomicU32, Ordering};

fn to_bits(v: f32) -> u32 {
    v.to_bits()
}
fn from_bits(v: u32) -> f32 {
    f32::from_bits(v)
}

/// Lock-free peak-hold meter: the audio thread stores, any thread reads.
#[derive(Default)]
pub struct PeakMeter {
    left: AtomicU32,
    right: AtomicU32,
}

const PEAK_DECAY: f32 = 0.995;

impl PeakMeter {
    fn update(&self, left: f32, right: f32) {
        let prev_l = from_bits(self.left.load(Ordering::Relaxed));
        let prev_r = from_bits(self.right.load(Ordering::Relaxed));
        let new_l = left.abs().max(prev_l * PEAK_DECAY);
        let new_r = right.abs().max(prev_r * PEAK_DECAY);
        self.left.store(to_bits(new_l), Ordering::Relaxed);
        self.right.store(to_bits(new_r), Ordering::Relaxed);
    }

    pub fn levels(&self) -> (f32, f32) {
        (
            from_bits(self.left.load(Ordering::Relaxed)),
            from_bits(self.right.load(Ordering::Relaxed)),
        )
    }
}

/// Maps a UI fader position in [0, 100] to linear gain via a log curve:
/// 0 -> -inf dB (approximated as -60 dB), 50 -> 0 dB, 100 -> +12 dB.
pub fn fader_to_linear_gain(value: f32) -> f32 {
    let value = value.clamp(0.0, 100.0);
    let db = if value <= 50.0 {
        -60.0 + (value / 50.0) * 60.0
    } else {
        ((value - 50.0) / 50.0) * 12.0
    };
    10f32.powf(db / 20.0)
}

/// Equal-power crossfade weights for slider position `x` in [-1, 1].
/// `wA^2 + wB^2 == 1` for every `x` in range.
pub fn crossfade_weights(x: f32) -> (f32, f32) {
    let x = x.clamp(-1.0, 1.0);
    let a_weight = (1.0 - x.max(0.0)).max(0.0).sqrt();
    let b_weight = (1.0 + x.min(0.0)).max(0.0).sqrt();
    (a_weight, b_weight)
}

pub struct Mixer {
    crossfader: f32,
    deck_gain_a: f32,
    deck_gain_b: f32,
    master_gain: f32,
    limiter_ceiling: f32,

    pub meter_a: PeakMeter,
    pub meter_b: PeakMeter,
    pub meter_master: PeakMeter,
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new(0.95)
    }
}

impl Mixer {
    pub fn new(limiter_ceiling: f32) -> Self {
        Self {
            crossfader: 0.0,
            deck_gain_a: 50.0,
            deck_gain_b: 50.0,
            master_gain: 1.0,
            limiter_ceiling,
            meter_a: PeakMeter::default(),
            meter_b: PeakMeter::default(),
            meter_master: PeakMeter::default(),
        }
    }

    pub fn set_crossfader(&mut self, position: f32) {
        self.crossfader = position.clamp(-1.0, 1.0);
    }

    pub fn crossfader(&self) -> f32 {
        self.crossfader
    }

    pub fn set_deck_gain(&mut self, deck: char, value: f32) {
        match deck {
            'a' | 'A' => self.deck_gain_a = value.clamp(0.0, 100.0),
            'b' | 'B' => self.deck_gain_b = value.clamp(0.0, 100.0),
            _ => {}
        }
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.clamp(0.0, 2.0);
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    /// Mix two interleaved-stereo buffers into `output`, following the
    /// seven-step contract: per-deck gain, equal-power crossfade, sum,
    /// master gain, hard-clip limiter, peak-hold update.
    pub fn mix(&self, deck_a: &[f32], deck_b: &[f32], output: &mut [f32]) {
        let gain_a = fader_to_linear_gain(self.deck_gain_a);
        let gain_b = fader_to_linear_gain(self.deck_gain_b);
        let (w_a, w_b) = crossfade_weights(self.crossfader);

        let len = output.len().min(deck_a.len()).min(deck_b.len());
        let ceiling = self.limiter_ceiling;

        let mut peak_a = (0.0f32, 0.0f32);
        let mut peak_b = (0.0f32, 0.0f32);
        let mut peak_master = (0.0f32, 0.0f32);

        let mut i = 0;
        while i + 1 < len {
            let a_l = deck_a[i] * gain_a * w_a;
            let a_r = deck_a[i + 1] * gain_a * w_a;
            let b_l = deck_b[i] * gain_b * w_b;
            let b_r = deck_b[i + 1] * gain_b * w_b;

            let mut out_l = (a_l + b_l) * self.master_gain;
            let mut out_r = (a_r + b_r) * self.master_gain;
            out_l = out_l.clamp(-ceiling, ceiling);
            out_r = out_r.clamp(-ceiling, ceiling);

            output[i] = out_l;
            output[i + 1] = out_r;

            peak_a.0 = peak_a.0.max(a_l.abs());
            peak_a.1 = peak_a.1.max(a_r.abs());
            peak_b.0 = peak_b.0.max(b_l.abs());
            peak_b.1 = peak_b.1.max(b_r.abs());
            peak_master.0 = peak_master.0.max(out_l.abs());
            peak_master.1 = peak_master.1.max(out_r.abs());

            i += 2;
        }

        self.meter_a.update(peak_a.0, peak_a.1);
        self.meter_b.update(peak_b.0, peak_b.1);
        self.meter_master.update(peak_master.0, peak_master.1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_power_law_holds_across_range() {
        let mut x = -1.0f32;
        while x <= 1.0 {
            let (a, b) = crossfade_weights(x);
            assert!((a * a + b * b - 1.0).abs() < 1e-5, "x={x} a={a} b={b}");
            x += 0.01;
        }
    }

    #[test]
    fn crossfader_full_left_isolates_deck_a() {
        let mut mixer = Mixer::new(0.95);
        mixer.set_crossfader(-1.0);
        mixer.set_deck_gain('a', 50.0);
        mixer.set_deck_gain('b', 50.0);

        let deck_a = vec![0.5f32; 8];
        let deck_b = vec![0.5f32; 8];
        let mut out = vec![0.0f32; 8];
        mixer.mix(&deck_a, &deck_b, &mut out);

        let (_, b_weight) = crossfade_weights(-1.0);
        assert!(b_weight < 1e-6);
    }

    #[test]
    fn never_exceeds_limiter_ceiling() {
        let mut mixer = Mixer::new(0.95);
        mixer.set_crossfader(0.0);
        mixer.set_deck_gain('a', 100.0);
        mixer.set_deck_gain('b', 100.0);
        mixer.set_master_gain(2.0);

        let deck_a = vec![1.0f32; 1024];
        let deck_b = vec![1.0f32; 1024];
        let mut out = vec![0.0f32; 1024];
        mixer.mix(&deck_a, &deck_b, &mut out);

        for s in &out {
            assert!(s.abs() <= 0.95 + 1e-6, "sample {s} exceeded ceiling");
        }
    }

    #[test]
    fn fader_curve_matches_named_anchors() {
        assert!(fader_to_linear_gain(50.0) > 0.99 && fader_to_linear_gain(50.0) < 1.01);
        let plus_12db = 10f32.powf(12.0 / 20.0);
        assert!((fader_to_linear_gain(100.0) - plus_12db).abs() < 0.01);
        assert!(fader_to_linear_gain(0.0) < fader_to_linear_gain(50.0));
    }

    #[test]
    fn peak_meter_tracks_and_decays() {
        let meter = PeakMeter::default();
        meter.update(0.8, 0.2);
        assert_eq!(meter.levels(), (0.8, 0.2));
        meter.update(0.0, 0.0);
        let (l, _) = meter.levels();
        assert!(l < 0.8 && l > 0.0, "peak should decay, not vanish instantly");
    }
}
