//! Process-wide monotonic + sample-counted time reference.
//!
//! There is exactly one of these per running engine, owned by the engine
//! root and handed out by reference — no global singleton, unlike the
//! system this was distilled from.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// A snapshot of [`MasterClock`] state, safe to read off any thread.
#[derive(Debug, Clone, Copy)]
pub struct MasterClockState {
    pub monotonic_time: Instant,
    pub audio_samples_total: u64,
    pub sample_rate: u32,
    pub running: bool,
}

impl MasterClockState {
    pub fn audio_time_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.audio_samples_total as f64 / self.sample_rate as f64
        }
    }
}

/// The single source of truth for time in the engine.
///
/// `audio_samples_total` is mutated only by [`MasterClock::on_audio_callback`],
/// called from the audio thread after every block; every other method is a
/// plain atomic read and is safe from any thread.
pub struct MasterClock {
    sample_rate: u32,
    audio_samples_total: AtomicU64,
    running: AtomicBool,
    start_time: Instant,
    latency_samples: AtomicU64,
}

impl MasterClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            audio_samples_total: AtomicU64::new(0),
            running: AtomicBool::new(false),
            start_time: Instant::now(),
            latency_samples: AtomicU64::new(0),
        }
    }

    /// Start the clock with an estimated output latency, used to compensate
    /// the audio-time readout so it reflects what the listener hears rather
    /// than what the engine most recently wrote.
    pub fn start(&self, latency_ms: f64) {
        let latency_samples = (latency_ms * self.sample_rate as f64 / 1000.0) as u64;
        self.latency_samples.store(latency_samples, Ordering::Release);
        self.audio_samples_total.store(0, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn reset(&self) {
        self.audio_samples_total.store(0, Ordering::Release);
    }

    /// Must be called from the audio thread after every block.
    pub fn on_audio_callback(&self, frames_processed: u64) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        self.audio_samples_total.fetch_add(frames_processed, Ordering::AcqRel);
    }

    pub fn get_state(&self) -> MasterClockState {
        MasterClockState {
            monotonic_time: Instant::now(),
            audio_samples_total: self.audio_samples_total.load(Ordering::Acquire),
            sample_rate: self.sample_rate,
            running: self.running.load(Ordering::Acquire),
        }
    }

    /// Latency-compensated audio time: the time the listener hears, not the
    /// time the engine most recently wrote.
    pub fn audio_time_seconds(&self) -> f64 {
        if !self.running.load(Ordering::Acquire) {
            return 0.0;
        }
        let total = self.audio_samples_total.load(Ordering::Acquire);
        let latency = self.latency_samples.load(Ordering::Acquire);
        let compensated = total.saturating_sub(latency);
        compensated as f64 / self.sample_rate as f64
    }

    pub fn total_audio_samples(&self) -> u64 {
        self.audio_samples_total.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_latency_compensation(&self, latency_ms: f64) {
        let latency_samples = (latency_ms * self.sample_rate as f64 / 1000.0) as u64;
        self.latency_samples.store(latency_samples, Ordering::Release);
    }

    pub fn samples_to_seconds(&self, samples: u64) -> f64 {
        samples as f64 / self.sample_rate as f64
    }

    pub fn seconds_to_samples(&self, seconds: f64) -> u64 {
        (seconds * self.sample_rate as f64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_time_compensates_for_latency() {
        let clock = MasterClock::new(48000);
        clock.start(120.0);
        clock.on_audio_callback(48000 * 2);
        // 120ms @ 48kHz = 5760 samples of latency compensation
        let expected = (48000 * 2 - 5760) as f64 / 48000.0;
        assert!((clock.audio_time_seconds() - expected).abs() < 1e-9);
    }

    #[test]
    fn stopped_clock_reports_zero() {
        let clock = MasterClock::new(48000);
        assert_eq!(clock.audio_time_seconds(), 0.0);
        clock.on_audio_callback(1000);
        assert_eq!(clock.total_audio_samples(), 0, "callback is a no-op before start");
    }

    #[test]
    fn reset_zeroes_sample_count_without_stopping() {
        let clock = MasterClock::new(48000);
        clock.start(0.0);
        clock.on_audio_callback(1000);
        clock.reset();
        assert_eq!(clock.total_audio_samples(), 0);
        assert!(clock.is_running());
    }

    #[test]
    fn monotonic_increase_under_repeated_callbacks() {
        let clock = MasterClock::new(48000);
        clock.start(0.0);
        let mut last = 0u64;
        for _ in 0..100 {
            clock.on_audio_callback(512);
            let now = clock.total_audio_samples();
            assert!(now > last);
            last = now;
        }
    }
}
