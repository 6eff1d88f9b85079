//! Per-deck position, anchored to a [`MasterClock`] so two decks share a
//! single time reference even across xruns.

use crate::master_clock::MasterClock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct AudioClock {
    master: Arc<MasterClock>,
    sample_rate: u32,
    base_samples: AtomicU64,
    samples_played: AtomicU64,
    paused: AtomicBool,
    start_master_samples: AtomicU64,
}

impl AudioClock {
    pub fn new(master: Arc<MasterClock>, sample_rate: u32) -> Self {
        Self {
            master,
            sample_rate,
            base_samples: AtomicU64::new(0),
            samples_played: AtomicU64::new(0),
            paused: AtomicBool::new(true),
            start_master_samples: AtomicU64::new(0),
        }
    }

    /// Begin (or resume) playback from an absolute sample position.
    pub fn play_from_samples(&self, n: u64) {
        self.base_samples.store(n, Ordering::Release);
        self.samples_played.store(0, Ordering::Release);
        self.start_master_samples
            .store(self.master.total_audio_samples(), Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }

    /// Latch the last computed position and stop advancing with MasterClock.
    pub fn pause(&self) {
        let pos = self.now_samples();
        self.base_samples.store(pos, Ordering::Release);
        self.samples_played.store(0, Ordering::Release);
        self.paused.store(true, Ordering::Release);
    }

    fn now_samples(&self) -> u64 {
        if self.paused.load(Ordering::Acquire) {
            self.base_samples.load(Ordering::Acquire) + self.samples_played.load(Ordering::Acquire)
        } else {
            let elapsed = self
                .master
                .total_audio_samples()
                .saturating_sub(self.start_master_samples.load(Ordering::Acquire));
            self.base_samples.load(Ordering::Acquire) + elapsed
        }
    }

    pub fn now_seconds(&self) -> f64 {
        self.now_samples() as f64 / self.sample_rate as f64
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_clock_holds_position() {
        let master = Arc::new(MasterClock::new(48000));
        master.start(0.0);
        let clock = AudioClock::new(master.clone(), 48000);
        clock.play_from_samples(0);
        master.on_audio_callback(48000);
        clock.pause();
        master.on_audio_callback(48000);
        assert!((clock.now_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn playing_clock_tracks_master_elapsed() {
        let master = Arc::new(MasterClock::new(48000));
        master.start(0.0);
        let clock = AudioClock::new(master.clone(), 48000);
        clock.play_from_samples(48000);
        master.on_audio_callback(48000);
        assert!((clock.now_seconds() - 2.0).abs() < 1e-9);
    }
}
