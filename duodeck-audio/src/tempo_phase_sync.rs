//! Phase-locked loop driving a slave deck's effective tempo so its beat
//! phase locks to a master deck's beat phase.
//!
//! Modeled as a controller holding borrowed references to two decks only
//! for the duration of a single `update` call — the decks themselves have
//! no knowledge of the PLL (see the redesign notes this was carried
//! forward from: no cyclic Deck<->TempoPhaseSync references).

use std::collections::VecDeque;

/// Anything a PLL can lock onto: a beat-phase clock and a tempo knob.
pub trait SyncTarget {
    /// Deck-local audio-clock seconds (see [`crate::audio_clock::AudioClock`]).
    fn clock_seconds(&self) -> f64;
    /// Detected BPM times the deck's current effective playback ratio.
    fn effective_bpm(&self) -> Option<f32>;
    /// Apply a multiplicative tempo correction on top of the user's tempo
    /// slider — never touches tempo_ratio/UI state directly.
    fn apply_tempo_correction(&self, correction: f32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

pub struct TempoPhaseSync {
    kp: f32,
    ki: f32,
    kd: f32,

    error_history: VecDeque<f32>,
    integral_error: f32,
    last_error: f32,
    filtered_derivative: Option<f32>,

    tempo_correction_active: bool,
    last_applied_correction: f32,

    enabled: bool,
    quality: SyncQuality,
    phase_offset_beats: f64,

    max_tempo_correction: f32,
}

const HYSTERESIS_ENGAGE: f32 = 1e-3;
const HYSTERESIS_RELEASE: f32 = 5e-4;
const SLEW_ALPHA: f32 = 0.95;
const DERIVATIVE_LPF_ALPHA: f32 = 0.3;
const ERROR_HISTORY_LEN: usize = 10;

impl Default for TempoPhaseSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TempoPhaseSync {
    pub fn new() -> Self {
        Self {
            kp: 1.2,
            ki: 0.15,
            kd: 0.08,
            error_history: VecDeque::with_capacity(ERROR_HISTORY_LEN),
            integral_error: 0.0,
            last_error: 0.0,
            filtered_derivative: None,
            tempo_correction_active: false,
            last_applied_correction: 1.0,
            enabled: false,
            quality: SyncQuality::Poor,
            phase_offset_beats: 0.0,
            max_tempo_correction: 0.005,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if enabled {
            self.reset();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn reset(&mut self) {
        self.error_history.clear();
        self.integral_error = 0.0;
        self.last_error = 0.0;
        self.filtered_derivative = None;
        self.tempo_correction_active = false;
        self.last_applied_correction = 1.0;
        self.quality = SyncQuality::Poor;
        self.phase_offset_beats = 0.0;
    }

    pub fn quality(&self) -> SyncQuality {
        self.quality
    }

    pub fn phase_offset_beats(&self) -> f64 {
        self.phase_offset_beats
    }

    fn phase_error(&self, master: &dyn SyncTarget, slave: &dyn SyncTarget) -> Option<f64> {
        let master_bpm = master.effective_bpm()?;
        if master_bpm <= 0.0 {
            return None;
        }
        let spb = 60.0 / master_bpm as f64;

        let master_beat = master.clock_seconds() / spb;
        let target_beat = slave.clock_seconds() / spb;

        let mut error = master_beat - target_beat;
        // wrap to (-0.5, 0.5]
        error = (error + 0.5).rem_euclid(1.0) - 0.5;
        Some(error)
    }

    /// Run one PLL update. Returns `false` if sync is disabled or a phase
    /// error could not be computed (e.g. the master has no BPM).
    pub fn update(&mut self, master: &dyn SyncTarget, slave: &dyn SyncTarget) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(phase_error) = self.phase_error(master, slave) else {
            return false;
        };

        let tempo_correction = self.update_pll(phase_error as f32);
        slave.apply_tempo_correction(tempo_correction);

        self.phase_offset_beats = phase_error;
        self.update_quality();
        true
    }

    fn update_pll(&mut self, phase_error: f32) -> f32 {
        self.error_history.push_back(phase_error);
        if self.error_history.len() > ERROR_HISTORY_LEN * 10 {
            self.error_history.pop_front();
        }

        let proportional = self.kp * phase_error;

        if phase_error.abs() > 0.5 {
            self.integral_error *= 0.5;
        } else {
            self.integral_error += phase_error;
        }
        let max_integral = 5.0 / self.ki.max(0.01);
        self.integral_error = self.integral_error.clamp(-max_integral, max_integral);
        let integral = self.ki * self.integral_error;

        let raw_derivative = phase_error - self.last_error;
        let filtered = match self.filtered_derivative {
            Some(prev) => (1.0 - DERIVATIVE_LPF_ALPHA) * prev + DERIVATIVE_LPF_ALPHA * raw_derivative,
            None => raw_derivative,
        };
        self.filtered_derivative = Some(filtered);
        let derivative = self.kd * filtered;
        self.last_error = phase_error;

        let mut pid_output = proportional + integral + derivative;

        if pid_output.abs() < 0.01 {
            pid_output *= 0.5;
        } else if pid_output.abs() > 0.1 {
            let sign = pid_output.signum();
            pid_output = 0.1 * sign + 0.5 * (pid_output - 0.1 * sign);
        }

        let raw_correction = 1.0 + pid_output * 0.01;
        let hysteresis_applied = self.apply_hysteresis(raw_correction);
        let max_corr = self.adaptive_tempo_limit();
        hysteresis_applied.clamp(1.0 - max_corr, 1.0 + max_corr)
    }

    fn apply_hysteresis(&mut self, correction: f32) -> f32 {
        let magnitude = (correction - 1.0).abs();

        if !self.tempo_correction_active {
            if magnitude > HYSTERESIS_ENGAGE {
                self.tempo_correction_active = true;
            } else {
                self.last_applied_correction = 1.0;
                return 1.0;
            }
        } else if magnitude < HYSTERESIS_RELEASE {
            self.tempo_correction_active = false;
            self.last_applied_correction = 1.0;
            return 1.0;
        }

        let slewed =
            self.last_applied_correction * SLEW_ALPHA + correction * (1.0 - SLEW_ALPHA);
        self.last_applied_correction = slewed;
        slewed
    }

    fn adaptive_tempo_limit(&self) -> f32 {
        match self.quality {
            SyncQuality::Excellent => 0.0005,
            SyncQuality::Good => 0.001,
            SyncQuality::Fair => 0.002,
            SyncQuality::Poor => self.max_tempo_correction,
        }
    }

    fn update_quality(&mut self) {
        if self.error_history.len() < ERROR_HISTORY_LEN {
            self.quality = SyncQuality::Poor;
            return;
        }
        let recent: Vec<f32> = self
            .error_history
            .iter()
            .rev()
            .take(ERROR_HISTORY_LEN)
            .copied()
            .collect();
        let mean_abs = recent.iter().map(|e| e.abs()).sum::<f32>() / recent.len() as f32;
        let mean = recent.iter().sum::<f32>() / recent.len() as f32;
        let variance = recent.iter().map(|e| (e - mean).powi(2)).sum::<f32>() / recent.len() as f32;
        let std_dev = variance.sqrt();

        self.quality = if mean_abs < 0.01 && std_dev < 0.005 {
            SyncQuality::Excellent
        } else if mean_abs < 0.02 && std_dev < 0.01 {
            SyncQuality::Good
        } else if mean_abs < 0.05 && std_dev < 0.02 {
            SyncQuality::Fair
        } else {
            SyncQuality::Poor
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeDeck {
        seconds: Cell<f64>,
        bpm: Option<f32>,
        correction: Cell<f32>,
    }

    impl FakeDeck {
        fn new(bpm: Option<f32>) -> Self {
            Self {
                seconds: Cell::new(0.0),
                bpm,
                correction: Cell::new(1.0),
            }
        }
    }

    impl SyncTarget for FakeDeck {
        fn clock_seconds(&self) -> f64 {
            self.seconds.get()
        }
        fn effective_bpm(&self) -> Option<f32> {
            self.bpm
        }
        fn apply_tempo_correction(&self, correction: f32) {
            self.correction.set(correction);
        }
    }

    #[test]
    fn disabled_sync_does_nothing() {
        let mut pll = TempoPhaseSync::new();
        let master = FakeDeck::new(Some(120.0));
        let slave = FakeDeck::new(Some(120.0));
        assert!(!pll.update(&master, &slave));
    }

    #[test]
    fn missing_bpm_fails_closed() {
        let mut pll = TempoPhaseSync::new();
        pll.set_enabled(true);
        let master = FakeDeck::new(None);
        let slave = FakeDeck::new(Some(120.0));
        assert!(!pll.update(&master, &slave));
    }

    #[test]
    fn converges_on_phase_offset_within_5_seconds_50ms_steps() {
        let mut pll = TempoPhaseSync::new();
        pll.set_enabled(true);

        let bpm = 120.0f32;
        let master = FakeDeck::new(Some(bpm));
        let slave = FakeDeck::new(Some(bpm));

        // induce a 0.05-beat phase offset: at 120 BPM, spb = 0.5s, so
        // 0.05 beat = 0.025s
        slave.seconds.set(0.0);
        master.seconds.set(0.025);

        let dt = 0.05;
        let steps = (5.0 / dt) as usize;
        for _ in 0..steps {
            pll.update(&master, &slave);
            let correction = slave.correction.get();
            let advance = dt as f64 * correction as f64;
            master.seconds.set(master.seconds.get() + dt);
            slave.seconds.set(slave.seconds.get() + advance);
        }

        assert!(
            pll.phase_offset_beats().abs() < 0.02,
            "offset did not converge: {}",
            pll.phase_offset_beats()
        );
    }
}
