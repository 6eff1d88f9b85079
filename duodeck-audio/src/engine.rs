//! Orchestrates the two decks, the mixer, and the tempo-phase sync
//! controller; owns the audio callback.

use crate::deck::{Deck, DeckError, DeckStatus, PitchRangeKey};
use crate::master_clock::MasterClock;
use crate::mixer::Mixer;
use crate::tempo_phase_sync::{SyncQuality, TempoPhaseSync};
use duodeck_analysis::AnalysisCache;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum Command {
    LoadTrack { deck: char, path: PathBuf },
    Play(char),
    Pause(char),
    Stop(char),
    Seek { deck: char, seconds: f64 },
    SetTempo { deck: char, ratio: f32 },
    SetNudge { deck: char, ratio: f32 },
    SetBpmTarget { deck: char, bpm: f32 },
    SetKeyLock { deck: char, enabled: bool },
    SetPitchRange { deck: char, range: PitchRangeKey },
    SetGain { deck: char, gain: f32 },
    SyncTo { slave: char, master: char },
    SetSyncEnabled(bool),
    SetCrossfader(f32),
    SetDeckFader { deck: char, value: f32 },
    SetMasterGain(f32),
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum Event {
    TrackLoaded { deck: char },
    LoadFailed { deck: char, error: String },
    SyncApplied { deck: char, ratio: f32, hit_pitch_limit: bool },
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub latency_ms: f64,
    pub limiter_ceiling: f32,
    pub sync_update_hz: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 4096,
            latency_ms: 120.0,
            limiter_ceiling: 0.95,
            sync_update_hz: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineTelemetry {
    pub deck_a_status: DeckStatus,
    pub deck_b_status: DeckStatus,
    pub deck_a_bpm: Option<f32>,
    pub deck_b_bpm: Option<f32>,
    pub deck_a_underruns: u64,
    pub deck_b_underruns: u64,
    pub sync_quality: SyncQuality,
}

/// Engine root: owns the two decks, mixer, and sync controller. `process`
/// is the audio callback; everything else runs off the audio thread.
pub struct Engine {
    config: EngineConfig,
    master_clock: Arc<MasterClock>,
    pub deck_a: Deck,
    pub deck_b: Deck,
    mixer: Mixer,
    sync: Mutex<TempoPhaseSync>,
    scratch_a: Vec<f32>,
    scratch_b: Vec<f32>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let master_clock = Arc::new(MasterClock::new(config.sample_rate));
        master_clock.start(config.latency_ms);
        let analysis_cache = Arc::new(AnalysisCache::new());

        let deck_a = Deck::new('A', config.sample_rate, master_clock.clone(), analysis_cache.clone());
        let deck_b = Deck::new('B', config.sample_rate, master_clock.clone(), analysis_cache);
        let mixer = Mixer::new(config.limiter_ceiling);

        Self {
            config,
            master_clock,
            deck_a,
            deck_b,
            mixer,
            sync: Mutex::new(TempoPhaseSync::new()),
            scratch_a: vec![0.0; config.block_size * 2],
            scratch_b: vec![0.0; config.block_size * 2],
        }
    }

    /// The interval a dedicated sync-controller thread should sleep between
    /// [`Engine::tick_sync`] calls, per `sync_update_hz` (default 20Hz). The
    /// engine does not spawn that thread itself -- the owning application
    /// does, since it alone decides how decks are shared across threads.
    pub fn sync_tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.sync_update_hz.max(1.0))
    }

    /// Run one PLL update cycle between deck A (master) and deck B (slave).
    /// Called at `sync_update_hz` by whichever thread owns the engine.
    pub fn tick_sync(&mut self) {
        let mut sync = self.sync.lock().unwrap();
        sync.update(&self.deck_a, &self.deck_b);
    }

    pub fn set_sync_enabled(&mut self, enabled: bool) {
        self.sync.lock().unwrap().set_enabled(enabled);
    }

    pub fn sync_quality(&self) -> SyncQuality {
        self.sync.lock().unwrap().quality()
    }

    fn deck_mut(&mut self, label: char) -> Option<&mut Deck> {
        match label {
            'A' | 'a' => Some(&mut self.deck_a),
            'B' | 'b' => Some(&mut self.deck_b),
            _ => None,
        }
    }

    pub fn handle(&mut self, cmd: Command) -> Option<Event> {
        match cmd {
            Command::LoadTrack { deck, path } => {
                let result = self.deck_mut(deck)?.load_track(&path);
                match result {
                    Ok(()) => Some(Event::TrackLoaded { deck }),
                    Err(err) => Some(Event::LoadFailed { deck, error: err.to_string() }),
                }
            }
            Command::Play(deck) => {
                self.deck_mut(deck)?.play();
                None
            }
            Command::Pause(deck) => {
                self.deck_mut(deck)?.pause();
                None
            }
            Command::Stop(deck) => {
                self.deck_mut(deck)?.stop();
                None
            }
            Command::Seek { deck, seconds } => {
                self.deck_mut(deck)?.seek(seconds);
                None
            }
            Command::SetTempo { deck, ratio } => {
                self.deck_mut(deck)?.set_tempo(ratio);
                None
            }
            Command::SetNudge { deck, ratio } => {
                self.deck_mut(deck)?.set_nudge(ratio);
                None
            }
            Command::SetBpmTarget { deck, bpm } => {
                self.deck_mut(deck)?.set_bpm_target(bpm);
                None
            }
            Command::SetKeyLock { deck, enabled } => {
                self.deck_mut(deck)?.set_key_lock(enabled);
                None
            }
            Command::SetPitchRange { deck, range } => {
                self.deck_mut(deck)?.set_pitch_range(range);
                None
            }
            Command::SetGain { deck, gain } => {
                self.deck_mut(deck)?.set_gain(gain);
                None
            }
            Command::SyncTo { slave, master } => {
                let master_bpm = match master {
                    'A' | 'a' => self.deck_a.current_bpm(),
                    'B' | 'b' => self.deck_b.current_bpm(),
                    _ => None,
                }?;
                let result: Result<(f32, bool), DeckError> =
                    self.deck_mut(slave)?.sync_to(master_bpm);
                match result {
                    Ok((ratio, hit_pitch_limit)) => {
                        if hit_pitch_limit {
                            warn!(deck = %slave, "sync hit pitch range limit");
                        }
                        Some(Event::SyncApplied { deck: slave, ratio, hit_pitch_limit })
                    }
                    Err(err) => Some(Event::LoadFailed { deck: slave, error: err.to_string() }),
                }
            }
            Command::SetSyncEnabled(enabled) => {
                self.set_sync_enabled(enabled);
                None
            }
            Command::SetCrossfader(x) => {
                self.mixer.set_crossfader(x);
                None
            }
            Command::SetDeckFader { deck, value } => {
                self.mixer.set_deck_gain(deck, value);
                None
            }
            Command::SetMasterGain(gain) => {
                self.mixer.set_master_gain(gain);
                None
            }
            Command::Shutdown => {
                info!("engine shutdown requested");
                None
            }
        }
    }

    /// The audio callback: pulls `frames` of audio from each deck, mixes,
    /// writes interleaved stereo into `output`, and advances the master
    /// clock. Never allocates, blocks, or touches the analysis cache.
    pub fn process(&mut self, output: &mut [f32], frames: usize) {
        self.scratch_a.resize(frames * 2, 0.0);
        self.scratch_b.resize(frames * 2, 0.0);

        self.deck_a.pull(&mut self.scratch_a);
        self.deck_b.pull(&mut self.scratch_b);

        self.mixer.mix(&self.scratch_a, &self.scratch_b, output);
        self.master_clock.on_audio_callback(frames as u64);
    }

    pub fn poll_analysis(&mut self) {
        self.deck_a.poll_analysis();
        self.deck_b.poll_analysis();
    }

    pub fn telemetry(&self) -> EngineTelemetry {
        EngineTelemetry {
            deck_a_status: self.deck_a.status(),
            deck_b_status: self.deck_b.status(),
            deck_a_bpm: self.deck_a.current_bpm(),
            deck_b_bpm: self.deck_b.current_bpm(),
            deck_a_underruns: self.deck_a.underrun_count(),
            deck_b_underruns: self.deck_b.underrun_count(),
            sync_quality: self.sync_quality(),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_engine_has_empty_decks_and_silent_output() {
        let mut engine = Engine::new(EngineConfig::default());
        let mut out = vec![1.0f32; 256];
        engine.process(&mut out, 128);
        assert!(out.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn crossfader_command_updates_mixer() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.handle(Command::SetCrossfader(-1.0));
        let mut out = vec![0.0f32; 256];
        engine.process(&mut out, 128);
    }

    #[test]
    fn sync_between_unloaded_decks_yields_no_event() {
        let mut engine = Engine::new(EngineConfig::default());
        let event = engine.handle(Command::SyncTo { slave: 'B', master: 'A' });
        assert!(event.is_none());
    }
}
