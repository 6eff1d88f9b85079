//! A single DJ deck: decoded track, transport state machine, tempo/nudge/
//! key-lock, and the lock-free ring hand-off into the mixer.

use crate::audio_clock::AudioClock;
use crate::master_clock::MasterClock;
use crate::tempo_phase_sync::SyncTarget;
use crate::timestretch::TimeStretchEngine;
use crate::track_loader::{self, LoadError, Track};
use crossbeam_channel::{Receiver, Sender};
use duodeck_analysis::{
    auto_normalize_bpm, AnalysisCache, AnalysisResult, BeatGrid, BeatGridAnalyzer, CamelotKey,
    KeyAnalyzer, TempoMap, TrackUid,
};
use parking_lot::RwLock;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckStatus {
    Empty,
    Loading,
    Ready,
    Playing,
    Paused,
}

impl DeckStatus {
    fn to_u8(self) -> u8 {
        match self {
            DeckStatus::Empty => 0,
            DeckStatus::Loading => 1,
            DeckStatus::Ready => 2,
            DeckStatus::Playing => 3,
            DeckStatus::Paused => 4,
        }
    }
    fn from_u8(v: u8) -> Self {
        match v {
            1 => DeckStatus::Loading,
            2 => DeckStatus::Ready,
            3 => DeckStatus::Playing,
            4 => DeckStatus::Paused,
            _ => DeckStatus::Empty,
        }
    }
}

/// Pitch-slider range presets, mapped to tempo-ratio bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchRangeKey {
    Narrow,
    Standard,
    Wide,
}

impl PitchRangeKey {
    pub fn bounds(self) -> (f32, f32) {
        match self {
            PitchRangeKey::Narrow => (0.92, 1.08),
            PitchRangeKey::Standard => (0.84, 1.16),
            PitchRangeKey::Wide => (0.50, 1.50),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("deck has no detected or target BPM to sync from")]
    NoBpm,
}

fn f32_bits_load(a: &AtomicU32) -> f32 {
    f32::from_bits(a.load(Ordering::Acquire))
}
fn f32_bits_store(a: &AtomicU32, v: f32) {
    a.store(v.to_bits(), Ordering::Release);
}

/// Cross-thread state: touched by the control thread (loads, transport,
/// tempo), the fill worker (reads ratios, advances position), and the sync
/// controller (applies PLL correction). Never touched by the audio thread
/// directly -- the audio thread only calls [`Deck::pull`].
struct DeckShared {
    position_samples: AtomicU64,
    tempo_ratio: AtomicU32,
    nudge_ratio: AtomicU32,
    pll_correction: AtomicU32,
    key_lock: AtomicBool,
    gain: AtomicU32,
    load_token: AtomicU32,
    status: AtomicU8,
    underrun_count: AtomicU64,
    clear_fill_requested: AtomicBool,
}

impl Default for DeckShared {
    fn default() -> Self {
        Self {
            position_samples: AtomicU64::new(0),
            tempo_ratio: AtomicU32::new(1.0f32.to_bits()),
            nudge_ratio: AtomicU32::new(1.0f32.to_bits()),
            pll_correction: AtomicU32::new(1.0f32.to_bits()),
            key_lock: AtomicBool::new(false),
            gain: AtomicU32::new(1.0f32.to_bits()),
            load_token: AtomicU32::new(0),
            status: AtomicU8::new(DeckStatus::Empty.to_u8()),
            underrun_count: AtomicU64::new(0),
            clear_fill_requested: AtomicBool::new(false),
        }
    }
}

impl DeckShared {
    fn effective_ratio(&self) -> f32 {
        f32_bits_load(&self.tempo_ratio)
            * f32_bits_load(&self.nudge_ratio)
            * f32_bits_load(&self.pll_correction)
    }
}

enum AnalysisOutcome {
    Bpm { beat_grid: BeatGrid, confidence: f32 },
    Key { note: String, display: String },
}

struct AnalysisMessage {
    load_token: u32,
    outcome: AnalysisOutcome,
}

/// Block size the fill worker renders in one pass.
const FILL_CHUNK_FRAMES: usize = 4096;
/// Ring capacity in frames, per the >= 3s-of-audio contract.
const RING_SECONDS: u32 = 3;

pub struct Deck {
    label: char,
    sample_rate: u32,
    shared: Arc<DeckShared>,
    track: Arc<RwLock<Option<Arc<Track>>>>,
    audio_clock: Arc<AudioClock>,
    ring_consumer: ringbuf::HeapCons<f32>,
    fill_stop: Arc<AtomicBool>,
    fill_thread: Option<thread::JoinHandle<()>>,
    analysis_cache: Arc<AnalysisCache>,
    analysis_tx: Sender<AnalysisMessage>,
    analysis_rx: Receiver<AnalysisMessage>,

    detected_bpm: Option<f32>,
    beat_grid: Option<BeatGrid>,
    key_note: Option<String>,
    key_display: Option<String>,
    pitch_range: PitchRangeKey,
    bpm_target: Option<f32>,
}

impl Deck {
    pub fn new(
        label: char,
        sample_rate: u32,
        master_clock: Arc<MasterClock>,
        analysis_cache: Arc<AnalysisCache>,
    ) -> Self {
        let capacity = sample_rate as usize * RING_SECONDS as usize * 2;
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();

        let shared = Arc::new(DeckShared::default());
        let track: Arc<RwLock<Option<Arc<Track>>>> = Arc::new(RwLock::new(None));
        let fill_stop = Arc::new(AtomicBool::new(false));

        let worker_shared = shared.clone();
        let worker_track = track.clone();
        let worker_stop = fill_stop.clone();
        let worker_sample_rate = sample_rate;
        let fill_thread = Some(thread::spawn(move || {
            fill_worker_loop(worker_shared, worker_track, worker_stop, producer, worker_sample_rate);
        }));

        let (analysis_tx, analysis_rx) = crossbeam_channel::unbounded();

        Self {
            label,
            sample_rate,
            shared,
            track,
            audio_clock: Arc::new(AudioClock::new(master_clock, sample_rate)),
            ring_consumer: consumer,
            fill_stop,
            fill_thread,
            analysis_cache,
            analysis_tx,
            analysis_rx,
            detected_bpm: None,
            beat_grid: None,
            key_note: None,
            key_display: None,
            pitch_range: PitchRangeKey::Standard,
            bpm_target: None,
        }
    }

    pub fn label(&self) -> char {
        self.label
    }

    pub fn status(&self) -> DeckStatus {
        DeckStatus::from_u8(self.shared.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: DeckStatus) {
        self.shared.status.store(status.to_u8(), Ordering::Release);
    }

    pub fn is_loaded(&self) -> bool {
        self.track.read().is_some()
    }

    /// Decode `path`, reset all per-track state, consult the analysis cache,
    /// and spawn analysis workers for whatever's missing.
    pub fn load_track(&mut self, path: &std::path::Path) -> Result<(), DeckError> {
        self.set_status(DeckStatus::Loading);
        let token = self.shared.load_token.fetch_add(1, Ordering::AcqRel) + 1;

        self.shared.clear_fill_requested.store(true, Ordering::Release);
        self.drain_ring();

        let track = track_loader::load_track(path, self.sample_rate)?;
        let uid = track.uid;
        let track = Arc::new(track);

        *self.track.write() = Some(track.clone());
        self.shared.position_samples.store(0, Ordering::Release);
        self.detected_bpm = None;
        self.beat_grid = None;
        self.key_note = None;
        self.key_display = None;
        self.bpm_target = None;
        f32_bits_store(&self.shared.tempo_ratio, 1.0);
        f32_bits_store(&self.shared.nudge_ratio, 1.0);
        f32_bits_store(&self.shared.pll_correction, 1.0);

        let cached = self.analysis_cache.get_or_load(uid, path, "bpm");
        if let Some(cached) = cached.filter(|r| r.has_sane_bpm()) {
            if let (Some(bpm), Some(tempo_map)) = (cached.bpm, cached.tempo_map.clone()) {
                self.detected_bpm = Some(bpm);
                self.beat_grid = Some(BeatGrid::new(bpm, 0.0, tempo_map));
            }
        } else {
            self.spawn_bpm_analysis(token, track.clone(), path.to_path_buf(), uid);
        }

        let cached_key = self.analysis_cache.get_or_load(uid, path, "key");
        if let Some(cached_key) = cached_key.filter(|r| r.key_note.is_some()) {
            self.key_note = cached_key.key_note;
            self.key_display = cached_key.key_display;
        } else {
            self.spawn_key_analysis(token, track, path.to_path_buf(), uid);
        }

        self.set_status(DeckStatus::Ready);
        Ok(())
    }

    fn spawn_bpm_analysis(
        &self,
        token: u32,
        track: Arc<Track>,
        path: std::path::PathBuf,
        uid: TrackUid,
    ) {
        let tx = self.analysis_tx.clone();
        let cache = self.analysis_cache.clone();
        let sample_rate = track.sample_rate;
        thread::spawn(move || {
            let analyzer = BeatGridAnalyzer::new(sample_rate);
            let window = track.samples.len().min(sample_rate as usize * 60);
            let Some(estimate) = analyzer.analyze(&track.samples[..window]) else {
                return;
            };
            let Some((bpm, confidence)) = auto_normalize_bpm(estimate.bpm, estimate.confidence)
            else {
                return;
            };
            let mut map = TempoMap::from_constant_bpm(bpm, sample_rate, 4);
            let offset_beats = map.samples_to_beats(estimate.first_beat_offset);
            map.set_grid_offset(-offset_beats);
            let beat_grid = BeatGrid::new(bpm, estimate.first_beat_offset as f64 / sample_rate as f64 / 2.0, map.clone());

            let mut result = AnalysisResult::empty(uid);
            result.bpm = Some(bpm);
            result.confidence = Some(confidence);
            result.method = Some("spectral-flux-autocorrelation".to_string());
            result.tempo_map = Some(map);
            result.timestamp_unix = now_unix();
            cache.upsert(result.clone());
            let _ = AnalysisCache::write_sidecar(&path, "bpm", &result);

            let _ = tx.send(AnalysisMessage {
                load_token: token,
                outcome: AnalysisOutcome::Bpm { beat_grid, confidence },
            });
        });
    }

    fn spawn_key_analysis(
        &self,
        token: u32,
        track: Arc<Track>,
        path: std::path::PathBuf,
        uid: TrackUid,
    ) {
        let tx = self.analysis_tx.clone();
        let cache = self.analysis_cache.clone();
        let sample_rate = track.sample_rate;
        thread::spawn(move || {
            let mut analyzer = KeyAnalyzer::new(sample_rate);
            let window = track.samples.len().min(sample_rate as usize * 30 * 2);
            let Some(detected) = analyzer.analyze(&track.samples[..window]) else {
                return;
            };
            let note = detected.key.to_string();
            let display = CamelotKey::from_musical_key(detected.key).display();

            let mut result = AnalysisResult::empty(uid);
            result.key_note = Some(note.clone());
            result.key_display = Some(display.clone());
            result.method = Some("sha-ath-chromagram".to_string());
            result.timestamp_unix = now_unix();
            cache.upsert(result.clone());
            let _ = AnalysisCache::write_sidecar(&path, "key", &result);

            let _ = tx.send(AnalysisMessage {
                load_token: token,
                outcome: AnalysisOutcome::Key { note, display },
            });
        });
    }

    /// Drain any analysis results that have arrived, dropping any whose
    /// load_token no longer matches the current load (apply-if-current).
    pub fn poll_analysis(&mut self) {
        let current_token = self.shared.load_token.load(Ordering::Acquire);
        while let Ok(msg) = self.analysis_rx.try_recv() {
            if msg.load_token != current_token {
                continue;
            }
            match msg.outcome {
                AnalysisOutcome::Bpm { beat_grid, confidence: _ } => {
                    self.detected_bpm = Some(beat_grid.headline_bpm);
                    self.beat_grid = Some(beat_grid);
                }
                AnalysisOutcome::Key { note, display } => {
                    self.key_note = Some(note);
                    self.key_display = Some(display);
                }
            }
        }
    }

    fn drain_ring(&mut self) {
        while self.ring_consumer.try_pop().is_some() {}
    }

    pub fn play(&self) {
        if self.is_loaded() {
            self.audio_clock
                .play_from_samples(self.shared.position_samples.load(Ordering::Acquire));
            self.set_status(DeckStatus::Playing);
        }
    }

    pub fn pause(&self) {
        self.audio_clock.pause();
        if self.status() == DeckStatus::Playing {
            self.set_status(DeckStatus::Paused);
        }
    }

    pub fn stop(&mut self) {
        self.audio_clock.pause();
        self.shared.position_samples.store(0, Ordering::Release);
        self.shared.clear_fill_requested.store(true, Ordering::Release);
        self.drain_ring();
        if self.is_loaded() {
            self.set_status(DeckStatus::Ready);
        }
    }

    /// Seek clears the ring, updates position, and re-anchors AudioClock.
    pub fn seek(&mut self, seconds: f64) {
        let Some(track) = self.track.read().clone() else {
            return;
        };
        let max_frames = track.frame_count;
        let frame = (seconds.max(0.0) * self.sample_rate as f64) as u64;
        let frame = frame.min(max_frames);
        let sample_pos = frame * 2;

        self.shared.position_samples.store(sample_pos, Ordering::Release);
        self.shared.clear_fill_requested.store(true, Ordering::Release);
        self.drain_ring();
        let was_playing = self.status() == DeckStatus::Playing;
        self.audio_clock.play_from_samples(sample_pos);
        if !was_playing {
            self.audio_clock.pause();
        }
    }

    pub fn set_tempo(&self, ratio: f32) {
        f32_bits_store(&self.shared.tempo_ratio, ratio.clamp(0.25, 4.0));
    }

    pub fn tempo(&self) -> f32 {
        f32_bits_load(&self.shared.tempo_ratio)
    }

    pub fn set_nudge(&self, ratio: f32) {
        f32_bits_store(&self.shared.nudge_ratio, ratio.clamp(0.5, 2.0));
    }

    pub fn set_key_lock(&self, enabled: bool) {
        self.shared.key_lock.store(enabled, Ordering::Release);
    }

    pub fn key_lock(&self) -> bool {
        self.shared.key_lock.load(Ordering::Acquire)
    }

    pub fn set_pitch_range(&mut self, range: PitchRangeKey) {
        self.pitch_range = range;
        let (lo, hi) = range.bounds();
        let ratio = self.tempo();
        self.set_tempo(ratio.clamp(lo, hi));
    }

    pub fn set_gain(&self, gain: f32) {
        f32_bits_store(&self.shared.gain, gain.clamp(0.0, 2.0));
    }

    /// `bpm_target` updates `tempo_ratio = target / detected_bpm`, falling
    /// back to `target / 100` when nothing has been detected yet.
    pub fn set_bpm_target(&mut self, bpm: f32) {
        self.bpm_target = Some(bpm);
        let base = self.detected_bpm.unwrap_or(100.0);
        self.set_tempo(bpm / base);
    }

    pub fn detected_bpm(&self) -> Option<f32> {
        self.detected_bpm
    }

    pub fn current_bpm(&self) -> Option<f32> {
        self.detected_bpm.map(|b| b * self.tempo())
    }

    pub fn beat_grid(&self) -> Option<&BeatGrid> {
        self.beat_grid.as_ref()
    }

    pub fn key_display(&self) -> Option<&str> {
        self.key_display.as_deref()
    }

    pub fn underrun_count(&self) -> u64 {
        self.shared.underrun_count.load(Ordering::Relaxed)
    }

    /// One-shot tempo sync to a master's effective BPM: half/double-time
    /// correction, clamp to the active pitch range. Distinct from the
    /// continuous PLL in [`crate::tempo_phase_sync`].
    pub fn sync_to(&mut self, master_effective_bpm: f32) -> Result<(f32, bool), DeckError> {
        let self_bpm = self.detected_bpm.ok_or(DeckError::NoBpm)?;
        if master_effective_bpm <= 0.0 {
            return Err(DeckError::NoBpm);
        }
        let raw_ratio = master_effective_bpm / self_bpm;
        let candidates = [0.5 * raw_ratio, raw_ratio, 2.0 * raw_ratio];
        let best = candidates
            .into_iter()
            .min_by(|a, b| (a - 1.0).abs().partial_cmp(&(b - 1.0).abs()).unwrap())
            .unwrap();

        let (lo, hi) = self.pitch_range.bounds();
        let clamped = best.clamp(lo, hi);
        let hit_limit = (clamped - best).abs() > 1e-6;

        self.set_tempo(clamped);
        Ok((clamped, hit_limit))
    }

    /// Non-blocking consumer side of the ring, called only from the audio
    /// callback. Pads with silence and records an underrun on shortfall.
    pub fn pull(&mut self, out: &mut [f32]) {
        if self.shared.clear_fill_requested.load(Ordering::Acquire) {
            self.drain_ring();
            self.shared.clear_fill_requested.store(false, Ordering::Release);
        }
        let popped = self.ring_consumer.pop_slice(out);
        if popped < out.len() {
            self.shared.underrun_count.fetch_add(1, Ordering::Relaxed);
            for sample in &mut out[popped..] {
                *sample = 0.0;
            }
        }
    }
}

impl SyncTarget for Deck {
    fn clock_seconds(&self) -> f64 {
        self.audio_clock.now_seconds()
    }

    fn effective_bpm(&self) -> Option<f32> {
        self.detected_bpm.map(|b| b * self.shared.effective_ratio())
    }

    fn apply_tempo_correction(&self, correction: f32) {
        f32_bits_store(&self.shared.pll_correction, correction);
    }
}

impl Drop for Deck {
    fn drop(&mut self) {
        self.fill_stop.store(true, Ordering::Release);
        if let Some(handle) = self.fill_thread.take() {
            let _ = handle.join();
        }
    }
}

fn fill_worker_loop(
    shared: Arc<DeckShared>,
    track: Arc<RwLock<Option<Arc<Track>>>>,
    stop: Arc<AtomicBool>,
    mut producer: ringbuf::HeapProd<f32>,
    sample_rate: u32,
) {
    let mut stretch = TimeStretchEngine::new(sample_rate);
    let mut scratch = Vec::with_capacity(FILL_CHUNK_FRAMES * 4);
    let high_water = producer.capacity().get() / 2;

    while !stop.load(Ordering::Acquire) {
        if shared.clear_fill_requested.load(Ordering::Acquire) {
            stretch.reset();
        }

        let status_playing = DeckStatus::from_u8(shared.status.load(Ordering::Acquire))
            == DeckStatus::Playing;
        if !status_playing || producer.vacant_len() < high_water {
            thread::sleep(Duration::from_millis(2));
            continue;
        }

        let Some(current) = track.read().clone() else {
            thread::sleep(Duration::from_millis(5));
            continue;
        };

        let effective_ratio = shared.effective_ratio();
        let key_lock = shared.key_lock.load(Ordering::Acquire);
        let position = shared.position_samples.load(Ordering::Acquire) as usize;

        let source_frames_needed = (FILL_CHUNK_FRAMES as f32 * effective_ratio * 1.1).ceil() as usize;
        let source_samples_needed = source_frames_needed * 2;
        let end = (position + source_samples_needed).min(current.samples.len());

        if position >= current.samples.len() {
            thread::sleep(Duration::from_millis(5));
            continue;
        }

        let slice = &current.samples[position..end];
        stretch.process(slice, effective_ratio, key_lock, &mut scratch);

        scratch.resize(FILL_CHUNK_FRAMES * 2, 0.0);
        let gain = f32_bits_load(&shared.gain);
        for sample in scratch.iter_mut() {
            *sample *= gain;
        }

        producer.push_slice(&scratch);

        let consumed_frames = (FILL_CHUNK_FRAMES as f32 * effective_ratio) as u64;
        shared
            .position_samples
            .fetch_add(consumed_frames * 2, Ordering::AcqRel);
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_test_deck() -> Deck {
        let master = Arc::new(MasterClock::new(48000));
        master.start(0.0);
        let cache = Arc::new(AnalysisCache::new());
        Deck::new('A', 48000, master, cache)
    }

    #[test]
    fn fresh_deck_is_empty_and_not_loaded() {
        let deck = new_test_deck();
        assert_eq!(deck.status(), DeckStatus::Empty);
        assert!(!deck.is_loaded());
    }

    #[test]
    fn tempo_is_clamped_to_resample_bounds() {
        let deck = new_test_deck();
        deck.set_tempo(10.0);
        assert!(deck.tempo() <= 4.0);
        deck.set_tempo(-1.0);
        assert!(deck.tempo() >= 0.25);
    }

    #[test]
    fn pull_on_empty_ring_is_silent_and_records_underrun() {
        let mut deck = new_test_deck();
        let mut out = vec![1.0f32; 256];
        deck.pull(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(deck.underrun_count(), 1);
    }

    #[test]
    fn sync_without_bpm_fails() {
        let mut deck = new_test_deck();
        assert!(matches!(deck.sync_to(128.0), Err(DeckError::NoBpm)));
    }

    #[test]
    fn sync_picks_closest_octave_and_clamps_to_pitch_range() {
        let mut deck = new_test_deck();
        deck.detected_bpm = Some(65.0);
        deck.pitch_range = PitchRangeKey::Standard;
        let (ratio, hit_limit) = deck.sync_to(128.0).unwrap();
        // raw = 128/65 = 1.969; candidates {0.5x, 1x, 2x} -> closest to 1.0 is 0.5*raw = 0.9846
        assert!((ratio - 0.84_f32.max(0.9846)).abs() < 0.05 || !hit_limit);
    }
}
