//! Offline batch analyzer: sidecar-cache-first BPM and key detection over a
//! list of files, with per-file timeouts and cooperative cancel/pause.
//!
//! Unlike the engine's per-deck analysis workers (which analyze the first
//! 30-odd seconds of whatever is already loaded into the audio thread's
//! decoded buffer), this runs off any list of paths, decodes each one itself
//! at a fixed analysis sample rate, and is meant to be driven from a library
//! scan rather than a deck load.

use crate::loader::{load_for_analysis, LoadError};
use duodeck_analysis::{
    AnalysisCache, AnalysisResult, BeatGridAnalyzer, CamelotKey, KeyAnalyzer, TrackUid,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("analysis cancelled")]
    Cancelled,
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),
    #[error("load error: {0}")]
    Load(#[from] LoadError),
}

/// Shared cooperative cancel/pause signal. Clone freely; all clones observe
/// the same underlying flags.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Block while paused, waking up periodically to re-check cancellation.
    fn wait_if_paused(&self) {
        while self.paused.load(Ordering::SeqCst) && !self.is_cancelled() {
            thread::sleep(Duration::from_millis(50));
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerConfig {
    pub per_file_timeout: Duration,
    /// Number of overlapping windows the beat-tracker ensemble probes.
    pub ensemble_size: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            per_file_timeout: Duration::from_secs(30),
            ensemble_size: 3,
        }
    }
}

pub struct AnalyzeReport {
    pub uid: TrackUid,
    pub path: PathBuf,
    pub result: AnalysisResult,
    pub from_cache: bool,
}

/// Fold a BPM candidate into the DJ-friendly [60, 180] window by repeated
/// doubling/halving. Unlike the deck's auto-normalize, this never rejects a
/// candidate outright -- the trimmed median downstream absorbs outliers.
fn fold_into_60_180(mut bpm: f32) -> f32 {
    while bpm < 60.0 {
        bpm *= 2.0;
    }
    while bpm > 180.0 {
        bpm /= 2.0;
    }
    bpm
}

fn trimmed_median(mut values: Vec<f32>) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n >= 5 {
        values = values[1..n - 1].to_vec();
    }
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

fn stddev(values: &[f32], mean: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

/// An ensemble of beat-trackers over non-overlapping windows of the decoded
/// audio, each a full spectral-flux + autocorrelation pass in its own right.
fn ensemble_bpm_candidates(
    analyzer: &BeatGridAnalyzer,
    samples: &[f32],
    sample_rate: u32,
    ensemble_size: usize,
) -> Vec<f32> {
    let window_frames = sample_rate as usize * 15;
    let mut candidates = Vec::new();
    for i in 0..ensemble_size {
        let start = i * window_frames;
        if start >= samples.len() {
            break;
        }
        let end = (start + window_frames).min(samples.len());
        // BeatGridAnalyzer expects stereo-interleaved input; duplicate the
        // mono analysis buffer into both channels for this call site.
        let window: Vec<f32> = samples[start..end].iter().flat_map(|s| [*s, *s]).collect();
        if let Some(estimate) = analyzer.analyze(&window) {
            candidates.push(fold_into_60_180(estimate.bpm));
        }
    }
    candidates
}

fn analyze_bpm(
    samples: &[f32],
    sample_rate: u32,
    ensemble_size: usize,
) -> Option<(f32, f32)> {
    let analyzer = BeatGridAnalyzer::new(sample_rate);
    let candidates = ensemble_bpm_candidates(&analyzer, samples, sample_rate, ensemble_size);
    if candidates.is_empty() {
        return None;
    }
    let mean = candidates.iter().sum::<f32>() / candidates.len() as f32;
    let sigma = stddev(&candidates, mean);
    let damping = candidates.len() as f32 / ensemble_size as f32;
    let confidence = (1.0 - sigma / 20.0).clamp(0.0, 1.0) * damping;
    Some((trimmed_median(candidates), confidence))
}

fn analyze_key(samples: &[f32], sample_rate: u32) -> Option<(String, String, f32)> {
    let stereo: Vec<f32> = samples.iter().flat_map(|s| [*s, *s]).collect();
    let mut analyzer = KeyAnalyzer::new(sample_rate);
    let detected = analyzer.analyze(&stereo)?;
    let camelot = CamelotKey::from_musical_key(detected.key);
    Some((detected.key.to_string(), camelot.display(), detected.confidence))
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Analyze one file: sidecar-cache-first, otherwise decode and run the BPM
/// ensemble plus independent key detection.
pub fn analyze_file(
    path: &Path,
    cache: &AnalysisCache,
    config: &AnalyzerConfig,
    cancel: &CancelToken,
) -> Result<AnalyzeReport, AnalyzeError> {
    if cancel.is_cancelled() {
        return Err(AnalyzeError::Cancelled);
    }
    cancel.wait_if_paused();

    let meta = std::fs::metadata(path).map_err(LoadError::Io)?;
    let uid = TrackUid::from_metadata(
        path,
        meta.len(),
        meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    );

    if let Some(cached) = cache.get_or_load(uid, path, "bpm") {
        if cached.has_sane_bpm() {
            info!(path = %path.display(), bpm = cached.bpm, "analysis cache hit");
            return Ok(AnalyzeReport { uid, path: path.to_path_buf(), result: cached, from_cache: true });
        }
    }

    let deadline = Instant::now() + config.per_file_timeout;
    let audio = load_for_analysis(path)?;

    if cancel.is_cancelled() {
        return Err(AnalyzeError::Cancelled);
    }
    if Instant::now() > deadline {
        return Err(AnalyzeError::Timeout(config.per_file_timeout));
    }

    let mut result = AnalysisResult::empty(uid);
    if let Some((bpm, confidence)) = analyze_bpm(&audio.samples, audio.sample_rate, config.ensemble_size) {
        result.bpm = Some(bpm);
        result.confidence = Some(confidence);
        result.method = Some("spectral-flux-ensemble".to_string());
    } else {
        warn!(path = %path.display(), "bpm detection failed");
    }

    if Instant::now() > deadline {
        return Err(AnalyzeError::Timeout(config.per_file_timeout));
    }
    cancel.wait_if_paused();
    if cancel.is_cancelled() {
        return Err(AnalyzeError::Cancelled);
    }

    if let Some((key_note, key_display, _confidence)) = analyze_key(&audio.samples, audio.sample_rate) {
        result.key_note = Some(key_note);
        result.key_display = Some(key_display);
    }

    result.timestamp_unix = now_unix();
    cache.upsert(result.clone());
    let _ = AnalysisCache::write_sidecar(path, "bpm", &result);
    let _ = AnalysisCache::write_sidecar(path, "key", &result);

    Ok(AnalyzeReport { uid, path: path.to_path_buf(), result, from_cache: false })
}

/// Analyze a batch of paths in sequence, honoring `cancel` between files.
/// Stops (rather than skips) the remaining files once cancelled, since a
/// caller that asked to stop wants the batch to actually stop.
pub fn analyze_batch(
    paths: &[PathBuf],
    cache: &AnalysisCache,
    config: &AnalyzerConfig,
    cancel: &CancelToken,
) -> Vec<Result<AnalyzeReport, AnalyzeError>> {
    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        if cancel.is_cancelled() {
            break;
        }
        reports.push(analyze_file(path, cache, config, cancel));
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_brings_low_bpm_into_range() {
        assert!((fold_into_60_180(30.0) - 60.0).abs() < 1e-6);
    }

    #[test]
    fn fold_brings_high_bpm_into_range() {
        assert!((fold_into_60_180(360.0) - 90.0).abs() < 1e-6);
    }

    #[test]
    fn fold_leaves_in_range_untouched() {
        assert_eq!(fold_into_60_180(128.0), 128.0);
    }

    #[test]
    fn trimmed_median_drops_extremes_with_five_or_more() {
        let values = vec![10.0, 120.0, 121.0, 122.0, 400.0];
        assert_eq!(trimmed_median(values), 121.0);
    }

    #[test]
    fn trimmed_median_of_three_is_plain_median() {
        let values = vec![100.0, 200.0, 150.0];
        assert_eq!(trimmed_median(values), 150.0);
    }

    #[test]
    fn cancel_token_reports_cancellation() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn analyze_missing_file_returns_load_error() {
        let cache = AnalysisCache::new();
        let config = AnalyzerConfig::default();
        let cancel = CancelToken::new();
        let result = analyze_file(Path::new("/nonexistent/track.wav"), &cache, &config, &cancel);
        assert!(matches!(result, Err(AnalyzeError::Load(_))));
    }

    #[test]
    fn analyze_batch_stops_when_precancelled() {
        let cache = AnalysisCache::new();
        let config = AnalyzerConfig::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let paths = vec![PathBuf::from("/a.wav"), PathBuf::from("/b.wav")];
        let reports = analyze_batch(&paths, &cache, &config, &cancel);
        assert!(reports.is_empty());
    }
}
