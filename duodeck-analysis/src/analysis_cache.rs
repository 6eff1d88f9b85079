//! Content-addressed store of BPM, key, tempo map, and peak results.
//!
//! One in-memory map, keyed by [`TrackUid`], shared process-wide; each
//! analysis kind additionally round-trips through a JSON sidecar file next
//! to the audio so a restart doesn't re-analyze unchanged tracks.

use crate::tempo_map::TempoMap;
use crate::waveform::WaveformPeaks;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;
use twox_hash::xxh3::hash128;

/// Content fingerprint of (absolute path, file size, mtime), hashed to 128
/// bits. Primary key of [`AnalysisCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackUid(pub u128);

impl TrackUid {
    pub fn from_metadata(path: &Path, size_bytes: u64, mtime: SystemTime) -> Self {
        let mtime_secs = mtime
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(path.to_string_lossy().as_bytes());
        buf.extend_from_slice(&size_bytes.to_le_bytes());
        buf.extend_from_slice(&mtime_secs.to_le_bytes());
        Self(hash128(&buf))
    }
}

pub const ANALYSIS_RESULT_VERSION: u32 = 1;

/// What's known about a track, independent of how much of it is filled in:
/// a cache entry may carry only a key and no BPM yet, or vice versa.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisResult {
    pub version: u32,
    pub uid: TrackUid,
    pub bpm: Option<f32>,
    pub confidence: Option<f32>,
    pub key_note: Option<String>,
    pub key_display: Option<String>,
    pub method: Option<String>,
    pub timestamp_unix: u64,
    pub tempo_map: Option<TempoMap>,
    pub grid_offset_beats: f64,
    pub peaks: Option<WaveformPeaks>,
}

impl Default for TrackUid {
    fn default() -> Self {
        Self(0)
    }
}

impl AnalysisResult {
    pub fn empty(uid: TrackUid) -> Self {
        Self {
            version: ANALYSIS_RESULT_VERSION,
            uid,
            ..Default::default()
        }
    }

    /// BPM is considered sane per the batch analyzer's contract.
    pub fn has_sane_bpm(&self) -> bool {
        matches!(self.bpm, Some(b) if (40.0..=200.0).contains(&b))
    }

    /// Merge `other` into `self`, field by field: a field present in
    /// `other` overwrites; a field absent in `other` is preserved from
    /// `self`. This is the upsert semantics the in-memory map uses.
    pub fn merge(&mut self, other: AnalysisResult) {
        if other.bpm.is_some() {
            self.bpm = other.bpm;
            self.confidence = other.confidence;
        }
        if other.key_note.is_some() {
            self.key_note = other.key_note;
            self.key_display = other.key_display;
        }
        if other.tempo_map.is_some() {
            self.tempo_map = other.tempo_map;
        }
        if other.peaks.is_some() {
            self.peaks = other.peaks;
        }
        if other.method.is_some() {
            self.method = other.method;
        }
        self.grid_offset_beats = other.grid_offset_beats;
        self.timestamp_unix = other.timestamp_unix;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheSidecarError {
    #[error("sidecar io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sidecar json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sidecar version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Process-wide `uid -> AnalysisResult` map, with JSON sidecar persistence.
///
/// In-memory lookups are checked first; sidecar files back them on load so
/// the cache survives a restart.
pub struct AnalysisCache {
    entries: RwLock<HashMap<TrackUid, AnalysisResult>>,
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, uid: TrackUid) -> Option<AnalysisResult> {
        self.entries.read().get(&uid).cloned()
    }

    /// Upsert: merges field-by-field into any existing entry.
    pub fn upsert(&self, result: AnalysisResult) {
        let mut entries = self.entries.write();
        entries
            .entry(result.uid)
            .and_modify(|existing| existing.merge(result.clone()))
            .or_insert(result);
    }

    /// Sidecar path for a given analysis kind next to the audio file, e.g.
    /// `track.mp3` + `"bpm"` -> `track.mp3.bpm.json`.
    fn sidecar_path(audio_path: &Path, kind: &str) -> std::path::PathBuf {
        let mut p = audio_path.as_os_str().to_owned();
        p.push(format!(".{kind}.json"));
        std::path::PathBuf::from(p)
    }

    pub fn load_sidecar(
        audio_path: &Path,
        kind: &str,
    ) -> Result<Option<AnalysisResult>, CacheSidecarError> {
        let path = Self::sidecar_path(audio_path, kind);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        let result: AnalysisResult = serde_json::from_str(&text)?;
        if result.version != ANALYSIS_RESULT_VERSION {
            return Err(CacheSidecarError::VersionMismatch {
                expected: ANALYSIS_RESULT_VERSION,
                found: result.version,
            });
        }
        Ok(Some(result))
    }

    pub fn write_sidecar(
        audio_path: &Path,
        kind: &str,
        result: &AnalysisResult,
    ) -> Result<(), CacheSidecarError> {
        let path = Self::sidecar_path(audio_path, kind);
        let text = serde_json::to_string_pretty(result)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Read-through: check the in-memory map, then fall back to the
    /// on-disk sidecar, populating the in-memory map on a disk hit.
    pub fn get_or_load(
        &self,
        uid: TrackUid,
        audio_path: &Path,
        kind: &str,
    ) -> Option<AnalysisResult> {
        if let Some(found) = self.get(uid) {
            return Some(found);
        }
        match Self::load_sidecar(audio_path, kind) {
            Ok(Some(result)) if result.uid == uid => {
                self.upsert(result.clone());
                Some(result)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_is_deterministic_for_same_metadata() {
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1000);
        let a = TrackUid::from_metadata(Path::new("/music/a.mp3"), 1234, t);
        let b = TrackUid::from_metadata(Path::new("/music/a.mp3"), 1234, t);
        assert_eq!(a, b);
    }

    #[test]
    fn uid_differs_on_size_change() {
        let t = SystemTime::UNIX_EPOCH;
        let a = TrackUid::from_metadata(Path::new("/music/a.mp3"), 1234, t);
        let b = TrackUid::from_metadata(Path::new("/music/a.mp3"), 1235, t);
        assert_ne!(a, b);
    }

    #[test]
    fn merge_preserves_untouched_fields() {
        let uid = TrackUid(1);
        let mut existing = AnalysisResult {
            bpm: Some(128.0),
            confidence: Some(0.9),
            ..AnalysisResult::empty(uid)
        };
        let key_only = AnalysisResult {
            key_note: Some("8A".to_string()),
            key_display: Some("8A".to_string()),
            ..AnalysisResult::empty(uid)
        };
        existing.merge(key_only);
        assert_eq!(existing.bpm, Some(128.0));
        assert_eq!(existing.key_note.as_deref(), Some("8A"));
    }

    #[test]
    fn cache_upsert_then_get_roundtrips() {
        let cache = AnalysisCache::new();
        let uid = TrackUid(42);
        cache.upsert(AnalysisResult {
            bpm: Some(120.0),
            ..AnalysisResult::empty(uid)
        });
        let found = cache.get(uid).unwrap();
        assert_eq!(found.bpm, Some(120.0));
    }

    #[test]
    fn sane_bpm_rejects_out_of_range() {
        let mut r = AnalysisResult::empty(TrackUid(1));
        r.bpm = Some(300.0);
        assert!(!r.has_sane_bpm());
        r.bpm = Some(128.0);
        assert!(r.has_sane_bpm());
    }
}
