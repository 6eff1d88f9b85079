//! Offline analysis primitives: BPM/beat-grid detection, musical key
//! detection, Camelot-wheel mapping, the tempo-map sample<->beat model, and
//! waveform peak precomputation.
//!
//! Nothing in this crate touches real-time audio; it is safe to call from
//! analysis worker threads and from the offline batch analyzer alike.

mod analysis_cache;
mod beatgrid;
mod camelot;
mod key;
mod tempo_map;
mod waveform;

pub use analysis_cache::{
    AnalysisCache, AnalysisResult, CacheSidecarError, TrackUid, ANALYSIS_RESULT_VERSION,
};
pub use beatgrid::{auto_normalize_bpm, BeatGridAnalyzer, BeatGridEstimate};
pub use camelot::{CamelotKey, MusicalKey};
pub use key::{DetectedKey, KeyAnalyzer};
pub use tempo_map::{BeatGrid, TempoMap, TempoMapError, TempoSegment, TEMPO_MAP_VERSION};
pub use waveform::WaveformPeaks;
