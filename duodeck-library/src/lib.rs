//! Offline side of duodeck: the mono analysis decode path and the batch
//! analyzer that turns a list of files into BPM/key sidecars.
//!
//! The real-time stereo decode path lives in `duodeck-audio`; this crate
//! never touches the audio thread.

mod analyzer;
mod loader;

pub use analyzer::{analyze_batch, analyze_file, AnalyzeError, AnalyzeReport, AnalyzerConfig, CancelToken};
pub use loader::{load_for_analysis, AnalysisAudio, LoadError, ANALYSIS_SAMPLE_RATE};
