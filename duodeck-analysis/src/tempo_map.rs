//! Sample <-> beat conversion: a piecewise-constant BPM schedule with a
//! manual grid offset. The single source of truth for every beat-phase
//! computation in the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TempoMapError {
    #[error("tempo map must contain at least one segment")]
    Empty,
    #[error("local_bpm must be > 0, got {0}")]
    NonPositiveBpm(String),
    #[error("confidence must be in [0, 1], got {0}")]
    ConfidenceOutOfRange(String),
    #[error("sidecar version mismatch: expected {expected}, got {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// A single constant-BPM region of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoSegment {
    pub sample_position: u64,
    pub beat_index: f64,
    pub local_bpm: f32,
    pub confidence: f32,
}

impl TempoSegment {
    pub fn new(
        sample_position: u64,
        beat_index: f64,
        local_bpm: f32,
        confidence: f32,
    ) -> Result<Self, TempoMapError> {
        if !(local_bpm > 0.0) {
            return Err(TempoMapError::NonPositiveBpm(local_bpm.to_string()));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(TempoMapError::ConfidenceOutOfRange(confidence.to_string()));
        }
        Ok(Self {
            sample_position,
            beat_index,
            local_bpm,
            confidence,
        })
    }
}

pub const TEMPO_MAP_VERSION: u32 = 1;

/// Ordered sequence of [`TempoSegment`]s plus schedule-wide scalars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoMap {
    version: u32,
    segments: Vec<TempoSegment>,
    sample_rate: u32,
    grid_offset_beats: f64,
    beats_per_bar: u32,
}

impl TempoMap {
    /// Build from segments, enforcing the sort + synthesize-at-0 invariant.
    pub fn new(
        mut segments: Vec<TempoSegment>,
        sample_rate: u32,
        grid_offset_beats: f64,
        beats_per_bar: u32,
    ) -> Result<Self, TempoMapError> {
        if segments.is_empty() {
            return Err(TempoMapError::Empty);
        }
        segments.sort_by_key(|s| s.sample_position);
        if segments[0].sample_position != 0 {
            let first_bpm = segments[0].local_bpm;
            segments.insert(0, TempoSegment::new(0, 0.0, first_bpm, segments[0].confidence)?);
        }
        Ok(Self {
            version: TEMPO_MAP_VERSION,
            segments,
            sample_rate,
            grid_offset_beats,
            beats_per_bar,
        })
    }

    pub fn from_constant_bpm(bpm: f32, sample_rate: u32, beats_per_bar: u32) -> Self {
        let segment = TempoSegment::new(0, 0.0, bpm, 1.0).expect("constant bpm is always valid");
        Self {
            version: TEMPO_MAP_VERSION,
            segments: vec![segment],
            sample_rate,
            grid_offset_beats: 0.0,
            beats_per_bar,
        }
    }

    /// Build from a list of `(sample_position, bpm)` change points.
    ///
    /// The source this is distilled from named this list with two different
    /// casings of the same field across call sites; there is only one field
    /// here.
    pub fn from_variable_bpm(
        bpm_changes: &[(u64, f32)],
        sample_rate: u32,
        beats_per_bar: u32,
    ) -> Result<Self, TempoMapError> {
        if bpm_changes.is_empty() {
            return Err(TempoMapError::Empty);
        }
        let mut changes = bpm_changes.to_vec();
        changes.sort_by_key(|(pos, _)| *pos);

        let mut segments = Vec::with_capacity(changes.len());
        let mut beat_index = 0.0f64;
        let mut prev: Option<(u64, f32)> = None;

        for &(pos, bpm) in &changes {
            if let Some((prev_pos, prev_bpm)) = prev {
                let elapsed_samples = pos.saturating_sub(prev_pos) as f64;
                let elapsed_secs = elapsed_samples / sample_rate as f64;
                beat_index += elapsed_secs * prev_bpm as f64 / 60.0;
            }
            segments.push(TempoSegment::new(pos, beat_index, bpm, 1.0)?);
            prev = Some((pos, bpm));
        }

        Self::new(segments, sample_rate, 0.0, beats_per_bar)
    }

    pub fn set_grid_offset(&mut self, offset_beats: f64) {
        self.grid_offset_beats = offset_beats;
    }

    pub fn grid_offset_beats(&self) -> f64 {
        self.grid_offset_beats
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn segments(&self) -> &[TempoSegment] {
        &self.segments
    }

    fn segment_for_sample(&self, n: u64) -> &TempoSegment {
        let idx = self
            .segments
            .partition_point(|s| s.sample_position <= n)
            .saturating_sub(1);
        &self.segments[idx]
    }

    fn segment_for_beat(&self, beats: f64) -> &TempoSegment {
        let idx = self
            .segments
            .partition_point(|s| s.beat_index <= beats)
            .saturating_sub(1);
        &self.segments[idx]
    }

    /// `n` samples -> absolute beats (including `grid_offset_beats`).
    pub fn samples_to_beats(&self, n: u64) -> f64 {
        let seg = self.segment_for_sample(n);
        let elapsed_samples = n.saturating_sub(seg.sample_position) as f64;
        let beats_since_segment =
            elapsed_samples / self.sample_rate as f64 * seg.local_bpm as f64 / 60.0;
        seg.beat_index + beats_since_segment + self.grid_offset_beats
    }

    /// Absolute beats (including `grid_offset_beats`) -> samples.
    pub fn beats_to_samples(&self, beats: f64) -> u64 {
        let beats = beats - self.grid_offset_beats;
        let seg = self.segment_for_beat(beats);
        let beats_since_segment = beats - seg.beat_index;
        let secs_since_segment = beats_since_segment * 60.0 / seg.local_bpm as f64;
        let samples_since_segment = secs_since_segment * self.sample_rate as f64;
        (seg.sample_position as f64 + samples_since_segment).max(0.0).round() as u64
    }

    pub fn bpm_at_sample(&self, n: u64) -> f32 {
        self.segment_for_sample(n).local_bpm
    }

    pub fn bpm_at_beat(&self, beats: f64) -> f32 {
        self.segment_for_beat(beats).local_bpm
    }

    /// Time-weighted mean BPM across segments, weighted by the duration of
    /// each segment up to the next one's start. The final segment (which has
    /// no "next" boundary in the map) is excluded from the weighting, as the
    /// map carries no track-length field to bound it.
    pub fn average_bpm(&self) -> f32 {
        if self.segments.len() == 1 {
            return self.segments[0].local_bpm;
        }
        let mut weighted_sum = 0.0f64;
        let mut total_weight = 0.0f64;
        for pair in self.segments.windows(2) {
            let duration = (pair[1].sample_position - pair[0].sample_position) as f64;
            weighted_sum += pair[0].local_bpm as f64 * duration;
            total_weight += duration;
        }
        if total_weight <= 0.0 {
            return self.segments[0].local_bpm;
        }
        (weighted_sum / total_weight) as f32
    }

    /// True if any segment's BPM differs from the first by more than 0.1.
    pub fn is_variable_tempo(&self) -> bool {
        let first = self.segments[0].local_bpm;
        self.segments[1..]
            .iter()
            .any(|s| (s.local_bpm - first).abs() > 0.1)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize, rejecting a version mismatch rather than guessing.
    pub fn from_json(s: &str) -> Result<Self, TempoMapError> {
        #[derive(Deserialize)]
        struct VersionProbe {
            version: u32,
        }
        let probe: VersionProbe =
            serde_json::from_str(s).map_err(|_| TempoMapError::Empty)?;
        if probe.version != TEMPO_MAP_VERSION {
            return Err(TempoMapError::VersionMismatch {
                expected: TEMPO_MAP_VERSION,
                found: probe.version,
            });
        }
        serde_json::from_str(s).map_err(|_| TempoMapError::Empty)
    }
}

/// A thin facade: headline BPM + beat-0 offset seconds + the underlying
/// [`TempoMap`]. All queries go through the map.
#[derive(Debug, Clone)]
pub struct BeatGrid {
    pub headline_bpm: f32,
    pub beat_zero_offset_secs: f64,
    map: TempoMap,
}

impl BeatGrid {
    pub fn new(headline_bpm: f32, beat_zero_offset_secs: f64, map: TempoMap) -> Self {
        Self {
            headline_bpm,
            beat_zero_offset_secs,
            map,
        }
    }

    /// Construct a constant-BPM grid with no prior analysis.
    pub fn from_constants(bpm: f32, sample_rate: u32) -> Self {
        Self {
            headline_bpm: bpm,
            beat_zero_offset_secs: 0.0,
            map: TempoMap::from_constant_bpm(bpm, sample_rate, 4),
        }
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.map
    }

    pub fn samples_to_beats(&self, n: u64) -> f64 {
        self.map.samples_to_beats(n)
    }

    pub fn beats_to_samples(&self, beats: f64) -> u64 {
        self.map.beats_to_samples(beats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert_eq!(TempoMap::new(vec![], 48000, 0.0, 4), Err(TempoMapError::Empty));
    }

    #[test]
    fn synthesizes_segment_at_zero() {
        let seg = TempoSegment::new(1000, 5.0, 128.0, 1.0).unwrap();
        let map = TempoMap::new(vec![seg], 48000, 0.0, 4).unwrap();
        assert_eq!(map.segments()[0].sample_position, 0);
        assert_eq!(map.segments().len(), 2);
    }

    #[test]
    fn round_trip_law() {
        let map = TempoMap::from_constant_bpm(120.0, 48000, 4);
        for beats in [0.0, 1.0, 16.0, 128.5] {
            let samples = map.beats_to_samples(beats);
            let back = map.samples_to_beats(samples);
            assert!((back - beats).abs() < 1e-6, "beats={beats} back={back}");
        }
    }

    #[test]
    fn constant_bpm_exact_formula() {
        let map = TempoMap::from_constant_bpm(120.0, 48000, 4);
        let n = 48000u64 * 3;
        let expected = n as f64 * 120.0 / (60.0 * 48000.0);
        assert!((map.samples_to_beats(n) - expected).abs() < 1e-9);
    }

    #[test]
    fn grid_offset_shifts_beats() {
        let mut map = TempoMap::from_constant_bpm(120.0, 48000, 4);
        map.set_grid_offset(1.0);
        assert!((map.samples_to_beats(0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn variable_tempo_detection() {
        let constant = TempoMap::from_constant_bpm(120.0, 48000, 4);
        assert!(!constant.is_variable_tempo());

        let variable = TempoMap::from_variable_bpm(
            &[(0, 120.0), (48000 * 10, 128.0)],
            48000,
            4,
        )
        .unwrap();
        assert!(variable.is_variable_tempo());
    }

    #[test]
    fn version_mismatch_rejected() {
        let map = TempoMap::from_constant_bpm(120.0, 48000, 4);
        let mut json: serde_json::Value = serde_json::from_str(&map.to_json().unwrap()).unwrap();
        json["version"] = serde_json::json!(999);
        let err = TempoMap::from_json(&json.to_string()).unwrap_err();
        assert_eq!(
            err,
            TempoMapError::VersionMismatch {
                expected: TEMPO_MAP_VERSION,
                found: 999
            }
        );
    }
}
