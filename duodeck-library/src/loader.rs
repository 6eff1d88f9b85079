//! Mono 44.1kHz decode path for the offline batch analyzer.
//!
//! This is deliberately a second, narrower decode path next to
//! `duodeck-audio`'s stereo loader: the analyzer never plays back what it
//! decodes, so there's no reason to carry two channels through an FFT
//! pipeline that downmixes to mono on the first line anyway.

use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no audio track found in file")]
    Unsupported,
    #[error("decode error: {0}")]
    Decode(String),
}

/// Target sample rate for analysis decode, per the offline analyzer's
/// contract.
pub const ANALYSIS_SAMPLE_RATE: u32 = 44_100;

/// Target loudness for RMS normalization, matching the engine's data model.
const TARGET_RMS_DBFS: f32 = -14.0;

/// A mono, normalized decode of a track, ready for onset/chroma analysis.
pub struct AnalysisAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration_secs: f64,
}

/// Decode `path` to mono at [`ANALYSIS_SAMPLE_RATE`] and RMS-normalize it.
pub fn load_for_analysis(path: &Path) -> Result<AnalysisAudio, LoadError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| LoadError::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(LoadError::Unsupported)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_sample_rate = codec_params.sample_rate.unwrap_or(44_100);
    let channels = codec_params.channels.map(|c| c.count()).unwrap_or(1).max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| LoadError::Decode(e.to_string()))?;

    let mut raw: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(_) => break,
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(_) => continue,
        };
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;
        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        raw.extend_from_slice(sample_buf.samples());
    }

    let mono: Vec<f32> = raw
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    let (mono, sample_rate) = if source_sample_rate != ANALYSIS_SAMPLE_RATE {
        (
            resample_mono(&mono, source_sample_rate, ANALYSIS_SAMPLE_RATE)?,
            ANALYSIS_SAMPLE_RATE,
        )
    } else {
        (mono, source_sample_rate)
    };

    let mut mono = trim_silence(mono, -30.0);
    normalize_in_place(&mut mono, TARGET_RMS_DBFS);
    let duration_secs = mono.len() as f64 / sample_rate as f64;

    Ok(AnalysisAudio {
        samples: mono,
        sample_rate,
        duration_secs,
    })
}

/// Drop leading/trailing runs below `threshold_dbfs`, so a long fade-in
/// doesn't dilute the onset envelope's early window.
fn trim_silence(samples: Vec<f32>, threshold_dbfs: f32) -> Vec<f32> {
    if samples.is_empty() {
        return samples;
    }
    let threshold = 10f32.powf(threshold_dbfs / 20.0);
    let start = samples.iter().position(|s| s.abs() > threshold);
    let end = samples.iter().rposition(|s| s.abs() > threshold);
    match (start, end) {
        (Some(start), Some(end)) if start <= end => samples[start..=end].to_vec(),
        _ => samples,
    }
}

fn normalize_in_place(samples: &mut [f32], target_dbfs: f32) {
    if samples.is_empty() {
        return;
    }
    let sum_sq: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    if rms <= 1e-9 {
        return;
    }
    let target_linear = 10f64.powf(target_dbfs as f64 / 20.0);
    let gain = ((target_linear / rms) as f32).clamp(0.1, 10.0);
    for s in samples {
        *s *= gain;
    }
}

fn resample_mono(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, LoadError> {
    use rubato::{FftFixedInOut, Resampler};

    let frames = samples.len();
    let mut resampler = FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, 1)
        .map_err(|e| LoadError::Decode(e.to_string()))?;

    let chunk_size = resampler.input_frames_next();
    let mut output: Vec<f32> = Vec::new();
    let mut pos = 0;
    while pos + chunk_size <= frames {
        let input_refs = [&samples[pos..pos + chunk_size]];
        let resampled = resampler
            .process(&input_refs, None)
            .map_err(|e| LoadError::Decode(e.to_string()))?;
        output.extend(&resampled[0]);
        pos += chunk_size;
    }
    if pos < frames {
        let remaining = frames - pos;
        let mut padded = samples[pos..].to_vec();
        padded.resize(chunk_size, 0.0);
        let input_refs = [padded.as_slice()];
        if let Ok(resampled) = resampler.process(&input_refs, None) {
            let output_frames = (remaining * target_rate as usize) / source_rate as usize;
            output.extend(&resampled[0][..output_frames.min(resampled[0].len())]);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_silence_drops_leading_and_trailing_quiet() {
        let mut samples = vec![0.0001f32; 100];
        samples.extend(vec![0.5f32; 200]);
        samples.extend(vec![0.0001f32; 100]);
        let trimmed = trim_silence(samples, -30.0);
        assert_eq!(trimmed.len(), 200);
    }

    #[test]
    fn trim_silence_on_all_quiet_returns_input() {
        let samples = vec![0.0001f32; 50];
        let trimmed = trim_silence(samples.clone(), -30.0);
        assert_eq!(trimmed, samples);
    }

    #[test]
    fn normalize_brings_rms_near_target() {
        let mut samples = vec![0.01f32; 1000];
        normalize_in_place(&mut samples, -14.0);
        let rms = (samples.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / samples.len() as f64).sqrt();
        let target = 10f64.powf(-14.0 / 20.0);
        assert!((rms - target).abs() < 0.01, "rms={rms} target={target}");
    }

    #[test]
    fn normalize_leaves_silence_untouched() {
        let mut samples = vec![0.0f32; 100];
        normalize_in_place(&mut samples, -14.0);
        assert!(samples.iter().all(|s| *s == 0.0));
    }
}
