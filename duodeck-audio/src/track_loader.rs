//! Decodes a file into the immutable stereo buffer a [`crate::deck::Deck`]
//! plays from. Runs on the thread that called `load_track` (the control
//! thread), never on the audio callback.

use duodeck_analysis::TrackUid;
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

/// Target loudness for RMS normalization at load time, per the data model.
const TARGET_RMS_DBFS: f32 = -14.0;

/// An immutable decoded buffer plus the metadata the spec's data model
/// requires: UID, sample rate, frame count, channel count (normalized to
/// 2), duration, and a clamped RMS-normalization gain.
pub struct Track {
    pub uid: TrackUid,
    pub samples: Vec<f32>, // interleaved stereo
    pub sample_rate: u32,
    pub frame_count: u64,
    pub duration_secs: f64,
    pub normalization_gain: f32,
    pub path: std::path::PathBuf,
}

pub fn load_track(path: &Path, target_sample_rate: u32) -> Result<Track, LoadError> {
    let file_meta = std::fs::metadata(path)?;
    let uid = TrackUid::from_metadata(
        path,
        file_meta.len(),
        file_meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
    );

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
    let source_sample_rate = codec_params.sample_rate.unwrap_or(44100);
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

    // Mono inputs are duplicated to both channels before anything else
    // touches the buffer.
    let stereo = if channels == 1 {
        let mut out = Vec::with_capacity(raw.len() * 2);
        for s in &raw {
            out.push(*s);
            out.push(*s);
        }
        out
    } else if channels == 2 {
        raw
    } else {
        // Downmix anything wider than stereo to the first two channels.
        let mut out = Vec::with_capacity(raw.len() / channels * 2);
        for frame in raw.chunks(channels) {
            out.push(frame[0]);
            out.push(frame.get(1).copied().unwrap_or(frame[0]));
        }
        out
    };

    let (stereo, sample_rate) = if source_sample_rate != target_sample_rate {
        (
            resample_stereo(&stereo, source_sample_rate, target_sample_rate)?,
            target_sample_rate,
        )
    } else {
        (stereo, source_sample_rate)
    };

    let normalization_gain = rms_normalization_gain(&stereo, TARGET_RMS_DBFS);
    let frame_count = (stereo.len() / 2) as u64;
    let duration_secs = frame_count as f64 / sample_rate as f64;

    Ok(Track {
        uid,
        samples: stereo,
        sample_rate,
        frame_count,
        duration_secs,
        normalization_gain,
        path: path.to_path_buf(),
    })
}

/// RMS of the buffer mapped to a gain that would bring it to
/// `target_dbfs`, clamped to [0.1, 10] so a near-silent intro doesn't blow
/// the signal up.
fn rms_normalization_gain(stereo: &[f32], target_dbfs: f32) -> f32 {
    if stereo.is_empty() {
        return 1.0;
    }
    let sum_sq: f64 = stereo.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    let rms = (sum_sq / stereo.len() as f64).sqrt();
    if rms <= 1e-9 {
        return 1.0;
    }
    let target_linear = 10f64.powf(target_dbfs as f64 / 20.0);
    ((target_linear / rms) as f32).clamp(0.1, 10.0)
}

fn resample_stereo(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, LoadError> {
    use rubato::{FftFixedInOut, Resampler};

    let channels = 2usize;
    let frames = samples.len() / channels;
    let mut resampler = FftFixedInOut::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        1024,
        channels,
    )
    .map_err(|e| LoadError::Decode(e.to_string()))?;

    let deinterleaved: Vec<Vec<f32>> = (0..channels)
        .map(|ch| (0..frames).map(|f| samples[f * channels + ch]).collect())
        .collect();

    let chunk_size = resampler.input_frames_next();
    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut pos = 0;
    while pos + chunk_size <= frames {
        let input_refs: Vec<&[f32]> = deinterleaved.iter().map(|c| &c[pos..pos + chunk_size]).collect();
        let resampled = resampler
            .process(&input_refs, None)
            .map_err(|e| LoadError::Decode(e.to_string()))?;
        for (ch, data) in resampled.into_iter().enumerate() {
            output[ch].extend(data);
        }
        pos += chunk_size;
    }
    if pos < frames {
        let remaining = frames - pos;
        let padded: Vec<Vec<f32>> = deinterleaved
            .iter()
            .map(|c| {
                let mut v = c[pos..].to_vec();
                v.resize(chunk_size, 0.0);
                v
            })
            .collect();
        let input_refs: Vec<&[f32]> = padded.iter().map(|v| v.as_slice()).collect();
        if let Ok(resampled) = resampler.process(&input_refs, None) {
            let output_frames = (remaining * target_rate as usize) / source_rate as usize;
            for (ch, data) in resampled.into_iter().enumerate() {
                output[ch].extend(&data[..output_frames.min(data.len())]);
            }
        }
    }

    let output_frames = output[0].len();
    let mut interleaved = Vec::with_capacity(output_frames * channels);
    for frame_idx in 0..output_frames {
        for channel in &output {
            interleaved.push(channel[frame_idx]);
        }
    }
    Ok(interleaved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_gain_clamped_for_near_silence() {
        let near_silent = vec![0.0001f32; 1000];
        let gain = rms_normalization_gain(&near_silent, -14.0);
        assert!(gain <= 10.0);
    }

    #[test]
    fn rms_gain_clamped_for_loud_signal() {
        let loud = vec![0.99f32; 1000];
        let gain = rms_normalization_gain(&loud, -14.0);
        assert!(gain >= 0.1);
    }

    #[test]
    fn empty_buffer_has_unity_gain() {
        assert_eq!(rms_normalization_gain(&[], -14.0), 1.0);
    }
}
