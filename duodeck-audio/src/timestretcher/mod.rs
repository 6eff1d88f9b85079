//! State-of-the-art time-stretching module for pitch-independent tempo control.
//!
//! This module provides a phase vocoder implementation that allows changing
//! playback speed without affecting pitch - essential for DJ beat matching.
//!
//! # Features
//!
//! - **High-quality phase vocoder**: STFT-based, 50% overlap
//! - **Transient preservation**: Detects attacks and resets phase
//! - **Phase locking**: Prevents phasy artifacts on harmonics
//! - **Zero-allocation**: All buffers pre-allocated
//! - **Optimized FFT**: Split-radix with pre-computed twiddles
//!
//! # Usage
//!
//! ```rust,ignore
//! use duodeck_audio::timestretcher::{PhaseVocoder, FftSize};
//!
//! let mut vocoder = PhaseVocoder::new(48000.0, FftSize::Small);
//! vocoder.set_stretch_ratio(1.5); // 50% slower, same pitch
//!
//! // In audio callback
//! for (left, right) in input.iter() {
//!     if let Some((out_l, out_r)) = vocoder.process(*left, *right) {
//!         // Use output samples
//!     }
//! }
//! ```
//!
//! # Algorithm Details
//!
//! The phase vocoder works by:
//! 1. Windowing input into overlapping frames (STFT)
//! 2. Converting to frequency domain via FFT
//! 3. Manipulating phase to stretch/compress time
//! 4. Converting back via IFFT
//! 5. Overlap-add to reconstruct signal
//!
//! Key innovations in this implementation:
//! - **Peak-locked phase**: Bins near spectral peaks inherit peak's phase
//! - **Transient detection**: Spectral flux triggers phase reset
//! - **Fast math**: Custom sqrt, atan2, sincos approximations

mod phase;
mod stft;

pub use phase::{PhaseLockMode, PhaseVocoder, TimeStretchParams};
pub use stft::{Complex, FftSize, Stft};
