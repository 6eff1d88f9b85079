//! Real-time audio core for duodeck: clocks, decks, mixer, time-stretch,
//! and tempo-phase sync.
//!
//! - [`master_clock`] / [`audio_clock`]: the shared time reference
//! - [`deck`]: per-deck transport, ring hand-off, and analysis workers
//! - [`mixer`]: equal-power crossfade and the output limiter
//! - [`tempo_phase_sync`]: the beat-phase PLL between two decks
//! - [`timestretch`] / [`timestretcher`]: the block contract and the
//!   underlying phase vocoder
//! - [`engine`]: thread orchestration and the audio callback

mod audio_clock;
mod deck;
mod engine;
mod master_clock;
mod mixer;
mod tempo_phase_sync;
mod timestretch;
pub mod timestretcher;
mod track_loader;

pub use audio_clock::AudioClock;
pub use deck::{Deck, DeckError, DeckStatus, PitchRangeKey};
pub use engine::{Command, Engine, EngineConfig, EngineTelemetry, Event};
pub use master_clock::{MasterClock, MasterClockState};
pub use mixer::{crossfade_weights, fader_to_linear_gain, Mixer, PeakMeter};
pub use tempo_phase_sync::{SyncQuality, SyncTarget, TempoPhaseSync};
pub use timestretch::TimeStretchEngine;
pub use track_loader::{load_track, LoadError, Track};
