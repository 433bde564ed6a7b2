//! # Audio Processing Module
//!
//! Turns uploaded clip bytes into model-ready PCM.
//!
//! ## Key Components:
//! - **Decoder**: Container/codec decode (WAV, WebM, ...) to 16kHz mono f32
//! - **VAD**: Energy-gate silence filtering ahead of inference
//!
//! The decoder is also where corruption is detected: a truncated or garbled
//! clip surfaces as a `DecodeError::Malformed`, which the transcription
//! engine tolerates instead of failing the caller's session.

pub mod decoder;
pub mod vad;

pub use decoder::{decode_to_pcm, DecodeError, DecodedAudio, WHISPER_SAMPLE_RATE};
pub use vad::{filter_silence, VadConfig};
