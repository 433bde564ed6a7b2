//! # Transcription Module
//!
//! Speech-to-text via Whisper models on the Candle-rs framework — a pure
//! Rust stack with no FFI bindings to whisper.cpp.
//!
//! ## Key Components:
//! - **Model Management**: Loading Whisper models onto the selected device
//! - **Transcription Engine**: Clip-to-text pipeline with outcome
//!   classification and the global inference lock

pub mod engine;
pub mod model;

pub use engine::{AudioSource, TranscribeOutcome, Transcription, TranscriptionEngine};
pub use model::{ModelSize, WhisperModel};
