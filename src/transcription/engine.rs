//! # Transcription Engine
//!
//! Core of the request pipeline: takes an audio source and a language hint,
//! produces a classified outcome. Owns inference-parameter policy, the
//! single-flight inference lock, and failure classification.
//!
//! ## Key Responsibilities:
//! - **Source validation**: Reject missing or trivially small files before
//!   any decode/model work
//! - **Audio preparation**: Container decode plus silence gating
//! - **Outcome classification**: Corrupted chunks come back as data, not
//!   errors, so a live session with occasional bad chunks keeps flowing
//!
//! The defining asymmetry: decode failures that look like a truncated or
//! garbled chunk become a `CorruptedChunk` outcome (HTTP 200, empty text);
//! everything else is `Failed` and surfaces as an HTTP error.

use crate::audio::{self, DecodeError, VadConfig};
use crate::config::TranscriptionSettings;
use crate::transcription::model::{InferenceError, WhisperModel};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;

/// Where a request's audio bytes live. Exactly one variant per request; the
/// handlers materialize uploads to a temp file and pass `FilePath`.
pub enum AudioSource<'a> {
    FilePath(&'a Path),
    Buffer(&'a [u8]),
}

/// Internal pipeline failure, classified into an outcome before it ever
/// leaves the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Pre-model validation failure (missing file, below minimum size)
    #[error("{0}")]
    SourceRejected(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("failed to read audio source: {0}")]
    Io(#[from] std::io::Error),
}

/// Successful transcription of one clip.
#[derive(Debug, Clone, Serialize)]
pub struct Transcription {
    pub text: String,
    pub detected_language: String,
    pub language_confidence: f32,
    pub audio_duration_seconds: f64,
    pub processing_time_ms: f64,
    pub segment_count: usize,
}

/// What a transcription request produced. Failures are data here — the
/// handler decides what becomes an HTTP error.
#[derive(Debug)]
pub enum TranscribeOutcome {
    Completed(Transcription),
    CorruptedChunk { processing_time_ms: f64 },
    Failed { message: String, processing_time_ms: f64 },
}

struct PreparedText {
    text: String,
    segment_count: usize,
    audio_duration_seconds: f64,
}

/// Shared transcription engine.
///
/// ## Thread Safety:
/// The loaded model is a single device-bound resource that is not safe to
/// run concurrently; all inference goes through one `tokio::sync::Mutex`.
/// Concurrent requests queue on the lock and accept the tail latency.
pub struct TranscriptionEngine {
    model: Mutex<WhisperModel>,
    settings: TranscriptionSettings,
}

impl TranscriptionEngine {
    pub fn new(model: WhisperModel, settings: TranscriptionSettings) -> Self {
        Self {
            model: Mutex::new(model),
            settings,
        }
    }

    /// Transcribe one clip. Never returns an error: every failure is folded
    /// into a `TranscribeOutcome` variant.
    pub async fn transcribe(&self, source: AudioSource<'_>, language: &str) -> TranscribeOutcome {
        let start_time = Instant::now();

        match self.run(source, language).await {
            Ok(prepared) => {
                let processing_time_ms = elapsed_ms(start_time);

                if prepared.text.is_empty() {
                    tracing::info!(
                        processing_time_ms = processing_time_ms as u64,
                        "No speech detected (possible silence)"
                    );
                } else {
                    tracing::info!(
                        processing_time_ms = processing_time_ms as u64,
                        chars = prepared.text.len(),
                        segments = prepared.segment_count,
                        "Transcription completed"
                    );
                }

                TranscribeOutcome::Completed(Transcription {
                    text: prepared.text,
                    detected_language: language.to_string(),
                    language_confidence: 1.0,
                    audio_duration_seconds: prepared.audio_duration_seconds,
                    processing_time_ms,
                    segment_count: prepared.segment_count,
                })
            }
            Err(err) => {
                let processing_time_ms = elapsed_ms(start_time);

                if is_corrupted_chunk(&err, &self.settings.corruption_signatures) {
                    tracing::warn!(
                        processing_time_ms = processing_time_ms as u64,
                        error = %err,
                        "Corrupted chunk detected, skipping"
                    );
                    TranscribeOutcome::CorruptedChunk { processing_time_ms }
                } else {
                    let message = err.to_string();
                    tracing::error!(
                        processing_time_ms = processing_time_ms as u64,
                        error = %message,
                        "Transcription failed"
                    );
                    TranscribeOutcome::Failed {
                        message,
                        processing_time_ms,
                    }
                }
            }
        }
    }

    async fn run(
        &self,
        source: AudioSource<'_>,
        language: &str,
    ) -> Result<PreparedText, EngineError> {
        let bytes = read_source(source, self.settings.min_source_bytes)?;

        let decoded = audio::decode_to_pcm(&bytes)?;

        let vad = VadConfig {
            threshold: self.settings.vad_threshold,
            min_silence_duration_ms: self.settings.min_silence_duration_ms,
        };
        let voiced = audio::filter_silence(&decoded.samples, &vad);

        // An all-silent clip is a valid outcome, and skipping the model
        // avoids hallucinated text on empty input
        let segments = if voiced.is_empty() {
            Vec::new()
        } else {
            let mut model = self.model.lock().await;
            model.transcribe_pcm(&voiced, language)?
        };

        Ok(PreparedText {
            text: join_segments(&segments),
            segment_count: segments.len(),
            audio_duration_seconds: decoded.duration_seconds,
        })
    }
}

/// Load the request's bytes, applying the fail-fast size check to file-path
/// sources so a truncated upload never reaches the model.
fn read_source(source: AudioSource<'_>, min_source_bytes: u64) -> Result<Vec<u8>, EngineError> {
    match source {
        AudioSource::FilePath(path) => {
            let metadata = std::fs::metadata(path).map_err(|_| {
                EngineError::SourceRejected(format!("Audio file not found: {}", path.display()))
            })?;

            let file_size = metadata.len();
            if file_size < min_source_bytes {
                return Err(EngineError::SourceRejected(format!(
                    "Audio file too small or truncated: {} bytes",
                    file_size
                )));
            }

            tracing::debug!(path = %path.display(), bytes = file_size, "Reading audio source");
            Ok(std::fs::read(path)?)
        }
        AudioSource::Buffer(bytes) => Ok(bytes.to_vec()),
    }
}

/// Trim each segment and join with single spaces.
fn join_segments(segments: &[String]) -> String {
    segments
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decide whether a pipeline failure is the tolerated corruption class.
///
/// Structurally malformed audio always qualifies. For other failures the
/// configured signature list is matched against the message, covering the
/// inference backend's own error vocabulary.
fn is_corrupted_chunk(err: &EngineError, signatures: &[String]) -> bool {
    match err {
        EngineError::Decode(DecodeError::Malformed(_)) | EngineError::Decode(DecodeError::Empty) => {
            true
        }
        other => {
            let message = other.to_string().to_lowercase();
            signatures
                .iter()
                .any(|sig| !sig.is_empty() && message.contains(&sig.to_lowercase()))
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn default_signatures() -> Vec<String> {
        crate::config::AppConfig::default()
            .transcription
            .corruption_signatures
    }

    #[test]
    fn test_malformed_decode_is_always_corrupted() {
        let err = EngineError::Decode(DecodeError::Malformed("decode: bad vint".to_string()));
        assert!(is_corrupted_chunk(&err, &[]));
        assert!(is_corrupted_chunk(&err, &default_signatures()));
    }

    #[test]
    fn test_empty_decode_is_corrupted() {
        let err = EngineError::Decode(DecodeError::Empty);
        assert!(is_corrupted_chunk(&err, &[]));
    }

    #[test]
    fn test_backend_message_matches_configured_signature() {
        let err = EngineError::Inference(InferenceError::Backend(
            "Invalid data found when processing input".to_string(),
        ));
        assert!(is_corrupted_chunk(&err, &default_signatures()));
    }

    #[test]
    fn test_unrelated_backend_error_is_fatal() {
        let err = EngineError::Inference(InferenceError::Backend(
            "CUDA error: out of memory".to_string(),
        ));
        assert!(!is_corrupted_chunk(&err, &default_signatures()));
    }

    #[test]
    fn test_source_rejection_is_fatal() {
        let err = EngineError::SourceRejected("Audio file too small or truncated: 12 bytes".into());
        assert!(!is_corrupted_chunk(&err, &default_signatures()));
    }

    #[test]
    fn test_unsupported_format_is_fatal() {
        let err = EngineError::Decode(DecodeError::Unsupported("codec: opus".to_string()));
        assert!(!is_corrupted_chunk(&err, &default_signatures()));
    }

    #[test]
    fn test_read_source_rejects_missing_file() {
        let path = Path::new("/nonexistent/clip.webm");
        let err = read_source(AudioSource::FilePath(path), 1000).unwrap_err();
        assert!(matches!(err, EngineError::SourceRejected(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_read_source_rejects_tiny_file_before_decode() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 12]).unwrap();
        file.flush().unwrap();

        let err = read_source(AudioSource::FilePath(file.path()), 1000).unwrap_err();
        assert!(matches!(err, EngineError::SourceRejected(_)));
        assert!(err.to_string().contains("12 bytes"));
    }

    #[test]
    fn test_read_source_accepts_file_at_threshold() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 1000]).unwrap();
        file.flush().unwrap();

        let bytes = read_source(AudioSource::FilePath(file.path()), 1000).unwrap();
        assert_eq!(bytes.len(), 1000);
    }

    #[test]
    fn test_read_source_buffer_passes_through_without_size_check() {
        // The minimum-size rule is for file-path sources only
        let bytes = read_source(AudioSource::Buffer(&[1, 2, 3]), 1000).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_join_segments_trims_and_single_spaces() {
        let segments = vec![
            "  Hola mundo ".to_string(),
            "".to_string(),
            " qué tal  ".to_string(),
        ];
        assert_eq!(join_segments(&segments), "Hola mundo qué tal");
        assert_eq!(join_segments(&[]), "");
    }
}
