//! # Transcription Request Handlers
//!
//! Two ingress variants with the same downstream contract:
//!
//! - `POST /transcribe` — multipart upload, file field `audio`, optional
//!   `language` form field
//! - `POST /transcribe-udp` — raw request body as audio bytes, optional
//!   `X-Language` header (the low-overhead path the live recorder uses)
//!
//! Both materialize the clip into a uniquely named temp file, hand the path
//! to the engine, and delete the file on every exit path. A corrupted chunk
//! serializes as HTTP 200 with empty text so the caller's session continues;
//! only fatal failures become HTTP errors.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::{AudioSource, TranscribeOutcome, Transcription};
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};
use uuid::Uuid;

/// Successful transcription, in the wire shape the client expects.
#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub text: String,
    pub language: String,
    pub language_probability: f32,
    pub duration: f64,
    pub processing_time: f64,
    pub segments_count: usize,
}

impl From<Transcription> for TranscriptionResponse {
    fn from(t: Transcription) -> Self {
        Self {
            text: t.text,
            language: t.detected_language,
            language_probability: t.language_confidence,
            duration: t.audio_duration_seconds,
            processing_time: t.processing_time_ms,
            segments_count: t.segment_count,
        }
    }
}

/// Tolerated corrupt-chunk outcome: still HTTP 200, empty text, marked so
/// the client can count skipped chunks if it cares.
#[derive(Debug, Serialize)]
pub struct CorruptedChunkResponse {
    pub text: String,
    pub error_type: &'static str,
    pub processing_time: f64,
}

/// `POST /transcribe` — multipart file upload.
pub async fn transcribe(
    state: web::Data<AppState>,
    mut payload: actix_multipart::Multipart,
) -> AppResult<HttpResponse> {
    let mut audio: Option<Vec<u8>> = None;
    let mut filename = String::new();
    let mut language_field: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let (name, field_filename) = {
            let content_disposition = field.content_disposition().ok_or_else(|| {
                AppError::BadRequest("Missing content disposition".to_string())
            })?;
            (
                content_disposition.get_name().unwrap_or_default().to_string(),
                content_disposition
                    .get_filename()
                    .unwrap_or_default()
                    .to_string(),
            )
        };

        match name.as_str() {
            "audio" => {
                filename = field_filename;
                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk =
                        chunk.map_err(|e| AppError::BadRequest(format!("Upload error: {}", e)))?;
                    bytes.extend_from_slice(&chunk);
                }
                audio = Some(bytes);
            }
            "language" => {
                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk =
                        chunk.map_err(|e| AppError::BadRequest(format!("Upload error: {}", e)))?;
                    bytes.extend_from_slice(&chunk);
                }
                language_field = Some(String::from_utf8_lossy(&bytes).trim().to_string());
            }
            _ => {}
        }
    }

    let audio = require_audio_field(audio, &filename)?;
    let language = resolve_language(language_field, &state.get_config().model.default_language);

    transcribe_clip(&state, &audio, &filename, &language).await
}

/// `POST /transcribe-udp` — raw body upload.
pub async fn transcribe_raw(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    if body.is_empty() {
        return Err(AppError::BadRequest("No audio data provided".to_string()));
    }

    let header_language = req
        .headers()
        .get("X-Language")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string());
    let language = resolve_language(header_language, &state.get_config().model.default_language);

    // No filename hint on the raw path; recorder chunks are WebM
    transcribe_clip(&state, &body, "", &language).await
}

/// Shared downstream: materialize bytes to a unique temp file, run the
/// engine, map the outcome, and delete the file no matter what happened.
async fn transcribe_clip(
    state: &AppState,
    bytes: &[u8],
    filename: &str,
    language: &str,
) -> AppResult<HttpResponse> {
    let request_id = Uuid::new_v4();
    let suffix = temp_suffix(filename);

    info!(
        request_id = %request_id,
        bytes = bytes.len(),
        language = %language,
        suffix = suffix,
        "Received audio clip"
    );

    // NamedTempFile deletes on drop, so every early return below — and a
    // panic inside the engine — still cleans up. The explicit close() at the
    // end only exists to log deletion failures.
    let mut temp_file = tempfile::Builder::new()
        .prefix("clip-")
        .suffix(suffix)
        .tempfile()
        .map_err(|e| AppError::Internal(format!("Failed to create temporary file: {}", e)))?;

    temp_file
        .write_all(bytes)
        .map_err(|e| AppError::Internal(format!("Failed to write temporary file: {}", e)))?;
    temp_file
        .flush()
        .map_err(|e| AppError::Internal(format!("Failed to flush temporary file: {}", e)))?;

    let outcome = state
        .engine
        .transcribe(AudioSource::FilePath(temp_file.path()), language)
        .await;

    let temp_path = temp_file.into_temp_path();
    if let Err(e) = temp_path.close() {
        warn!(request_id = %request_id, error = %e, "Failed to delete temporary audio file");
    }

    match outcome {
        TranscribeOutcome::Completed(transcription) => {
            Ok(HttpResponse::Ok().json(TranscriptionResponse::from(transcription)))
        }
        TranscribeOutcome::CorruptedChunk { processing_time_ms } => {
            state.record_corrupted_chunk();
            Ok(HttpResponse::Ok().json(CorruptedChunkResponse {
                text: String::new(),
                error_type: "corrupted_chunk",
                processing_time: processing_time_ms,
            }))
        }
        TranscribeOutcome::Failed { message, .. } => Err(AppError::Internal(message)),
    }
}

/// Validate the multipart upload: the field must be present and carry a
/// filename, mirroring what the client treats as a user-visible error.
fn require_audio_field(audio: Option<Vec<u8>>, filename: &str) -> Result<Vec<u8>, AppError> {
    let audio = audio.ok_or_else(|| AppError::BadRequest("No audio file provided".to_string()))?;

    if filename.is_empty() {
        return Err(AppError::BadRequest("No audio file selected".to_string()));
    }

    Ok(audio)
}

/// A caller-provided hint beats the configured default; blank means absent.
fn resolve_language(explicit: Option<String>, default: &str) -> String {
    explicit
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Keep a `.wav` suffix when the upload says so; everything else lands as
/// the generic compressed-audio suffix browser recorders produce.
fn temp_suffix(filename: &str) -> &'static str {
    if filename.ends_with(".wav") {
        ".wav"
    } else {
        ".webm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn test_temp_suffix() {
        assert_eq!(temp_suffix("clip.wav"), ".wav");
        assert_eq!(temp_suffix("clip.webm"), ".webm");
        assert_eq!(temp_suffix("clip.ogg"), ".webm");
        assert_eq!(temp_suffix(""), ".webm");
    }

    #[test]
    fn test_resolve_language() {
        assert_eq!(resolve_language(Some("en".to_string()), "es"), "en");
        assert_eq!(resolve_language(Some(String::new()), "es"), "es");
        assert_eq!(resolve_language(None, "es"), "es");
    }

    #[test]
    fn test_missing_audio_field_message() {
        let err = require_audio_field(None, "clip.webm").unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "No audio file provided"));
    }

    #[test]
    fn test_empty_filename_message() {
        let err = require_audio_field(Some(vec![1, 2, 3]), "").unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "No audio file selected"));
    }

    #[test]
    fn test_audio_field_accepted() {
        let bytes = require_audio_field(Some(vec![1, 2, 3]), "clip.webm").unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[actix_web::test]
    async fn test_error_body_is_flat_error_object() {
        let resp =
            AppError::BadRequest("No audio file provided".to_string()).error_response();
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], br#"{"error":"No audio file provided"}"#);
    }

    #[test]
    fn test_corrupted_chunk_wire_shape() {
        let response = CorruptedChunkResponse {
            text: String::new(),
            error_type: "corrupted_chunk",
            processing_time: 12.5,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["text"], "");
        assert_eq!(json["error_type"], "corrupted_chunk");
    }

    #[test]
    fn test_transcription_wire_shape() {
        let response = TranscriptionResponse::from(Transcription {
            text: "hola mundo".to_string(),
            detected_language: "es".to_string(),
            language_confidence: 1.0,
            audio_duration_seconds: 2.0,
            processing_time_ms: 150.0,
            segment_count: 1,
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["text"], "hola mundo");
        assert_eq!(json["language"], "es");
        assert_eq!(json["segments_count"], 1);
        assert!(json.get("error").is_none());
    }
}
