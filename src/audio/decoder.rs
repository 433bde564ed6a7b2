//! # Clip Decoding
//!
//! Decodes a complete uploaded clip (WAV from test tooling, WebM/Matroska
//! from browser recorders, plus whatever else symphonia was compiled with)
//! into the 16kHz mono f32 PCM the Whisper model consumes.
//!
//! Decode failures are classified into a closed set so the engine can pattern
//! match instead of scraping error strings: `Malformed` is the recoverable
//! corruption class, everything else is fatal to the request.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Sample rate expected by the Whisper model.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// How an uploaded clip failed to decode.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Truncated or garbled container/stream — the corruption class a live
    /// recording session is expected to produce occasionally
    #[error("malformed audio data: {0}")]
    Malformed(String),

    /// A format or codec this build cannot handle
    #[error("unsupported audio format: {0}")]
    Unsupported(String),

    /// Container probed fine but exposes no audio track
    #[error("no audio track found")]
    NoAudioTrack,

    /// Decoding finished without producing a single sample
    #[error("no audio samples decoded")]
    Empty,
}

/// Decoded clip: 16kHz mono samples plus the clip duration they represent.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub duration_seconds: f64,
}

/// Decode a full clip held in memory to 16kHz mono f32 PCM.
pub fn decode_to_pcm(data: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| classify(e, "probe"))?;

    let mut format = probed.format;

    let track = format.default_track().ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::Malformed("unknown sample rate".to_string()))?;
    let channels = codec_params.channels.map(|c| c.count()).unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| classify(e, "codec"))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            // Normal end of a well-formed stream
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(classify(e, "packet")),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => return Err(classify(e, "decode")),
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();
        if num_frames == 0 {
            continue;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let interleaved = sample_buf.samples();

        if channels > 1 {
            for frame in interleaved.chunks(channels) {
                let mono: f32 = frame.iter().sum::<f32>() / channels as f32;
                samples.push(mono);
            }
        } else {
            samples.extend_from_slice(interleaved);
        }
    }

    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    if source_rate != WHISPER_SAMPLE_RATE {
        samples = resample(&samples, source_rate, WHISPER_SAMPLE_RATE)?;
    }

    let duration_seconds = samples.len() as f64 / WHISPER_SAMPLE_RATE as f64;

    tracing::debug!(
        samples = samples.len(),
        duration_seconds = duration_seconds,
        source_rate = source_rate,
        channels = channels,
        "Clip decoded to 16kHz mono PCM"
    );

    Ok(DecodedAudio {
        samples,
        duration_seconds,
    })
}

/// Map a symphonia error into the closed classification set.
fn classify(err: SymphoniaError, context: &str) -> DecodeError {
    match err {
        SymphoniaError::Unsupported(what) => {
            DecodeError::Unsupported(format!("{}: {}", context, what))
        }
        SymphoniaError::DecodeError(msg) => DecodeError::Malformed(format!("{}: {}", context, msg)),
        SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            DecodeError::Malformed(format!("{}: unexpected eof", context))
        }
        other => DecodeError::Malformed(format!("{}: {}", context, other)),
    }
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, DecodeError> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let chunk_size = 1024;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1)
        .map_err(|e| DecodeError::Malformed(format!("resampler init: {}", e)))?;

    let mut output = Vec::with_capacity((samples.len() as f64 * ratio) as usize + chunk_size);

    for chunk in samples.chunks(chunk_size) {
        let input = if chunk.len() < chunk_size {
            let mut padded = chunk.to_vec();
            padded.resize(chunk_size, 0.0);
            padded
        } else {
            chunk.to_vec()
        };

        let result = resampler
            .process(&[input], None)
            .map_err(|e| DecodeError::Malformed(format!("resample: {}", e)))?;

        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
    }

    // The tail chunk was zero-padded; trim back to the expected length
    let expected_len = (samples.len() as f64 * ratio) as usize;
    output.truncate(expected_len);

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[f32], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer
                    .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decodes_16k_wav_without_resampling() {
        let samples: Vec<f32> = (0..16_000)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 16_000.0).sin() * 0.5)
            .collect();
        let bytes = wav_bytes(&samples, 16_000);

        let decoded = decode_to_pcm(&bytes).unwrap();
        assert_eq!(decoded.samples.len(), 16_000);
        assert!((decoded.duration_seconds - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_resamples_48k_wav_to_16k() {
        let samples: Vec<f32> = (0..48_000)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 48_000.0).sin() * 0.5)
            .collect();
        let bytes = wav_bytes(&samples, 48_000);

        let decoded = decode_to_pcm(&bytes).unwrap();
        // One second of audio regardless of source rate, within resampler slack
        assert!((decoded.samples.len() as i64 - 16_000).abs() < 64);
        assert!((decoded.duration_seconds - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_garbage_bytes_classify_as_corruption() {
        let garbage = vec![0xAB; 4096];
        match decode_to_pcm(&garbage) {
            Err(DecodeError::Malformed(_)) | Err(DecodeError::Unsupported(_)) => {}
            other => panic!("expected decode failure, got {:?}", other.map(|d| d.samples.len())),
        }
    }

    #[test]
    fn test_truncated_wav_classifies_as_malformed() {
        let samples: Vec<f32> = vec![0.25; 16_000];
        let mut bytes = wav_bytes(&samples, 16_000);
        // Chop the file mid-header so even probing cannot finish
        bytes.truncate(20);

        match decode_to_pcm(&bytes) {
            Err(DecodeError::Malformed(_)) | Err(DecodeError::Unsupported(_)) => {}
            other => panic!("expected malformed, got {:?}", other.map(|d| d.samples.len())),
        }
    }
}
