//! Energy-gate voice-activity filtering.
//!
//! Short clips from a live recorder carry leading/trailing silence and long
//! pauses; feeding those to Whisper wastes inference time and invites
//! hallucinated text. The gate drops only *sustained* silent spans — anything
//! shorter than the configured minimum survives, so quiet speech and natural
//! pauses are not clipped.

use crate::audio::WHISPER_SAMPLE_RATE;

/// Analysis frame length. 30ms frames are fine-grained enough that the
/// minimum-silence hangover dominates the gate's behavior.
const FRAME_MS: usize = 30;

/// Silence floor range in dBFS that the 0.0..=1.0 threshold maps into.
/// A low threshold lands near -60 dBFS (very permissive, keeps whispers);
/// 1.0 lands at -20 dBFS (aggressive).
const FLOOR_DB_MIN: f32 = -60.0;
const FLOOR_DB_MAX: f32 = -20.0;

/// Configuration for the silence gate.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Gate aggressiveness in 0.0..=1.0; kept permissive by default so quiet
    /// speech passes through
    pub threshold: f32,

    /// Silent spans at least this long are removed; shorter pauses are kept
    pub min_silence_duration_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            min_silence_duration_ms: 300,
        }
    }
}

/// Remove sustained silent spans from a 16kHz mono clip.
///
/// Returns the surviving samples; an entirely silent clip yields an empty
/// vector, which the engine treats as a valid no-speech outcome.
pub fn filter_silence(samples: &[f32], config: &VadConfig) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let frame_len = WHISPER_SAMPLE_RATE as usize * FRAME_MS / 1000;
    let floor_db = FLOOR_DB_MIN + config.threshold.clamp(0.0, 1.0) * (FLOOR_DB_MAX - FLOOR_DB_MIN);
    let min_silence_frames =
        (config.min_silence_duration_ms as usize / FRAME_MS).max(1);

    let silent: Vec<bool> = samples
        .chunks(frame_len)
        .map(|frame| rms_dbfs(frame) < floor_db)
        .collect();

    // Mark frames to drop: only runs of silence meeting the minimum length
    let mut drop = vec![false; silent.len()];
    let mut run_start = None;
    for (i, &is_silent) in silent.iter().enumerate() {
        match (is_silent, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start >= min_silence_frames {
                    drop[start..i].iter_mut().for_each(|d| *d = true);
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        if silent.len() - start >= min_silence_frames {
            drop[start..].iter_mut().for_each(|d| *d = true);
        }
    }

    let kept: Vec<f32> = samples
        .chunks(frame_len)
        .zip(&drop)
        .filter(|(_, &dropped)| !dropped)
        .flat_map(|(frame, _)| frame.iter().copied())
        .collect();

    let removed = samples.len() - kept.len();
    if removed > 0 {
        tracing::debug!(
            removed_samples = removed,
            kept_samples = kept.len(),
            floor_db = floor_db,
            "Silence gate removed sustained silent spans"
        );
    }

    kept
}

fn rms_dbfs(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return f32::NEG_INFINITY;
    }
    let mean_square: f32 = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
    let rms = mean_square.sqrt();
    if rms <= f32::EPSILON {
        f32::NEG_INFINITY
    } else {
        20.0 * rms.log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(duration_ms: usize, amplitude: f32) -> Vec<f32> {
        let n = WHISPER_SAMPLE_RATE as usize * duration_ms / 1000;
        (0..n)
            .map(|i| {
                amplitude * (i as f32 * 220.0 * 2.0 * std::f32::consts::PI / 16_000.0).sin()
            })
            .collect()
    }

    #[test]
    fn test_pure_silence_is_removed_entirely() {
        let samples = vec![0.0f32; 2 * WHISPER_SAMPLE_RATE as usize];
        let kept = filter_silence(&samples, &VadConfig::default());
        assert!(kept.is_empty());
    }

    #[test]
    fn test_speech_passes_untouched() {
        let samples = tone(1000, 0.5);
        let kept = filter_silence(&samples, &VadConfig::default());
        assert_eq!(kept.len(), samples.len());
    }

    #[test]
    fn test_short_pause_is_kept() {
        let mut samples = tone(500, 0.5);
        samples.extend(vec![0.0f32; WHISPER_SAMPLE_RATE as usize / 10]); // 100ms pause
        samples.extend(tone(500, 0.5));

        let kept = filter_silence(&samples, &VadConfig::default());
        assert_eq!(kept.len(), samples.len());
    }

    #[test]
    fn test_long_silence_is_dropped_but_speech_survives() {
        let speech_len = WHISPER_SAMPLE_RATE as usize; // 2 x 500ms
        let mut samples = tone(500, 0.5);
        samples.extend(vec![0.0f32; 2 * WHISPER_SAMPLE_RATE as usize]); // 2s gap
        samples.extend(tone(500, 0.5));

        let kept = filter_silence(&samples, &VadConfig::default());
        assert!(kept.len() < samples.len());
        // Everything audible survives, allowing for frame-boundary rounding
        let frame_len = WHISPER_SAMPLE_RATE as usize * FRAME_MS / 1000;
        assert!(kept.len() >= speech_len.saturating_sub(2 * frame_len));
    }

    #[test]
    fn test_quiet_speech_survives_permissive_threshold() {
        // -40 dBFS sits under an aggressive gate but above the default floor
        let samples = tone(500, 0.01);
        let kept = filter_silence(&samples, &VadConfig::default());
        assert_eq!(kept.len(), samples.len());
    }
}
