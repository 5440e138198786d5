//! Intelligibility scoring model.
//!
//! The model is the opaque blocking computation the worker pool runs. It is
//! loaded once per worker from a packed little-endian f32 weight file and
//! evaluates a fixed five-second window: shorter audio is treated as padded
//! with silence, longer audio is truncated.

use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};

/// Sample rate the model was trained at.
pub const SAMPLE_RATE: u32 = 16_000;

/// Fixed evaluation window: 5 seconds at 16 kHz.
pub const WINDOW_SAMPLES: usize = 5 * SAMPLE_RATE as usize;

/// 25 ms analysis frames.
const FRAME_SAMPLES: usize = 400;

/// A loaded regressor instance. One per pool worker.
pub struct ScoringModel {
    weights: Vec<f32>,
}

impl ScoringModel {
    /// Load model weights from a packed little-endian f32 file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)
            .map_err(|e| AppError::Config(format!("cannot read model {}: {}", path.display(), e)))?;
        if raw.is_empty() || raw.len() % 4 != 0 {
            return Err(AppError::Config(format!(
                "model {} is not a packed f32 weight file ({} bytes)",
                path.display(),
                raw.len()
            )));
        }

        let weights: Vec<f32> = raw
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(AppError::Config(format!(
                "model {} contains non-finite weights",
                path.display()
            )));
        }
        if weights.iter().all(|w| *w == 0.0) {
            return Err(AppError::Config(format!(
                "model {} has all-zero weights",
                path.display()
            )));
        }

        Ok(Self { weights })
    }

    /// Score one window of audio, producing an estimate in (0, 1).
    pub fn score(&self, audio: &[f32]) -> Result<f32> {
        if audio.iter().any(|sample| !sample.is_finite()) {
            return Err(AppError::InferenceFailed(
                "non-finite audio sample".to_string(),
            ));
        }

        let effective = audio.len().min(WINDOW_SAMPLES);
        let mut weighted = 0.0f64;
        let mut norm = 0.0f64;

        for frame_idx in 0..WINDOW_SAMPLES / FRAME_SAMPLES {
            let start = frame_idx * FRAME_SAMPLES;
            let end = (start + FRAME_SAMPLES).min(effective);
            // Frames past the end of the audio are silence.
            let energy: f64 = if start < end {
                audio[start..end]
                    .iter()
                    .map(|s| (*s as f64) * (*s as f64))
                    .sum::<f64>()
                    / FRAME_SAMPLES as f64
            } else {
                0.0
            };

            let weight = self.weights[frame_idx % self.weights.len()] as f64;
            weighted += weight * (1.0 + energy).ln();
            norm += weight.abs();
        }

        if norm == 0.0 {
            return Err(AppError::InferenceFailed(
                "degenerate model weights".to_string(),
            ));
        }

        let raw = weighted / norm;
        Ok((1.0 / (1.0 + (-raw).exp())) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn weight_file(weights: &[f32]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for w in weights {
            file.write_all(&w.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_a_packed_weight_file() {
        let file = weight_file(&[0.5, 1.0, -0.25]);
        let model = ScoringModel::load(file.path()).unwrap();
        assert_eq!(model.weights, vec![0.5, 1.0, -0.25]);
    }

    #[test]
    fn rejects_missing_empty_and_ragged_files() {
        assert!(ScoringModel::load(Path::new("/nonexistent/weights.bin")).is_err());

        let empty = NamedTempFile::new().unwrap();
        assert!(ScoringModel::load(empty.path()).is_err());

        let mut ragged = NamedTempFile::new().unwrap();
        ragged.write_all(&[1, 2, 3]).unwrap();
        assert!(ScoringModel::load(ragged.path()).is_err());
    }

    #[test]
    fn scores_fall_in_the_open_unit_interval() {
        let file = weight_file(&[1.0, 0.5]);
        let model = ScoringModel::load(file.path()).unwrap();

        for audio in [vec![0.0f32; WINDOW_SAMPLES], vec![0.3; 1000], vec![]] {
            let score = model.score(&audio).unwrap();
            assert!(score > 0.0 && score < 1.0, "score {} out of range", score);
        }
    }

    #[test]
    fn short_audio_scores_like_silence_padded_audio() {
        let file = weight_file(&[1.0, 0.5]);
        let model = ScoringModel::load(file.path()).unwrap();

        let short = vec![0.4f32; 12_345];
        let mut padded = short.clone();
        padded.resize(WINDOW_SAMPLES, 0.0);

        assert_eq!(model.score(&short).unwrap(), model.score(&padded).unwrap());
    }

    #[test]
    fn long_audio_is_truncated_to_the_window() {
        let file = weight_file(&[1.0, 0.5]);
        let model = ScoringModel::load(file.path()).unwrap();

        let window = vec![0.2f32; WINDOW_SAMPLES];
        let mut longer = window.clone();
        longer.extend(vec![0.9f32; 40_000]);

        assert_eq!(model.score(&window).unwrap(), model.score(&longer).unwrap());
    }

    #[test]
    fn non_finite_samples_fail_inference() {
        let file = weight_file(&[1.0]);
        let model = ScoringModel::load(file.path()).unwrap();
        let err = model.score(&[0.1, f32::NAN, 0.2]).unwrap_err();
        assert!(matches!(err, AppError::InferenceFailed(_)));
    }
}
