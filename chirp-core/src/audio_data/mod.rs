//! Asset decoding for banks.
//!
//! Loaders turn a bank path into [`SoundAsset`]s holding [`DecodedAudio`];
//! [`Bank::from_assets`](crate::bank::Bank::from_assets) then packs them into
//! resident PCM storage.

mod batch_resampler;
mod default_loader;
mod load_options;
mod loader;

use crate::error::{ChirpError, Result};
pub use batch_resampler::BatchResampler;
pub use default_loader::{BANK_EXTENSIONS, SymphoniaBankLoader, decode_file};
pub use load_options::{ConvertToMono, LoadOptions, PcmEncoding};
pub use loader::{BankLoader, SoundAsset};
use std::time::Duration;

/// Decoded audio in `f32`, before it is packed into a bank.
///
/// # Data Format
/// Samples are **INTERLEAVED**: stereo is `[L0, R0, L1, R1, ...]`, and
/// `samples.len() == total_frames * channels`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl DecodedAudio {
    /// Wraps interleaved samples. A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(ChirpError::AudioFormat(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if channels == 0 {
            return Err(ChirpError::AudioFormat(
                "Channel count must be greater than 0".to_string(),
            ));
        }
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Load and decode a single file with the Symphonia loader.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        decode_file(path.as_ref())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn total_frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_frames() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Convert to mono by averaging all channels
    pub fn to_mono(&self) -> Self {
        if self.channels == 1 {
            return self.clone();
        }

        let samples = self
            .samples
            .chunks(self.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect();

        Self {
            samples,
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }

    /// Resample to a different rate with rubato.
    pub fn resample(&self, target_sample_rate: u32) -> Result<Self> {
        if target_sample_rate == self.sample_rate {
            return Ok(self.clone());
        }

        let resampler = BatchResampler::new(
            self.sample_rate,
            target_sample_rate,
            self.channels,
            Some(1024),
        )?;
        let samples = resampler.resample_interleaved(&self.samples)?;

        log::debug!(
            "Resampled {} Hz -> {} Hz ({} -> {} frames)",
            self.sample_rate,
            target_sample_rate,
            self.total_frames(),
            samples.len() / self.channels as usize
        );

        Self::new(samples, target_sample_rate, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_partial_frame() {
        let audio = DecodedAudio::new(vec![0.1, 0.2, 0.3], 48000, 2).unwrap();
        assert_eq!(audio.total_frames(), 1);
        assert_eq!(audio.samples(), &[0.1, 0.2]);
    }

    #[test]
    fn rejects_zero_channels() {
        assert!(DecodedAudio::new(vec![], 48000, 0).is_err());
    }

    #[test]
    fn mono_averages_channels() {
        let audio = DecodedAudio::new(vec![1.0, 0.0, 0.5, 0.5], 44100, 2).unwrap();
        let mono = audio.to_mono();
        assert_eq!(mono.channels(), 1);
        assert_eq!(mono.samples(), &[0.5, 0.5]);
    }

    #[test]
    fn resample_changes_length_by_ratio() {
        let samples: Vec<f32> = (0..44100)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 44100.0).sin())
            .collect();
        let audio = DecodedAudio::new(samples, 44100, 1).unwrap();
        let resampled = audio.resample(48000).unwrap();

        assert_eq!(resampled.sample_rate(), 48000);
        let frames = resampled.total_frames() as f64;
        assert!((frames - 48000.0).abs() < 2048.0, "got {frames} frames");
    }
}
