use crate::error::{ChirpError, Result};
use rubato::{FftFixedIn, Resampler};

/// Offline resampler used when a bank is loaded at a rate other than the
/// engine's mix rate.
pub struct BatchResampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    channels: u16,
    chunk_size: usize,
}

impl BatchResampler {
    /// # Arguments
    /// * `source_sample_rate` - The sample rate of the input audio
    /// * `target_sample_rate` - The desired sample rate of the output audio
    /// * `channels` - Number of channels in the audio data
    /// * `chunk_size` - Optional size of processing chunks (defaults to 1024)
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: u16,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(ChirpError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        if channels == 0 {
            return Err(ChirpError::AudioFormat(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            channels,
            chunk_size: chunk_size.unwrap_or(1024).max(1),
        })
    }

    /// Resamples one channel.
    ///
    /// # Data Format
    /// - **Input**: NON-INTERLEAVED (planar) single channel `[L0, L1, L2, ...]`
    /// - **Output**: NON-INTERLEAVED (planar) single channel
    ///
    /// The last chunk is zero-padded for rubato; the padding is trimmed so the
    /// output holds `ceil(len * ratio)` samples at most.
    pub fn resample_channel(&self, channel_samples: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(channel_samples.to_vec());
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2, // sub_chunks
            1, // single channel
        )
        .map_err(|e| ChirpError::AudioLoading(format!("Failed to create resampler: {}", e)))?;

        let expected = (channel_samples.len() as f64 * self.resample_ratio()).ceil() as usize;
        let mut output = Vec::with_capacity(expected + self.chunk_size);
        let mut input_chunk = vec![0.0f32; self.chunk_size];

        for chunk in channel_samples.chunks(self.chunk_size) {
            input_chunk[..chunk.len()].copy_from_slice(chunk);
            input_chunk[chunk.len()..].fill(0.0);

            let waves_out = resampler
                .process(&[&input_chunk[..]], None)
                .map_err(|e| ChirpError::AudioLoading(format!("Resampling error: {}", e)))?;

            if let Some(first_channel) = waves_out.first() {
                output.extend_from_slice(first_channel);
            }
        }

        output.truncate(expected);
        Ok(output)
    }

    /// Resamples interleaved audio by splitting it into channels, resampling each
    /// and interleaving the results again.
    pub fn resample_interleaved(&self, interleaved_samples: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(interleaved_samples.to_vec());
        }

        let channels = self.channels as usize;
        let resampled_channels = (0..channels)
            .map(|ch| {
                let planar: Vec<f32> = interleaved_samples
                    .chunks_exact(channels)
                    .map(|frame| frame[ch])
                    .collect();
                self.resample_channel(&planar)
            })
            .collect::<Result<Vec<_>>>()?;

        let new_frames = resampled_channels
            .iter()
            .map(Vec::len)
            .min()
            .unwrap_or(0);

        let mut interleaved = Vec::with_capacity(new_frames * channels);
        for frame_idx in 0..new_frames {
            for channel in &resampled_channels {
                interleaved.push(channel[frame_idx]);
            }
        }

        Ok(interleaved)
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    /// target/source: `> 1.0` upsamples, `< 1.0` downsamples.
    pub fn resample_ratio(&self) -> f64 {
        self.target_sample_rate as f64 / self.source_sample_rate as f64
    }
}
