use crate::error::{ChirpError, Result};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

/// Type of resampler algorithm to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerType {
    /// Fast polynomial resampler - lower quality but faster
    Fast,
    /// Sinc interpolation resampler - higher quality but slower
    #[default]
    Sinc,
}

enum ResamplerImpl {
    Fast(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
}

impl ResamplerImpl {
    fn process_into(
        &mut self,
        input: &[Vec<f32>],
        output: &mut [Vec<f32>],
    ) -> std::result::Result<(usize, usize), rubato::ResampleError> {
        match self {
            Self::Fast(r) => r.process_into_buffer(input, output, None),
            Self::Sinc(r) => r.process_into_buffer(input, output, None),
        }
    }

    fn output_frames_max(&self) -> usize {
        match self {
            Self::Fast(r) => r.output_frames_max(),
            Self::Sinc(r) => r.output_frames_max(),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Fast(r) => r.reset(),
            Self::Sinc(r) => r.reset(),
        }
    }
}

/// Converts a stream from its native rate to the engine rate on the refill
/// side.
///
/// Input arrives in arbitrary amounts; it is staged until a full fixed-size
/// chunk is available, then resampled and appended to the caller's output.
pub struct StreamResampler {
    resampler: ResamplerImpl,
    source_sample_rate: u32,
    target_sample_rate: u32,
    channels: usize,
    chunk_frames: usize,
    staged_frames: usize,
    waves_in: Vec<Vec<f32>>,
    waves_out: Vec<Vec<f32>>,
}

impl StreamResampler {
    /// # Arguments
    /// * `source_sample_rate` - Native rate of the stream
    /// * `target_sample_rate` - Engine mix rate
    /// * `channels` - Number of audio channels
    /// * `chunk_frames` - Fixed number of input frames per resampling pass
    /// * `resampler_type` - Algorithm (defaults to Sinc if None)
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: u16,
        chunk_frames: usize,
        resampler_type: Option<ResamplerType>,
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

        if chunk_frames == 0 {
            return Err(ChirpError::AudioFormat(
                "Input frames must be greater than 0".to_string(),
            ));
        }

        // target/source (output/input)
        let resample_ratio = target_sample_rate as f64 / source_sample_rate as f64;
        let resampler_type = resampler_type.unwrap_or_default();

        log::debug!(
            "Creating {:?} stream resampler: {} Hz -> {} Hz (chunk: {} frames)",
            resampler_type,
            source_sample_rate,
            target_sample_rate,
            chunk_frames
        );

        let resampler = match resampler_type {
            ResamplerType::Fast => {
                let fast = FastFixedIn::new(
                    resample_ratio,
                    1.0,
                    PolynomialDegree::Septic,
                    chunk_frames,
                    channels as usize,
                )
                .map_err(|e| {
                    ChirpError::AudioLoading(format!("Failed to create fast resampler: {}", e))
                })?;
                ResamplerImpl::Fast(fast)
            }
            ResamplerType::Sinc => {
                let params = SincInterpolationParameters {
                    sinc_len: 256,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: 256,
                    window: WindowFunction::BlackmanHarris2,
                };

                let sinc = SincFixedIn::new(
                    resample_ratio,
                    1.0,
                    params,
                    chunk_frames,
                    channels as usize,
                )
                .map_err(|e| {
                    ChirpError::AudioLoading(format!("Failed to create sinc resampler: {}", e))
                })?;
                ResamplerImpl::Sinc(sinc)
            }
        };

        let channels = channels as usize;
        let out_max = resampler.output_frames_max();

        Ok(Self {
            resampler,
            source_sample_rate,
            target_sample_rate,
            channels,
            chunk_frames,
            staged_frames: 0,
            waves_in: vec![vec![0.0; chunk_frames]; channels],
            waves_out: vec![vec![0.0; out_max]; channels],
        })
    }

    /// Stages interleaved `input` and appends every completed chunk, resampled
    /// and interleaved, to `output`.
    pub fn push_interleaved(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<()> {
        for frame in input.chunks_exact(self.channels) {
            for (ch, sample) in frame.iter().enumerate() {
                self.waves_in[ch][self.staged_frames] = *sample;
            }
            self.staged_frames += 1;
            if self.staged_frames == self.chunk_frames {
                self.run_chunk(output)?;
            }
        }
        Ok(())
    }

    /// Zero-pads and resamples whatever is staged (used at end of stream).
    pub fn flush(&mut self, output: &mut Vec<f32>) -> Result<()> {
        if self.staged_frames == 0 {
            return Ok(());
        }
        let real_frames = self.staged_frames;
        for wave in &mut self.waves_in {
            wave[real_frames..].fill(0.0);
        }
        let before = output.len();
        self.run_chunk(output)?;

        // Drop the tail produced by the padding.
        let ratio = self.target_sample_rate as f64 / self.source_sample_rate as f64;
        let keep_frames = (real_frames as f64 * ratio).ceil() as usize;
        output.truncate(before + keep_frames * self.channels);
        Ok(())
    }

    fn run_chunk(&mut self, output: &mut Vec<f32>) -> Result<()> {
        let (_, frames_out) = self
            .resampler
            .process_into(&self.waves_in, &mut self.waves_out)
            .map_err(|e| ChirpError::Decode(format!("Streaming resampling error: {}", e)))?;
        self.staged_frames = 0;

        output.reserve(frames_out * self.channels);
        for frame_idx in 0..frames_out {
            for wave in &self.waves_out {
                output.push(wave[frame_idx]);
            }
        }
        Ok(())
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    /// Clears staged input and the filter state (after a seek).
    pub fn reset(&mut self) {
        self.staged_frames = 0;
        self.resampler.reset();
    }
}
