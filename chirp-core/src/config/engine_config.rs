//! Engine configuration

use crate::alloc::MemoryProvider;
use crate::decoder::hardware::HardwareCodecFactory;
use crate::error::{ChirpError, Result};
use crate::logger::{LogMask, LogSink};
use crate::sample::SampleFormat;
use std::fmt;
use std::sync::Arc;

/// Requested mixing representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleType {
    Float,
    Fixed,
    /// The fastest representation for the target: Fixed on ARM cores without a
    /// VFP unit, Float everywhere else.
    #[default]
    Default,
}

impl SampleType {
    /// Resolves to a concrete format, or `None` if the target cannot mix in it.
    pub fn resolve(self) -> Option<SampleFormat> {
        match self {
            Self::Fixed => Some(SampleFormat::Fixed),
            Self::Float if float_supported() => Some(SampleFormat::Float),
            Self::Float => None,
            Self::Default if float_supported() => Some(SampleFormat::Float),
            Self::Default => Some(SampleFormat::Fixed),
        }
    }
}

fn float_supported() -> bool {
    !cfg!(all(target_arch = "arm", not(target_feature = "vfp2")))
}

/// Who drives stream refills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamWorkerMode {
    /// A background thread owned by the engine refills every stream.
    #[default]
    Thread,
    /// Refills run from `update`, on the caller's thread.
    Manual,
}

/// Opaque platform audio-subsystem handles, forwarded untouched to the
/// hardware codec factory. Zero means "not provided".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformHandles {
    pub context: usize,
    pub java_vm: usize,
    pub jni_env: usize,
}

/// Configuration snapshot handed to [`ChirpEngine::init`](crate::ChirpEngine::init).
///
/// The engine clones it; editing the caller's copy afterwards has no effect.
#[derive(Clone)]
pub struct ChirpConfig {
    /// Tick cadence in milliseconds
    pub audio_update_ms: f32,
    /// Task pool capacity, fixed for the engine's lifetime
    pub max_audio_tasks: usize,
    /// Fraction of `audio_update_ms` the scheduler may spend per tick
    pub max_render_load: f32,
    pub sample_type: SampleType,
    /// Read-ahead duration per stream
    pub stream_buffer_ms: f32,
    /// Stream refill cadence
    pub stream_file_update_ms: f32,
    pub enable_hardware_decoding: bool,
    pub enable_ogg_vorbis: bool,
    /// Engine mix rate. Assets and streams at other rates are resampled.
    pub sample_rate: u32,
    pub log_mask: LogMask,
    /// Memory strategy; `None` uses the system allocator without accounting.
    pub memory: Option<Arc<dyn MemoryProvider>>,
    /// Diagnostic sink; `None` forwards to the `log` crate.
    pub log_sink: Option<Arc<dyn LogSink>>,
    pub hardware_codecs: Option<Arc<dyn HardwareCodecFactory>>,
    pub platform: Option<PlatformHandles>,
    pub stream_worker: StreamWorkerMode,
    /// Milliseconds a task's gain takes to move by one volume unit. Zero
    /// applies volume and pan changes at once.
    pub volume_ramp_ms: f32,
}

impl ChirpConfig {
    pub const DEFAULT_AUDIO_UPDATE_MS: f32 = 5.0;
    pub const DEFAULT_MAX_AUDIO_TASKS: usize = 500;
    pub const DEFAULT_MAX_RENDER_LOAD: f32 = 0.8;
    pub const DEFAULT_STREAM_BUFFER_MS: f32 = 500.0;
    pub const DEFAULT_STREAM_FILE_UPDATE_MS: f32 = 100.0;
    pub const DEFAULT_ENABLE_HARDWARE_DECODING: bool = false;
    pub const DEFAULT_ENABLE_OGG_VORBIS: bool = true;
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
    pub const DEFAULT_VOLUME_RAMP_MS: f32 = 40.0;

    /// Output channel count. The mixer always renders interleaved stereo.
    pub const OUTPUT_CHANNELS: u16 = 2;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio_update_ms(mut self, ms: f32) -> Self {
        self.audio_update_ms = ms;
        self
    }

    pub fn max_audio_tasks(mut self, max: usize) -> Self {
        self.max_audio_tasks = max;
        self
    }

    pub fn max_render_load(mut self, load: f32) -> Self {
        self.max_render_load = load;
        self
    }

    pub fn sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn stream_buffer_ms(mut self, ms: f32) -> Self {
        self.stream_buffer_ms = ms;
        self
    }

    pub fn stream_file_update_ms(mut self, ms: f32) -> Self {
        self.stream_file_update_ms = ms;
        self
    }

    pub fn enable_hardware_decoding(mut self, enable: bool) -> Self {
        self.enable_hardware_decoding = enable;
        self
    }

    pub fn enable_ogg_vorbis(mut self, enable: bool) -> Self {
        self.enable_ogg_vorbis = enable;
        self
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn log_mask(mut self, mask: LogMask) -> Self {
        self.log_mask = mask;
        self
    }

    pub fn memory(mut self, provider: Arc<dyn MemoryProvider>) -> Self {
        self.memory = Some(provider);
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn hardware_codecs(mut self, factory: Arc<dyn HardwareCodecFactory>) -> Self {
        self.hardware_codecs = Some(factory);
        self
    }

    pub fn platform(mut self, handles: PlatformHandles) -> Self {
        self.platform = Some(handles);
        self
    }

    pub fn stream_worker(mut self, mode: StreamWorkerMode) -> Self {
        self.stream_worker = mode;
        self
    }

    pub fn volume_ramp_ms(mut self, ms: f32) -> Self {
        self.volume_ramp_ms = ms;
        self
    }

    /// Checks every field and resolves the sample format.
    ///
    /// # Errors
    ///
    /// Returns [`ChirpError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<SampleFormat> {
        fn positive(name: &str, value: f32) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ChirpError::InvalidConfig(format!(
                    "{name} must be greater than 0 (got {value})"
                )))
            }
        }

        if self.max_audio_tasks == 0 {
            return Err(ChirpError::InvalidConfig(
                "max_audio_tasks must be greater than 0".to_string(),
            ));
        }
        positive("audio_update_ms", self.audio_update_ms)?;
        positive("stream_buffer_ms", self.stream_buffer_ms)?;
        positive("stream_file_update_ms", self.stream_file_update_ms)?;
        if self.max_render_load.is_nan() || self.max_render_load <= 0.0 || self.max_render_load > 1.0 {
            return Err(ChirpError::InvalidConfig(format!(
                "max_render_load must be in (0, 1] (got {})",
                self.max_render_load
            )));
        }
        if self.sample_rate == 0 {
            return Err(ChirpError::InvalidConfig(
                "sample_rate must be greater than 0".to_string(),
            ));
        }
        if self.volume_ramp_ms.is_nan() || self.volume_ramp_ms < 0.0 {
            return Err(ChirpError::InvalidConfig(format!(
                "volume_ramp_ms must not be negative (got {})",
                self.volume_ramp_ms
            )));
        }

        self.sample_type.resolve().ok_or_else(|| {
            ChirpError::InvalidConfig(format!(
                "sample type {:?} is not supported on this target",
                self.sample_type
            ))
        })
    }

    /// Frames rendered by one nominal tick.
    pub fn quantum_frames(&self) -> usize {
        ms_to_frames(self.audio_update_ms, self.sample_rate).max(1)
    }

    /// Ring buffer length, in frames, for one stream.
    pub fn stream_buffer_frames(&self) -> usize {
        ms_to_frames(self.stream_buffer_ms, self.sample_rate).max(1)
    }

    /// Wall time the scheduler may spend per tick, in milliseconds.
    pub fn render_budget_ms(&self) -> f32 {
        self.max_render_load * self.audio_update_ms
    }
}

pub(crate) fn ms_to_frames(ms: f32, sample_rate: u32) -> usize {
    (ms as f64 * sample_rate as f64 / 1000.0).round() as usize
}

impl Default for ChirpConfig {
    fn default() -> Self {
        Self {
            audio_update_ms: Self::DEFAULT_AUDIO_UPDATE_MS,
            max_audio_tasks: Self::DEFAULT_MAX_AUDIO_TASKS,
            max_render_load: Self::DEFAULT_MAX_RENDER_LOAD,
            sample_type: SampleType::Default,
            stream_buffer_ms: Self::DEFAULT_STREAM_BUFFER_MS,
            stream_file_update_ms: Self::DEFAULT_STREAM_FILE_UPDATE_MS,
            enable_hardware_decoding: Self::DEFAULT_ENABLE_HARDWARE_DECODING,
            enable_ogg_vorbis: Self::DEFAULT_ENABLE_OGG_VORBIS,
            sample_rate: Self::DEFAULT_SAMPLE_RATE,
            log_mask: LogMask::ALL,
            memory: None,
            log_sink: None,
            hardware_codecs: None,
            platform: None,
            stream_worker: StreamWorkerMode::Thread,
            volume_ramp_ms: Self::DEFAULT_VOLUME_RAMP_MS,
        }
    }
}

impl fmt::Debug for ChirpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChirpConfig")
            .field("audio_update_ms", &self.audio_update_ms)
            .field("max_audio_tasks", &self.max_audio_tasks)
            .field("max_render_load", &self.max_render_load)
            .field("sample_type", &self.sample_type)
            .field("stream_buffer_ms", &self.stream_buffer_ms)
            .field("stream_file_update_ms", &self.stream_file_update_ms)
            .field("enable_hardware_decoding", &self.enable_hardware_decoding)
            .field("enable_ogg_vorbis", &self.enable_ogg_vorbis)
            .field("sample_rate", &self.sample_rate)
            .field("log_mask", &self.log_mask)
            .field("memory", &self.memory.is_some())
            .field("log_sink", &self.log_sink.is_some())
            .field("hardware_codecs", &self.hardware_codecs.is_some())
            .field("platform", &self.platform)
            .field("stream_worker", &self.stream_worker)
            .field("volume_ramp_ms", &self.volume_ramp_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = ChirpConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quantum_frames(), 240);
        assert_eq!(config.stream_buffer_frames(), 24000);
        assert!((config.render_budget_ms() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_empty_pool() {
        let err = ChirpConfig::new().max_audio_tasks(0).validate().unwrap_err();
        assert!(matches!(err, ChirpError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_non_positive_durations() {
        for config in [
            ChirpConfig::new().stream_buffer_ms(0.0),
            ChirpConfig::new().stream_buffer_ms(-5.0),
            ChirpConfig::new().audio_update_ms(0.0),
            ChirpConfig::new().stream_file_update_ms(f32::NAN),
        ] {
            assert!(matches!(
                config.validate(),
                Err(ChirpError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn rejects_render_load_out_of_range() {
        assert!(ChirpConfig::new().max_render_load(0.0).validate().is_err());
        assert!(ChirpConfig::new().max_render_load(1.5).validate().is_err());
        assert!(ChirpConfig::new().max_render_load(1.0).validate().is_ok());
    }

    #[test]
    fn fixed_always_resolves() {
        assert_eq!(SampleType::Fixed.resolve(), Some(SampleFormat::Fixed));
        assert!(SampleType::Default.resolve().is_some());
    }
}
