pub mod engine_config;
pub mod play_options;

pub use engine_config::{ChirpConfig, PlatformHandles, SampleType, StreamWorkerMode};
pub use play_options::{PlayOptions, pitch_to_speed};
