pub mod adpcm;
pub mod alloc;
pub mod audio_data;
pub mod bank;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod events;
pub mod group;
pub mod logger;
pub mod looping;
pub mod mixer;
pub mod output;
pub mod playback;
pub mod pool;
pub mod sample;
pub mod scheduler;
pub mod stream;
pub mod task;

pub use alloc::{Allocator, CountingMemory, MemoryProvider, SystemMemory};
pub use bank::{Bank, BankHandle, SoundRef};
pub use config::{ChirpConfig, PlatformHandles, PlayOptions, SampleType, StreamWorkerMode};
pub use engine::{ChirpEngine, EngineState};
pub use error::{ChirpError, Result};
pub use events::ChirpEvent;
pub use group::GroupId;
pub use logger::{LogLevel, LogMask, LogSink, NullLogSink};
pub use looping::{LoopCount, LoopRegion};
#[cfg(feature = "cpal-output")]
pub use output::CpalOutput;
pub use output::{BufferedOutput, NullOutput, OutputReceiver, OutputSink};
pub use playback::{ChirpRemote, PlaybackCommand};
pub use sample::{SampleBuffer, SampleFormat};
pub use scheduler::{RenderClock, SystemClock, TickReport};
pub use task::{TaskId, TaskState};
