//! File streaming: sources, the refill side of the ring buffer and the
//! worker that drives refills.

mod reader;
mod resampler;
mod source;
mod symphonia_source;
mod worker;

pub use reader::{RefillOutcome, StreamReader, StreamSettings, StreamStatus, open_stream};
pub(crate) use reader::{StreamControl, StreamShared};
pub use resampler::{ResamplerType, StreamResampler};
pub use source::{Codec, StreamFormat, StreamSource};
pub use symphonia_source::SymphoniaStreamSource;
pub use worker::{StreamWaker, StreamWorker};
