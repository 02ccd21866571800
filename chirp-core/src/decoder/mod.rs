//! Decoders: pull-based producers of one mix quantum at a time.
//!
//! Three variants exist, picked once when a task is created:
//! - [`BankDecoder`] reads resident PCM from a shared [`Bank`] and never does I/O.
//! - [`StreamDecoder`] reads the consumer side of a stream's ring buffer.
//! - [`HardwareDecoder`] hands decoding to a platform codec.

mod bank;
pub mod hardware;
mod stream;

pub use bank::BankDecoder;
pub use hardware::{HardwareCodec, HardwareCodecFactory, HardwareDecoder};
pub use stream::StreamDecoder;

use crate::alloc::Allocator;
use crate::bank::Bank;
use crate::config::ChirpConfig;
use crate::error::{ChirpError, Result};
use crate::logger::Logger;
use crate::looping::LoopRegion;
use crate::sample::SampleBuffer;
use crate::stream::{
    Codec, ResamplerType, StreamSettings, StreamSource, StreamWorker, SymphoniaStreamSource,
    open_stream,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Most channels a decoder hands to the mixer. Wider sources are downmixed.
pub const MAX_SOURCE_CHANNELS: u16 = 2;

/// Slowest playback speed; requests below it are clamped.
pub const MIN_SPEED: f32 = 0.25;
/// Fastest playback speed; requests above it are clamped.
pub const MAX_SPEED: f32 = 4.0;

/// Clamps `speed` into the supported range. NaN plays at normal speed.
pub fn clamp_speed(speed: f32) -> f32 {
    if speed.is_nan() {
        1.0
    } else {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    }
}

/// Result of one [`Decoder::produce`] call.
#[derive(Debug)]
pub enum DecodeStatus {
    /// `n` frames were written to the buffer. `n` is short of the request only
    /// when the sound ends inside this quantum.
    Ready(usize),
    /// No data is available yet; the task should play silence and retry.
    Underrun,
    EndOfStream,
    /// The source failed for good.
    Failed(ChirpError),
}

/// Which decoder variant backs a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    BankResident,
    StreamedFile,
    HardwareAccelerated,
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BankResident => "bank",
            Self::StreamedFile => "stream",
            Self::HardwareAccelerated => "hardware",
        };
        f.write_str(name)
    }
}

/// A pull-based audio producer owned by exactly one task.
///
/// Implementations write into the caller's buffer in the buffer's format, so
/// the mixer only ever sees the engine's single sample format. `produce` must
/// not block: it is called from the tick.
pub trait Decoder: Send {
    fn kind(&self) -> DecoderKind;

    /// Channel layout of produced frames (1 or 2).
    fn channels(&self) -> u16;

    /// Writes up to `frames` frames into `out`, which must already have this
    /// decoder's channel layout.
    fn produce(&mut self, out: &mut SampleBuffer, frames: usize) -> DecodeStatus;

    /// Repositions playback at `frame` and restarts the loop count.
    fn seek(&mut self, frame: u64);

    /// Frame position of the next produced frame.
    fn position(&self) -> u64;

    /// Length in frames at the engine rate, if known.
    fn total_frames(&self) -> Option<u64>;

    /// Replaces the loop region; `None` stops looping.
    fn set_loop(&mut self, region: Option<LoopRegion>);

    /// Lets playback continue past the loop end to the natural end.
    fn release_loop(&mut self);

    /// Plays `speed` source frames per output frame, shifting the pitch with
    /// it. Decoders that cannot resample keep playing at normal speed.
    fn set_speed(&mut self, _speed: f32) {}
}

/// What a new task should play.
pub enum DecoderSpec {
    /// Sound `index` of a resident bank.
    Bank { bank: Arc<Bank>, index: usize },
    /// A file streamed from disk.
    File(PathBuf),
    /// A host-provided source, streamed like a file.
    Custom {
        label: String,
        source: Box<dyn StreamSource>,
    },
}

impl fmt::Debug for DecoderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bank { bank, index } => f
                .debug_struct("Bank")
                .field("bank", &bank.name())
                .field("index", index)
                .finish(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Custom { label, .. } => f.debug_struct("Custom").field("label", label).finish(),
        }
    }
}

/// A stream ring always holds at least this many of the largest requests at
/// [`MAX_SPEED`], whatever `stream_buffer_ms` says.
pub const STREAM_RING_MIN_REQUESTS: usize = 2;

/// Everything [`create`] needs from the engine.
pub struct DecoderContext<'a> {
    pub config: &'a ChirpConfig,
    pub allocator: &'a Allocator,
    pub logger: &'a Logger,
    pub worker: &'a mut StreamWorker,
    /// Largest quantum the scheduler will ask for
    pub max_frames: usize,
}

impl DecoderContext<'_> {
    fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            sample_rate: self.config.sample_rate,
            buffer_frames: self
                .config
                .stream_buffer_frames()
                .max(self.max_frames * STREAM_RING_MIN_REQUESTS * MAX_SPEED as usize),
            resampler: ResamplerType::Sinc,
        }
    }
}

/// Picks and builds the decoder variant for `spec`.
///
/// The choice is made here, once. A file goes to the hardware codec when
/// hardware decoding is enabled and the factory supports and opens it;
/// otherwise it falls back to software streaming. Ogg Vorbis files are
/// rejected when Vorbis decoding is disabled.
///
/// # Errors
///
/// [`ChirpError::Decode`] for unsupported or malformed assets,
/// [`ChirpError::StreamIo`] when a file cannot be opened, and
/// [`ChirpError::OutOfMemory`] when buffers cannot be reserved.
pub fn create(
    spec: DecoderSpec,
    looping: Option<LoopRegion>,
    ctx: DecoderContext<'_>,
) -> Result<Box<dyn Decoder>> {
    match spec {
        DecoderSpec::Bank { bank, index } => Ok(Box::new(BankDecoder::new(bank, index, looping)?)),
        DecoderSpec::File(path) => {
            let label = path.display().to_string();
            let opened = SymphoniaStreamSource::open(&path);
            let codec = match &opened {
                Ok(source) => source.format().codec,
                Err(_) => path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(Codec::from_extension)
                    .unwrap_or(Codec::Unknown),
            };

            if let Some(decoder) = open_hardware(&path, codec, looping, &ctx) {
                return Ok(decoder);
            }

            let source = opened?;
            if codec == Codec::Vorbis && !ctx.config.enable_ogg_vorbis {
                return Err(ChirpError::Decode(format!(
                    "{}: Ogg Vorbis decoding is disabled",
                    label
                )));
            }

            open_software(label, Box::new(source), looping, ctx)
        }
        DecoderSpec::Custom { label, source } => open_software(label, source, looping, ctx),
    }
}

fn open_hardware(
    path: &std::path::Path,
    codec: Codec,
    looping: Option<LoopRegion>,
    ctx: &DecoderContext<'_>,
) -> Option<Box<dyn Decoder>> {
    if !ctx.config.enable_hardware_decoding {
        return None;
    }
    let factory = ctx.config.hardware_codecs.as_ref()?;
    if !factory.supports(codec) {
        log::debug!("No hardware codec for {} ({})", path.display(), codec);
        return None;
    }

    let opened = factory
        .open(path, ctx.config.platform.as_ref())
        .and_then(|codec| {
            HardwareDecoder::new(
                codec,
                ctx.config.sample_rate,
                looping,
                ctx.max_frames,
                ctx.allocator,
            )
        });

    match opened {
        Ok(decoder) => {
            log::debug!("Decoding {} ({}) in hardware", path.display(), codec);
            Some(Box::new(decoder))
        }
        Err(e) => {
            ctx.logger.warning(format_args!(
                "Hardware decoding of {} unavailable, using software path: {}",
                path.display(),
                e
            ));
            None
        }
    }
}

fn open_software(
    label: String,
    source: Box<dyn StreamSource>,
    looping: Option<LoopRegion>,
    ctx: DecoderContext<'_>,
) -> Result<Box<dyn Decoder>> {
    let settings = ctx.stream_settings();
    let waker = ctx.worker.waker();
    let (reader, decoder) = open_stream(
        label,
        source,
        looping,
        settings,
        ctx.allocator,
        ctx.logger.clone(),
        waker,
    )?;
    ctx.worker.attach(reader)?;
    Ok(Box::new(decoder))
}
