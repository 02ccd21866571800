//! Platform codec offload.
//!
//! The engine never talks to decode hardware directly. A host that has a
//! platform codec installs a [`HardwareCodecFactory`] in the configuration;
//! when hardware decoding is enabled, files whose codec the factory supports
//! are decoded through it instead of the software streaming path.

use crate::alloc::{Allocator, TrackedVec};
use crate::config::PlatformHandles;
use crate::decoder::{DecodeStatus, Decoder, DecoderKind, MAX_SOURCE_CHANNELS};
use crate::error::{ChirpError, Result};
use crate::looping::{LoopCursor, LoopRegion};
use crate::sample::SampleBuffer;
use crate::stream::Codec;
use std::io::ErrorKind;
use std::path::Path;

/// Opens platform codec sessions.
pub trait HardwareCodecFactory: Send + Sync {
    fn supports(&self, codec: Codec) -> bool;

    /// Opens `path`. `platform` carries the host's opaque context handles.
    fn open(
        &self,
        path: &Path,
        platform: Option<&PlatformHandles>,
    ) -> Result<Box<dyn HardwareCodec>>;
}

/// One open platform codec session.
///
/// `decode` is called from the tick and must not block; a codec with no
/// output ready returns an `Io` error of kind `WouldBlock`.
pub trait HardwareCodec: Send {
    fn channels(&self) -> u16;
    fn sample_rate(&self) -> u32;
    fn total_frames(&self) -> Option<u64>;

    /// Decodes interleaved frames into `out`; `Ok(0)` means end of stream.
    fn decode(&mut self, out: &mut [f32]) -> Result<usize>;

    fn seek(&mut self, frame: u64) -> Result<()>;
}

/// Decoder backed by a [`HardwareCodec`].
pub struct HardwareDecoder {
    codec: Box<dyn HardwareCodec>,
    channels: u16,
    total: Option<u64>,
    cursor: u64,
    looping: LoopCursor,
    staging: TrackedVec<f32>,
    /// A seek the codec refused, retried on the next `produce`
    pending_seek: Option<u64>,
    ended: bool,
}

impl HardwareDecoder {
    /// Wraps `codec`. Sessions at a rate other than `sample_rate`, or with
    /// more than two channels, are refused so the caller can fall back.
    pub fn new(
        codec: Box<dyn HardwareCodec>,
        sample_rate: u32,
        looping: Option<LoopRegion>,
        max_frames: usize,
        allocator: &Allocator,
    ) -> Result<Self> {
        let channels = codec.channels();
        if channels == 0 || channels > MAX_SOURCE_CHANNELS {
            return Err(ChirpError::AudioFormat(format!(
                "Hardware codec produces {} channels",
                channels
            )));
        }
        if codec.sample_rate() != sample_rate {
            return Err(ChirpError::AudioFormat(format!(
                "Hardware codec runs at {} Hz, engine at {} Hz",
                codec.sample_rate(),
                sample_rate
            )));
        }

        let staging = allocator.vec(max_frames.max(1) * channels as usize, 0.0f32)?;
        Ok(Self {
            total: codec.total_frames(),
            codec,
            channels,
            cursor: 0,
            looping: LoopCursor::new(looping),
            staging,
            pending_seek: None,
            ended: false,
        })
    }

    fn jump(&mut self, frame: u64) -> Result<()> {
        self.codec.seek(frame)?;
        self.cursor = frame;
        Ok(())
    }
}

impl Decoder for HardwareDecoder {
    fn kind(&self) -> DecoderKind {
        DecoderKind::HardwareAccelerated
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn produce(&mut self, out: &mut SampleBuffer, frames: usize) -> DecodeStatus {
        if self.ended {
            return DecodeStatus::EndOfStream;
        }
        if out.channels() != self.channels {
            return DecodeStatus::Failed(ChirpError::AudioFormat(format!(
                "Buffer has {} channels, codec has {}",
                out.channels(),
                self.channels
            )));
        }
        if let Some(frame) = self.pending_seek.take() {
            if let Err(e) = self.jump(frame) {
                self.ended = true;
                return DecodeStatus::Failed(e);
            }
        }

        let channels = self.channels as usize;
        let frames = frames
            .min(out.capacity_frames())
            .min(self.staging.len() / channels);
        let mut written = 0;
        let mut empty_wraps = 0;

        while written < frames {
            let mut want = frames - written;
            if let Some(end) = self.looping.loop_end(self.total) {
                if self.cursor >= end {
                    let start = self.looping.wrap(self.total);
                    if let Err(e) = self.jump(start) {
                        self.ended = true;
                        return DecodeStatus::Failed(e);
                    }
                    continue;
                }
                want = want.min((end - self.cursor) as usize);
            }

            let got = match self.codec.decode(&mut self.staging[..want * channels]) {
                Ok(got) => got.min(want),
                Err(ChirpError::Io(e)) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.ended = true;
                    return DecodeStatus::Failed(e);
                }
            };

            if got == 0 {
                if self.looping.is_looping() && empty_wraps == 0 {
                    empty_wraps += 1;
                    let start = self.looping.wrap(self.total);
                    if let Err(e) = self.jump(start) {
                        self.ended = true;
                        return DecodeStatus::Failed(e);
                    }
                    continue;
                }
                if written == 0 {
                    self.ended = true;
                    out.set_frames(0);
                    return DecodeStatus::EndOfStream;
                }
                break;
            }

            empty_wraps = 0;
            out.store(written, &self.staging[..got * channels]);
            written += got;
            self.cursor += got as u64;
        }

        if written == 0 {
            out.set_frames(0);
            return DecodeStatus::Underrun;
        }
        out.set_frames(written);
        DecodeStatus::Ready(written)
    }

    fn seek(&mut self, frame: u64) {
        self.looping.rewind();
        self.ended = false;
        if let Err(e) = self.jump(frame) {
            log::debug!("Hardware seek to {} deferred: {}", frame, e);
            self.cursor = frame;
            self.pending_seek = Some(frame);
        }
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn total_frames(&self) -> Option<u64> {
        self.total
    }

    fn set_loop(&mut self, region: Option<LoopRegion>) {
        self.looping.set_region(region);
    }

    fn release_loop(&mut self) {
        self.looping.release();
    }
}
