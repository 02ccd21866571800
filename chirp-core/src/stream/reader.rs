//! Refill side of a stream.
//!
//! A stream is a bounded SPSC ring of interleaved `f32` samples at the engine
//! rate. The [`StreamReader`] owns the producer half and the
//! [`StreamSource`]; the [`StreamDecoder`](crate::decoder::StreamDecoder) owns
//! the consumer half and reads from the tick. Besides the ring, the two halves
//! share a small [`StreamShared`] control block for seeks, loop changes and the
//! end/failure status. The tick side only ever `try_lock`s it.

use crate::alloc::{Allocator, Reservation, TrackedVec};
use crate::decoder::StreamDecoder;
use crate::error::{ChirpError, Result};
use crate::logger::Logger;
use crate::looping::{LoopCursor, LoopRegion};
use crate::stream::{ResamplerType, StreamResampler, StreamSource, StreamWaker};
use ringbuf::traits::{Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Input frames read from the source per pass.
const READ_CHUNK_FRAMES: usize = 1024;

/// Lifecycle of the data in a stream's ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Streaming,
    /// The source ended; `at` is the total number of samples ever pushed.
    Exhausted { at: u64 },
    Failed(String),
}

#[derive(Debug)]
pub(crate) struct StreamControl {
    pub seek_request: Option<u64>,
    pub seek_gen: u64,
    pub applied_gen: u64,
    /// Samples pushed before the last applied seek; the consumer discards up to here.
    pub flushed_through: u64,
    pub status: StreamStatus,
    pub loop_update: Option<Option<LoopRegion>>,
    pub release_loop: bool,
}

/// State shared by both halves of a stream.
#[derive(Debug)]
pub(crate) struct StreamShared {
    pub control: Mutex<StreamControl>,
    /// Set when the consumer wants a refill before the next cadence.
    pub prime: AtomicBool,
    /// Set when the consumer has been dropped.
    pub closed: AtomicBool,
    _reservation: Reservation,
}

impl StreamShared {
    /// Blocking lock for the refill side. A poisoned lock is still usable:
    /// every field is valid on its own.
    fn lock(&self) -> MutexGuard<'_, StreamControl> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Parameters for [`open_stream`].
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Engine mix rate
    pub sample_rate: u32,
    /// Ring length in frames at the engine rate
    pub buffer_frames: usize,
    pub resampler: ResamplerType,
}

/// Outcome of one [`StreamReader::refill`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    Filled,
    /// The source had nothing available right now.
    Stalled,
    Exhausted,
    Failed,
}

/// Producer half of a stream, driven by the stream worker.
pub struct StreamReader {
    label: String,
    source: Box<dyn StreamSource>,
    producer: HeapProd<f32>,
    shared: Arc<StreamShared>,
    logger: Logger,
    source_channels: usize,
    channels: usize,
    total_frames: Option<u64>,
    capacity: usize,
    source_pos: u64,
    looping: LoopCursor,
    resampler: Option<StreamResampler>,
    read_buf: TrackedVec<f32>,
    pending: Vec<f32>,
    pending_pos: usize,
    pushed: u64,
    eof: bool,
    empty_wraps: u32,
    failed: bool,
    last_refill: Option<Instant>,
}

/// Splits `source` into a reader (refill side) and a decoder (tick side).
///
/// Sources with more than two channels are downmixed to mono; sources at
/// another rate are resampled to `settings.sample_rate`. The decoder requests
/// a priming refill immediately.
pub fn open_stream(
    label: impl Into<String>,
    source: Box<dyn StreamSource>,
    looping: Option<LoopRegion>,
    settings: StreamSettings,
    allocator: &Allocator,
    logger: Logger,
    waker: StreamWaker,
) -> Result<(StreamReader, StreamDecoder)> {
    let format = source.format();
    if format.channels == 0 || format.sample_rate == 0 {
        return Err(ChirpError::Decode(format!(
            "Stream has an invalid format ({} ch, {} Hz)",
            format.channels, format.sample_rate
        )));
    }

    let source_channels = format.channels as usize;
    let channels = if source_channels <= 2 { source_channels } else { 1 };
    let capacity = settings.buffer_frames.max(1) * channels;

    let resampler = if format.sample_rate != settings.sample_rate {
        Some(StreamResampler::new(
            format.sample_rate,
            settings.sample_rate,
            channels as u16,
            READ_CHUNK_FRAMES,
            Some(settings.resampler),
        )?)
    } else {
        None
    };

    let ratio = settings.sample_rate as f64 / format.sample_rate as f64;
    let pending_capacity = ((READ_CHUNK_FRAMES as f64 * ratio).ceil() as usize + 64) * channels;
    let reservation =
        allocator.reserve((capacity + pending_capacity) * std::mem::size_of::<f32>())?;
    let read_buf = allocator.vec(READ_CHUNK_FRAMES * source_channels, 0.0f32)?;

    let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
    let shared = Arc::new(StreamShared {
        control: Mutex::new(StreamControl {
            seek_request: None,
            seek_gen: 0,
            applied_gen: 0,
            flushed_through: 0,
            status: StreamStatus::Streaming,
            loop_update: None,
            release_loop: false,
        }),
        prime: AtomicBool::new(true),
        closed: AtomicBool::new(false),
        _reservation: reservation,
    });

    let total_frames = format
        .total_frames
        .map(|frames| (frames as f64 * ratio).round() as u64);

    let reader = StreamReader {
        label: label.into(),
        source,
        producer,
        shared: shared.clone(),
        logger,
        source_channels,
        channels,
        total_frames: format.total_frames,
        capacity,
        source_pos: 0,
        looping: LoopCursor::new(looping),
        resampler,
        read_buf,
        pending: Vec::with_capacity(pending_capacity),
        pending_pos: 0,
        pushed: 0,
        eof: false,
        empty_wraps: 0,
        failed: false,
        last_refill: None,
    };

    let decoder = StreamDecoder::new(consumer, shared, channels as u16, total_frames, waker);
    decoder.wake_worker();

    Ok((reader, decoder))
}

fn is_stall(error: &ChirpError) -> bool {
    matches!(error, ChirpError::Io(e) if e.kind() == ErrorKind::WouldBlock)
}

impl StreamReader {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The consumer half is gone; the reader can be dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Whether a refill is due before the next cadence.
    pub fn wants_priming(&self) -> bool {
        self.shared.prime.load(Ordering::Acquire)
    }

    /// Whether the ring holds less than half its capacity and more data is
    /// available.
    pub fn needs_refill(&self) -> bool {
        if self.wants_priming() {
            return true;
        }
        if self.failed || (self.eof && self.pending_pos >= self.pending.len()) {
            return false;
        }
        self.producer.occupied_len() < self.capacity / 2
    }

    pub fn last_refill(&self) -> Option<Instant> {
        self.last_refill
    }

    /// Applies control requests and tops the ring up from the source.
    pub fn refill(&mut self) -> RefillOutcome {
        self.shared.prime.store(false, Ordering::Release);
        self.last_refill = Some(Instant::now());

        if let Err(e) = self.apply_control() {
            return self.fail(e);
        }
        if self.failed {
            return RefillOutcome::Failed;
        }

        match self.fill() {
            Ok(()) => {
                if self.eof && self.pending_pos >= self.pending.len() {
                    let mut control = self.shared.lock();
                    if control.seek_request.is_none() {
                        control.status = StreamStatus::Exhausted { at: self.pushed };
                    }
                    RefillOutcome::Exhausted
                } else {
                    RefillOutcome::Filled
                }
            }
            Err(e) if is_stall(&e) => {
                log::debug!("Stream {} stalled: {}", self.label, e);
                // Retry on the next worker pass rather than the next cadence.
                self.shared.prime.store(true, Ordering::Release);
                RefillOutcome::Stalled
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: ChirpError) -> RefillOutcome {
        self.failed = true;
        self.logger
            .error(format_args!("Stream {} failed: {}", self.label, error));
        self.shared.lock().status = StreamStatus::Failed(error.to_string());
        RefillOutcome::Failed
    }

    fn apply_control(&mut self) -> Result<()> {
        let mut control = self.shared.lock();

        if let Some(region) = control.loop_update.take() {
            self.looping.set_region(region);
        }
        if control.release_loop {
            control.release_loop = false;
            self.looping.release();
        }

        if let Some(frame) = control.seek_request.take() {
            let source_frame = self.to_source_frame(frame);
            self.source.seek(source_frame)?;
            self.source_pos = source_frame;
            self.looping.rewind();
            if let Some(resampler) = &mut self.resampler {
                resampler.reset();
            }
            self.pending.clear();
            self.pending_pos = 0;
            self.eof = false;
            self.empty_wraps = 0;
            self.failed = false;

            control.applied_gen = control.seek_gen;
            control.flushed_through = self.pushed;
            control.status = StreamStatus::Streaming;
        }

        Ok(())
    }

    fn to_source_frame(&self, frame: u64) -> u64 {
        match &self.resampler {
            Some(r) => {
                (frame as f64 * r.source_sample_rate() as f64 / r.target_sample_rate() as f64)
                    .round() as u64
            }
            None => frame,
        }
    }

    fn fill(&mut self) -> Result<()> {
        loop {
            if self.pending_pos < self.pending.len() {
                let vacant = self.producer.vacant_len();
                let room = vacant - vacant % self.channels;
                let end = (self.pending_pos + room).min(self.pending.len());
                let pushed = self
                    .producer
                    .push_slice(&self.pending[self.pending_pos..end]);
                self.pending_pos += pushed;
                self.pushed += pushed as u64;
                if self.pending_pos < self.pending.len() {
                    return Ok(());
                }
                self.pending.clear();
                self.pending_pos = 0;
            }

            if self.eof {
                return Ok(());
            }

            let vacant_frames = self.producer.vacant_len() / self.channels;
            if vacant_frames == 0 {
                return Ok(());
            }

            let mut want = READ_CHUNK_FRAMES.min(vacant_frames);
            if let Some(end) = self.looping.loop_end(self.total_frames) {
                if self.source_pos >= end {
                    self.wrap_loop()?;
                    continue;
                }
                want = want.min((end - self.source_pos) as usize);
            }

            let got = self
                .source
                .read(&mut self.read_buf[..want * self.source_channels])?;

            if got == 0 {
                if self.looping.is_looping() && self.empty_wraps == 0 {
                    self.empty_wraps += 1;
                    self.wrap_loop()?;
                    continue;
                }
                self.eof = true;
                if let Some(resampler) = &mut self.resampler {
                    resampler.flush(&mut self.pending)?;
                }
                continue;
            }

            self.empty_wraps = 0;
            self.source_pos += got as u64;

            if self.source_channels != self.channels {
                downmix_in_place(&mut self.read_buf, got, self.source_channels);
            }
            let samples = &self.read_buf[..got * self.channels];

            match &mut self.resampler {
                Some(resampler) => resampler.push_interleaved(samples, &mut self.pending)?,
                None => self.pending.extend_from_slice(samples),
            }
        }
    }

    fn wrap_loop(&mut self) -> Result<()> {
        let start = self.looping.wrap(self.total_frames);
        self.source.seek(start)?;
        self.source_pos = start;
        log::debug!(
            "Stream {} looped ({} completed)",
            self.label,
            self.looping.completed()
        );
        Ok(())
    }
}

/// Averages each frame of `frames` interleaved frames into `buf[..frames]`.
fn downmix_in_place(buf: &mut [f32], frames: usize, channels: usize) {
    for frame in 0..frames {
        let start = frame * channels;
        let sum: f32 = buf[start..start + channels].iter().sum();
        buf[frame] = sum / channels as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frames() {
        let mut buf = [1.0, 0.0, 0.5, 0.0, 0.0, 0.25];
        downmix_in_place(&mut buf, 2, 3);
        assert_eq!(&buf[..2], &[0.5, 0.25 / 3.0]);
    }

    #[test]
    fn stall_detection() {
        let stall = ChirpError::Io(std::io::Error::from(ErrorKind::WouldBlock));
        let broken = ChirpError::Io(std::io::Error::from(ErrorKind::BrokenPipe));
        assert!(is_stall(&stall));
        assert!(!is_stall(&broken));
    }
}
