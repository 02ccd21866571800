use crate::decoder::{DecodeStatus, Decoder, DecoderKind, MAX_SOURCE_CHANNELS, clamp_speed};
use crate::error::ChirpError;
use crate::looping::LoopRegion;
use crate::sample::{SampleBuffer, f32_to_fixed};
use crate::stream::{StreamShared, StreamStatus, StreamWaker};
use ringbuf::HeapCons;
use ringbuf::traits::{Consumer, Observer};
use std::sync::atomic::Ordering;
use std::sync::{Arc, TryLockError};

/// What the tick side learned from the control block.
enum ControlView {
    /// The refill side holds the lock right now.
    Busy,
    /// A seek has been requested but not applied yet.
    SeekPending,
    Streaming,
    Exhausted { at: u64 },
    Failed(String),
}

/// Tick side of a stream: reads decoded audio from the ring buffer.
///
/// `produce` never waits. When the ring holds less than a full request and the
/// source has not ended, it reports [`DecodeStatus::Underrun`] and asks the
/// worker for an early refill. A read that leaves less than another request of
/// the same size behind asks for the refill ahead of time.
pub struct StreamDecoder {
    consumer: HeapCons<f32>,
    shared: Arc<StreamShared>,
    channels: u16,
    total_frames: Option<u64>,
    /// Samples taken out of the ring since the stream was opened
    popped: u64,
    /// Samples to discard before the data of the latest seek starts
    flushed_through: u64,
    requested_gen: u64,
    seek_applied: bool,
    pending_seek: Option<u64>,
    pending_loop: Option<Option<LoopRegion>>,
    pending_release: bool,
    position: u64,
    /// Fraction of a source frame past the ring head
    frac: f64,
    speed: f32,
    ended: bool,
    waker: StreamWaker,
}

impl StreamDecoder {
    pub(crate) fn new(
        consumer: HeapCons<f32>,
        shared: Arc<StreamShared>,
        channels: u16,
        total_frames: Option<u64>,
        waker: StreamWaker,
    ) -> Self {
        Self {
            consumer,
            shared,
            channels,
            total_frames,
            popped: 0,
            flushed_through: 0,
            requested_gen: 0,
            seek_applied: true,
            pending_seek: None,
            pending_loop: None,
            pending_release: false,
            position: 0,
            frac: 0.0,
            speed: 1.0,
            ended: false,
            waker,
        }
    }

    /// Asks the worker to refill before its next cadence.
    pub fn wake_worker(&self) {
        self.shared.prime.store(true, Ordering::Release);
        self.waker.wake();
    }

    /// Samples currently buffered, including any not yet discarded after a seek.
    pub fn buffered_samples(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Hands queued requests to the refill side and reads back its status.
    fn sync(&mut self) -> ControlView {
        let mut control = match self.shared.control.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return ControlView::Busy,
        };

        let mut wake = false;
        if let Some(region) = self.pending_loop.take() {
            control.loop_update = Some(region);
            wake = true;
        }
        if self.pending_release {
            self.pending_release = false;
            control.release_loop = true;
            wake = true;
        }
        if let Some(frame) = self.pending_seek.take() {
            control.seek_request = Some(frame);
            control.seek_gen += 1;
            self.requested_gen = control.seek_gen;
            wake = true;
        }

        self.seek_applied = control.applied_gen >= self.requested_gen;
        let view = if !self.seek_applied {
            ControlView::SeekPending
        } else {
            self.flushed_through = control.flushed_through;
            match &control.status {
                StreamStatus::Streaming => ControlView::Streaming,
                StreamStatus::Exhausted { at } => ControlView::Exhausted { at: *at },
                StreamStatus::Failed(message) => ControlView::Failed(message.clone()),
            }
        };
        drop(control);

        if wake {
            self.wake_worker();
        }
        view
    }

    /// Drops samples pushed before the latest applied seek. Returns false if
    /// some of them are still outstanding.
    fn discard_stale(&mut self) -> bool {
        let stale = self.flushed_through.saturating_sub(self.popped) as usize;
        if stale > 0 {
            let skipped = self.consumer.skip(stale);
            self.popped += skipped as u64;
        }
        self.popped >= self.flushed_through
    }

    /// Moves `frames` whole frames from the ring into `out`.
    fn read_frames(&mut self, out: &mut SampleBuffer, frames: usize) {
        let samples = frames * self.channels as usize;
        let (head, tail) = self.consumer.as_slices();
        let head_len = head.len().min(samples);
        let tail_len = (samples - head_len).min(tail.len());

        write_samples(out, 0, &head[..head_len]);
        write_samples(out, head_len, &tail[..tail_len]);

        let taken = self.consumer.skip(head_len + tail_len);
        self.popped += taken as u64;
        self.position += frames as u64;
        out.set_frames(frames);
    }
}

impl StreamDecoder {
    /// Buffered source frames that `frames` output frames read at the
    /// current speed, counting the frame the last one interpolates towards
    /// and one frame of rounding slack.
    fn source_frames(&self, frames: usize) -> usize {
        if frames == 0 {
            return 0;
        }
        (self.frac + (frames - 1) as f64 * self.speed as f64) as usize + 3
    }

    /// Interpolates up to `frames` output frames from the first `available`
    /// buffered frames and drops the source frames passed over. At the end of
    /// the stream the last frame is held instead of waiting for its
    /// successor.
    fn interpolate(
        &mut self,
        out: &mut SampleBuffer,
        frames: usize,
        available: usize,
        at_end: bool,
    ) -> usize {
        let channels = self.channels as usize;
        let mut pos = self.frac;
        let mut written = 0;
        {
            let (head, tail) = self.consumer.as_slices();
            let sample = |i: usize| match head.get(i) {
                Some(s) => *s,
                None => tail.get(i - head.len()).copied().unwrap_or(0.0),
            };
            let mut frame = [0.0f32; MAX_SOURCE_CHANNELS as usize];
            while written < frames {
                let i = pos as usize;
                let j = if i + 1 < available {
                    i + 1
                } else if at_end && i < available {
                    i
                } else {
                    break;
                };
                let t = (pos - i as f64) as f32;
                for (c, value) in frame[..channels].iter_mut().enumerate() {
                    let a = sample(i * channels + c);
                    let b = sample(j * channels + c);
                    *value = a + (b - a) * t;
                }
                out.store(written, &frame[..channels]);
                written += 1;
                pos += self.speed as f64;
            }
        }

        let consumed = (pos as usize).min(available);
        self.frac = pos - consumed as f64;
        if consumed == available && at_end {
            self.frac = 0.0;
        }
        let taken = self.consumer.skip(consumed * channels);
        self.popped += taken as u64;
        self.position += consumed as u64;
        out.set_frames(written);
        written
    }
}

fn write_samples(out: &mut SampleBuffer, offset: usize, src: &[f32]) {
    if src.is_empty() {
        return;
    }
    if let Some(buf) = out.float_storage_mut() {
        buf[offset..offset + src.len()].copy_from_slice(src);
    } else if let Some(buf) = out.fixed_storage_mut() {
        for (dst, s) in buf[offset..offset + src.len()].iter_mut().zip(src) {
            *dst = f32_to_fixed(*s);
        }
    }
}

impl Decoder for StreamDecoder {
    fn kind(&self) -> DecoderKind {
        DecoderKind::StreamedFile
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
                "Buffer has {} channels, stream has {}",
                out.channels(),
                self.channels
            )));
        }

        let frames = frames.min(out.capacity_frames());
        let view = self.sync();
        if matches!(view, ControlView::SeekPending)
            || self.pending_seek.is_some()
            || !self.seek_applied
        {
            return DecodeStatus::Underrun;
        }
        if !self.discard_stale() {
            self.wake_worker();
            return DecodeStatus::Underrun;
        }

        let channels = self.channels as usize;
        let available = self.consumer.occupied_len() / channels;
        let resampling = self.speed != 1.0 || self.frac != 0.0;
        let needed = if resampling {
            self.source_frames(frames)
        } else {
            frames
        };
        if available >= needed {
            let written = if resampling {
                self.interpolate(out, frames, available, false)
            } else {
                self.read_frames(out, frames);
                frames
            };
            let low = self.consumer.occupied_len() / channels < needed;
            if low && matches!(view, ControlView::Streaming | ControlView::Busy) {
                self.wake_worker();
            }
            return DecodeStatus::Ready(written);
        }

        match view {
            ControlView::Exhausted { at } => {
                let remaining = (at.saturating_sub(self.popped) as usize / channels).min(available);
                let written = if remaining == 0 {
                    0
                } else if resampling {
                    self.interpolate(out, frames, remaining, true)
                } else {
                    self.read_frames(out, remaining);
                    remaining
                };
                if written == 0 {
                    self.ended = true;
                    out.set_frames(0);
                    return DecodeStatus::EndOfStream;
                }
                DecodeStatus::Ready(written)
            }
            ControlView::Failed(message) => {
                self.ended = true;
                out.set_frames(0);
                DecodeStatus::Failed(ChirpError::StreamIo(message))
            }
            ControlView::Busy | ControlView::Streaming | ControlView::SeekPending => {
                self.wake_worker();
                DecodeStatus::Underrun
            }
        }
    }

    fn seek(&mut self, frame: u64) {
        self.pending_seek = Some(frame);
        self.seek_applied = false;
        self.position = frame;
        self.frac = 0.0;
        self.ended = false;
        self.sync();
        self.wake_worker();
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn set_loop(&mut self, region: Option<LoopRegion>) {
        self.pending_loop = Some(region);
        self.sync();
    }

    fn release_loop(&mut self) {
        self.pending_release = true;
        self.sync();
    }

    fn set_speed(&mut self, speed: f32) {
        self.speed = clamp_speed(speed);
        if self.speed == 1.0 {
            self.frac = 0.0;
        }
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Allocator;
    use crate::error::Result;
    use crate::logger::Logger;
    use crate::sample::SampleFormat;
    use crate::stream::{
        Codec, RefillOutcome, ResamplerType, StreamFormat, StreamReader, StreamSettings,
        StreamSource, open_stream,
    };

    /// Counts up from zero, one value per frame.
    struct Counter {
        pos: u64,
        total: u64,
        channels: u16,
    }

    impl StreamSource for Counter {
        fn format(&self) -> StreamFormat {
            StreamFormat {
                sample_rate: 1000,
                channels: self.channels,
                total_frames: Some(self.total),
                codec: Codec::Pcm,
            }
        }

        fn read(&mut self, out: &mut [f32]) -> Result<usize> {
            let channels = self.channels as usize;
            let frames = (out.len() / channels).min((self.total - self.pos) as usize);
            for frame in 0..frames {
                for ch in 0..channels {
                    out[frame * channels + ch] = (self.pos + frame as u64) as f32 / 1000.0;
                }
            }
            self.pos += frames as u64;
            Ok(frames)
        }

        fn seek(&mut self, frame: u64) -> Result<()> {
            self.pos = frame.min(self.total);
            Ok(())
        }
    }

    fn open(total: u64, channels: u16, buffer_frames: usize) -> (StreamReader, StreamDecoder) {
        open_stream(
            "counter",
            Box::new(Counter {
                pos: 0,
                total,
                channels,
            }),
            None,
            StreamSettings {
                sample_rate: 1000,
                buffer_frames,
                resampler: ResamplerType::Fast,
            },
            &Allocator::system(),
            Logger::default(),
            StreamWaker::none(),
        )
        .unwrap()
    }

    fn buffer(channels: u16) -> SampleBuffer {
        SampleBuffer::new(&Allocator::system(), SampleFormat::Float, channels, 64).unwrap()
    }

    #[test]
    fn underruns_until_primed() {
        let (mut reader, mut decoder) = open(500, 1, 200);
        let mut out = buffer(1);

        assert!(reader.wants_priming());
        assert!(matches!(decoder.produce(&mut out, 50), DecodeStatus::Underrun));

        assert_eq!(reader.refill(), RefillOutcome::Filled);
        assert!(matches!(decoder.produce(&mut out, 50), DecodeStatus::Ready(50)));
        assert_eq!(out.sample_f32(49), Some(0.049));
    }

    #[test]
    fn drains_to_end_of_stream() {
        let (mut reader, mut decoder) = open(120, 2, 500);
        let mut out = buffer(2);

        assert_eq!(reader.refill(), RefillOutcome::Exhausted);
        assert!(matches!(decoder.produce(&mut out, 64), DecodeStatus::Ready(64)));
        assert!(matches!(decoder.produce(&mut out, 64), DecodeStatus::Ready(56)));
        assert!(matches!(decoder.produce(&mut out, 64), DecodeStatus::EndOfStream));
        assert_eq!(decoder.position(), 120);
    }

    #[test]
    fn double_speed_reads_two_source_frames_per_output() {
        let (mut reader, mut decoder) = open(500, 1, 600);
        let mut out = buffer(1);
        assert_eq!(reader.refill(), RefillOutcome::Exhausted);
        decoder.set_speed(2.0);

        assert!(matches!(decoder.produce(&mut out, 50), DecodeStatus::Ready(50)));
        assert!((out.sample_f32(10).unwrap() - 0.020).abs() < 1e-6);
        assert_eq!(decoder.position(), 100);

        let mut played = 50;
        while let DecodeStatus::Ready(n) = decoder.produce(&mut out, 64) {
            played += n;
        }
        assert_eq!(played, 250);
        assert_eq!(decoder.position(), 500);
    }

    #[test]
    fn half_speed_interpolates_buffered_frames() {
        let (mut reader, mut decoder) = open(1000, 2, 200);
        let mut out = buffer(2);
        reader.refill();
        decoder.set_speed(0.5);

        assert!(matches!(decoder.produce(&mut out, 20), DecodeStatus::Ready(20)));
        // Frame 1 sits halfway between source frames 0 and 1.
        assert!((out.sample_f32(2).unwrap() - 0.0005).abs() < 1e-6);
        assert!((out.sample_f32(3).unwrap() - 0.0005).abs() < 1e-6);
        assert!((out.sample_f32(8).unwrap() - 0.002).abs() < 1e-6);
        assert_eq!(decoder.position(), 10);
    }

    #[test]
    fn seek_discards_buffered_audio() {
        let (mut reader, mut decoder) = open(1000, 1, 200);
        let mut out = buffer(1);

        reader.refill();
        assert!(matches!(decoder.produce(&mut out, 10), DecodeStatus::Ready(10)));

        decoder.seek(700);
        assert!(matches!(decoder.produce(&mut out, 10), DecodeStatus::Underrun));

        reader.refill();
        assert!(matches!(decoder.produce(&mut out, 10), DecodeStatus::Ready(10)));
        assert_eq!(out.sample_f32(0), Some(0.7));
        assert_eq!(decoder.position(), 710);
    }

    #[test]
    fn closing_the_decoder_releases_the_reader() {
        let (reader, decoder) = open(100, 1, 50);
        assert!(!reader.is_closed());
        drop(decoder);
        assert!(reader.is_closed());
    }
}
