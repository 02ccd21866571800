//! Sample representations and the fixed-format [`SampleBuffer`].
//!
//! # Data Format
//! All buffers are **INTERLEAVED** (`[L0, R0, L1, R1, ...]` for stereo).
//!
//! The engine mixes in exactly one [`SampleFormat`], chosen once at init:
//! - `Float`: `f32`, nominal range ±1.0
//! - `Fixed`: `i32` in 8.24 fixed point, nominal range ±2^24 (8 bits of headroom)

use crate::alloc::{Allocator, TrackedVec};
use crate::error::{ChirpError, Result};

/// Bit position of the binary point in the 8.24 fixed-point representation.
pub const FIXED_FRAC_BITS: u32 = 24;

/// 1.0 in 8.24 fixed point.
pub const FIXED_ONE: i32 = 1 << FIXED_FRAC_BITS;

/// Resolved sample representation used by the mixing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    Float,
    Fixed,
}

impl SampleFormat {
    pub fn sample_bytes(self) -> usize {
        match self {
            Self::Float => std::mem::size_of::<f32>(),
            Self::Fixed => std::mem::size_of::<i32>(),
        }
    }
}

#[inline]
pub fn f32_to_fixed(x: f32) -> i32 {
    // `as` saturates on overflow and maps NaN to 0
    (x * FIXED_ONE as f32) as i32
}

#[inline]
pub fn fixed_to_f32(x: i32) -> f32 {
    x as f32 / FIXED_ONE as f32
}

/// PCM sample types that can be stored into a [`SampleBuffer`].
pub trait PcmSample: Copy + Send + Sync + 'static {
    fn to_f32(self) -> f32;
    fn to_fixed(self) -> i32;
}

impl PcmSample for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn to_fixed(self) -> i32 {
        f32_to_fixed(self)
    }
}

impl PcmSample for i16 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32 / 32768.0
    }

    #[inline]
    fn to_fixed(self) -> i32 {
        (self as i32) << (FIXED_FRAC_BITS - 15)
    }
}

impl PcmSample for i8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32 / 128.0
    }

    #[inline]
    fn to_fixed(self) -> i32 {
        (self as i32) << (FIXED_FRAC_BITS - 7)
    }
}

/// Storage behind a [`SampleBuffer`].
#[derive(Debug)]
pub enum SampleData {
    Float(TrackedVec<f32>),
    Fixed(TrackedVec<i32>),
}

/// Fixed-capacity interleaved audio buffer in the engine's sample format.
///
/// A buffer is produced by a decoder and consumed by the mixer within the same
/// tick; the scheduler reuses one instance for every task.
#[derive(Debug)]
pub struct SampleBuffer {
    data: SampleData,
    channels: u16,
    capacity_frames: usize,
    frames: usize,
}

impl SampleBuffer {
    /// Allocates a zeroed buffer through the engine allocator.
    pub fn new(
        allocator: &Allocator,
        format: SampleFormat,
        channels: u16,
        capacity_frames: usize,
    ) -> Result<Self> {
        if channels == 0 {
            return Err(ChirpError::AudioFormat(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        let len = capacity_frames * channels as usize;
        let data = match format {
            SampleFormat::Float => SampleData::Float(allocator.vec(len, 0.0f32)?),
            SampleFormat::Fixed => SampleData::Fixed(allocator.vec(len, 0i32)?),
        };

        Ok(Self {
            data,
            channels,
            capacity_frames,
            frames: 0,
        })
    }

    pub fn format(&self) -> SampleFormat {
        match self.data {
            SampleData::Float(_) => SampleFormat::Float,
            SampleData::Fixed(_) => SampleFormat::Fixed,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Number of valid frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Reinterprets the buffer for a source with a different channel count.
    ///
    /// The storage is sized for `capacity_frames` at the channel count given to
    /// [`new`](Self::new); a narrower layout keeps the same storage and gains
    /// capacity.
    pub fn set_layout(&mut self, channels: u16) -> Result<()> {
        if channels == 0 {
            return Err(ChirpError::AudioFormat(
                "Channel count must be greater than 0".to_string(),
            ));
        }
        let samples = self.storage_len();
        self.channels = channels;
        self.capacity_frames = samples / channels as usize;
        self.frames = 0;
        Ok(())
    }

    /// Marks `frames` frames as valid (clamped to capacity).
    pub fn set_frames(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity_frames);
    }

    /// Zeroes the first `frames` frames and marks them valid.
    pub fn fill_silence(&mut self, frames: usize) {
        let frames = frames.min(self.capacity_frames);
        let len = frames * self.channels as usize;
        match &mut self.data {
            SampleData::Float(buf) => buf[..len].fill(0.0),
            SampleData::Fixed(buf) => buf[..len].fill(0),
        }
        self.frames = frames;
    }

    /// Converts interleaved `src` (same channel layout) into the buffer,
    /// starting at `frame_offset`. Returns the number of frames written.
    pub fn store<S: PcmSample>(&mut self, frame_offset: usize, src: &[S]) -> usize {
        let channels = self.channels as usize;
        let available = self.capacity_frames.saturating_sub(frame_offset);
        let frames = (src.len() / channels).min(available);
        let start = frame_offset * channels;
        let len = frames * channels;

        match &mut self.data {
            SampleData::Float(buf) => {
                for (dst, s) in buf[start..start + len].iter_mut().zip(src) {
                    *dst = s.to_f32();
                }
            }
            SampleData::Fixed(buf) => {
                for (dst, s) in buf[start..start + len].iter_mut().zip(src) {
                    *dst = s.to_fixed();
                }
            }
        }

        frames
    }

    /// Valid samples, if this is a Float buffer.
    pub fn as_float(&self) -> Option<&[f32]> {
        let len = self.valid_len();
        match &self.data {
            SampleData::Float(buf) => Some(&buf[..len]),
            SampleData::Fixed(_) => None,
        }
    }

    /// Valid samples, if this is a Fixed buffer.
    pub fn as_fixed(&self) -> Option<&[i32]> {
        let len = self.valid_len();
        match &self.data {
            SampleData::Fixed(buf) => Some(&buf[..len]),
            SampleData::Float(_) => None,
        }
    }

    /// Whole storage as a mutable float slice (for writers that fill in place).
    pub fn float_storage_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.data {
            SampleData::Float(buf) => Some(&mut buf[..]),
            SampleData::Fixed(_) => None,
        }
    }

    /// Whole storage as a mutable fixed slice.
    pub fn fixed_storage_mut(&mut self) -> Option<&mut [i32]> {
        match &mut self.data {
            SampleData::Fixed(buf) => Some(&mut buf[..]),
            SampleData::Float(_) => None,
        }
    }

    /// Reads sample `index` (within the valid region) as `f32`.
    pub fn sample_f32(&self, index: usize) -> Option<f32> {
        if index >= self.valid_len() {
            return None;
        }
        Some(match &self.data {
            SampleData::Float(buf) => buf[index],
            SampleData::Fixed(buf) => fixed_to_f32(buf[index]),
        })
    }

    /// Copies the valid samples into `out` as `f32`, returning the count copied.
    pub fn copy_to_f32(&self, out: &mut [f32]) -> usize {
        let len = self.valid_len().min(out.len());
        match &self.data {
            SampleData::Float(buf) => out[..len].copy_from_slice(&buf[..len]),
            SampleData::Fixed(buf) => {
                for (dst, s) in out[..len].iter_mut().zip(buf.iter()) {
                    *dst = fixed_to_f32(*s);
                }
            }
        }
        len
    }

    /// Collects the valid samples as `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.valid_len()];
        self.copy_to_f32(&mut out);
        out
    }

    fn valid_len(&self) -> usize {
        self.frames * self.channels as usize
    }

    fn storage_len(&self) -> usize {
        match &self.data {
            SampleData::Float(buf) => buf.len(),
            SampleData::Fixed(buf) => buf.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_conversions_agree() {
        assert_eq!(i16::MIN.to_fixed(), -FIXED_ONE);
        assert_eq!(i8::MIN.to_fixed(), -FIXED_ONE);
        assert_eq!(0.5f32.to_fixed(), FIXED_ONE / 2);
        assert!((fixed_to_f32(16384i16.to_fixed()) - 0.5).abs() < 1e-6);
        assert!((i16::MIN.to_f32() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn store_converts_into_fixed() {
        let alloc = Allocator::system();
        let mut buf = SampleBuffer::new(&alloc, SampleFormat::Fixed, 2, 4).unwrap();
        let written = buf.store(1, &[0.5f32, -0.5, 0.25, 0.0]);
        buf.set_frames(3);

        assert_eq!(written, 2);
        let fixed = buf.as_fixed().unwrap();
        assert_eq!(&fixed[2..6], &[FIXED_ONE / 2, -FIXED_ONE / 2, FIXED_ONE / 4, 0]);
    }

    #[test]
    fn store_clips_to_capacity() {
        let alloc = Allocator::system();
        let mut buf = SampleBuffer::new(&alloc, SampleFormat::Float, 1, 2).unwrap();
        assert_eq!(buf.store(1, &[1i16, 2, 3]), 1);
    }

    #[test]
    fn narrower_layout_gains_capacity() {
        let alloc = Allocator::system();
        let mut buf = SampleBuffer::new(&alloc, SampleFormat::Float, 2, 8).unwrap();
        buf.set_layout(1).unwrap();
        assert_eq!(buf.capacity_frames(), 16);
        assert_eq!(buf.channels(), 1);
    }

    #[test]
    fn silence_marks_frames_valid() {
        let alloc = Allocator::system();
        let mut buf = SampleBuffer::new(&alloc, SampleFormat::Float, 2, 8).unwrap();
        buf.store(0, &[1.0f32; 16]);
        buf.fill_silence(4);
        assert_eq!(buf.frames(), 4);
        assert!(buf.as_float().unwrap().iter().all(|s| *s == 0.0));
    }
}
