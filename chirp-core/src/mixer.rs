//! Mixing of task output into the final stereo buffer.
//!
//! Every serviced task's buffer is accumulated onto a stereo bus; once all
//! tasks are in, [`Mixer::finalize`] clamps the bus into the output buffer.
//!
//! - Float: `f32` accumulation, clamped to ±1.0 only in `finalize`.
//! - Gain changes ramp per frame at `1 / volume_ramp_ms` volume units per
//!   millisecond instead of jumping.
//! - Fixed: each contribution is `(sample * gain) >> 24` computed on its own
//!   and summed on an `i64` bus, so the result is bit-identical in any task
//!   order. The bus is clamped to ±2^24 in `finalize`.

use crate::alloc::{Allocator, TrackedVec};
use crate::error::{ChirpError, Result};
use crate::sample::{FIXED_FRAC_BITS, FIXED_ONE, SampleBuffer, SampleFormat, f32_to_fixed};
use std::f32::consts::FRAC_PI_4;

/// Channels on the mix bus.
pub const BUS_CHANNELS: u16 = 2;

enum Bus {
    Float(TrackedVec<f32>),
    Fixed(TrackedVec<i64>),
}

/// Left/right gains for `pan` on a source with `channels` channels.
///
/// Mono sources use the constant-power law; stereo sources use a balance law
/// that attenuates the opposite side.
pub fn pan_gains(pan: f32, channels: u16) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if channels == 1 {
        let angle = FRAC_PI_4 * (pan + 1.0);
        (angle.cos(), angle.sin())
    } else if pan < 0.0 {
        (1.0, 1.0 + pan)
    } else {
        (1.0 - pan, 1.0)
    }
}

/// Left and right gains applied to one source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoGain {
    pub left: f32,
    pub right: f32,
}

impl StereoGain {
    pub fn new(volume: f32, pan: f32, channels: u16) -> Self {
        let (left, right) = pan_gains(pan, channels);
        Self {
            left: left * volume,
            right: right * volume,
        }
    }

    /// One frame closer to `target`; each side moves by at most `step`.
    pub fn toward(self, target: Self, step: f32) -> Self {
        Self {
            left: approach(self.left, target.left, step),
            right: approach(self.right, target.right, step),
        }
    }

    fn to_fixed(self) -> (i64, i64) {
        (f32_to_fixed(self.left) as i64, f32_to_fixed(self.right) as i64)
    }
}

fn approach(from: f32, to: f32, step: f32) -> f32 {
    if (to - from).abs() <= step {
        to
    } else if to > from {
        from + step
    } else {
        from - step
    }
}

/// Largest per-frame gain change for a ramp of `ramp_ms` per volume unit.
/// Ramps shorter than one frame jump straight to the target.
pub fn ramp_step(ramp_ms: f32, sample_rate: u32) -> f32 {
    let frames = ramp_ms * 0.001 * sample_rate as f32;
    if frames <= 1.0 {
        f32::INFINITY
    } else {
        1.0 / frames
    }
}

pub struct Mixer {
    bus: Bus,
    capacity_frames: usize,
    frames: usize,
    clipped: bool,
}

impl Mixer {
    pub fn new(allocator: &Allocator, format: SampleFormat, capacity_frames: usize) -> Result<Self> {
        let len = capacity_frames * BUS_CHANNELS as usize;
        let bus = match format {
            SampleFormat::Float => Bus::Float(allocator.vec(len, 0.0f32)?),
            SampleFormat::Fixed => Bus::Fixed(allocator.vec(len, 0i64)?),
        };
        Ok(Self {
            bus,
            capacity_frames,
            frames: 0,
            clipped: false,
        })
    }

    pub fn format(&self) -> SampleFormat {
        match self.bus {
            Bus::Float(_) => SampleFormat::Float,
            Bus::Fixed(_) => SampleFormat::Fixed,
        }
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Frames in the current mix.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Starts a new mix of `frames` frames of silence.
    pub fn begin(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity_frames);
        let len = self.frames * BUS_CHANNELS as usize;
        match &mut self.bus {
            Bus::Float(bus) => bus[..len].fill(0.0),
            Bus::Fixed(bus) => bus[..len].fill(0),
        }
    }

    /// Adds `input` to the bus, moving `gain` toward `target` by at most
    /// `step` per frame. `gain` is left where the ramp stopped.
    ///
    /// Frames beyond the current mix length are ignored; a short input only
    /// contributes to the frames it has.
    pub fn accumulate(
        &mut self,
        input: &SampleBuffer,
        gain: &mut StereoGain,
        target: StereoGain,
        step: f32,
    ) -> Result<()> {
        let channels = input.channels();
        if channels == 0 || channels > BUS_CHANNELS {
            return Err(ChirpError::AudioFormat(format!(
                "Cannot mix a {}-channel buffer",
                channels
            )));
        }

        let frames = input.frames().min(self.frames);
        let stereo = channels == 2;

        match &mut self.bus {
            Bus::Float(bus) => {
                let src = input.as_float().ok_or_else(format_mismatch)?;
                for frame in 0..frames {
                    let (l, r) = if stereo {
                        (src[frame * 2], src[frame * 2 + 1])
                    } else {
                        (src[frame], src[frame])
                    };
                    bus[frame * 2] += l * gain.left;
                    bus[frame * 2 + 1] += r * gain.right;
                    if *gain != target {
                        *gain = gain.toward(target, step);
                    }
                }
            }
            Bus::Fixed(bus) => {
                let src = input.as_fixed().ok_or_else(format_mismatch)?;
                let (mut left, mut right) = gain.to_fixed();
                for frame in 0..frames {
                    let (l, r) = if stereo {
                        (src[frame * 2], src[frame * 2 + 1])
                    } else {
                        (src[frame], src[frame])
                    };
                    bus[frame * 2] += (l as i64 * left) >> FIXED_FRAC_BITS;
                    bus[frame * 2 + 1] += (r as i64 * right) >> FIXED_FRAC_BITS;
                    if *gain != target {
                        *gain = gain.toward(target, step);
                        (left, right) = gain.to_fixed();
                    }
                }
            }
        }
        Ok(())
    }

    /// Clamps the bus into `out` (stereo, same format). Returns true if any
    /// sample was clipped in this mix.
    pub fn finalize(&mut self, out: &mut SampleBuffer) -> Result<bool> {
        if out.channels() != BUS_CHANNELS {
            out.set_layout(BUS_CHANNELS)?;
        }
        let frames = self.frames.min(out.capacity_frames());
        let len = frames * BUS_CHANNELS as usize;
        let mut clipped = false;

        match &self.bus {
            Bus::Float(bus) => {
                let dst = out.float_storage_mut().ok_or_else(format_mismatch)?;
                for (d, s) in dst[..len].iter_mut().zip(&bus[..len]) {
                    clipped |= s.abs() > 1.0;
                    *d = s.clamp(-1.0, 1.0);
                }
            }
            Bus::Fixed(bus) => {
                let dst = out.fixed_storage_mut().ok_or_else(format_mismatch)?;
                let limit = FIXED_ONE as i64;
                for (d, s) in dst[..len].iter_mut().zip(&bus[..len]) {
                    clipped |= s.abs() > limit;
                    *d = (*s).clamp(-limit, limit) as i32;
                }
            }
        }

        out.set_frames(frames);
        self.clipped |= clipped;
        Ok(clipped)
    }

    /// Whether any mix since the last reset clipped.
    pub fn clip_flag(&self) -> bool {
        self.clipped
    }

    pub fn reset_clip_flag(&mut self) {
        self.clipped = false;
    }
}

fn format_mismatch() -> ChirpError {
    ChirpError::AudioFormat("Buffer format does not match the mix format".to_string())
}
