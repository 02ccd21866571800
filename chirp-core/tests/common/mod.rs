#![allow(dead_code)]

use chirp_core::error::Result;
use chirp_core::stream::{Codec, StreamFormat, StreamSource};
use chirp_core::{ChirpEvent, RenderClock};
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Writes a 16-bit WAV of `frames` frames at constant `level`.
pub fn write_wav(dir: &Path, name: &str, frames: usize, sample_rate: u32, channels: u16, level: f32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let value = (level * i16::MAX as f32) as i16;
    for _ in 0..frames * channels as usize {
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();
    path
}

/// Render clock that only moves when told to.
#[derive(Default)]
pub struct StepClock {
    micros: AtomicU64,
}

impl StepClock {
    pub fn advance(&self, ms: f64) {
        self.micros.fetch_add((ms * 1000.0).round() as u64, Ordering::Relaxed);
    }
}

impl RenderClock for StepClock {
    fn now_ms(&self) -> f64 {
        self.micros.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Mono source at a constant level whose first `stalls` reads have nothing
/// available.
pub struct StallingSource {
    pub sample_rate: u32,
    pub total_frames: u64,
    pub level: f32,
    pub stalls: u32,
    pub position: u64,
}

impl StallingSource {
    pub fn new(sample_rate: u32, total_frames: u64, stalls: u32) -> Self {
        Self {
            sample_rate,
            total_frames,
            level: 0.5,
            stalls,
            position: 0,
        }
    }
}

impl StreamSource for StallingSource {
    fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: 1,
            total_frames: Some(self.total_frames),
            codec: Codec::Pcm,
        }
    }

    fn read(&mut self, out: &mut [f32]) -> Result<usize> {
        if self.stalls > 0 {
            self.stalls -= 1;
            return Err(Error::new(ErrorKind::WouldBlock, "no data yet").into());
        }
        let frames = (out.len() as u64).min(self.total_frames - self.position) as usize;
        out[..frames].fill(self.level);
        self.position += frames as u64;
        Ok(frames)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        self.position = frame.min(self.total_frames);
        Ok(())
    }
}

pub fn count_underruns(events: &[ChirpEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ChirpEvent::BufferUnderrun { .. }))
        .count()
}
