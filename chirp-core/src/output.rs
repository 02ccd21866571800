//! Destinations for the mixed buffer produced by each update.
//!
//! The engine never opens an audio device by itself: every tick it hands the
//! final stereo buffer to an [`OutputSink`]. [`BufferedOutput`] queues it in a
//! lock-free ring for a device callback (or a test) to drain, and with the
//! `cpal-output` feature [`CpalOutput`] wires that ring to the default device.

use crate::error::{ChirpError, Result};
use crate::sample::{SampleBuffer, fixed_to_f32};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Receives the engine's mixed output once per update.
pub trait OutputSink {
    /// Called with the interleaved stereo mix of one tick.
    fn deliver(&mut self, buffer: &SampleBuffer) -> Result<()>;
}

/// Discards everything. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl OutputSink for NullOutput {
    fn deliver(&mut self, _buffer: &SampleBuffer) -> Result<()> {
        Ok(())
    }
}

/// Queues mixed frames as `f32` for a consumer on another thread.
///
/// When the ring is full, the frames that do not fit are dropped and counted.
pub struct BufferedOutput {
    producer: HeapProd<f32>,
    channels: u16,
    delivered_frames: u64,
    dropped_frames: u64,
}

/// Consuming half of a [`BufferedOutput`].
pub struct OutputReceiver {
    consumer: HeapCons<f32>,
    channels: u16,
}

impl BufferedOutput {
    pub fn new(capacity_frames: usize, channels: u16) -> (Self, OutputReceiver) {
        let channels = channels.max(1);
        let rb = HeapRb::<f32>::new((capacity_frames * channels as usize).max(channels as usize));
        let (producer, consumer) = rb.split();
        (
            Self {
                producer,
                channels,
                delivered_frames: 0,
                dropped_frames: 0,
            },
            OutputReceiver { consumer, channels },
        )
    }

    pub fn delivered_frames(&self) -> u64 {
        self.delivered_frames
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}

impl OutputSink for BufferedOutput {
    fn deliver(&mut self, buffer: &SampleBuffer) -> Result<()> {
        if buffer.channels() != self.channels {
            return Err(ChirpError::AudioFormat(format!(
                "Output expects {} channels, got {}",
                self.channels,
                buffer.channels()
            )));
        }

        let channels = self.channels as usize;
        let len = buffer.frames() * channels;
        let room = self.producer.vacant_len() / channels * channels;
        let take = len.min(room);

        if let Some(samples) = buffer.as_float() {
            self.producer.push_slice(&samples[..take]);
        } else if let Some(samples) = buffer.as_fixed() {
            self.producer
                .push_iter(samples[..take].iter().map(|s| fixed_to_f32(*s)));
        }

        self.delivered_frames += (take / channels) as u64;
        self.dropped_frames += ((len - take) / channels) as u64;
        Ok(())
    }
}

impl OutputReceiver {
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Frames ready to read.
    pub fn available(&self) -> usize {
        self.consumer.occupied_len() / self.channels as usize
    }

    /// Pops up to `out.len()` samples. Returns how many were written.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        self.consumer.pop_slice(out)
    }

    pub fn drain_to_vec(&mut self) -> Vec<f32> {
        self.consumer.pop_iter().collect()
    }

    /// Fills `out` from the queue, padding with silence on shortfall.
    pub fn fill(&mut self, out: &mut [f32]) -> usize {
        let n = self.read(out);
        out[n..].fill(0.0);
        n
    }
}

#[cfg(feature = "cpal-output")]
pub use device::CpalOutput;

#[cfg(feature = "cpal-output")]
mod device {
    use super::{BufferedOutput, OutputReceiver, OutputSink};
    use crate::error::{ChirpError, Result};
    use crate::sample::SampleBuffer;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, SizedSample};
    use ringbuf::traits::Consumer;

    /// Plays the engine output on the default cpal device.
    pub struct CpalOutput {
        queue: BufferedOutput,
        _stream: cpal::Stream,
    }

    impl CpalOutput {
        /// Opens the default output device at `sample_rate` with a queue of
        /// `buffer_frames` frames between the engine and the device.
        pub fn open(sample_rate: u32, buffer_frames: usize) -> Result<Self> {
            let channels = crate::config::ChirpConfig::OUTPUT_CHANNELS;
            let host = cpal::default_host();
            let device = host.default_output_device().ok_or_else(|| {
                ChirpError::AudioDevice("No default output device available".into())
            })?;

            let config = cpal::StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let default_config = device.default_output_config().map_err(|e| {
                ChirpError::AudioDevice(format!("Failed to get default config: {}", e))
            })?;

            let (queue, receiver) = BufferedOutput::new(buffer_frames, channels);
            let stream = match default_config.sample_format() {
                cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, receiver)?,
                cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, receiver)?,
                cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, receiver)?,
                other => {
                    return Err(ChirpError::AudioFormat(format!(
                        "Unsupported device sample format {:?}",
                        other
                    )));
                }
            };

            stream.play().map_err(|e| {
                ChirpError::AudioDevice(format!("Failed to start stream: {}", e))
            })?;
            log::info!(
                "Output: {} Hz stereo on '{}'",
                sample_rate,
                device.name().unwrap_or_else(|_| "unknown".to_string())
            );

            Ok(Self {
                queue,
                _stream: stream,
            })
        }

        pub fn dropped_frames(&self) -> u64 {
            self.queue.dropped_frames()
        }
    }

    impl OutputSink for CpalOutput {
        fn deliver(&mut self, buffer: &SampleBuffer) -> Result<()> {
            self.queue.deliver(buffer)
        }
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut receiver: OutputReceiver,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        let value = receiver.consumer.try_pop().unwrap_or(0.0);
                        *sample = T::from_sample(value);
                    }
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| ChirpError::AudioDevice(format!("Failed to build stream: {}", e)))
    }
}
