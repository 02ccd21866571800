use crate::bank::{Bank, BankSound};
use crate::decoder::{DecodeStatus, Decoder, DecoderKind, MAX_SOURCE_CHANNELS, clamp_speed};
use crate::error::{ChirpError, Result};
use crate::looping::{LoopCursor, LoopRegion};
use crate::sample::SampleBuffer;
use std::sync::Arc;

/// Source frames cached for interpolation.
const WINDOW_FRAMES: usize = 64;

/// Decoded source frames around the interpolation point.
struct Window {
    samples: [f32; WINDOW_FRAMES * MAX_SOURCE_CHANNELS as usize],
    start: u64,
    frames: usize,
}

impl Window {
    fn new() -> Self {
        Self {
            samples: [0.0; WINDOW_FRAMES * MAX_SOURCE_CHANNELS as usize],
            start: 0,
            frames: 0,
        }
    }

    /// Copies source frame `frame` into `out`, refilling from `sound` when it
    /// is not cached.
    fn frame(&mut self, sound: &BankSound, frame: u64, out: &mut [f32]) {
        let channels = out.len();
        if frame < self.start || frame >= self.start + self.frames as u64 {
            self.start = frame;
            self.frames = sound.read_f32(frame, &mut self.samples[..WINDOW_FRAMES * channels]);
        }
        let at = (frame - self.start) as usize * channels;
        match self.samples.get(at..at + channels) {
            Some(src) => out.copy_from_slice(src),
            None => out.fill(0.0),
        }
    }
}

/// Plays one sound of a resident [`Bank`].
///
/// The bank is shared read-only; the decoder only keeps a cursor and the loop
/// state, so seeking back and producing again yields identical audio. At
/// speeds other than 1.0 output frames are interpolated between neighbouring
/// source frames.
pub struct BankDecoder {
    bank: Arc<Bank>,
    index: usize,
    channels: u16,
    total: u64,
    cursor: u64,
    /// Fraction of a source frame past `cursor`
    frac: f64,
    speed: f32,
    window: Window,
    looping: LoopCursor,
}

impl BankDecoder {
    pub fn new(bank: Arc<Bank>, index: usize, looping: Option<LoopRegion>) -> Result<Self> {
        let sound = bank.sound(index).ok_or_else(|| {
            ChirpError::AudioLoading(format!(
                "Sound #{} not found in bank '{}'",
                index,
                bank.name()
            ))
        })?;
        let channels = sound.channels;
        let total = sound.total_frames();
        if channels == 0 || channels > super::MAX_SOURCE_CHANNELS {
            return Err(ChirpError::Decode(format!(
                "Bank sound '{}' has {} channels",
                sound.name, channels
            )));
        }

        Ok(Self {
            bank,
            index,
            channels,
            total,
            cursor: 0,
            frac: 0.0,
            speed: 1.0,
            window: Window::new(),
            looping: LoopCursor::new(looping),
        })
    }

    pub fn bank(&self) -> &Arc<Bank> {
        &self.bank
    }

    /// Loops completed since playback started or was repositioned.
    pub fn loops_completed(&self) -> u32 {
        self.looping.completed()
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Source frame limit for the cursor, wrapping at the loop end first.
    /// `None` once the sound has ended.
    fn limit(&mut self) -> Option<u64> {
        let total = Some(self.total);
        loop {
            let limit = match self.looping.loop_end(total) {
                Some(end) if self.cursor >= end => {
                    let over = self.cursor - end;
                    self.cursor = self.looping.wrap(total) + over;
                    continue;
                }
                Some(end) => end,
                None => self.total,
            };
            return (self.cursor < limit).then_some(limit);
        }
    }

    fn copy(&mut self, sound: &BankSound, out: &mut SampleBuffer, frames: usize) -> usize {
        let mut written = 0;
        while written < frames {
            let Some(limit) = self.limit() else {
                break;
            };
            let want = (frames - written).min((limit - self.cursor) as usize);
            let copied = sound.read_frames(self.cursor, want, out, written);
            if copied == 0 {
                break;
            }
            self.cursor += copied as u64;
            written += copied;
        }
        written
    }

    fn interpolate(&mut self, sound: &BankSound, out: &mut SampleBuffer, frames: usize) -> usize {
        let channels = self.channels as usize;
        let mut a = [0.0f32; MAX_SOURCE_CHANNELS as usize];
        let mut b = [0.0f32; MAX_SOURCE_CHANNELS as usize];
        let mut written = 0;
        while written < frames {
            let Some(limit) = self.limit() else {
                break;
            };
            let next = (self.cursor + 1).min(limit - 1);
            self.window.frame(sound, self.cursor, &mut a[..channels]);
            self.window.frame(sound, next, &mut b[..channels]);

            let t = self.frac as f32;
            for (x, y) in a[..channels].iter_mut().zip(&b[..channels]) {
                *x += (y - *x) * t;
            }
            out.store(written, &a[..channels]);
            written += 1;

            self.frac += self.speed as f64;
            let step = self.frac.floor();
            self.frac -= step;
            self.cursor += step as u64;
        }
        written
    }
}

impl Decoder for BankDecoder {
    fn kind(&self) -> DecoderKind {
        DecoderKind::BankResident
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn produce(&mut self, out: &mut SampleBuffer, frames: usize) -> DecodeStatus {
        let bank = Arc::clone(&self.bank);
        let Some(sound) = bank.sound(self.index) else {
            return DecodeStatus::Failed(ChirpError::Decode(format!(
                "Sound #{} vanished from bank '{}'",
                self.index,
                self.bank.name()
            )));
        };
        if out.channels() != self.channels {
            return DecodeStatus::Failed(ChirpError::AudioFormat(format!(
                "Buffer has {} channels, sound has {}",
                out.channels(),
                self.channels
            )));
        }

        let frames = frames.min(out.capacity_frames());
        let written = if self.speed == 1.0 && self.frac == 0.0 {
            self.copy(sound, out, frames)
        } else {
            self.interpolate(sound, out, frames)
        };

        if written == 0 {
            out.set_frames(0);
            return DecodeStatus::EndOfStream;
        }
        out.set_frames(written);
        DecodeStatus::Ready(written)
    }

    fn seek(&mut self, frame: u64) {
        self.cursor = frame.min(self.total);
        self.frac = 0.0;
        self.looping.rewind();
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total)
    }

    fn set_loop(&mut self, region: Option<LoopRegion>) {
        self.looping.set_region(region);
    }

    fn release_loop(&mut self) {
        self.looping.release();
    }

    fn set_speed(&mut self, speed: f32) {
        self.speed = clamp_speed(speed);
        if self.speed == 1.0 {
            self.frac = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Allocator;
    use crate::audio_data::{DecodedAudio, PcmEncoding, SoundAsset};
    use crate::looping::LoopCount;
    use crate::sample::SampleFormat;

    fn bank(frames: usize, channels: u16, encoding: PcmEncoding) -> Arc<Bank> {
        let samples = (0..frames * channels as usize)
            .map(|i| ((i % 97) as f32 / 97.0) - 0.5)
            .collect();
        let audio = DecodedAudio::new(samples, 48000, channels).unwrap();
        Arc::new(
            Bank::from_assets(
                "test",
                vec![SoundAsset::new("tone", audio)],
                encoding,
                &Allocator::system(),
            )
            .unwrap(),
        )
    }

    fn buffer(format: SampleFormat, channels: u16, frames: usize) -> SampleBuffer {
        SampleBuffer::new(&Allocator::system(), format, channels, frames).unwrap()
    }

    #[test]
    fn seek_to_zero_replays_identically() {
        for format in [SampleFormat::Float, SampleFormat::Fixed] {
            let mut decoder = BankDecoder::new(bank(1000, 2, PcmEncoding::I16), 0, None).unwrap();
            let mut out = buffer(format, 2, 256);

            let mut first = Vec::new();
            for _ in 0..3 {
                assert!(matches!(decoder.produce(&mut out, 256), DecodeStatus::Ready(256)));
                first.extend(out.to_f32_vec());
            }

            decoder.seek(0);
            assert_eq!(decoder.position(), 0);
            let mut second = Vec::new();
            for _ in 0..3 {
                assert!(matches!(decoder.produce(&mut out, 256), DecodeStatus::Ready(256)));
                second.extend(out.to_f32_vec());
            }
            assert_eq!(first, second);
        }
    }

    #[test]
    fn ends_with_partial_quantum() {
        let mut decoder = BankDecoder::new(bank(300, 1, PcmEncoding::F32), 0, None).unwrap();
        let mut out = buffer(SampleFormat::Float, 1, 256);

        assert!(matches!(decoder.produce(&mut out, 256), DecodeStatus::Ready(256)));
        assert!(matches!(decoder.produce(&mut out, 256), DecodeStatus::Ready(44)));
        assert!(matches!(decoder.produce(&mut out, 256), DecodeStatus::EndOfStream));
    }

    #[test]
    fn counted_loop_plays_extra_passes() {
        let region = LoopRegion::whole(LoopCount::Times(2));
        let mut decoder = BankDecoder::new(bank(100, 1, PcmEncoding::I8), 0, Some(region)).unwrap();
        let mut out = buffer(SampleFormat::Fixed, 1, 64);

        let mut played = 0;
        loop {
            match decoder.produce(&mut out, 64) {
                DecodeStatus::Ready(n) => played += n,
                DecodeStatus::EndOfStream => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(played, 300);
        assert_eq!(decoder.loops_completed(), 2);
    }

    #[test]
    fn loop_region_repeats_inner_section() {
        let region = LoopRegion::new(10, Some(20), LoopCount::Infinite);
        let mut decoder = BankDecoder::new(bank(100, 1, PcmEncoding::F32), 0, Some(region)).unwrap();
        let mut out = buffer(SampleFormat::Float, 1, 50);

        assert!(matches!(decoder.produce(&mut out, 50), DecodeStatus::Ready(50)));
        let samples = out.to_f32_vec();
        assert_eq!(samples[10], samples[20]);
        assert_eq!(samples[19], samples[29]);

        decoder.release_loop();
        let mut rest = 0;
        while let DecodeStatus::Ready(n) = decoder.produce(&mut out, 50) {
            rest += n;
        }
        assert_eq!(rest, 80);
    }

    #[test]
    fn rejects_mismatched_layout() {
        let mut decoder = BankDecoder::new(bank(10, 2, PcmEncoding::I16), 0, None).unwrap();
        let mut out = buffer(SampleFormat::Float, 1, 16);
        assert!(matches!(
            decoder.produce(&mut out, 8),
            DecodeStatus::Failed(ChirpError::AudioFormat(_))
        ));
    }

    #[test]
    fn double_speed_halves_the_length() {
        let mut decoder = BankDecoder::new(bank(300, 2, PcmEncoding::F32), 0, None).unwrap();
        decoder.set_speed(2.0);
        let mut out = buffer(SampleFormat::Float, 2, 64);

        let mut played = 0;
        while let DecodeStatus::Ready(n) = decoder.produce(&mut out, 64) {
            played += n;
        }
        assert_eq!(played, 150);
        assert_eq!(decoder.position(), 300);
    }

    #[test]
    fn half_speed_interpolates_between_frames() {
        let mut decoder = BankDecoder::new(bank(100, 1, PcmEncoding::F32), 0, None).unwrap();
        decoder.set_speed(0.5);
        let mut out = buffer(SampleFormat::Float, 1, 8);

        assert!(matches!(decoder.produce(&mut out, 8), DecodeStatus::Ready(8)));
        let samples = out.to_f32_vec();
        let source = |i: usize| (i % 97) as f32 / 97.0 - 0.5;
        assert!((samples[0] - source(0)).abs() < 1e-6);
        assert!((samples[1] - (source(0) + source(1)) / 2.0).abs() < 1e-6);
        assert!((samples[6] - source(3)).abs() < 1e-6);
        assert_eq!(decoder.position(), 4);
    }

    #[test]
    fn speed_is_clamped() {
        let mut decoder = BankDecoder::new(bank(10, 1, PcmEncoding::F32), 0, None).unwrap();
        decoder.set_speed(100.0);
        assert_eq!(decoder.speed(), crate::decoder::MAX_SPEED);
        decoder.set_speed(f32::NAN);
        assert_eq!(decoder.speed(), 1.0);
    }

    fn sine_bank(frames: usize, encoding: PcmEncoding) -> Arc<Bank> {
        let samples = (0..frames)
            .flat_map(|i| {
                let s = (i as f32 * 0.05).sin() * 0.5;
                [s, -s]
            })
            .collect();
        let audio = DecodedAudio::new(samples, 48000, 2).unwrap();
        Arc::new(
            Bank::from_assets(
                "sine",
                vec![SoundAsset::new("sine", audio)],
                encoding,
                &Allocator::system(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn adpcm_sound_plays_like_pcm() {
        let mut pcm = BankDecoder::new(sine_bank(500, PcmEncoding::F32), 0, None).unwrap();
        let mut adpcm = BankDecoder::new(sine_bank(500, PcmEncoding::Adpcm), 0, None).unwrap();
        let mut a = buffer(SampleFormat::Fixed, 2, 128);
        let mut b = buffer(SampleFormat::Fixed, 2, 128);

        let mut frames = 0;
        loop {
            match (pcm.produce(&mut a, 128), adpcm.produce(&mut b, 128)) {
                (DecodeStatus::Ready(x), DecodeStatus::Ready(y)) => {
                    assert_eq!(x, y);
                    frames += x;
                    for (x, y) in a.to_f32_vec().iter().zip(b.to_f32_vec()) {
                        assert!((x - y).abs() < 0.03, "{} vs {}", x, y);
                    }
                }
                (DecodeStatus::EndOfStream, DecodeStatus::EndOfStream) => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(frames, 500);
    }

    #[test]
    fn missing_sound_is_an_error() {
        assert!(BankDecoder::new(bank(10, 1, PcmEncoding::I16), 3, None).is_err());
    }
}
