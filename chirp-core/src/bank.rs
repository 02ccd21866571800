//! Resident sound banks.

use crate::adpcm;
use crate::alloc::{Allocator, TrackedVec};
use crate::audio_data::{PcmEncoding, SoundAsset};
use crate::decoder::MAX_SOURCE_CHANNELS;
use crate::error::{ChirpError, Result};
use crate::looping::LoopRegion;
use crate::sample::{PcmSample, SampleBuffer};
use std::collections::HashMap;
use std::fmt;

slotmap::new_key_type! {
    /// Handle to a bank registered with an engine.
    pub struct BankHandle;
}

/// Addresses a sound inside a bank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SoundRef {
    Index(usize),
    Name(String),
}

impl From<usize> for SoundRef {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for SoundRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for SoundRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for SoundRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{index}"),
            Self::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// Resident interleaved PCM.
#[derive(Debug)]
pub enum PcmData {
    I8(TrackedVec<i8>),
    I16(TrackedVec<i16>),
    F32(TrackedVec<f32>),
    /// ADPCM blocks; `samples` excludes the padding of the last block.
    Adpcm {
        blocks: TrackedVec<u8>,
        samples: usize,
    },
}

/// A run of resident samples handed out by [`BankSound::visit`].
enum Run<'a> {
    I8(&'a [i8]),
    I16(&'a [i16]),
    F32(&'a [f32]),
}

impl Run<'_> {
    fn store(&self, out: &mut SampleBuffer, frame_offset: usize) -> usize {
        match self {
            Self::I8(s) => out.store(frame_offset, s),
            Self::I16(s) => out.store(frame_offset, s),
            Self::F32(s) => out.store(frame_offset, s),
        }
    }

    fn copy_f32(&self, out: &mut [f32]) -> usize {
        fn copy<S: PcmSample>(src: &[S], out: &mut [f32]) -> usize {
            let n = src.len().min(out.len());
            for (dst, s) in out[..n].iter_mut().zip(src) {
                *dst = s.to_f32();
            }
            n
        }
        match self {
            Self::I8(s) => copy(s, out),
            Self::I16(s) => copy(s, out),
            Self::F32(s) => copy(s, out),
        }
    }
}

impl PcmData {
    fn encode(
        samples: &[f32],
        channels: u16,
        encoding: PcmEncoding,
        allocator: &Allocator,
    ) -> Result<Self> {
        Ok(match encoding {
            PcmEncoding::I8 => {
                let mut data = allocator.vec(samples.len(), 0i8)?;
                for (dst, s) in data.iter_mut().zip(samples) {
                    *dst = (s.clamp(-1.0, 1.0) * 127.0).round() as i8;
                }
                Self::I8(data)
            }
            PcmEncoding::I16 => {
                let mut data = allocator.vec(samples.len(), 0i16)?;
                for (dst, s) in data.iter_mut().zip(samples) {
                    *dst = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
                }
                Self::I16(data)
            }
            PcmEncoding::F32 => {
                let mut data = allocator.vec(samples.len(), 0.0f32)?;
                data.copy_from_slice(samples);
                Self::F32(data)
            }
            PcmEncoding::Adpcm => Self::Adpcm {
                blocks: adpcm::encode(samples, channels, allocator)?,
                samples: samples.len(),
            },
        })
    }

    pub fn encoding(&self) -> PcmEncoding {
        match self {
            Self::I8(_) => PcmEncoding::I8,
            Self::I16(_) => PcmEncoding::I16,
            Self::F32(_) => PcmEncoding::F32,
            Self::Adpcm { .. } => PcmEncoding::Adpcm,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::I8(d) => d.len(),
            Self::I16(d) => d.len(),
            Self::F32(d) => d.len(),
            Self::Adpcm { samples, .. } => *samples,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One sound inside a [`Bank`].
#[derive(Debug)]
pub struct BankSound {
    pub name: String,
    pub pcm: PcmData,
    pub channels: u16,
    pub sample_rate: u32,
    /// Default volume (0.0 = silent, 1.0 = full volume)
    pub volume: f32,
    /// Default pan (-1.0 left to 1.0 right)
    pub pan: f32,
    pub looping: Option<LoopRegion>,
}

impl BankSound {
    pub fn total_frames(&self) -> u64 {
        (self.pcm.len() / self.channels as usize) as u64
    }

    /// Converts `frames` frames starting at `start` into `out` at
    /// `out_offset`. Returns the number of frames copied, which is short only
    /// at the end of the sound or of `out`.
    pub fn read_frames(
        &self,
        start: u64,
        frames: usize,
        out: &mut SampleBuffer,
        out_offset: usize,
    ) -> usize {
        self.visit(start, frames, |done, run| run.store(out, out_offset + done))
    }

    /// Like [`read_frames`](Self::read_frames), into interleaved `f32`.
    pub fn read_f32(&self, start: u64, out: &mut [f32]) -> usize {
        let channels = self.channels as usize;
        let frames = out.len() / channels;
        self.visit(start, frames, |done, run| {
            run.copy_f32(&mut out[done * channels..]) / channels
        })
    }

    /// Hands up to `frames` frames from `start` to `sink` in runs. `sink`
    /// gets the frames already taken and returns how many frames of the run
    /// it took; a short take ends the visit.
    fn visit(
        &self,
        start: u64,
        frames: usize,
        mut sink: impl FnMut(usize, Run<'_>) -> usize,
    ) -> usize {
        let total = self.total_frames();
        if start >= total {
            return 0;
        }
        let channels = self.channels as usize;
        let frames = frames.min((total - start) as usize);
        let from = start as usize * channels;
        let to = from + frames * channels;

        let blocks = match &self.pcm {
            PcmData::I8(d) => return sink(0, Run::I8(&d[from..to])),
            PcmData::I16(d) => return sink(0, Run::I16(&d[from..to])),
            PcmData::F32(d) => return sink(0, Run::F32(&d[from..to])),
            PcmData::Adpcm { blocks, .. } => blocks,
        };

        let mut decoded = [0i16; adpcm::FRAMES_PER_BLOCK * MAX_SOURCE_CHANNELS as usize];
        let mut done = 0;
        while done < frames {
            let frame = start as usize + done;
            let block = frame / adpcm::FRAMES_PER_BLOCK;
            let offset = frame % adpcm::FRAMES_PER_BLOCK;
            let n = (adpcm::FRAMES_PER_BLOCK - offset).min(frames - done);

            let block_samples = &mut decoded[..adpcm::FRAMES_PER_BLOCK * channels];
            adpcm::decode_block(blocks, block, channels, block_samples);
            let run = &block_samples[offset * channels..(offset + n) * channels];
            let taken = sink(done, Run::I16(run));
            done += taken;
            if taken < n {
                break;
            }
        }
        done
    }
}

/// An immutable collection of resident sounds, shared by every task playing
/// from it.
#[derive(Debug)]
pub struct Bank {
    name: String,
    sounds: Vec<BankSound>,
    by_name: HashMap<String, usize>,
}

impl Bank {
    /// Packs decoded assets into resident storage accounted to `allocator`.
    ///
    /// Sound indices follow the order of `assets`. When two sounds share a
    /// name, lookup by name finds the first.
    pub fn from_assets(
        name: impl Into<String>,
        assets: Vec<SoundAsset>,
        encoding: PcmEncoding,
        allocator: &Allocator,
    ) -> Result<Self> {
        let mut sounds = Vec::with_capacity(assets.len());
        let mut by_name = HashMap::with_capacity(assets.len());

        for (index, asset) in assets.into_iter().enumerate() {
            let channels = asset.audio.channels();
            if encoding == PcmEncoding::Adpcm && channels > MAX_SOURCE_CHANNELS {
                return Err(ChirpError::AudioFormat(format!(
                    "ADPCM sound '{}' has {} channels",
                    asset.name, channels
                )));
            }
            let pcm = PcmData::encode(asset.audio.samples(), channels, encoding, allocator)?;
            by_name.entry(asset.name.clone()).or_insert(index);
            sounds.push(BankSound {
                name: asset.name,
                pcm,
                channels,
                sample_rate: asset.audio.sample_rate(),
                volume: asset.volume,
                pan: asset.pan,
                looping: asset.looping,
            });
        }

        Ok(Self {
            name: name.into(),
            sounds,
            by_name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }

    pub fn sounds(&self) -> &[BankSound] {
        &self.sounds
    }

    /// Resolves a [`SoundRef`] to its index.
    pub fn find(&self, sound: &SoundRef) -> Result<usize> {
        match sound {
            SoundRef::Index(index) if *index < self.sounds.len() => Ok(*index),
            SoundRef::Name(name) if self.by_name.contains_key(name) => Ok(self.by_name[name]),
            _ => Err(ChirpError::AudioLoading(format!(
                "Sound {} not found in bank '{}'",
                sound, self.name
            ))),
        }
    }

    pub fn sound(&self, index: usize) -> Option<&BankSound> {
        self.sounds.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::CountingMemory;
    use crate::audio_data::DecodedAudio;
    use crate::sample::SampleFormat;
    use std::sync::Arc;

    fn ramp_asset(name: &str, frames: usize) -> SoundAsset {
        let samples = (0..frames).map(|i| i as f32 / frames as f32).collect();
        SoundAsset::new(name, DecodedAudio::new(samples, 48000, 1).unwrap())
    }

    #[test]
    fn lookup_by_index_and_name() {
        let bank = Bank::from_assets(
            "sfx",
            vec![ramp_asset("hit", 10), ramp_asset("miss", 20)],
            PcmEncoding::I16,
            &Allocator::system(),
        )
        .unwrap();

        assert_eq!(bank.find(&SoundRef::from("miss")).unwrap(), 1);
        assert_eq!(bank.find(&SoundRef::Index(0)).unwrap(), 0);
        assert!(bank.find(&SoundRef::Index(2)).is_err());
        assert!(bank.find(&SoundRef::from("nope")).is_err());
        assert_eq!(bank.sound(1).unwrap().total_frames(), 20);
    }

    #[test]
    fn storage_is_accounted() {
        let memory = Arc::new(CountingMemory::new());
        let alloc = Allocator::new(memory.clone());
        let bank = Bank::from_assets(
            "sfx",
            vec![ramp_asset("a", 100)],
            PcmEncoding::I16,
            &alloc,
        )
        .unwrap();

        assert_eq!(memory.outstanding(), 200);
        drop(bank);
        assert_eq!(memory.outstanding(), 0);
    }

    #[test]
    fn adpcm_sounds_decode_across_blocks() {
        let samples: Vec<f32> = (0..100).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
        let audio = DecodedAudio::new(samples.clone(), 48000, 1).unwrap();
        let memory = Arc::new(CountingMemory::new());
        let bank = Bank::from_assets(
            "sfx",
            vec![SoundAsset::new("a", audio)],
            PcmEncoding::Adpcm,
            &Allocator::new(memory.clone()),
        )
        .unwrap();
        let sound = bank.sound(0).unwrap();
        assert_eq!(sound.pcm.encoding(), PcmEncoding::Adpcm);
        assert_eq!(sound.total_frames(), 100);
        // Three blocks of 36 frames, 24 bytes each.
        assert_eq!(memory.outstanding(), 72);

        // A read straddling the first block boundary.
        let mut out = vec![0.0f32; 40];
        assert_eq!(sound.read_f32(20, &mut out), 40);
        for (i, s) in out.iter().enumerate() {
            assert!((s - samples[20 + i]).abs() < 0.02, "frame {}", 20 + i);
        }

        let mut buf = SampleBuffer::new(&Allocator::system(), SampleFormat::Float, 1, 16).unwrap();
        assert_eq!(sound.read_frames(90, 16, &mut buf, 0), 10);
        buf.set_frames(10);
        assert!((buf.sample_f32(9).unwrap() - samples[99]).abs() < 0.02);
    }

    #[test]
    fn read_frames_stops_at_end() {
        let bank = Bank::from_assets(
            "sfx",
            vec![ramp_asset("a", 10)],
            PcmEncoding::F32,
            &Allocator::system(),
        )
        .unwrap();
        let mut out = SampleBuffer::new(&Allocator::system(), SampleFormat::Float, 1, 16).unwrap();

        let sound = bank.sound(0).unwrap();
        assert_eq!(sound.read_frames(6, 8, &mut out, 0), 4);
        out.set_frames(4);
        assert!((out.sample_f32(0).unwrap() - 0.6).abs() < 1e-6);
        assert_eq!(sound.read_frames(10, 8, &mut out, 0), 0);
    }
}
