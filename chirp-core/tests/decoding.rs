mod common;

use chirp_core::config::PlatformHandles;
use chirp_core::decoder::{HardwareCodec, HardwareCodecFactory};
use chirp_core::stream::Codec;
use chirp_core::{
    BufferedOutput, ChirpConfig, ChirpEngine, ChirpError, ChirpEvent, Result, StreamWorkerMode,
};
use common::{init_logging, write_wav};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn manual_engine(config: ChirpConfig) -> ChirpEngine {
    init_logging();
    ChirpEngine::with_config(config.stream_worker(StreamWorkerMode::Manual)).unwrap()
}

#[test]
fn wav_directory_loads_as_a_bank() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(dir.path(), "b_laser.wav", 4800, 48000, 2, 0.5);
    write_wav(dir.path(), "a_step.wav", 2400, 24000, 1, 0.5);
    std::fs::write(dir.path().join("notes.txt"), "not audio").unwrap();

    let mut engine = manual_engine(ChirpConfig::new());
    let handle = engine.load_bank(dir.path()).unwrap();
    let bank = engine.bank(handle).unwrap();

    // Files load in name order; everything lands at the engine rate.
    assert_eq!(bank.len(), 2);
    let step = &bank.sounds()[bank.find(&"a_step".into()).unwrap()];
    let laser = &bank.sounds()[bank.find(&"b_laser".into()).unwrap()];
    assert_eq!(bank.find(&"a_step".into()).unwrap(), 0);
    assert_eq!(laser.total_frames(), 4800);
    assert!((step.total_frames() as i64 - 4800).abs() <= 2);
    assert_eq!(laser.channels, 2);
    assert_eq!(step.channels, 1);
}

#[test]
fn empty_or_missing_banks_fail_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = manual_engine(ChirpConfig::new());
    assert!(matches!(
        engine.load_bank(dir.path()),
        Err(ChirpError::AudioLoading(_))
    ));
    assert!(engine.load_bank(dir.path().join("nope.wav")).is_err());
}

#[test]
fn bad_stream_files_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let garbage = dir.path().join("garbage.wav");
    std::fs::write(&garbage, [0u8; 64]).unwrap();

    let mut engine = manual_engine(ChirpConfig::new());
    assert!(matches!(
        engine.play_stream(dir.path().join("missing.wav")),
        Err(ChirpError::StreamIo(_))
    ));
    assert!(matches!(
        engine.play_stream(&garbage),
        Err(ChirpError::Decode(_))
    ));
    assert_eq!(engine.active_tasks(), 0);
    assert_eq!(engine.active_streams(), 0);
}

/// Platform codec stand-in: a constant level at a fixed rate.
struct ConstantCodec {
    rate: u32,
    remaining: u64,
}

impl HardwareCodec for ConstantCodec {
    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.remaining)
    }

    fn decode(&mut self, out: &mut [f32]) -> Result<usize> {
        let n = (out.len() as u64).min(self.remaining) as usize;
        out[..n].fill(0.75);
        self.remaining -= n as u64;
        Ok(n)
    }

    fn seek(&mut self, _frame: u64) -> Result<()> {
        Ok(())
    }
}

struct ConstantFactory {
    rate: u32,
    opened: AtomicUsize,
}

impl HardwareCodecFactory for ConstantFactory {
    fn supports(&self, codec: Codec) -> bool {
        codec == Codec::Pcm
    }

    fn open(
        &self,
        _path: &Path,
        _platform: Option<&PlatformHandles>,
    ) -> Result<Box<dyn HardwareCodec>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ConstantCodec {
            rate: self.rate,
            remaining: 960,
        }))
    }
}

#[test]
fn hardware_codec_takes_supported_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "music.wav", 48000, 48000, 1, 0.1);
    let factory = Arc::new(ConstantFactory {
        rate: 48000,
        opened: AtomicUsize::new(0),
    });

    let mut engine = manual_engine(
        ChirpConfig::new()
            .enable_hardware_decoding(true)
            .hardware_codecs(factory.clone()),
    );
    let (output, mut rx) = BufferedOutput::new(48000, 2);
    engine.set_output(output);

    let task = engine.play_stream(&path).unwrap();
    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
    assert_eq!(engine.active_streams(), 0);

    for _ in 0..6 {
        engine.update_elapsed(5.0).unwrap();
    }
    assert!(!engine.is_playing(task));
    assert!(engine.poll_events().contains(&ChirpEvent::TaskFinished { task }));

    // 960 frames of the codec's level, not the file's.
    let expected = 0.75 * std::f32::consts::FRAC_1_SQRT_2;
    let loud = rx
        .drain_to_vec()
        .iter()
        .filter(|s| (*s - expected).abs() < 1e-4)
        .count();
    assert_eq!(loud, 960 * 2);
}

#[test]
fn hardware_codec_is_skipped_when_disabled_or_unusable() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "music.wav", 4800, 48000, 1, 0.1);

    // Disabled: the factory is never asked.
    let idle = Arc::new(ConstantFactory {
        rate: 48000,
        opened: AtomicUsize::new(0),
    });
    let mut engine = manual_engine(ChirpConfig::new().hardware_codecs(idle.clone()));
    engine.play_stream(&path).unwrap();
    assert_eq!(idle.opened.load(Ordering::SeqCst), 0);
    assert_eq!(engine.active_streams(), 1);

    // Wrong rate: opened, refused, and streamed in software instead.
    let foreign = Arc::new(ConstantFactory {
        rate: 44100,
        opened: AtomicUsize::new(0),
    });
    let mut engine = manual_engine(
        ChirpConfig::new()
            .enable_hardware_decoding(true)
            .hardware_codecs(foreign.clone()),
    );
    engine.play_stream(&path).unwrap();
    assert_eq!(foreign.opened.load(Ordering::SeqCst), 1);
    assert_eq!(engine.active_streams(), 1);
}
