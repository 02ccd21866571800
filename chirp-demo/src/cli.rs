use anyhow::{Context, Result};
use chirp_core::audio_data::{DecodedAudio, PcmEncoding, SoundAsset};
use chirp_core::{
    Allocator, Bank, BankHandle, ChirpConfig, ChirpEngine, ChirpEvent, LoopCount, LoopRegion,
    PlayOptions, SampleType,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Plays synthesized or loaded bank sounds through the chirp engine.
#[derive(Parser, Debug)]
#[command(name = "chirp-demo")]
#[command(about = "Fires bank sounds and an optional stream through the chirp mixer")]
pub struct DemoOptions {
    /// Load every audio file in DIR as a resident bank
    #[arg(long, value_name = "DIR")]
    pub bank: Option<PathBuf>,

    /// Stream FILE from disk alongside the bank sounds
    #[arg(long, value_name = "FILE")]
    pub stream: Option<PathBuf>,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 5.0, value_parser = positive_seconds)]
    pub seconds: f32,

    /// Task pool size
    #[arg(long, default_value_t = 32, value_parser = clap::value_parser!(u16).range(1..))]
    pub tasks: u16,

    /// Mix in 8.24 fixed point instead of float
    #[arg(long)]
    pub fixed: bool,
}

fn positive_seconds(value: &str) -> std::result::Result<f32, String> {
    let seconds: f32 = value
        .parse()
        .map_err(|_| format!("`{}` is not a number", value))?;
    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(format!("`{}` must be a finite number above zero", value))
    }
}

pub fn run(options: DemoOptions) -> Result<()> {
    let config = ChirpConfig::new()
        .max_audio_tasks(options.tasks as usize)
        .sample_type(if options.fixed {
            SampleType::Fixed
        } else {
            SampleType::Float
        });
    let update = Duration::from_secs_f32(config.audio_update_ms / 1000.0);

    let mut engine = ChirpEngine::with_config(config).context("Failed to start engine")?;
    attach_output(&mut engine)?;

    let bank = match &options.bank {
        Some(dir) => engine
            .load_bank(dir)
            .with_context(|| format!("Failed to load bank {}", dir.display()))?,
        None => engine.register_bank(tone_bank()?)?,
    };
    let names: Vec<String> = engine
        .bank(bank)
        .map(|b| b.sounds().iter().map(|s| s.name.clone()).collect())
        .unwrap_or_default();
    log::info!("Bank ready with {} sounds: {:?}", names.len(), names);

    let sfx = engine.create_group("sfx", None)?;
    let music = engine.create_group("music", None)?;
    engine.set_group_volume(sfx, 0.6)?;

    if let Some(path) = &options.stream {
        let task = engine
            .play_stream_with(
                path,
                PlayOptions::new()
                    .group(music)
                    .priority(10)
                    .looping(LoopRegion::forever()),
            )
            .with_context(|| format!("Failed to stream {}", path.display()))?;
        log::info!("Streaming {} as {}", path.display(), task);
    }

    let started = Instant::now();
    let mut next_trigger = Duration::ZERO;
    let mut next_report = Duration::from_secs(1);
    let mut triggered = 0usize;

    while started.elapsed().as_secs_f32() < options.seconds {
        let now = started.elapsed();
        if now >= next_trigger && !names.is_empty() {
            trigger(&mut engine, bank, triggered % names.len(), triggered)?;
            triggered += 1;
            next_trigger = now + Duration::from_millis(250);
        }

        let report = engine.update()?;
        for event in engine.poll_events() {
            match event {
                ChirpEvent::TaskFailed { task, error } => log::warn!("{} failed: {}", task, error),
                ChirpEvent::RenderOverload { deferred, .. } => {
                    log::warn!("Overloaded, deferred {} tasks", deferred)
                }
                other => log::debug!("{:?}", other),
            }
        }

        if now >= next_report {
            log::info!(
                "{} tasks, {} streams, load {:.1}%, {} serviced, {} deferred{}",
                engine.active_tasks(),
                engine.active_streams(),
                engine.render_load() * 100.0,
                report.serviced,
                report.deferred,
                if engine.clip_flag() { ", clipping" } else { "" }
            );
            engine.reset_clip_flag();
            next_report += Duration::from_secs(1);
        }

        std::thread::sleep(update);
    }

    engine.stop_all()?;
    engine.update()?;
    engine.shutdown()?;
    log::info!("Played {} one-shots", triggered);
    Ok(())
}

/// Fires one bank sound, sweeping the pan and pitch and varying the priority.
fn trigger(engine: &mut ChirpEngine, bank: BankHandle, index: usize, n: usize) -> Result<()> {
    let pan = ((n % 9) as f32 - 4.0) / 4.0;
    let options = PlayOptions::new()
        .pan(pan)
        .priority((n % 3) as i32)
        .pitch_shift(((n % 5) as f32 - 2.0) * 2.0);
    match engine.play_with(bank, index, options) {
        Ok(task) => log::debug!("Triggered sound {} as {} (pan {:.2})", index, task, pan),
        Err(e) if e.is_task_local() => log::warn!("Skipped sound {}: {}", index, e),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(feature = "device")]
fn attach_output(engine: &mut ChirpEngine) -> Result<()> {
    let rate = engine.config().map_or(48000, |c| c.sample_rate);
    let output = chirp_core::CpalOutput::open(rate, rate as usize / 5)
        .context("Failed to open output device")?;
    engine.set_output(output);
    Ok(())
}

#[cfg(not(feature = "device"))]
fn attach_output(_engine: &mut ChirpEngine) -> Result<()> {
    log::info!("Built without the `device` feature; mixing into a silent sink");
    Ok(())
}

/// A small bank of synthesized blips, used when no bank directory is given.
fn tone_bank() -> Result<Bank> {
    let rate = ChirpConfig::DEFAULT_SAMPLE_RATE;
    let tone = |hz: f32, ms: u32| -> Result<DecodedAudio> {
        let frames = (rate * ms / 1000) as usize;
        let samples = (0..frames)
            .map(|i| {
                let t = i as f32 / rate as f32;
                let fade = 1.0 - i as f32 / frames as f32;
                (t * hz * std::f32::consts::TAU).sin() * 0.3 * fade
            })
            .collect();
        Ok(DecodedAudio::new(samples, rate, 1)?)
    };

    let assets = vec![
        SoundAsset::new("low", tone(220.0, 400)?),
        SoundAsset::new("mid", tone(440.0, 250)?),
        SoundAsset::new("high", tone(880.0, 150)?)
            .looping(LoopRegion::whole(LoopCount::Times(1))),
    ];
    Ok(Bank::from_assets(
        "tones",
        assets,
        PcmEncoding::Adpcm,
        &Allocator::system(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<DemoOptions, clap::Error> {
        DemoOptions::try_parse_from(std::iter::once("chirp-demo").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let options = parse(&[]).unwrap();
        assert_eq!(options.seconds, 5.0);
        assert_eq!(options.tasks, 32);
        assert!(!options.fixed);
        assert!(options.bank.is_none() && options.stream.is_none());
    }

    #[test]
    fn flags_and_paths() {
        let options = parse(&[
            "--bank", "sfx", "--seconds", "0.5", "--tasks", "8", "--fixed",
        ])
        .unwrap();
        assert_eq!(options.bank, Some(PathBuf::from("sfx")));
        assert_eq!(options.seconds, 0.5);
        assert_eq!(options.tasks, 8);
        assert!(options.fixed);
    }

    #[test]
    fn run_length_must_be_finite_and_positive() {
        for bad in ["-1", "0", "NaN", "inf", "soon"] {
            assert!(parse(&["--seconds", bad]).is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(parse(&["--tasks", "0"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }
}
