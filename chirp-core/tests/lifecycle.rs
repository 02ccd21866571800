mod common;

use chirp_core::{
    ChirpConfig, ChirpEngine, ChirpError, ChirpEvent, CountingMemory, EngineState, LogMask,
    PlayOptions, SampleType, StreamWorkerMode,
};
use common::{StallingSource, init_logging, write_wav};
use std::sync::Arc;

fn configs() -> Vec<ChirpConfig> {
    vec![
        ChirpConfig::default(),
        ChirpConfig::new()
            .sample_type(SampleType::Fixed)
            .max_audio_tasks(1)
            .stream_worker(StreamWorkerMode::Manual),
        ChirpConfig::new()
            .sample_type(SampleType::Float)
            .sample_rate(22050)
            .audio_update_ms(20.0)
            .max_render_load(1.0)
            .log_mask(LogMask::NONE),
    ]
}

#[test]
fn init_then_shutdown_balances_allocations() {
    init_logging();
    for config in configs() {
        let memory = Arc::new(CountingMemory::new());
        let mut engine = ChirpEngine::new();
        engine.init(config.memory(memory.clone())).unwrap();
        assert!(memory.outstanding() > 0);

        engine.shutdown().unwrap();
        assert_eq!(memory.outstanding(), 0);
        assert_eq!(memory.live_allocations(), 0);
    }
}

#[test]
fn playing_engine_releases_everything_on_shutdown() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    write_wav(dir.path(), "a.wav", 4800, 48000, 1, 0.25);
    write_wav(dir.path(), "b.wav", 2400, 48000, 2, 0.25);
    let music = write_wav(dir.path(), "music.wav", 48000, 44100, 2, 0.1);

    let memory = Arc::new(CountingMemory::new());
    let mut engine = ChirpEngine::with_config(
        ChirpConfig::new()
            .memory(memory.clone())
            .stream_worker(StreamWorkerMode::Manual),
    )
    .unwrap();
    let after_init = memory.outstanding();

    let bank = engine.load_bank(dir.path()).unwrap();
    assert!(memory.outstanding() > after_init);
    engine.play(bank, "a").unwrap();
    engine.play(bank, "b").unwrap();
    engine.play_stream(&music).unwrap();
    engine
        .play_source(
            "stub",
            Box::new(StallingSource::new(48000, 10_000, 1)),
            PlayOptions::default(),
        )
        .unwrap();
    for _ in 0..20 {
        engine.update_elapsed(5.0).unwrap();
    }
    assert!(engine.active_tasks() > 0);

    engine.shutdown().unwrap();
    assert_eq!(memory.outstanding(), 0);
    assert_eq!(memory.live_allocations(), 0);
}

#[test]
fn refused_memory_fails_init_cleanly() {
    let memory = Arc::new(CountingMemory::with_limit(1024));
    let mut engine = ChirpEngine::new();
    let result = engine.init(ChirpConfig::new().memory(memory.clone()));

    assert!(matches!(result, Err(ChirpError::OutOfMemory { .. })));
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert_eq!(memory.outstanding(), 0);
}

#[test]
fn invalid_configurations_are_rejected() {
    let invalid = [
        ChirpConfig::new().max_audio_tasks(0),
        ChirpConfig::new().stream_buffer_ms(0.0),
        ChirpConfig::new().stream_buffer_ms(-5.0),
        ChirpConfig::new().audio_update_ms(0.0),
        ChirpConfig::new().stream_file_update_ms(0.0),
        ChirpConfig::new().max_render_load(0.0),
        ChirpConfig::new().max_render_load(1.5),
        ChirpConfig::new().sample_rate(0),
    ];
    for config in invalid {
        let mut engine = ChirpEngine::new();
        assert!(
            matches!(engine.init(config), Err(ChirpError::InvalidConfig(_))),
            "config should be rejected"
        );
        assert!(!engine.is_initialized());
    }
}

#[test]
fn lifecycle_misuse_is_reported() {
    let mut engine = ChirpEngine::new();
    assert!(matches!(engine.update(), Err(ChirpError::NotInitialized)));
    assert!(matches!(engine.shutdown(), Err(ChirpError::InvalidState(_))));
    assert!(matches!(engine.remote(), Err(ChirpError::NotInitialized)));

    engine.init(ChirpConfig::default()).unwrap();
    assert!(matches!(
        engine.init(ChirpConfig::default()),
        Err(ChirpError::InvalidState(_))
    ));
    engine.shutdown().unwrap();
    assert!(matches!(engine.shutdown(), Err(ChirpError::InvalidState(_))));

    let events = engine.poll_events();
    assert_eq!(events.first(), Some(&ChirpEvent::EngineStarted));
    assert_eq!(events.last(), Some(&ChirpEvent::EngineStopped));
}

#[test]
fn config_is_a_snapshot() {
    let mut config = ChirpConfig::new().max_audio_tasks(3);
    let engine = ChirpEngine::with_config(config.clone()).unwrap();
    config.max_audio_tasks = 99;
    assert_eq!(engine.config().unwrap().max_audio_tasks, 3);
    assert_eq!(
        engine.config().unwrap().volume_ramp_ms,
        ChirpConfig::DEFAULT_VOLUME_RAMP_MS
    );
}
