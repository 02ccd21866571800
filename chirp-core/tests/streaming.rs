mod common;

use chirp_core::{
    BufferedOutput, ChirpConfig, ChirpEngine, ChirpEvent, LoopCount, LoopRegion, PlayOptions,
    StreamWorkerMode, TaskState,
};
use common::{StallingSource, count_underruns, init_logging, write_wav};
use chirp_core::logger::{LogLevel, LogMask, LogSink};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn manual_engine() -> ChirpEngine {
    init_logging();
    ChirpEngine::with_config(
        ChirpConfig::new()
            .stream_buffer_ms(200.0)
            .stream_file_update_ms(50.0)
            .stream_worker(StreamWorkerMode::Manual),
    )
    .unwrap()
}

#[test]
fn one_stalled_refill_costs_exactly_one_silent_tick() {
    let mut engine = manual_engine();
    let task = engine
        .play_source(
            "stub",
            Box::new(StallingSource::new(48000, 48000, 1)),
            PlayOptions::default(),
        )
        .unwrap();

    let mut underruns = 0;
    for _ in 0..40 {
        let report = engine.update_elapsed(5.0).unwrap();
        underruns += report.underruns;
        assert_eq!(engine.task_state(task), Some(TaskState::Playing));
    }

    assert_eq!(underruns, 1);
    assert_eq!(count_underruns(&engine.poll_events()), 1);
    assert_eq!(engine.frames_played(task), Some(39 * 240));
}

#[test]
fn a_source_that_never_delivers_keeps_the_task_alive() {
    let mut engine = manual_engine();
    let task = engine
        .play_source(
            "dry",
            Box::new(StallingSource::new(48000, 48000, u32::MAX)),
            PlayOptions::default(),
        )
        .unwrap();

    for _ in 0..100 {
        let report = engine.update_elapsed(5.0).unwrap();
        assert_eq!(report.underruns, 1);
    }
    assert!(engine.is_playing(task));
    assert_eq!(engine.frames_played(task), Some(0));
    // One episode, one warning.
    assert_eq!(count_underruns(&engine.poll_events()), 1);
}

#[test]
fn streamed_wav_plays_to_its_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "voice.wav", 1000, 48000, 2, 0.5);

    let mut engine = manual_engine();
    let (output, mut rx) = BufferedOutput::new(48000, 2);
    engine.set_output(output);
    let task = engine.play_stream(&path).unwrap();
    assert_eq!(engine.active_streams(), 1);

    let mut ticks = 0;
    while engine.is_playing(task) {
        engine.update_elapsed(5.0).unwrap();
        ticks += 1;
        assert!(ticks < 20, "stream never finished");
    }
    assert!(engine.poll_events().contains(&ChirpEvent::TaskFinished { task }));

    let samples = rx.drain_to_vec();
    let audible = samples.iter().filter(|s| s.abs() > 0.1).count();
    assert_eq!(audible, 2000);

    // The reader goes away with its decoder.
    engine.update_elapsed(5.0).unwrap();
    engine.update_elapsed(100.0).unwrap();
    assert_eq!(engine.active_streams(), 0);
}

#[test]
fn streams_at_another_rate_are_resampled() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "music.wav", 22050, 22050, 1, 0.25);

    let mut engine = manual_engine();
    let task = engine.play_stream(&path).unwrap();
    let mut ticks = 0;
    while engine.is_playing(task) {
        engine.update_elapsed(5.0).unwrap();
        ticks += 1;
        assert!(ticks < 400);
    }

    // One second of audio at 48 kHz, give or take the resampler's edges.
    let events = engine.poll_events();
    assert!(events.contains(&ChirpEvent::TaskFinished { task }));
    assert!(!events.iter().any(|e| matches!(e, ChirpEvent::TaskFailed { .. })));
    assert!((195..=205).contains(&ticks), "{} ticks", ticks);
}

#[test]
fn seek_restarts_a_stream() {
    let mut engine = manual_engine();
    let task = engine
        .play_source(
            "stub",
            Box::new(StallingSource::new(48000, 4800, 0)),
            PlayOptions::default(),
        )
        .unwrap();

    for _ in 0..10 {
        engine.update_elapsed(5.0).unwrap();
    }
    assert_eq!(engine.position(task), Some(2400));

    engine.seek(task, 0).unwrap();
    // The seek is applied by the next refill; until then the stream underruns.
    let report = engine.update_elapsed(5.0).unwrap();
    assert_eq!(report.underruns, 1);
    engine.update_elapsed(5.0).unwrap();
    assert_eq!(engine.position(task), Some(240));
}

#[test]
fn stream_loop_count_extends_playback() {
    let mut engine = manual_engine();
    let task = engine
        .play_source(
            "stub",
            Box::new(StallingSource::new(48000, 480, 0)),
            PlayOptions::new().looping(LoopRegion::whole(LoopCount::Times(2))),
        )
        .unwrap();

    let mut played = 0;
    while engine.is_playing(task) {
        engine.update_elapsed(5.0).unwrap();
        played = engine.frames_played(task).unwrap_or(played);
    }
    assert_eq!(played, 480 * 3);
}

#[test]
fn background_worker_feeds_streams() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "long.wav", 48000, 48000, 2, 0.5);

    let mut engine = ChirpEngine::with_config(
        ChirpConfig::new()
            .stream_worker(StreamWorkerMode::Thread)
            .stream_file_update_ms(10.0),
    )
    .unwrap();
    let task = engine.play_stream(&path).unwrap();

    // Wait for the first priming refill.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let report = engine.update_elapsed(5.0).unwrap();
        if report.underruns == 0 && engine.frames_played(task).unwrap_or(0) > 0 {
            break;
        }
        assert!(Instant::now() < deadline, "stream never primed");
        std::thread::sleep(Duration::from_millis(2));
    }

    engine.stop(task).unwrap();
    engine.update_elapsed(5.0).unwrap();
    assert!(!engine.is_playing(task));
    engine.shutdown().unwrap();
}

fn small_buffer_engine(buffer_ms: f32) -> ChirpEngine {
    init_logging();
    ChirpEngine::with_config(
        ChirpConfig::new()
            .stream_buffer_ms(buffer_ms)
            .stream_worker(StreamWorkerMode::Manual),
    )
    .unwrap()
}

#[test]
fn buffer_shorter_than_a_tick_still_plays_through() {
    let mut engine = small_buffer_engine(1.0);
    let (output, mut rx) = BufferedOutput::new(48000, 2);
    engine.set_output(output);
    let task = engine
        .play_source(
            "tiny",
            Box::new(StallingSource::new(48000, 4800, 0)),
            PlayOptions::default(),
        )
        .unwrap();

    let mut underruns = 0;
    let mut ticks = 0;
    while engine.is_playing(task) {
        underruns += engine.update_elapsed(5.0).unwrap().underruns;
        ticks += 1;
        assert!(ticks < 200, "stream never finished");
    }

    assert_eq!(underruns, 0);
    assert!(engine.poll_events().contains(&ChirpEvent::TaskFinished { task }));
    let expected = 0.5 * std::f32::consts::FRAC_1_SQRT_2;
    let loud = rx
        .drain_to_vec()
        .iter()
        .filter(|s| (*s - expected).abs() < 1e-4)
        .count();
    assert_eq!(loud, 4800 * 2);
}

#[test]
fn ticks_longer_than_the_buffer_do_not_starve_the_stream() {
    let mut engine = small_buffer_engine(10.0);
    let task = engine
        .play_source(
            "gappy",
            Box::new(StallingSource::new(48000, 96000, 0)),
            PlayOptions::default(),
        )
        .unwrap();

    let mut underruns = 0;
    for _ in 0..50 {
        underruns += engine.update_elapsed(20.0).unwrap().underruns;
    }
    assert_eq!(underruns, 0);
    assert_eq!(engine.frames_played(task), Some(50 * 960));
    assert_eq!(count_underruns(&engine.poll_events()), 0);
}

#[test]
fn one_long_gap_is_served_from_the_buffer() {
    let mut engine = small_buffer_engine(1.0);
    let task = engine
        .play_source(
            "late",
            Box::new(StallingSource::new(48000, 96000, 0)),
            PlayOptions::default(),
        )
        .unwrap();

    engine.update_elapsed(5.0).unwrap();
    // A stalled caller: the tick is capped at four quanta and still fully served.
    let report = engine.update_elapsed(250.0).unwrap();
    assert_eq!(report.underruns, 0);
    assert_eq!(engine.frames_played(task), Some(240 + 960));

    engine.update_elapsed(5.0).unwrap();
    assert_eq!(engine.frames_played(task), Some(240 + 960 + 240));
    assert_eq!(count_underruns(&engine.poll_events()), 0);
}

#[derive(Default)]
struct Warnings(Mutex<Vec<String>>);

impl LogSink for Warnings {
    fn log(&self, level: LogLevel, message: &str) {
        if level == LogLevel::Warning {
            self.0.lock().unwrap().push(message.to_string());
        }
    }
}

#[test]
fn underrun_warning_names_the_task() {
    init_logging();
    let warnings = Arc::new(Warnings::default());
    let mut engine = ChirpEngine::with_config(
        ChirpConfig::new()
            .log_mask(LogMask::WARNING)
            .log_sink(warnings.clone())
            .stream_worker(StreamWorkerMode::Manual),
    )
    .unwrap();
    let task = engine
        .play_source(
            "dry",
            Box::new(StallingSource::new(48000, 48000, u32::MAX)),
            PlayOptions::default(),
        )
        .unwrap();

    for _ in 0..3 {
        engine.update_elapsed(5.0).unwrap();
    }
    let seen = warnings.0.lock().unwrap();
    assert_eq!(
        *seen,
        vec![format!("{}: Stream buffer underrun, playing silence", task)]
    );
}
