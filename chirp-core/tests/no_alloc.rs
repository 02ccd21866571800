use assert_no_alloc::{AllocDisabler, assert_no_alloc};
use chirp_core::audio_data::{DecodedAudio, PcmEncoding, SoundAsset};
use chirp_core::{
    Allocator, Bank, ChirpConfig, ChirpEngine, LoopRegion, PlayOptions, SampleType,
    StreamWorkerMode,
};

#[global_allocator]
static A: AllocDisabler = AllocDisabler;

fn steady_engine(sample_type: SampleType) -> ChirpEngine {
    let mut engine = ChirpEngine::with_config(
        ChirpConfig::new()
            .sample_type(sample_type)
            .max_audio_tasks(16)
            .stream_worker(StreamWorkerMode::Manual),
    )
    .unwrap();

    let sine: Vec<f32> = (0..4800)
        .map(|i| (i as f32 * 0.05).sin() * 0.2)
        .collect();
    let stereo: Vec<f32> = sine.iter().flat_map(|s| [*s, -*s]).collect();
    let assets = vec![
        SoundAsset::new("mono", DecodedAudio::new(sine, 48000, 1).unwrap()),
        SoundAsset::new("stereo", DecodedAudio::new(stereo, 48000, 2).unwrap()),
    ];
    let bank = Bank::from_assets("steady", assets, PcmEncoding::I16, &Allocator::system()).unwrap();
    let bank = engine.register_bank(bank).unwrap();

    for i in 0..8 {
        let name = if i % 2 == 0 { "mono" } else { "stereo" };
        engine
            .play_with(
                bank,
                name,
                PlayOptions::new()
                    .pan(i as f32 / 8.0 - 0.5)
                    .looping(LoopRegion::forever()),
            )
            .unwrap();
    }
    // Promotion happens on the first tick.
    engine.update_elapsed(5.0).unwrap();
    engine.poll_events();
    engine
}

#[test]
fn steady_ticks_do_not_allocate() {
    for sample_type in [SampleType::Float, SampleType::Fixed] {
        let mut engine = steady_engine(sample_type);
        assert_no_alloc(|| {
            for _ in 0..500 {
                if engine.update_elapsed(5.0).is_err() {
                    break;
                }
            }
        });
        assert_eq!(engine.active_tasks(), 8);
        engine.shutdown().unwrap();
    }
}
