//! The engine context: lifecycle, banks, play requests and the update tick.

use crate::alloc::Allocator;
use crate::audio_data::{BankLoader, LoadOptions, SymphoniaBankLoader};
use crate::bank::{Bank, BankHandle, SoundRef};
use crate::config::{ChirpConfig, PlayOptions, pitch_to_speed};
use crate::decoder::{self, DecoderContext, DecoderSpec, MAX_SOURCE_CHANNELS};
use crate::error::{ChirpError, Result};
use crate::events::{ChirpEvent, EventQueue};
use crate::group::{GroupId, MixGroups};
use crate::logger::{Logger, RateLimit};
use crate::looping::LoopRegion;
use crate::output::{NullOutput, OutputSink};
use crate::playback::{ChirpRemote, PlaybackCommand, command_queue};
use crate::sample::{SampleBuffer, SampleFormat};
use crate::scheduler::{RenderClock, Scheduler, TickReport};
use crate::stream::{StreamSource, StreamWorker};
use crate::task::{TaskId, TaskParams, TaskState};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use slotmap::SlotMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum interval between repeated output sink errors in the log.
const SINK_ERROR_LOG_INTERVAL: Duration = Duration::from_millis(1000);

/// Lifecycle state of a [`ChirpEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    /// Inside `shutdown`, while tasks and streams are torn down
    ShuttingDown,
}

/// Everything that exists only between `init` and `shutdown`.
struct EngineCore {
    config: ChirpConfig,
    format: SampleFormat,
    allocator: Allocator,
    logger: Logger,
    scheduler: Scheduler,
    worker: StreamWorker,
    banks: SlotMap<BankHandle, Arc<Bank>>,
    groups: MixGroups,
    output: SampleBuffer,
    commands: Sender<PlaybackCommand>,
    last_update: Option<Instant>,
    suspended: bool,
    sink_errors: RateLimit,
}

/// Audio engine context.
///
/// Owns the task pool, the stream worker, every loaded bank and the mix
/// buffers. There is no global state: several engines can coexist, each driven
/// by its own host loop.
///
/// # Lifecycle
///
/// ```ignore
/// let mut engine = ChirpEngine::new();
/// engine.init(ChirpConfig::default())?;
/// let bank = engine.load_bank("assets/sfx")?;
/// let task = engine.play(bank, "explosion")?;
/// while engine.is_playing(task) {
///     engine.update()?;
///     std::thread::sleep(Duration::from_millis(5));
/// }
/// engine.shutdown()?;
/// ```
///
/// Output goes to the configured [`OutputSink`] once per update.
pub struct ChirpEngine {
    state: EngineState,
    core: Option<EngineCore>,
    events: EventQueue,
    event_rx: Receiver<ChirpEvent>,
    sink: Box<dyn OutputSink>,
    loader: Box<dyn BankLoader>,
    clock: Option<Arc<dyn RenderClock>>,
}

impl Default for ChirpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChirpEngine {
    /// Creates an uninitialized engine.
    pub fn new() -> Self {
        let (events, event_rx) = EventQueue::channel();
        Self {
            state: EngineState::Uninitialized,
            core: None,
            events,
            event_rx,
            sink: Box::new(NullOutput),
            loader: Box::new(SymphoniaBankLoader),
            clock: None,
        }
    }

    /// Creates and initializes an engine in one step.
    pub fn with_config(config: ChirpConfig) -> Result<Self> {
        let mut engine = Self::new();
        engine.init(config)?;
        Ok(engine)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == EngineState::Initialized
    }

    /// Validates `config` and allocates the pool, mix buffers and stream
    /// worker.
    ///
    /// The engine keeps its own copy of `config`.
    ///
    /// # Errors
    ///
    /// [`ChirpError::InvalidState`] if already initialized,
    /// [`ChirpError::InvalidConfig`] for an invalid configuration and
    /// [`ChirpError::OutOfMemory`] if the memory provider refuses an
    /// allocation.
    pub fn init(&mut self, config: ChirpConfig) -> Result<()> {
        if self.state != EngineState::Uninitialized {
            return Err(ChirpError::InvalidState(
                "Engine is already initialized".to_string(),
            ));
        }

        let format = config.validate()?;
        let allocator = config
            .memory
            .clone()
            .map(Allocator::new)
            .unwrap_or_default();
        let logger = Logger::new(config.log_mask, config.log_sink.clone());

        let (commands, command_rx) = command_queue(config.max_audio_tasks);
        let mut scheduler = Scheduler::new(
            &config,
            format,
            &allocator,
            logger.clone(),
            self.events.clone(),
            command_rx,
        )?;
        if let Some(clock) = &self.clock {
            scheduler.set_clock(clock.clone());
        }

        let output = SampleBuffer::new(
            &allocator,
            format,
            ChirpConfig::OUTPUT_CHANNELS,
            scheduler.max_frames(),
        )?;
        let worker = StreamWorker::start(config.stream_worker, config.stream_file_update_ms)?;

        logger.info(format_args!(
            "Engine initialized: {} Hz, {:?}, {} tasks, {} ms update",
            config.sample_rate, format, config.max_audio_tasks, config.audio_update_ms
        ));

        self.core = Some(EngineCore {
            config,
            format,
            allocator,
            logger,
            scheduler,
            worker,
            banks: SlotMap::with_key(),
            groups: MixGroups::new(),
            output,
            commands,
            last_update: None,
            suspended: false,
            sink_errors: RateLimit::new(SINK_ERROR_LOG_INTERVAL),
        });
        self.state = EngineState::Initialized;
        self.events.emit(ChirpEvent::EngineStarted);
        Ok(())
    }

    /// Stops every task, stops the stream worker and releases every bank and
    /// buffer. The engine can be initialized again afterwards.
    ///
    /// # Errors
    ///
    /// [`ChirpError::InvalidState`] unless the engine is initialized.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state != EngineState::Initialized {
            return Err(ChirpError::InvalidState(format!(
                "Cannot shut down an engine in state {:?}",
                self.state
            )));
        }
        self.state = EngineState::ShuttingDown;

        if let Some(mut core) = self.core.take() {
            let tasks = core.scheduler.clear();
            core.worker.shutdown();
            let banks = core.banks.len();
            core.banks.clear();
            core.logger.info(format_args!(
                "Engine shut down: stopped {} tasks, released {} banks",
                tasks, banks
            ));
        }

        self.state = EngineState::Uninitialized;
        self.events.emit(ChirpEvent::EngineStopped);
        Ok(())
    }

    /// Runs one tick covering the wall time since the previous update.
    ///
    /// The first update after `init` covers one nominal update interval.
    pub fn update(&mut self) -> Result<TickReport> {
        let core = self.core_mut()?;
        let now = Instant::now();
        let elapsed_ms = match core.last_update {
            Some(last) => now.duration_since(last).as_secs_f32() * 1000.0,
            None => core.config.audio_update_ms,
        };
        core.last_update = Some(now);
        self.update_elapsed(elapsed_ms)
    }

    /// Runs one tick covering `elapsed_ms` of audio.
    ///
    /// In [`StreamWorkerMode::Manual`](crate::config::StreamWorkerMode::Manual)
    /// stream refills run here first, on the caller's thread.
    pub fn update_elapsed(&mut self, elapsed_ms: f32) -> Result<TickReport> {
        let core = self.core.as_mut().ok_or(ChirpError::NotInitialized)?;

        core.worker.poll(elapsed_ms);
        let report = if core.suspended {
            core.scheduler.tick_silent(elapsed_ms, &mut core.output)
        } else {
            core.scheduler
                .tick(elapsed_ms, &core.groups, &mut core.output)
        };

        if let Err(e) = self.sink.deliver(&core.output) {
            if core.sink_errors.ready() {
                core.logger.error(format_args!("Output sink failed: {}", e));
                self.events.emit(ChirpEvent::EngineError {
                    error: e.to_string(),
                });
            }
        }
        Ok(report)
    }

    /// Silences output without stopping tasks. Tasks do not advance until
    /// [`resume`](Self::resume).
    pub fn suspend(&mut self) -> Result<()> {
        let core = self.core_mut()?;
        if !core.suspended {
            core.suspended = true;
            core.logger.info(format_args!("Engine suspended"));
            self.events.emit(ChirpEvent::EngineSuspended);
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        let core = self.core_mut()?;
        if core.suspended {
            core.suspended = false;
            core.last_update = None;
            core.logger.info(format_args!("Engine resumed"));
            self.events.emit(ChirpEvent::EngineResumed);
        }
        Ok(())
    }

    pub fn is_suspended(&self) -> bool {
        self.core.as_ref().is_some_and(|core| core.suspended)
    }

    /// Fraction of the update interval the last tick spent rendering.
    pub fn render_load(&self) -> f32 {
        self.core
            .as_ref()
            .map_or(0.0, |core| core.scheduler.render_load())
    }

    /// Whether any output sample was clipped since the last reset.
    pub fn clip_flag(&self) -> bool {
        self.core
            .as_ref()
            .is_some_and(|core| core.scheduler.clip_flag())
    }

    pub fn reset_clip_flag(&mut self) {
        if let Some(core) = self.core.as_mut() {
            core.scheduler.reset_clip_flag();
        }
    }

    // Banks

    /// Loads a bank with the configured [`BankLoader`], resampled to the
    /// engine rate.
    pub fn load_bank(&mut self, path: impl AsRef<Path>) -> Result<BankHandle> {
        self.load_bank_with(path, LoadOptions::default())
    }

    pub fn load_bank_with(
        &mut self,
        path: impl AsRef<Path>,
        mut options: LoadOptions,
    ) -> Result<BankHandle> {
        let path = path.as_ref();
        let core = self.core.as_ref().ok_or(ChirpError::NotInitialized)?;
        options.target_sample_rate = Some(core.config.sample_rate);

        let assets = self.loader.load(path, &options).map_err(|e| {
            core.logger
                .error(format_args!("Failed to load bank {}: {}", path.display(), e));
            e
        })?;
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let bank = Bank::from_assets(name, assets, options.encoding, &core.allocator)?;
        self.register_bank(bank)
    }

    /// Registers an already built bank.
    ///
    /// # Errors
    ///
    /// [`ChirpError::AudioFormat`] if a sound is not at the engine rate or has
    /// more than two channels.
    pub fn register_bank(&mut self, bank: Bank) -> Result<BankHandle> {
        let core = self.core_mut()?;
        let rate = core.config.sample_rate;
        if let Some(sound) = bank
            .sounds()
            .iter()
            .find(|s| s.sample_rate != rate || s.channels == 0 || s.channels > MAX_SOURCE_CHANNELS)
        {
            return Err(ChirpError::AudioFormat(format!(
                "Sound '{}' in bank '{}' is {} Hz with {} channels; the engine plays up to {} channels at {} Hz",
                sound.name,
                bank.name(),
                sound.sample_rate,
                sound.channels,
                MAX_SOURCE_CHANNELS,
                rate
            )));
        }

        let name = bank.name().to_string();
        let sounds = bank.len();
        let handle = core.banks.insert(Arc::new(bank));
        core.logger
            .info(format_args!("Loaded bank '{}' ({} sounds)", name, sounds));
        self.events.emit(ChirpEvent::BankLoaded { bank: handle, name });
        Ok(handle)
    }

    /// Unloads a bank, stopping every task still playing from it. Returns the
    /// number of tasks stopped.
    pub fn unload_bank(&mut self, handle: BankHandle) -> Result<usize> {
        let core = self.core_mut()?;
        let bank = core
            .banks
            .remove(handle)
            .ok_or_else(|| ChirpError::InvalidState(format!("Unknown bank {:?}", handle)))?;
        let stopped = core.scheduler.evict(|task| task.bank() == Some(handle));
        if stopped > 0 {
            core.logger.error(format_args!(
                "Bank '{}' unloaded while {} tasks were playing from it",
                bank.name(),
                stopped
            ));
        } else {
            log::debug!("Unloaded bank '{}'", bank.name());
        }
        self.events.emit(ChirpEvent::BankUnloaded {
            bank: handle,
            stopped_tasks: stopped,
        });
        Ok(stopped)
    }

    pub fn bank(&self, handle: BankHandle) -> Option<&Bank> {
        self.core.as_ref()?.banks.get(handle).map(|bank| bank.as_ref())
    }

    // Playback

    /// Plays a bank sound with its default volume, pan and loop region.
    pub fn play(&mut self, bank: BankHandle, sound: impl Into<SoundRef>) -> Result<TaskId> {
        self.play_with(bank, sound, PlayOptions::default())
    }

    pub fn play_with(
        &mut self,
        bank: BankHandle,
        sound: impl Into<SoundRef>,
        options: PlayOptions,
    ) -> Result<TaskId> {
        let core = self.core_mut()?;
        let bank_data = core
            .banks
            .get(bank)
            .cloned()
            .ok_or_else(|| ChirpError::InvalidState(format!("Unknown bank {:?}", bank)))?;
        let index = bank_data.find(&sound.into())?;
        let (mut params, looping) = match bank_data.sound(index) {
            Some(sound) => (
                TaskParams::from_options(&options, sound.volume, sound.pan),
                options.looping.or(sound.looping),
            ),
            None => (TaskParams::from_options(&options, 1.0, 0.0), options.looping),
        };
        params.bank = Some(bank);

        core.start_task(
            DecoderSpec::Bank {
                bank: bank_data,
                index,
            },
            looping,
            params,
        )
    }

    /// Streams a file from disk.
    pub fn play_stream(&mut self, path: impl AsRef<Path>) -> Result<TaskId> {
        self.play_stream_with(path, PlayOptions::default())
    }

    pub fn play_stream_with(&mut self, path: impl AsRef<Path>, options: PlayOptions) -> Result<TaskId> {
        let core = self.core_mut()?;
        let params = TaskParams::from_options(&options, 1.0, 0.0);
        core.start_task(
            DecoderSpec::File(path.as_ref().to_path_buf()),
            options.looping,
            params,
        )
    }

    /// Streams from a host-provided source.
    pub fn play_source(
        &mut self,
        label: impl Into<String>,
        source: Box<dyn StreamSource>,
        options: PlayOptions,
    ) -> Result<TaskId> {
        let core = self.core_mut()?;
        let params = TaskParams::from_options(&options, 1.0, 0.0);
        core.start_task(
            DecoderSpec::Custom {
                label: label.into(),
                source,
            },
            options.looping,
            params,
        )
    }

    /// True while the task is Pending, Playing or Paused.
    pub fn is_playing(&self, task: TaskId) -> bool {
        self.task_state(task).is_some_and(|state| !state.is_done())
    }

    /// `None` for stale handles and reclaimed tasks.
    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        let core = self.core.as_ref()?;
        core.scheduler.task(task).map(|t| t.state())
    }

    /// Current decoder position in frames.
    pub fn position(&self, task: TaskId) -> Option<u64> {
        let core = self.core.as_ref()?;
        core.scheduler.task(task).map(|t| t.decoder().position())
    }

    /// Frames the task has contributed to the mix.
    pub fn frames_played(&self, task: TaskId) -> Option<u64> {
        let core = self.core.as_ref()?;
        core.scheduler.task(task).map(|t| t.frames_played())
    }

    // Commands. Applied at the start of the next update; ignored for stale
    // handles.

    pub fn stop(&self, task: TaskId) -> Result<()> {
        self.send(PlaybackCommand::Stop(task))
    }

    pub fn pause(&self, task: TaskId) -> Result<()> {
        self.send(PlaybackCommand::Pause(task))
    }

    pub fn unpause(&self, task: TaskId) -> Result<()> {
        self.send(PlaybackCommand::Resume(task))
    }

    pub fn set_paused(&self, task: TaskId, paused: bool) -> Result<()> {
        if paused { self.pause(task) } else { self.unpause(task) }
    }

    pub fn set_volume(&self, task: TaskId, volume: f32) -> Result<()> {
        self.send(PlaybackCommand::SetVolume(task, volume.max(0.0)))
    }

    pub fn set_pan(&self, task: TaskId, pan: f32) -> Result<()> {
        self.send(PlaybackCommand::SetPan(task, pan.clamp(-1.0, 1.0)))
    }

    pub fn set_priority(&self, task: TaskId, priority: i32) -> Result<()> {
        self.send(PlaybackCommand::SetPriority(task, priority))
    }

    /// Changes the playback speed, and with it the pitch. Clamped to
    /// [`MIN_SPEED`](decoder::MIN_SPEED)..=[`MAX_SPEED`](decoder::MAX_SPEED).
    pub fn set_speed(&self, task: TaskId, speed: f32) -> Result<()> {
        self.send(PlaybackCommand::SetSpeed(task, decoder::clamp_speed(speed)))
    }

    /// Shifts the pitch by `half_steps` semitones by changing the speed.
    pub fn set_pitch_shift(&self, task: TaskId, half_steps: f32) -> Result<()> {
        self.set_speed(task, pitch_to_speed(half_steps))
    }

    pub fn seek(&self, task: TaskId, frame: u64) -> Result<()> {
        self.send(PlaybackCommand::Seek(task, frame))
    }

    pub fn set_loop(&self, task: TaskId, region: Option<LoopRegion>) -> Result<()> {
        self.send(PlaybackCommand::SetLoop(task, region))
    }

    /// Lets a looping task play through to its end.
    pub fn release_loop(&self, task: TaskId) -> Result<()> {
        self.send(PlaybackCommand::ReleaseLoop(task))
    }

    pub fn stop_all(&self) -> Result<()> {
        self.send(PlaybackCommand::StopAll)
    }

    /// A handle for sending commands from other threads.
    pub fn remote(&self) -> Result<ChirpRemote> {
        let core = self.core.as_ref().ok_or(ChirpError::NotInitialized)?;
        Ok(ChirpRemote::new(core.commands.clone()))
    }

    // Mix groups

    pub fn create_group(&mut self, name: impl Into<String>, parent: Option<GroupId>) -> Result<GroupId> {
        self.core_mut()?.groups.create(name, parent)
    }

    pub fn remove_group(&mut self, group: GroupId) -> Result<()> {
        self.core_mut()?.groups.remove(group)
    }

    pub fn set_group_volume(&mut self, group: GroupId, volume: f32) -> Result<()> {
        self.core_mut()?.groups.set_volume(group, volume)
    }

    pub fn set_group_paused(&mut self, group: GroupId, paused: bool) -> Result<()> {
        self.core_mut()?.groups.set_paused(group, paused)
    }

    pub fn set_group_parent(&mut self, group: GroupId, parent: Option<GroupId>) -> Result<()> {
        self.core_mut()?.groups.set_parent(group, parent)
    }

    pub fn set_master_volume(&mut self, volume: f32) -> Result<()> {
        self.core_mut()?.groups.set_master_volume(volume);
        Ok(())
    }

    pub fn groups(&self) -> Option<&MixGroups> {
        self.core.as_ref().map(|core| &core.groups)
    }

    // Host integration

    /// Drains queued events.
    pub fn poll_events(&self) -> Vec<ChirpEvent> {
        self.event_rx.try_iter().collect()
    }

    pub fn set_output(&mut self, sink: impl OutputSink + 'static) {
        self.sink = Box::new(sink);
    }

    pub fn set_bank_loader(&mut self, loader: impl BankLoader + 'static) {
        self.loader = Box::new(loader);
    }

    /// Replaces the clock used for render budgeting. Kept across re-init.
    pub fn set_render_clock(&mut self, clock: Arc<dyn RenderClock>) {
        if let Some(core) = self.core.as_mut() {
            core.scheduler.set_clock(clock.clone());
        }
        self.clock = Some(clock);
    }

    pub fn active_tasks(&self) -> usize {
        self.core.as_ref().map_or(0, |core| core.scheduler.pool().len())
    }

    pub fn active_streams(&self) -> usize {
        self.core.as_ref().map_or(0, |core| core.worker.active_streams())
    }

    pub fn config(&self) -> Option<&ChirpConfig> {
        self.core.as_ref().map(|core| &core.config)
    }

    pub fn sample_format(&self) -> Option<SampleFormat> {
        self.core.as_ref().map(|core| core.format)
    }

    /// The mix produced by the last update.
    pub fn last_output(&self) -> Option<&SampleBuffer> {
        self.core.as_ref().map(|core| &core.output)
    }

    fn core_mut(&mut self) -> Result<&mut EngineCore> {
        self.core.as_mut().ok_or(ChirpError::NotInitialized)
    }

    fn send(&self, command: PlaybackCommand) -> Result<()> {
        let core = self.core.as_ref().ok_or(ChirpError::NotInitialized)?;
        core.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(command) => {
                ChirpError::Engine(format!("Command queue full, dropped {:?}", command))
            }
            TrySendError::Disconnected(_) => ChirpError::NotInitialized,
        })
    }
}

impl EngineCore {
    fn start_task(
        &mut self,
        spec: DecoderSpec,
        looping: Option<LoopRegion>,
        params: TaskParams,
    ) -> Result<TaskId> {
        if let Some(group) = params.group {
            if self.groups.get(group).is_none() {
                return Err(ChirpError::InvalidState(format!(
                    "Unknown mix group {:?}",
                    group
                )));
            }
        }

        if !self.scheduler.has_free_slot() {
            let e = ChirpError::TaskPoolExhausted {
                capacity: self.scheduler.pool().capacity(),
            };
            self.logger.warning(format_args!("Play request refused: {}", e));
            return Err(e);
        }

        let label = format!("{:?}", spec);
        let ctx = DecoderContext {
            config: &self.config,
            allocator: &self.allocator,
            logger: &self.logger,
            worker: &mut self.worker,
            max_frames: self.scheduler.max_frames(),
        };
        let decoder = decoder::create(spec, looping, ctx).map_err(|e| {
            self.logger
                .error(format_args!("Cannot play {}: {}", label, e));
            e
        })?;

        self.scheduler.request_play(decoder, params)
    }
}

impl Drop for ChirpEngine {
    fn drop(&mut self) {
        if self.state == EngineState::Initialized {
            let _ = self.shutdown();
        }
    }
}
