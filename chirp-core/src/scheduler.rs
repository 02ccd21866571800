//! Per-tick admission, ordering and time budgeting of audio tasks.
//!
//! Each tick:
//! 1. applies queued [`PlaybackCommand`]s,
//! 2. reclaims Finished and Stopped slots,
//! 3. promotes Pending tasks,
//! 4. orders Playing tasks by priority, then by how long they have been
//!    deferred, then by slot,
//! 5. services tasks while the predicted cost fits the render budget, and
//!    defers the rest (they play silence and do not advance),
//! 6. finalizes the mix into the output buffer.

use crate::alloc::{Allocator, TrackedVec};
use crate::config::ChirpConfig;
use crate::decoder::{DecodeStatus, Decoder};
use crate::error::{ChirpError, Result};
use crate::events::{ChirpEvent, EventQueue};
use crate::group::MixGroups;
use crate::logger::{Logger, RateLimit};
use crate::mixer::{BUS_CHANNELS, Mixer, StereoGain, ramp_step};
use crate::playback::PlaybackCommand;
use crate::pool::TaskPool;
use crate::sample::{SampleBuffer, SampleFormat};
use crate::task::{AudioTask, TaskId, TaskParams, TaskState};
use crossbeam_channel::Receiver;
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The largest tick, as a multiple of the nominal quantum.
pub const MAX_QUANTUM_FACTOR: usize = 4;

/// Minimum interval between render overload warnings.
const OVERLOAD_LOG_INTERVAL: Duration = Duration::from_millis(500);

/// Weight of the newest measurement in the engine-wide cost average.
const COST_SMOOTHING: f64 = 0.25;

/// Time source for render budgeting.
pub trait RenderClock: Send + Sync {
    /// Milliseconds since an arbitrary origin.
    fn now_ms(&self) -> f64;
}

/// Wall-clock [`RenderClock`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl RenderClock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    /// Frames rendered into the output buffer
    pub frames: usize,
    pub serviced: usize,
    pub deferred: usize,
    pub underruns: usize,
    pub finished: usize,
    pub failed: usize,
    pub spent_ms: f64,
    pub budget_ms: f64,
    pub clipped: bool,
}

impl TickReport {
    pub fn over_budget(&self) -> bool {
        self.spent_ms > self.budget_ms
    }
}

pub struct Scheduler {
    pool: TaskPool,
    commands: Receiver<PlaybackCommand>,
    events: EventQueue,
    logger: Logger,
    clock: Arc<dyn RenderClock>,
    mixer: Mixer,
    scratch: SampleBuffer,
    order: TrackedVec<u32>,
    sample_rate: u32,
    update_ms: f64,
    budget_ms: f64,
    quantum_frames: usize,
    max_frames: usize,
    /// Largest per-frame gain change
    volume_step: f32,
    carry: f64,
    avg_cost_ms: Option<f64>,
    overload_log: RateLimit,
    render_load: f32,
}

impl Scheduler {
    pub fn new(
        config: &ChirpConfig,
        format: SampleFormat,
        allocator: &Allocator,
        logger: Logger,
        events: EventQueue,
        commands: Receiver<PlaybackCommand>,
    ) -> Result<Self> {
        let quantum_frames = config.quantum_frames();
        let max_frames = quantum_frames * MAX_QUANTUM_FACTOR;

        log::debug!(
            "Scheduler: {} tasks, {} frame quantum (max {}), {:.2} ms budget",
            config.max_audio_tasks,
            quantum_frames,
            max_frames,
            config.render_budget_ms()
        );

        Ok(Self {
            pool: TaskPool::new(config.max_audio_tasks, allocator)?,
            commands,
            events,
            logger,
            clock: Arc::new(SystemClock::default()),
            mixer: Mixer::new(allocator, format, max_frames)?,
            scratch: SampleBuffer::new(allocator, format, BUS_CHANNELS, max_frames)?,
            order: allocator.vec(config.max_audio_tasks, 0u32)?,
            sample_rate: config.sample_rate,
            update_ms: config.audio_update_ms as f64,
            budget_ms: config.render_budget_ms() as f64,
            quantum_frames,
            max_frames,
            volume_step: ramp_step(config.volume_ramp_ms, config.sample_rate),
            carry: 0.0,
            avg_cost_ms: None,
            overload_log: RateLimit::new(OVERLOAD_LOG_INTERVAL),
            render_load: 0.0,
        })
    }

    pub fn set_clock(&mut self, clock: Arc<dyn RenderClock>) {
        self.clock = clock;
    }

    pub fn format(&self) -> SampleFormat {
        self.mixer.format()
    }

    /// Frames in a nominal tick.
    pub fn quantum_frames(&self) -> usize {
        self.quantum_frames
    }

    /// Frames in the longest tick; output buffers must hold this many.
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn budget_ms(&self) -> f64 {
        self.budget_ms
    }

    /// Fraction of the update interval spent by the last tick.
    pub fn render_load(&self) -> f32 {
        self.render_load
    }

    pub fn clip_flag(&self) -> bool {
        self.mixer.clip_flag()
    }

    pub fn reset_clip_flag(&mut self) {
        self.mixer.reset_clip_flag();
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn task(&self, id: TaskId) -> Option<&AudioTask> {
        self.pool.get(id)
    }

    pub fn has_free_slot(&self) -> bool {
        self.pool.has_free_slot()
    }

    /// Allocates a Pending task for `decoder`.
    ///
    /// # Errors
    ///
    /// [`ChirpError::TaskPoolExhausted`](crate::ChirpError::TaskPoolExhausted)
    /// when every slot is in use.
    pub fn request_play(&mut self, decoder: Box<dyn Decoder>, params: TaskParams) -> Result<TaskId> {
        let id = self
            .pool
            .insert_with(|id| AudioTask::new(id, decoder, params))?;
        log::debug!("Scheduler: queued {} ({:?})", id, params);
        Ok(id)
    }

    /// Stops and drops every task matching `pred` right away, outside the tick.
    pub fn evict(&mut self, mut pred: impl FnMut(&AudioTask) -> bool) -> usize {
        let mut evicted = 0;
        for slot in 0..self.pool.capacity() as u32 {
            let matches = self.pool.slot(slot).is_some_and(|task| pred(task));
            if !matches {
                continue;
            }
            if let Some(mut task) = self.pool.reclaim(slot) {
                if task.stop() {
                    self.events.emit(ChirpEvent::TaskStopped { task: task.id() });
                }
                evicted += 1;
            }
        }
        evicted
    }

    /// Drops every task. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        self.pool.clear()
    }

    /// Renders one tick of `elapsed_ms` into `output`.
    pub fn tick(&mut self, elapsed_ms: f32, groups: &MixGroups, output: &mut SampleBuffer) -> TickReport {
        let started = self.clock.now_ms();

        self.apply_commands();
        self.reclaim();
        self.promote();

        let frames = self.quantum(elapsed_ms).min(output.capacity_frames());
        let mut report = TickReport {
            frames,
            budget_ms: self.budget_ms,
            ..TickReport::default()
        };
        self.mixer.begin(frames);

        let count = self.build_order();
        for i in 0..count {
            let slot = self.order[i];
            let Some(task) = self.pool.slot_mut(slot) else {
                continue;
            };

            let gain = groups.effective(task.group());
            if gain.paused {
                continue;
            }

            let spent = self.clock.now_ms() - started;
            let predicted = task.cost_ms().or(self.avg_cost_ms).unwrap_or(self.budget_ms);
            if report.serviced > 0 && spent + predicted > self.budget_ms {
                task.defer();
                report.deferred += 1;
                continue;
            }

            let before = self.clock.now_ms();
            let status = match self.scratch.set_layout(task.channels()) {
                Ok(()) => task.decoder_mut().produce(&mut self.scratch, frames),
                Err(e) => DecodeStatus::Failed(e),
            };
            let cost = self.clock.now_ms() - before;
            task.record_cost(cost);
            self.avg_cost_ms = Some(match self.avg_cost_ms {
                Some(avg) => avg + COST_SMOOTHING * (cost - avg),
                None => cost,
            });
            report.serviced += 1;

            let status = match status {
                DecodeStatus::Ready(n) => {
                    let target = StereoGain::new(
                        task.volume() * gain.volume,
                        task.pan(),
                        self.scratch.channels(),
                    );
                    match self.mixer.accumulate(
                        &self.scratch,
                        task.mix_gain(target),
                        target,
                        self.volume_step,
                    ) {
                        Ok(()) => DecodeStatus::Ready(n),
                        Err(e) => DecodeStatus::Failed(e),
                    }
                }
                other => other,
            };

            match status {
                DecodeStatus::Ready(n) => {
                    task.advance(n);
                    task.clear_underrun();
                }
                DecodeStatus::Underrun => {
                    report.underruns += 1;
                    if task.note_underrun() {
                        self.logger
                            .warning(format_args!(
                                "{}: {}, playing silence",
                                task.id(),
                                ChirpError::Underrun
                            ));
                        self.events.emit(ChirpEvent::BufferUnderrun { task: task.id() });
                    }
                }
                DecodeStatus::EndOfStream => {
                    task.finish();
                    report.finished += 1;
                    log::debug!("Scheduler: {} finished", task.id());
                    self.events.emit(ChirpEvent::TaskFinished { task: task.id() });
                }
                DecodeStatus::Failed(e) => {
                    task.finish();
                    report.failed += 1;
                    self.logger.error(format_args!("{} failed: {}", task.id(), e));
                    self.events.emit(ChirpEvent::TaskFailed {
                        task: task.id(),
                        error: e.to_string(),
                    });
                }
            }
        }

        match self.mixer.finalize(output) {
            Ok(clipped) => report.clipped = clipped,
            Err(e) => {
                self.logger.error(format_args!("Mix finalize failed: {}", e));
                output.fill_silence(frames);
            }
        }

        report.spent_ms = self.clock.now_ms() - started;
        self.render_load = (report.spent_ms / self.update_ms) as f32;

        if report.deferred > 0 && self.overload_log.ready() {
            self.logger.warning(format_args!(
                "Render overload: {} tasks deferred ({:.2} of {:.2} ms)",
                report.deferred, report.spent_ms, report.budget_ms
            ));
            self.events.emit(ChirpEvent::RenderOverload {
                deferred: report.deferred,
                spent_ms: report.spent_ms,
                budget_ms: report.budget_ms,
            });
        }

        report
    }

    /// A tick while output is suspended: commands and reclamation still run,
    /// but no task advances and `output` gets silence.
    pub fn tick_silent(&mut self, elapsed_ms: f32, output: &mut SampleBuffer) -> TickReport {
        self.apply_commands();
        self.reclaim();

        let frames = self.quantum(elapsed_ms).min(output.capacity_frames());
        if output.channels() != BUS_CHANNELS && output.set_layout(BUS_CHANNELS).is_err() {
            return TickReport::default();
        }
        output.fill_silence(frames);
        self.render_load = 0.0;

        TickReport {
            frames,
            budget_ms: self.budget_ms,
            ..TickReport::default()
        }
    }

    fn quantum(&mut self, elapsed_ms: f32) -> usize {
        let exact = elapsed_ms.max(0.0) as f64 * self.sample_rate as f64 / 1000.0 + self.carry;
        let whole = exact.floor();
        if whole as usize > self.max_frames {
            self.carry = 0.0;
            return self.max_frames;
        }
        self.carry = exact - whole;
        whole as usize
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: PlaybackCommand) {
        if command == PlaybackCommand::StopAll {
            for task in self.pool.iter_mut() {
                if task.stop() {
                    self.events.emit(ChirpEvent::TaskStopped { task: task.id() });
                }
            }
            return;
        }

        let Some(task) = command.task().and_then(|id| self.pool.get_mut(id)) else {
            return;
        };
        if task.state().is_done() {
            return;
        }

        match command {
            PlaybackCommand::Stop(_) => {
                if task.stop() {
                    self.events.emit(ChirpEvent::TaskStopped { task: task.id() });
                }
            }
            PlaybackCommand::Pause(_) => task.pause(),
            PlaybackCommand::Resume(_) => task.unpause(),
            PlaybackCommand::SetVolume(_, volume) => task.set_volume(volume),
            PlaybackCommand::SetPan(_, pan) => task.set_pan(pan),
            PlaybackCommand::SetPriority(_, priority) => task.set_priority(priority),
            PlaybackCommand::SetSpeed(_, speed) => task.set_speed(speed),
            PlaybackCommand::Seek(_, frame) => task.decoder_mut().seek(frame),
            PlaybackCommand::SetLoop(_, region) => task.decoder_mut().set_loop(region),
            PlaybackCommand::ReleaseLoop(_) => task.decoder_mut().release_loop(),
            PlaybackCommand::StopAll => {}
        }
    }

    fn reclaim(&mut self) {
        for slot in 0..self.pool.capacity() as u32 {
            if self
                .pool
                .slot(slot)
                .is_some_and(|task| task.state().is_done())
            {
                self.pool.reclaim(slot);
            }
        }
    }

    fn promote(&mut self) {
        for task in self.pool.iter_mut() {
            if task.promote() {
                self.events.emit(ChirpEvent::TaskStarted { task: task.id() });
            }
        }
    }

    /// Fills `order` with the Playing slots in service order.
    fn build_order(&mut self) -> usize {
        let mut count = 0;
        for slot in 0..self.pool.capacity() as u32 {
            if self
                .pool
                .slot(slot)
                .is_some_and(|task| task.state() == TaskState::Playing)
            {
                self.order[count] = slot;
                count += 1;
            }
        }

        let pool = &self.pool;
        self.order[..count].sort_unstable_by_key(|&slot| {
            let (priority, streak) = pool
                .slot(slot)
                .map(|task| (task.priority(), task.deferral_streak()))
                .unwrap_or((i32::MIN, 0));
            (Reverse(priority), Reverse(streak), slot)
        });
        count
    }
}
