//! One playing sound instance.

use crate::bank::BankHandle;
use crate::config::PlayOptions;
use crate::decoder::{Decoder, DecoderKind, clamp_speed};
use crate::group::GroupId;
use crate::mixer::StereoGain;
use std::fmt;

/// Weight of the newest measurement in a task's cost average.
const COST_SMOOTHING: f64 = 0.25;

/// Handle to a task. Stale handles (to a slot that has since been reused)
/// never alias a newer task: the generation differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    slot: u32,
    generation: u32,
}

impl TaskId {
    pub(crate) fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {}:{}", self.slot, self.generation)
    }
}

/// Playback state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created; starts playing at the next tick
    Pending,
    Playing,
    Paused,
    /// The decoder reached the end or failed
    Finished,
    /// Stopped by the host
    Stopped,
}

impl TaskState {
    /// Finished or Stopped: the slot is reclaimed at the next tick.
    pub fn is_done(self) -> bool {
        matches!(self, Self::Finished | Self::Stopped)
    }
}

/// Resolved playback parameters for a new task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskParams {
    pub volume: f32,
    pub pan: f32,
    pub priority: i32,
    pub group: Option<GroupId>,
    pub paused: bool,
    pub speed: f32,
    pub bank: Option<BankHandle>,
}

impl TaskParams {
    /// Applies `options` over the sound's own defaults.
    pub fn from_options(options: &PlayOptions, default_volume: f32, default_pan: f32) -> Self {
        Self {
            volume: options.volume.unwrap_or(default_volume).max(0.0),
            pan: options.pan.unwrap_or(default_pan).clamp(-1.0, 1.0),
            priority: options.priority,
            group: options.group,
            paused: options.paused,
            speed: clamp_speed(options.speed.unwrap_or(1.0)),
            bank: None,
        }
    }
}

impl Default for TaskParams {
    fn default() -> Self {
        Self::from_options(&PlayOptions::default(), 1.0, 0.0)
    }
}

/// A sound being played: its decoder plus scheduling state.
pub struct AudioTask {
    id: TaskId,
    decoder: Box<dyn Decoder>,
    state: TaskState,
    params: TaskParams,
    frames_played: u64,
    underruns: u32,
    in_underrun: bool,
    deferrals: u32,
    /// Consecutive ticks this task has been deferred
    deferral_streak: u32,
    cost_ms: Option<f64>,
    /// Gain at the end of the last mix
    mix_gain: Option<StereoGain>,
}

impl fmt::Debug for AudioTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioTask")
            .field("id", &self.id)
            .field("kind", &self.decoder.kind())
            .field("state", &self.state)
            .field("params", &self.params)
            .field("frames_played", &self.frames_played)
            .finish_non_exhaustive()
    }
}

impl AudioTask {
    pub fn new(id: TaskId, mut decoder: Box<dyn Decoder>, params: TaskParams) -> Self {
        decoder.set_speed(params.speed);
        Self {
            id,
            decoder,
            state: TaskState::Pending,
            params,
            frames_played: 0,
            underruns: 0,
            in_underrun: false,
            deferrals: 0,
            deferral_streak: 0,
            cost_ms: None,
            mix_gain: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn kind(&self) -> DecoderKind {
        self.decoder.kind()
    }

    pub fn channels(&self) -> u16 {
        self.decoder.channels()
    }

    pub fn decoder(&self) -> &dyn Decoder {
        self.decoder.as_ref()
    }

    pub fn decoder_mut(&mut self) -> &mut dyn Decoder {
        self.decoder.as_mut()
    }

    pub fn params(&self) -> &TaskParams {
        &self.params
    }

    pub fn volume(&self) -> f32 {
        self.params.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.params.volume = volume.max(0.0);
    }

    pub fn pan(&self) -> f32 {
        self.params.pan
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.params.pan = pan.clamp(-1.0, 1.0);
    }

    /// Gain the mixer ramps from. The first mix starts at `target`.
    pub(crate) fn mix_gain(&mut self, target: StereoGain) -> &mut StereoGain {
        self.mix_gain.get_or_insert(target)
    }

    pub fn speed(&self) -> f32 {
        self.params.speed
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.params.speed = clamp_speed(speed);
        self.decoder.set_speed(self.params.speed);
    }

    pub fn priority(&self) -> i32 {
        self.params.priority
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.params.priority = priority;
    }

    pub fn group(&self) -> Option<GroupId> {
        self.params.group
    }

    pub fn bank(&self) -> Option<BankHandle> {
        self.params.bank
    }

    /// Frames mixed since the task started.
    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    pub fn underruns(&self) -> u32 {
        self.underruns
    }

    pub fn deferrals(&self) -> u32 {
        self.deferrals
    }

    pub fn deferral_streak(&self) -> u32 {
        self.deferral_streak
    }

    /// Moving average of this task's measured cost per tick.
    pub fn cost_ms(&self) -> Option<f64> {
        self.cost_ms
    }

    /// Pending → Playing (or Paused if it was created paused).
    /// Returns true if the task started playing.
    pub(crate) fn promote(&mut self) -> bool {
        if self.state != TaskState::Pending {
            return false;
        }
        if self.params.paused {
            self.state = TaskState::Paused;
            false
        } else {
            self.state = TaskState::Playing;
            true
        }
    }

    pub(crate) fn pause(&mut self) {
        match self.state {
            TaskState::Playing => self.state = TaskState::Paused,
            TaskState::Pending => self.params.paused = true,
            _ => {}
        }
    }

    pub(crate) fn unpause(&mut self) {
        match self.state {
            TaskState::Paused => self.state = TaskState::Playing,
            TaskState::Pending => self.params.paused = false,
            _ => {}
        }
    }

    /// Returns true if the task was still alive.
    pub(crate) fn stop(&mut self) -> bool {
        if self.state.is_done() {
            return false;
        }
        self.state = TaskState::Stopped;
        true
    }

    pub(crate) fn finish(&mut self) {
        if !self.state.is_done() {
            self.state = TaskState::Finished;
        }
    }

    pub(crate) fn advance(&mut self, frames: usize) {
        self.frames_played += frames as u64;
        self.deferral_streak = 0;
    }

    /// Records an underrun. Returns true when this starts a new underrun
    /// episode.
    pub(crate) fn note_underrun(&mut self) -> bool {
        self.underruns += 1;
        self.deferral_streak = 0;
        !std::mem::replace(&mut self.in_underrun, true)
    }

    pub(crate) fn clear_underrun(&mut self) {
        self.in_underrun = false;
    }

    pub(crate) fn defer(&mut self) {
        self.deferrals += 1;
        self.deferral_streak = self.deferral_streak.saturating_add(1);
    }

    pub(crate) fn record_cost(&mut self, ms: f64) {
        self.cost_ms = Some(match self.cost_ms {
            Some(avg) => avg + COST_SMOOTHING * (ms - avg),
            None => ms,
        });
    }
}
