use crate::error::{ChirpError, Result};
use crate::looping::LoopRegion;
use crate::task::TaskId;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Smallest command queue, whatever the pool size.
const MIN_COMMAND_QUEUE: usize = 1024;

/// Commands that can be sent to the scheduler for playback control.
///
/// Commands are applied at the start of the next tick, never mid-buffer.
/// Commands for finished or stale tasks are ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    Stop(TaskId),
    Pause(TaskId),
    Resume(TaskId),
    SetVolume(TaskId, f32),
    SetPan(TaskId, f32),
    SetPriority(TaskId, i32),
    SetSpeed(TaskId, f32),
    Seek(TaskId, u64),
    SetLoop(TaskId, Option<LoopRegion>),
    ReleaseLoop(TaskId),
    StopAll,
}

impl PlaybackCommand {
    pub fn task(&self) -> Option<TaskId> {
        match self {
            Self::Stop(task)
            | Self::Pause(task)
            | Self::Resume(task)
            | Self::SetVolume(task, _)
            | Self::SetPan(task, _)
            | Self::SetPriority(task, _)
            | Self::SetSpeed(task, _)
            | Self::Seek(task, _)
            | Self::SetLoop(task, _)
            | Self::ReleaseLoop(task) => Some(*task),
            Self::StopAll => None,
        }
    }
}

/// Creates the command queue for a pool of `max_tasks` tasks.
pub(crate) fn command_queue(max_tasks: usize) -> (Sender<PlaybackCommand>, Receiver<PlaybackCommand>) {
    bounded(max_tasks.saturating_mul(4).max(MIN_COMMAND_QUEUE))
}

/// Clonable handle for controlling playback from other threads.
///
/// Obtained from [`ChirpEngine::remote`](crate::ChirpEngine::remote).
#[derive(Debug, Clone)]
pub struct ChirpRemote {
    tx: Sender<PlaybackCommand>,
}

impl ChirpRemote {
    pub(crate) fn new(tx: Sender<PlaybackCommand>) -> Self {
        Self { tx }
    }

    /// Queues `command` for the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`ChirpError::Engine`] if the queue is full or the engine has
    /// shut down.
    pub fn send(&self, command: PlaybackCommand) -> Result<()> {
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(command) => {
                ChirpError::Engine(format!("Command queue full, dropped {:?}", command))
            }
            TrySendError::Disconnected(_) => {
                ChirpError::Engine("Engine has shut down".to_string())
            }
        })
    }

    pub fn stop(&self, task: TaskId) -> Result<()> {
        self.send(PlaybackCommand::Stop(task))
    }

    pub fn pause(&self, task: TaskId) -> Result<()> {
        self.send(PlaybackCommand::Pause(task))
    }

    pub fn resume(&self, task: TaskId) -> Result<()> {
        self.send(PlaybackCommand::Resume(task))
    }

    pub fn set_volume(&self, task: TaskId, volume: f32) -> Result<()> {
        self.send(PlaybackCommand::SetVolume(task, volume))
    }

    pub fn set_pan(&self, task: TaskId, pan: f32) -> Result<()> {
        self.send(PlaybackCommand::SetPan(task, pan))
    }

    pub fn set_speed(&self, task: TaskId, speed: f32) -> Result<()> {
        self.send(PlaybackCommand::SetSpeed(task, speed))
    }

    pub fn stop_all(&self) -> Result<()> {
        self.send(PlaybackCommand::StopAll)
    }
}
