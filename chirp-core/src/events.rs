//! Event types for chirp

use crate::bank::BankHandle;
use crate::task::TaskId;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Events queued before the host polls; later events are dropped.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum ChirpEvent {
    TaskStarted {
        task: TaskId,
    },
    TaskFinished {
        task: TaskId,
    },
    TaskStopped {
        task: TaskId,
    },
    TaskFailed {
        task: TaskId,
        error: String,
    },
    BufferUnderrun {
        task: TaskId,
    },
    RenderOverload {
        deferred: usize,
        spent_ms: f64,
        budget_ms: f64,
    },
    BankLoaded {
        bank: BankHandle,
        name: String,
    },
    BankUnloaded {
        bank: BankHandle,
        stopped_tasks: usize,
    },
    EngineStarted,
    EngineStopped,
    EngineSuspended,
    EngineResumed,
    EngineError {
        error: String,
    },
}

impl ChirpEvent {
    pub fn task(&self) -> Option<TaskId> {
        match self {
            Self::TaskStarted { task }
            | Self::TaskFinished { task }
            | Self::TaskStopped { task }
            | Self::TaskFailed { task, .. }
            | Self::BufferUnderrun { task } => Some(*task),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::TaskFailed { .. }
                | Self::BufferUnderrun { .. }
                | Self::RenderOverload { .. }
                | Self::EngineError { .. }
        )
    }

    pub fn is_task_event(&self) -> bool {
        self.task().is_some()
    }
}

/// Sending half of the event queue. Never blocks.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: Sender<ChirpEvent>,
}

impl EventQueue {
    pub fn channel() -> (Self, Receiver<ChirpEvent>) {
        let (tx, rx) = bounded(EVENT_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ChirpEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::trace!("Event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_newest() {
        let (queue, rx) = EventQueue::channel();
        for _ in 0..EVENT_QUEUE_CAPACITY + 10 {
            queue.emit(ChirpEvent::EngineStarted);
        }
        queue.emit(ChirpEvent::EngineStopped);
        let drained: Vec<_> = rx.try_iter().collect();
        assert_eq!(drained.len(), EVENT_QUEUE_CAPACITY);
        assert!(drained.iter().all(|e| *e == ChirpEvent::EngineStarted));
    }

    #[test]
    fn task_accessor() {
        let id = TaskId::new(3, 1);
        assert_eq!(ChirpEvent::TaskFinished { task: id }.task(), Some(id));
        assert!(ChirpEvent::BufferUnderrun { task: id }.is_error());
        assert!(!ChirpEvent::EngineStarted.is_task_event());
    }
}
