//! Fixed-capacity task pool.

use crate::alloc::{Allocator, Reservation};
use crate::error::{ChirpError, Result};
use crate::task::{AudioTask, TaskId};

struct Slot {
    generation: u32,
    task: Option<AudioTask>,
}

/// Holds every live [`AudioTask`] in a fixed number of slots.
///
/// The capacity is reserved through the engine allocator up front and never
/// grows. Freed slots are reused in LIFO order with a bumped generation.
pub struct TaskPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    _reservation: Reservation,
}

impl TaskPool {
    pub fn new(capacity: usize, allocator: &Allocator) -> Result<Self> {
        let bytes = capacity * (std::mem::size_of::<Slot>() + std::mem::size_of::<u32>());
        let reservation = allocator.reserve(bytes)?;

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            generation: 0,
            task: None,
        });
        let free = (0..capacity as u32).rev().collect();

        Ok(Self {
            slots,
            free,
            live: 0,
            _reservation: reservation,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live tasks, including finished ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn has_free_slot(&self) -> bool {
        !self.free.is_empty()
    }

    /// Takes a free slot and fills it with the task `make` builds.
    ///
    /// # Errors
    ///
    /// [`ChirpError::TaskPoolExhausted`] when every slot is in use.
    pub fn insert_with(&mut self, make: impl FnOnce(TaskId) -> AudioTask) -> Result<TaskId> {
        let Some(slot) = self.free.pop() else {
            return Err(ChirpError::TaskPoolExhausted {
                capacity: self.capacity(),
            });
        };
        let entry = &mut self.slots[slot as usize];
        let id = TaskId::new(slot, entry.generation);
        entry.task = Some(make(id));
        self.live += 1;
        Ok(id)
    }

    pub fn get(&self, id: TaskId) -> Option<&AudioTask> {
        self.slots
            .get(id.slot() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.task.as_ref())
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut AudioTask> {
        self.slots
            .get_mut(id.slot() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.task.as_mut())
    }

    /// The task in `slot`, whatever its generation.
    pub fn slot(&self, slot: u32) -> Option<&AudioTask> {
        self.slots.get(slot as usize).and_then(|s| s.task.as_ref())
    }

    pub fn slot_mut(&mut self, slot: u32) -> Option<&mut AudioTask> {
        self.slots
            .get_mut(slot as usize)
            .and_then(|s| s.task.as_mut())
    }

    /// Empties `slot` and makes it available again under a new generation.
    pub fn reclaim(&mut self, slot: u32) -> Option<AudioTask> {
        let entry = self.slots.get_mut(slot as usize)?;
        let task = entry.task.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(slot);
        self.live -= 1;
        Some(task)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioTask> {
        self.slots.iter().filter_map(|slot| slot.task.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AudioTask> {
        self.slots.iter_mut().filter_map(|slot| slot.task.as_mut())
    }

    /// Reclaims every slot, returning how many tasks were dropped.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        for slot in 0..self.slots.len() as u32 {
            if self.reclaim(slot).is_some() {
                dropped += 1;
            }
        }
        dropped
    }
}
