//! Pluggable memory accounting.
//!
//! Every buffer the engine owns (task pool, scratch and mix buffers, bank sample
//! storage, stream ring buffers) is reserved through an [`Allocator`] before it
//! is created, and the reservation is returned when the buffer is dropped. The
//! host injects the strategy as a [`MemoryProvider`] in
//! [`ChirpConfig`](crate::config::ChirpConfig); a provider may refuse a
//! reservation to cap the engine's footprint.

use crate::error::{ChirpError, Result};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Host-supplied memory strategy.
pub trait MemoryProvider: Send + Sync {
    /// Reserves `bytes`. Returns `false` to refuse the reservation.
    fn allocate(&self, bytes: usize) -> bool;

    /// Returns `bytes` previously granted by [`allocate`](Self::allocate).
    fn release(&self, bytes: usize);
}

/// Grants every reservation and keeps no books.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryProvider for SystemMemory {
    fn allocate(&self, _bytes: usize) -> bool {
        true
    }

    fn release(&self, _bytes: usize) {}
}

/// Keeps a running balance of outstanding bytes, optionally with a ceiling.
#[derive(Debug, Default)]
pub struct CountingMemory {
    outstanding: AtomicUsize,
    peak: AtomicUsize,
    live: AtomicUsize,
    limit: Option<usize>,
}

impl CountingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses reservations that would push the balance above `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Bytes currently reserved.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Highest balance seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Number of reservations not yet released.
    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl MemoryProvider for CountingMemory {
    fn allocate(&self, bytes: usize) -> bool {
        let granted = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.checked_add(bytes)?;
                match self.limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            });

        match granted {
            Ok(previous) => {
                self.peak.fetch_max(previous + bytes, Ordering::AcqRel);
                self.live.fetch_add(1, Ordering::AcqRel);
                true
            }
            Err(_) => false,
        }
    }

    fn release(&self, bytes: usize) {
        self.outstanding.fetch_sub(bytes, Ordering::AcqRel);
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cloneable handle to the engine's memory strategy.
#[derive(Clone)]
pub struct Allocator {
    provider: Arc<dyn MemoryProvider>,
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator").finish_non_exhaustive()
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::system()
    }
}

impl Allocator {
    pub fn new(provider: Arc<dyn MemoryProvider>) -> Self {
        Self { provider }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemMemory))
    }

    /// Reserves `bytes`, returning a guard that releases them on drop.
    ///
    /// # Errors
    ///
    /// Returns [`ChirpError::OutOfMemory`] if the provider refuses.
    pub fn reserve(&self, bytes: usize) -> Result<Reservation> {
        if !self.provider.allocate(bytes) {
            return Err(ChirpError::OutOfMemory { requested: bytes });
        }
        Ok(Reservation {
            provider: self.provider.clone(),
            bytes,
        })
    }

    /// Reserves and creates a fixed-length buffer filled with `value`.
    pub fn vec<T: Clone>(&self, len: usize, value: T) -> Result<TrackedVec<T>> {
        let reservation = self.reserve(len * std::mem::size_of::<T>())?;
        Ok(TrackedVec {
            data: vec![value; len],
            _reservation: reservation,
        })
    }

    /// Takes accounting ownership of an already-built buffer.
    pub fn adopt<T>(&self, data: Vec<T>) -> Result<TrackedVec<T>> {
        let reservation = self.reserve(data.capacity() * std::mem::size_of::<T>())?;
        Ok(TrackedVec {
            data,
            _reservation: reservation,
        })
    }
}

/// A granted reservation. Dropping it returns the bytes to the provider.
pub struct Reservation {
    provider: Arc<dyn MemoryProvider>,
    bytes: usize,
}

impl Reservation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.provider.release(self.bytes);
    }
}

/// Fixed-length buffer whose memory is accounted to an [`Allocator`].
///
/// Dereferences to a slice rather than a `Vec` so the length (and with it the
/// reservation) cannot change after creation.
pub struct TrackedVec<T> {
    data: Vec<T>,
    _reservation: Reservation,
}

impl<T: fmt::Debug> fmt::Debug for TrackedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedVec")
            .field("len", &self.data.len())
            .finish()
    }
}

impl<T> Deref for TrackedVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for TrackedVec<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_balance_returns_to_zero() {
        let memory = Arc::new(CountingMemory::new());
        let alloc = Allocator::new(memory.clone());

        let a = alloc.vec(256, 0.0f32).unwrap();
        let b = alloc.vec(16, 0i32).unwrap();
        assert_eq!(memory.outstanding(), 256 * 4 + 16 * 4);
        assert_eq!(memory.live_allocations(), 2);

        drop(a);
        drop(b);
        assert_eq!(memory.outstanding(), 0);
        assert_eq!(memory.live_allocations(), 0);
        assert_eq!(memory.peak(), 256 * 4 + 16 * 4);
    }

    #[test]
    fn limit_refuses_reservation() {
        let memory = Arc::new(CountingMemory::with_limit(100));
        let alloc = Allocator::new(memory.clone());

        let _held = alloc.reserve(80).unwrap();
        let err = alloc.reserve(40).unwrap_err();
        assert!(matches!(err, ChirpError::OutOfMemory { requested: 40 }));
        assert_eq!(memory.outstanding(), 80);
    }

    #[test]
    fn tracked_vec_is_writable() {
        let alloc = Allocator::system();
        let mut buf = alloc.vec(4, 0i32).unwrap();
        buf[2] = 7;
        assert_eq!(&buf[..], &[0, 0, 7, 0]);
    }
}
