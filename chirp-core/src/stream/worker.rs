use crate::config::StreamWorkerMode;
use crate::error::{ChirpError, Result};
use crate::stream::{RefillOutcome, StreamReader};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How soon a stalled stream is retried on the worker thread.
const STALL_RETRY: Duration = Duration::from_millis(5);

/// Nudges the stream worker to refill before its next cadence.
///
/// Waking never blocks and never allocates; a wake-up that finds one already
/// queued is dropped.
#[derive(Debug, Clone, Default)]
pub struct StreamWaker {
    tx: Option<Sender<()>>,
}

impl StreamWaker {
    /// A waker that does nothing, for streams refilled by hand.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        if let Some(tx) = &self.tx {
            match tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => {}
            }
        }
    }
}

/// Refills every open stream at the `stream_file_update_ms` cadence.
///
/// In [`StreamWorkerMode::Thread`] a background thread owns the readers; in
/// [`StreamWorkerMode::Manual`] they are refilled from [`poll`](Self::poll) on
/// the caller's thread.
pub struct StreamWorker {
    mode: StreamWorkerMode,
    interval_ms: f32,
    attach_tx: Option<Sender<StreamReader>>,
    wake_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
    manual: Vec<StreamReader>,
    since_cadence_ms: f32,
}

impl StreamWorker {
    pub fn start(mode: StreamWorkerMode, interval_ms: f32) -> Result<Self> {
        let (wake_tx, wake_rx) = bounded::<()>(1);
        let active = Arc::new(AtomicUsize::new(0));

        let (attach_tx, thread) = match mode {
            StreamWorkerMode::Thread => {
                let (attach_tx, attach_rx) = unbounded::<StreamReader>();
                let interval = Duration::from_secs_f32(interval_ms / 1000.0);
                let active = active.clone();
                let handle = std::thread::Builder::new()
                    .name("chirp-stream".to_string())
                    .spawn(move || run_worker(attach_rx, wake_rx, interval, active))
                    .map_err(|e| {
                        ChirpError::Engine(format!("Failed to spawn stream worker: {}", e))
                    })?;
                (Some(attach_tx), Some(handle))
            }
            StreamWorkerMode::Manual => (None, None),
        };

        log::debug!("Stream worker started ({:?}, {} ms cadence)", mode, interval_ms);

        Ok(Self {
            mode,
            interval_ms,
            attach_tx,
            wake_tx,
            thread,
            active,
            manual: Vec::new(),
            since_cadence_ms: 0.0,
        })
    }

    pub fn mode(&self) -> StreamWorkerMode {
        self.mode
    }

    pub fn waker(&self) -> StreamWaker {
        match self.mode {
            StreamWorkerMode::Thread => StreamWaker {
                tx: Some(self.wake_tx.clone()),
            },
            StreamWorkerMode::Manual => StreamWaker::none(),
        }
    }

    /// Hands a reader to the worker.
    pub fn attach(&mut self, reader: StreamReader) -> Result<()> {
        match &self.attach_tx {
            Some(tx) => tx
                .send(reader)
                .map_err(|_| ChirpError::Engine("Stream worker has stopped".to_string())),
            None => {
                self.manual.push(reader);
                self.active.store(self.manual.len(), Ordering::Release);
                Ok(())
            }
        }
    }

    /// Number of streams the worker is refilling.
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Advances the manual cadence by `elapsed_ms` and runs due refills.
    /// Does nothing in thread mode.
    pub fn poll(&mut self, elapsed_ms: f32) {
        if self.mode != StreamWorkerMode::Manual {
            return;
        }
        self.since_cadence_ms += elapsed_ms;
        let cadence = self.since_cadence_ms >= self.interval_ms;
        if cadence {
            self.since_cadence_ms %= self.interval_ms;
        }
        refill_pass(&mut self.manual, cadence);
        self.active.store(self.manual.len(), Ordering::Release);
    }

    /// Stops the worker thread after its current pass and drops every reader.
    pub fn shutdown(&mut self) {
        self.attach_tx = None;
        if let Some(handle) = self.thread.take() {
            let _ = self.wake_tx.try_send(());
            if handle.join().is_err() {
                log::error!("Stream worker thread panicked");
            }
        }
        self.manual.clear();
        self.active.store(0, Ordering::Release);
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    attach_rx: Receiver<StreamReader>,
    wake_rx: Receiver<()>,
    interval: Duration,
    active: Arc<AtomicUsize>,
) {
    let mut readers: Vec<StreamReader> = Vec::new();
    let mut next_cadence = Instant::now() + interval;

    loop {
        let mut timeout = next_cadence.saturating_duration_since(Instant::now());
        if readers.iter().any(StreamReader::wants_priming) {
            timeout = timeout.min(STALL_RETRY);
        }

        crossbeam_channel::select! {
            recv(attach_rx) -> msg => match msg {
                Ok(reader) => readers.push(reader),
                Err(_) => break,
            },
            recv(wake_rx) -> _ => {}
            recv(crossbeam_channel::after(timeout)) -> _ => {}
        }

        while let Ok(reader) = attach_rx.try_recv() {
            readers.push(reader);
        }

        let now = Instant::now();
        let cadence = now >= next_cadence;
        if cadence {
            next_cadence = now + interval;
        }

        refill_pass(&mut readers, cadence);
        active.store(readers.len(), Ordering::Release);
    }

    log::debug!("Stream worker exiting with {} open streams", readers.len());
}

fn refill_pass(readers: &mut Vec<StreamReader>, cadence: bool) {
    readers.retain(|reader| !reader.is_closed());
    for reader in readers.iter_mut() {
        let due = reader.wants_priming() || (cadence && reader.needs_refill());
        if due && reader.refill() == RefillOutcome::Stalled {
            log::trace!("Stream {} will retry", reader.label());
        }
    }
}
