//! Cancellation and concurrency limits shared by the indexing workers

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag with an optional deadline.
///
/// Clones share the flag; workers poll [`CancellationToken::is_cancelled`]
/// between files and between retries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also trips once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

/// Counting semaphore over a bounded channel.
///
/// The channel starts full of permits; acquiring takes one out, dropping the
/// guard puts it back.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimit {
    tx: Sender<()>,
    rx: Receiver<()>,
    permits: usize,
}

impl ConcurrencyLimit {
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        let (tx, rx) = bounded(permits);
        for _ in 0..permits {
            // Capacity equals the permit count, so this never blocks
            let _ = tx.send(());
        }
        Self { tx, rx, permits }
    }

    /// Block until a permit is free
    pub fn acquire(&self) -> Permit<'_> {
        // We hold a sender ourselves, so the channel cannot disconnect
        let _ = self.rx.recv();
        Permit { limit: self }
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    pub fn available(&self) -> usize {
        self.rx.len()
    }
}

/// Held while a limited call is in flight
#[derive(Debug)]
pub struct Permit<'a> {
    limit: &'a ConcurrencyLimit,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.limit.tx.send(());
    }
}
