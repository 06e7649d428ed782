use super::control::{Control, POLL_INTERVAL};
use crate::error::Error;
use crate::transform::Slot;

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

struct Ring {
    slots: Vec<Option<Slot>>,
    next: usize,
}

impl Ring {
    fn position(&self, index: usize) -> usize {
        index % self.slots.len()
    }
}

/// Result slots addressed by frame index modulo capacity.
///
/// Workers publish in any order; the single reader takes indices strictly
/// in sequence. A writer more than `capacity` frames ahead of the reader
/// blocks until the reader catches up.
#[derive(Clone)]
pub struct ResultRing {
    inner: Arc<(Mutex<Ring>, Condvar)>,
}

impl ResultRing {
    pub fn new(capacity: usize) -> Self {
        let ring = Ring { slots: vec![None; capacity.max(1)], next: 0 };
        Self { inner: Arc::new((Mutex::new(ring), Condvar::new())) }
    }

    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publish(&self, index: usize, slot: Slot, control: &Control) -> Result<(), Error> {
        let (_, signal) = &*self.inner;
        let mut ring = self.lock();
        while index >= ring.next + ring.slots.len() {
            if control.is_cancelled() {
                return Err(Error::Cancelled);
            }
            ring = signal.wait_timeout(ring, POLL_INTERVAL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }

        if index < ring.next {
            return Err(Error::Invariant(format!("frame {} was published after it was written", index)));
        }
        let position = ring.position(index);
        if ring.slots[position].is_some() {
            return Err(Error::Invariant(format!("frame {} was published twice", index)));
        }
        ring.slots[position] = Some(slot);
        signal.notify_all();
        Ok(())
    }

    /// Takes the next slot in sequence, waiting for it to be published.
    ///
    /// Returns `Ok(None)` when paused or after one poll interval, so the caller
    /// can honour pause and cancellation between attempts.
    pub fn take(&self, index: usize, control: &Control) -> Result<Option<Slot>, Error> {
        let (_, signal) = &*self.inner;
        let mut ring = self.lock();
        if index != ring.next {
            return Err(Error::Invariant(format!("frame {} requested, expected {}", index, ring.next)));
        }
        if control.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if control.pause.is_paused() {
            drop(ring);
            thread::sleep(POLL_INTERVAL);
            return Ok(None);
        }

        let position = ring.position(index);
        if ring.slots[position].is_none() {
            ring = signal.wait_timeout(ring, POLL_INTERVAL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }

        match ring.slots[position].take() {
            Some(slot) => {
                ring.next += 1;
                signal.notify_all();
                Ok(Some(slot))
            }
            None => Ok(None),
        }
    }
}
