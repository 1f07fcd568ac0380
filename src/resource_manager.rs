//! Concurrency governor: admission slots and the bounded overflow queue.
//!
//! A fixed pool of slots caps how many supervisors run at once. Overflow
//! requests take a queue seat (bounded) and wait FIFO for a slot, racing
//! the queue timeout and their cancellation token. Dropping an
//! [`AdmissionSlot`] releases the slot and wakes the queue head.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error_handling::types::AdmissionError;

pub struct ResourceManager {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    queued: Arc<Mutex<usize>>,
    max_queue: usize,
    queue_timeout: Duration,
}

/// An admission slot held for the whole life of one supervisor.
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

/// A reserved seat in the overflow queue. Dropping it (including via
/// [`ResourceManager::wait_for_slot`]) frees the seat.
#[derive(Debug)]
pub struct QueueSeat {
    queued: Arc<Mutex<usize>>,
}

impl Drop for QueueSeat {
    fn drop(&mut self) {
        if let Ok(mut queued) = self.queued.lock() {
            *queued = queued.saturating_sub(1);
        }
    }
}

impl ResourceManager {
    pub fn new(max_concurrent: usize, max_queue: usize, queue_timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            queued: Arc::new(Mutex::new(0)),
            max_queue,
            queue_timeout,
        }
    }

    /// Fast path: grab a free slot without queueing.
    pub fn try_admit(&self) -> Option<AdmissionSlot> {
        self.slots
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionSlot { _permit: permit })
    }

    /// Reserves a queue seat, or rejects immediately when the queue is
    /// full.
    pub fn reserve_seat(&self) -> Result<QueueSeat, AdmissionError> {
        let mut queued = self
            .queued
            .lock()
            .map_err(|_| AdmissionError::AtCapacity)?;
        if *queued >= self.max_queue {
            debug!("Admission queue full ({} waiting)", *queued);
            return Err(AdmissionError::AtCapacity);
        }
        *queued += 1;
        Ok(QueueSeat {
            queued: self.queued.clone(),
        })
    }

    /// Waits on a reserved seat for a slot. FIFO by wait order; the wait
    /// races the queue deadline and the cancellation token, both of which
    /// are observed promptly.
    pub async fn wait_for_slot(
        &self,
        seat: QueueSeat,
        cancel: &CancellationToken,
    ) -> Result<AdmissionSlot, AdmissionError> {
        // The seat is released when this function returns, whatever the
        // outcome: the waiter either became a slot holder or left the queue.
        let _seat = seat;
        tokio::select! {
            permit = self.slots.clone().acquire_owned() => {
                match permit {
                    Ok(permit) => Ok(AdmissionSlot { _permit: permit }),
                    Err(_) => Err(AdmissionError::Cancelled),
                }
            }
            _ = tokio::time::sleep(self.queue_timeout) => Err(AdmissionError::QueueTimeout),
            _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
        }
    }

    /// Sessions currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    /// Requests currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queued.lock().map(|q| *q).unwrap_or(0)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
