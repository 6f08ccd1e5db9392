//! Bounded concurrency gate
//!
//! `Semaphore::acquire_and_run` admits at most `max_concurrent` tasks at a
//! time. A slot is requested when `acquire_and_run` is *called*, not when the
//! returned future is first polled, so admission follows call order even if
//! the callers' futures are polled in a different order.
//!
//! A freed slot is handed directly to the oldest waiter. Slots are released
//! when a task finishes, fails or panics, and when a queued request is
//! dropped before it was admitted.

use crate::error::StoreError;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// FIFO bounded-concurrency gate
#[derive(Clone, Debug)]
pub struct Semaphore {
    inner: Arc<Mutex<Gate>>,
}

#[derive(Debug)]
struct Gate {
    max_concurrent: usize,
    running: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl Semaphore {
    /// Create a gate with `max_concurrent` slots (must be at least 1)
    pub fn new(max_concurrent: usize) -> Result<Self, StoreError> {
        if max_concurrent < 1 {
            return Err(StoreError::InvalidConcurrency(max_concurrent));
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(Gate {
                max_concurrent,
                running: 0,
                waiters: VecDeque::new(),
            })),
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.gate().max_concurrent
    }

    /// Tasks currently holding a slot
    pub fn running(&self) -> usize {
        self.gate().running
    }

    /// Requests waiting for a slot
    pub fn queued(&self) -> usize {
        self.gate().waiters.len()
    }

    /// Run `task` once a slot is free
    ///
    /// The task's output, success or failure, is returned to this caller
    /// only. The slot is released however the task ends.
    pub fn acquire_and_run<F, Fut, T>(&self, task: F) -> impl Future<Output = T> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let ticket = self.request();
        async move {
            let _permit = ticket.admitted().await;
            task().await
        }
    }

    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self) -> Ticket {
        let mut gate = self.gate();
        if gate.running < gate.max_concurrent {
            gate.running += 1;
            log::trace!("Semaphore: slot granted ({}/{})", gate.running, gate.max_concurrent);
            Ticket {
                semaphore: self.clone(),
                state: TicketState::Reserved,
            }
        } else {
            let (tx, rx) = oneshot::channel();
            gate.waiters.push_back(tx);
            log::trace!("Semaphore: request queued at position {}", gate.waiters.len());
            Ticket {
                semaphore: self.clone(),
                state: TicketState::Queued(rx),
            }
        }
    }

    /// Hand the slot to the oldest live waiter, or free it
    fn release(&self) {
        let mut gate = self.gate();
        while let Some(waiter) = gate.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        gate.running = gate.running.saturating_sub(1);
    }
}

enum TicketState {
    /// Slot already reserved for this request
    Reserved,
    /// Waiting for a slot to be handed over
    Queued(oneshot::Receiver<()>),
    /// Slot now owned by a `Permit`
    Admitted,
}

/// A slot request that has not been turned into a permit yet
struct Ticket {
    semaphore: Semaphore,
    state: TicketState,
}

impl Ticket {
    async fn admitted(mut self) -> Permit {
        if let TicketState::Queued(rx) = &mut self.state {
            // Senders only leave the queue by being sent to
            if rx.await.is_err() {
                log::warn!("Semaphore: waiter was dropped without a slot");
            }
        }
        self.state = TicketState::Admitted;
        Permit {
            semaphore: self.semaphore.clone(),
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, TicketState::Admitted) {
            TicketState::Reserved => self.semaphore.release(),
            TicketState::Queued(mut rx) => {
                rx.close();
                if rx.try_recv().is_ok() {
                    self.semaphore.release();
                }
            }
            TicketState::Admitted => {}
        }
    }
}

/// An occupied slot, released on drop
struct Permit {
    semaphore: Semaphore,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_rejects_zero_slots() {
        let err = Semaphore::new(0).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConcurrency(0)));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_bounds_concurrency() {
        let semaphore = Semaphore::new(2).unwrap();
        assert_eq!(semaphore.max_concurrent(), 2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let active = active.clone();
                let peak = peak.clone();
                semaphore.acquire_and_run(move || async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        assert_eq!(semaphore.running(), 2);
        assert_eq!(semaphore.queued(), 4);

        futures::future::join_all(tasks).await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(semaphore.running(), 0);
        assert_eq!(semaphore.queued(), 0);
    }

    #[tokio::test]
    async fn test_admits_in_call_order() {
        let semaphore = Semaphore::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let order = order.clone();
            tasks.push(semaphore.acquire_and_run(move || async move {
                tokio::time::sleep(Duration::from_millis(4 - i)).await;
                order.lock().unwrap().push(i);
            }));
        }
        // Poll in reverse: admission must still follow call order
        tasks.reverse();
        futures::future::join_all(tasks).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failure_releases_slot_and_stays_local() {
        let semaphore = Semaphore::new(1).unwrap();

        let failing = semaphore.acquire_and_run(|| async { Err::<u32, &str>("boom") });
        let passing = semaphore.acquire_and_run(|| async { Ok::<u32, &str>(7) });

        let (failed, passed) = tokio::join!(failing, passing);
        assert_eq!(failed, Err("boom"));
        assert_eq!(passed, Ok(7));
        assert_eq!(semaphore.running(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_gives_up_its_place() {
        let semaphore = Semaphore::new(1).unwrap();

        let first = semaphore.acquire_and_run(|| async { 1 });
        let abandoned = semaphore.acquire_and_run(|| async { 2 });
        let third = semaphore.acquire_and_run(|| async { 3 });
        assert_eq!(semaphore.queued(), 2);

        drop(abandoned);
        assert_eq!(first.await, 1);
        assert_eq!(third.await, 3);
        assert_eq!(semaphore.running(), 0);
    }

    #[tokio::test]
    async fn test_unpolled_reserved_request_is_released() {
        let semaphore = Semaphore::new(1).unwrap();
        drop(semaphore.acquire_and_run(|| async {}));
        assert_eq!(semaphore.running(), 0);
        assert_eq!(semaphore.acquire_and_run(|| async { "ok" }).await, "ok");
    }
}
