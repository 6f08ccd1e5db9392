//! Replay-latest broadcast of state snapshots
//!
//! Subscribers are kept in registration order and receive the latest state
//! as soon as they subscribe. Callbacks run outside the channel lock, so an
//! observer may subscribe or unsubscribe from inside a callback.

use crate::error::StoreError;
use crate::state::State;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type NextFn = Box<dyn Fn(&State) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&StoreError) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// Structured subscriber with `next`, `error` and `complete` handlers
///
/// Any `Fn(&State)` closure converts into an observer with only `next`.
///
/// ```ignore
/// let subscription = store.subscribe(
///     Observer::new(|state| println!("{:?}", state))
///         .on_error(|err| eprintln!("reducer failed: {err}"))
///         .on_complete(|| println!("store dropped")),
/// );
/// ```
pub struct Observer {
    next: NextFn,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl Observer {
    pub fn new<F>(next: F) -> Self
    where
        F: Fn(&State) + Send + Sync + 'static,
    {
        Self {
            next: Box::new(next),
            error: None,
            complete: None,
        }
    }

    pub fn on_error<F>(mut self, error: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(error));
        self
    }

    pub fn on_complete<F>(mut self, complete: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.complete = Some(Box::new(complete));
        self
    }
}

impl<F> From<F> for Observer
where
    F: Fn(&State) + Send + Sync + 'static,
{
    fn from(next: F) -> Self {
        Observer::new(next)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

struct Subscribers {
    latest: State,
    next_id: u64,
    observers: BTreeMap<u64, Arc<Observer>>,
    completed: bool,
}

pub(crate) struct StateChannel {
    inner: Arc<Mutex<Subscribers>>,
}

impl StateChannel {
    pub fn new(initial: State) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                latest: initial,
                next_id: 0,
                observers: BTreeMap::new(),
                completed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an observer and replay the latest state to it
    pub fn subscribe(&self, observer: Observer) -> Subscription {
        let observer = Arc::new(observer);
        let (id, latest) = {
            let mut subscribers = self.lock();
            if subscribers.completed {
                drop(subscribers);
                if let Some(complete) = &observer.complete {
                    complete();
                }
                return Subscription::closed();
            }
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.observers.insert(id, observer.clone());
            (id, subscribers.latest.clone())
        };

        (observer.next)(&latest);
        Subscription {
            id,
            channel: Arc::downgrade(&self.inner),
        }
    }

    /// Store `state` as latest and deliver it in subscription order
    pub fn publish(&self, state: &State) {
        let observers = {
            let mut subscribers = self.lock();
            subscribers.latest = state.clone();
            snapshot(&subscribers)
        };
        for observer in observers {
            (observer.next)(state);
        }
    }

    /// Report a failure without closing the channel
    pub fn error(&self, error: &StoreError) {
        let observers = snapshot(&self.lock());
        for observer in observers {
            if let Some(on_error) = &observer.error {
                on_error(error);
            }
        }
    }

    /// Close the channel: every observer gets `complete` and is dropped
    pub fn complete(&self) {
        let observers = {
            let mut subscribers = self.lock();
            subscribers.completed = true;
            std::mem::take(&mut subscribers.observers)
        };
        for observer in observers.into_values() {
            if let Some(complete) = &observer.complete {
                complete();
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().observers.len()
    }
}

fn snapshot(subscribers: &Subscribers) -> Vec<Arc<Observer>> {
    subscribers.observers.values().cloned().collect()
}

/// Handle of a registered observer
///
/// Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    channel: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    fn closed() -> Self {
        Self {
            id: u64::MAX,
            channel: Weak::new(),
        }
    }

    /// Whether the observer is still registered
    pub fn is_active(&self) -> bool {
        self.channel.upgrade().is_some_and(|inner| {
            inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observers
                .contains_key(&self.id)
        })
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.channel.upgrade() {
            let removed = inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observers
                .remove(&self.id);
            // Dropped outside the lock: the observer may own a Subscription
            drop(removed);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<State>>>, impl Fn(&State) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |state: &State| sink.lock().unwrap().push(state.clone()))
    }

    #[test]
    fn test_new_subscriber_gets_latest() {
        let channel = StateChannel::new(State::leaf(1));
        channel.publish(&State::leaf(2));

        let (seen, next) = recorder();
        let _subscription = channel.subscribe(next.into());
        assert_eq!(*seen.lock().unwrap(), vec![State::leaf(2)]);
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let channel = StateChannel::new(State::leaf(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let subscriptions: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                let order = order.clone();
                channel.subscribe(Observer::new(move |_| order.lock().unwrap().push(name)))
            })
            .collect();
        order.lock().unwrap().clear();

        channel.publish(&State::leaf(1));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
        drop(subscriptions);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let channel = StateChannel::new(State::leaf(0));
        let (seen, next) = recorder();
        let subscription = channel.subscribe(next.into());
        assert!(subscription.is_active());
        assert_eq!(channel.subscriber_count(), 1);

        subscription.unsubscribe();
        channel.publish(&State::leaf(1));
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_error_and_complete_handlers() {
        let channel = StateChannel::new(State::leaf(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let completes = Arc::new(AtomicUsize::new(0));

        let e = errors.clone();
        let c = completes.clone();
        let subscription = channel.subscribe(
            Observer::new(|_| {})
                .on_error(move |_| {
                    e.fetch_add(1, Ordering::SeqCst);
                })
                .on_complete(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
        );

        channel.error(&StoreError::Reentrancy);
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        channel.complete();
        assert_eq!(completes.load(Ordering::SeqCst), 1);
        assert!(!subscription.is_active());

        // Late subscribers are completed right away
        let c = completes.clone();
        let late = channel.subscribe(Observer::new(|_| {}).on_complete(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(completes.load(Ordering::SeqCst), 2);
        assert!(!late.is_active());
    }
}
