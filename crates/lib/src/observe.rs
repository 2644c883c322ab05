//! Observer-counted hot streams.
//!
//! An [`Observable`] holds the latest value of a stream and counts the
//! [`Observer`]s attached to it. Upstream work is started and stopped from
//! that count by [`spawn_gated`]: it runs while at least one observer is
//! attached and keeps running for a grace period after the last one leaves,
//! so a quick re-attach picks up the running stream instead of restarting it.
//!
//! Everything here needs a tokio runtime.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{Instrument, debug, info_span, trace};

struct Shared<T> {
    value: watch::Sender<T>,
    observers: watch::Sender<usize>,
}

/// The publishing side of a hot stream.
pub struct Observable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                value: watch::Sender::new(initial),
                observers: watch::Sender::new(0),
            }),
        }
    }

    /// Attach a new observer.
    pub fn subscribe(&self) -> Observer<T> {
        self.shared.observers.send_modify(|n| *n += 1);
        Observer {
            rx: self.shared.value.subscribe(),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn value(&self) -> T {
        self.shared.value.borrow().clone()
    }

    pub fn set(&self, value: T) {
        self.shared.value.send_replace(value);
    }

    /// Modify the value in place. Observers are only woken if `f` returns true.
    pub fn update(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.shared.value.send_if_modified(f)
    }

    pub fn observer_count(&self) -> usize {
        *self.shared.observers.borrow()
    }

    /// Watch the number of attached observers.
    pub fn watch_observers(&self) -> watch::Receiver<usize> {
        self.shared.observers.subscribe()
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Observable<T> {
    /// Publish `value` unless it equals the current one.
    pub fn set_if_changed(&self, value: T) -> bool {
        self.update(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }
}

/// A subscription to an [`Observable`].
///
/// Counts as attached from creation until drop. Cloning attaches another
/// observer.
pub struct Observer<T> {
    rx: watch::Receiver<T>,
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        self.shared.observers.send_modify(|n| *n += 1);
        Self {
            rx: self.rx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Observer<T> {
    fn drop(&mut self) {
        self.shared.observers.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl<T> std::fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("observers", &*self.shared.observers.borrow())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Observer<T> {
    /// The latest published value, without marking it seen.
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// The latest published value, marking it seen.
    pub fn latest(&mut self) -> T {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for a value newer than the last one seen.
    ///
    /// Returns `None` once the stream can no longer change.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the current value satisfies `f`, including the value already published.
    pub async fn wait_for(&mut self, f: impl FnMut(&T) -> bool) -> Option<T> {
        self.rx.wait_for(f).await.ok().map(|value| value.clone())
    }

    /// Derive a stream from this one.
    ///
    /// The derived stream holds this observer for as long as it has observers
    /// of its own, and releases it when its last observer is dropped.
    pub fn map<U, F>(self, f: F) -> Observer<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + 'static,
    {
        let derived = Observable::new(f(&*self.rx.borrow()));
        let out = derived.subscribe();
        let mut source = self;
        let mut observers = derived.watch_observers();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = source.rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let value = f(&*source.rx.borrow_and_update());
                        derived.set_if_changed(value);
                    }
                    _ = observers.wait_for(|n| *n == 0) => break,
                }
            }
        });

        out
    }
}

/// Aborts the wrapped task when dropped.
pub(crate) struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `start(key)` while `observable` has observers and `key` is set.
///
/// - The first observer attaching starts the upstream task.
/// - A change of `key` aborts the running task and starts a fresh one.
/// - After the last observer detaches the task keeps running for `grace`,
///   then is aborted and `on_stop` is called.
/// - A `None` key stops the task at once.
///
/// The returned guard aborts the driver and its upstream task on drop.
pub(crate) fn spawn_gated<T, K, S, F, Fut>(
    name: &'static str,
    observable: &Observable<T>,
    mut key: watch::Receiver<Option<K>>,
    grace: Duration,
    on_stop: S,
    start: F,
) -> TaskGuard
where
    T: Clone + Send + Sync + 'static,
    K: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static,
    S: Fn() + Send + 'static,
    F: Fn(K) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut observers = observable.watch_observers();

    let driver = async move {
        let mut running: Option<(K, TaskGuard)> = None;

        loop {
            let attached = *observers.borrow_and_update() > 0;
            let wanted = key.borrow_and_update().clone();

            let stale = match (&running, &wanted) {
                (Some((current, _)), Some(wanted)) => current != wanted,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if stale {
                trace!(pipeline = name, "Key changed, stopping upstream");
                running = None;
                on_stop();
            }

            match (attached, wanted, running.is_some()) {
                (true, Some(k), false) => {
                    debug!(pipeline = name, key = ?k, "Starting upstream");
                    let task = tokio::spawn(start(k.clone()));
                    running = Some((k, TaskGuard::new(task)));
                }
                (false, Some(_), true) => {
                    tokio::select! {
                        _ = tokio::time::sleep(grace) => {
                            debug!(pipeline = name, "No observers after grace period, stopping upstream");
                            running = None;
                            on_stop();
                        }
                        changed = observers.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            continue;
                        }
                        changed = key.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            continue;
                        }
                    }
                }
                _ => {}
            }

            tokio::select! {
                changed = observers.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = key.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
    .instrument(info_span!("gate", pipeline = name));

    TaskGuard::new(tokio::spawn(driver))
}
