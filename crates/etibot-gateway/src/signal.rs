//! Async broadcast primitive.
//!
//! A [`Signal`] is an ordered list of async subscribers plus one-shot
//! waiters. [`Signal::invoke`] awaits every subscriber in subscription
//! order, one after another, then releases every pending waiter with a
//! clone of the value.
//!
//! Subscriber failures are isolated: a failing subscriber is logged and
//! delivery continues to the rest. `invoke` reports the first failure once
//! all subscribers have run.
//!
//! Each [`Signal::wait`] call registers its own one-shot receiver when it
//! is called (not when first polled), so a waiter always observes the value
//! of the first `invoke` issued after it started waiting.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{trace, warn};

/// Boxed error returned by a failing subscriber.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Subscriber<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Handle returned by [`Signal::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A subscriber failed during [`Signal::invoke`].
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The first subscriber that returned an error.
    #[error("subscriber {subscription:?} of signal `{signal}` failed: {source}")]
    Subscriber {
        /// Name of the signal being invoked.
        signal: &'static str,
        /// The failing subscription.
        subscription: SubscriptionId,
        /// What the subscriber returned.
        source: BoxError,
    },
}

/// Ordered multicast of `T` to async subscribers and one-shot waiters.
pub struct Signal<T> {
    name: &'static str,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber<T>)>>,
    waiters: Mutex<Vec<oneshot::Sender<T>>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + 'static,
{
    /// Create a signal with no subscribers. `name` appears in logs and
    /// errors.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Name given at construction.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Append an async subscriber.
    pub fn connect<F, Fut>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber: Subscriber<T> =
            Arc::new(move |value| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(subscriber(value))
            });
        self.subscribers.lock().push((id, subscriber));
        trace!(signal = self.name, ?id, "subscriber connected");
        id
    }

    /// Remove a subscriber. Returns whether it was still connected.
    pub fn disconnect(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        before != subscribers.len()
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver `value` to every subscriber in order, then release every
    /// pending waiter.
    ///
    /// Subscribers connected while an invocation is in progress first see
    /// the next invocation.
    ///
    /// # Errors
    ///
    /// Returns the first subscriber failure after every subscriber ran.
    pub async fn invoke(&self, value: T) -> Result<(), SignalError> {
        let subscribers: Vec<(SubscriptionId, Subscriber<T>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, subscriber)| (*id, Arc::clone(subscriber)))
            .collect();

        let mut first_failure = None;
        for (id, subscriber) in subscribers {
            if let Err(source) = subscriber(value.clone()).await {
                warn!(signal = self.name, subscription = ?id, error = %source, "signal subscriber failed");
                if first_failure.is_none() {
                    first_failure = Some(SignalError::Subscriber {
                        signal: self.name,
                        subscription: id,
                        source,
                    });
                }
            }
        }

        let waiters = std::mem::take(&mut *self.waiters.lock());
        for waiter in waiters {
            // A dropped wait future is not an error.
            let _ = waiter.send(value.clone());
        }

        first_failure.map_or(Ok(()), Err)
    }

    /// Wait for the next [`invoke`](Self::invoke).
    ///
    /// Never resolves if the signal is never invoked; race it against your
    /// own cancellation. Waits dropped before an invoke are pruned on the
    /// next call.
    pub fn wait(&self) -> BoxFuture<'static, T> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        waiters.retain(|waiter| !waiter.is_closed());
        waiters.push(tx);
        drop(waiters);
        Box::pin(async move {
            match rx.await {
                Ok(value) => value,
                Err(_) => std::future::pending().await,
            }
        })
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.lock().len())
            .field("waiters", &self.waiters.lock().len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn recorder(signal: &Signal<u32>, log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> SubscriptionId {
        let log = Arc::clone(log);
        signal.connect(move |value| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{tag}:{value}"));
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn delivers_in_subscription_order() {
        let signal = Signal::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&signal, &log, "a");
        recorder(&signal, &log, "b");
        recorder(&signal, &log, "c");
        signal.invoke(7).await.unwrap();
        assert_eq!(*log.lock(), vec!["a:7", "b:7", "c:7"]);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let signal = Signal::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&signal, &log, "a");
        recorder(&signal, &log, "b");
        assert!(signal.disconnect(a));
        assert!(!signal.disconnect(a));
        signal.invoke(1).await.unwrap();
        assert_eq!(*log.lock(), vec!["b:1"]);
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_stop_delivery() {
        let signal = Signal::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&signal, &log, "a");
        let failing = signal.connect(|_| async { Err::<(), BoxError>("boom".into()) });
        recorder(&signal, &log, "c");

        let err = signal.invoke(3).await.unwrap_err();
        let SignalError::Subscriber { subscription, .. } = err;
        assert_eq!(subscription, failing);
        assert_eq!(*log.lock(), vec!["a:3", "c:3"]);
    }

    #[tokio::test]
    async fn each_waiter_sees_the_next_invoke() {
        let signal = Signal::new("test");
        let first = signal.wait();
        signal.invoke(1).await.unwrap();
        let second = signal.wait();
        signal.invoke(2).await.unwrap();
        assert_eq!(first.await, 1);
        assert_eq!(second.await, 2);
    }

    #[tokio::test]
    async fn concurrent_waiters_share_one_invoke() {
        let signal = Signal::new("test");
        let a = tokio::spawn(signal.wait());
        let b = tokio::spawn(signal.wait());
        signal.invoke(9).await.unwrap();
        assert_eq!(a.await.unwrap(), 9);
        assert_eq!(b.await.unwrap(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waiters_are_pruned() {
        let signal: Signal<u32> = Signal::new("test");
        for _ in 0..5 {
            let result = tokio::time::timeout(Duration::from_millis(10), signal.wait()).await;
            assert!(result.is_err());
        }
        let next = signal.wait();
        assert_eq!(signal.waiters.lock().len(), 1);
        signal.invoke(4).await.unwrap();
        assert_eq!(next.await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_without_invoke_never_resolves() {
        let signal: Signal<u32> = Signal::new("test");
        let result = tokio::time::timeout(Duration::from_secs(60), signal.wait()).await;
        assert!(result.is_err());
    }
}
