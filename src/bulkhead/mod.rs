//! Admission limiting for concurrently executing commands.
//!
//! A [`Bulkhead`] caps how many dispatched commands run at once. Work beyond
//! the cap waits in a FIFO admission queue; a single admission worker hands
//! out permits in arrival order, so enqueueing is an O(1) hand-off and never
//! blocks the caller.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

type Task = BoxFuture<'static, ()>;

/// A bounded concurrency limiter with a FIFO admission queue.
#[derive(Debug)]
pub struct Bulkhead {
    limit: usize,
    sender: mpsc::UnboundedSender<Task>,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    active: AtomicU64,
}

impl Bulkhead {
    /// Creates a bulkhead allowing `limit` concurrent tasks.
    ///
    /// Returns `None` when `limit` is zero, which disables bulkheading.
    /// The admission worker is spawned on `runtime`.
    pub fn new(limit: usize, runtime: &Handle) -> Option<Self> {
        if limit == 0 {
            return None;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(limit));
        let counters = Arc::new(Counters::default());

        runtime.spawn(admit(receiver, Arc::clone(&permits), Arc::clone(&counters)));

        Some(Self {
            limit,
            sender,
            permits,
            counters,
        })
    }

    /// Queues `task` for execution once a permit is free.
    ///
    /// Nothing is returned; the task reports its own outcome.
    pub fn enqueue<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(task.boxed()).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("Bulkhead admission worker has stopped; task dropped");
        }
    }

    /// Returns the concurrency limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the number of tasks currently executing.
    pub fn active_count(&self) -> u64 {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks waiting for a permit.
    pub fn queued_count(&self) -> u64 {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Returns the number of free permits.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Returns true if every permit is in use.
    pub fn is_full(&self) -> bool {
        self.available_permits() == 0
    }
}

/// Admission worker: takes tasks in arrival order and runs each once a
/// permit is acquired.
async fn admit(
    mut receiver: mpsc::UnboundedReceiver<Task>,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
) {
    while let Some(task) = receiver.recv().await {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.active.fetch_add(1, Ordering::SeqCst);

        let slot = Slot {
            _permit: permit,
            counters: Arc::clone(&counters),
        };
        tokio::spawn(async move {
            let _slot = slot;
            task.await;
        });
    }
    tracing::trace!("Bulkhead admission worker exiting");
}

/// Holds a permit for one running task; releases it on drop, including
/// when the task panics.
struct Slot {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_zero_limit_disables() {
        assert!(Bulkhead::new(0, &Handle::current()).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_limit_is_respected() {
        let bulkhead = Bulkhead::new(2, &Handle::current()).unwrap();
        let running = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));
        let done = Arc::new(AtomicU64::new(0));

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            bulkhead.enqueue(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bulkhead.active_count(), 2);
        assert!(bulkhead.is_full());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(bulkhead.active_count(), 0);
        assert_eq!(bulkhead.queued_count(), 0);
        assert_eq!(bulkhead.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_fifo_admission() {
        let bulkhead = Bulkhead::new(1, &Handle::current()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            bulkhead.enqueue(async move {
                order.lock().unwrap().push(i);
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_permit_released_on_panic() {
        let bulkhead = Bulkhead::new(1, &Handle::current()).unwrap();
        let ran = Arc::new(Notify::new());

        bulkhead.enqueue(async {
            panic!("task failure");
        });
        let signal = Arc::clone(&ran);
        bulkhead.enqueue(async move {
            signal.notify_one();
        });

        tokio::time::timeout(Duration::from_secs(1), ran.notified())
            .await
            .expect("second task should run after the first panicked");
    }
}
