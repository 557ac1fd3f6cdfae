//! Per-run completion tracking and the handle given to context commands.

use crate::circuit_breaker::breaker::Shared;
use crate::core::BreakerError;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Completion guard for one dispatched run.
///
/// Exactly one of {command returned, `notify_success`, `notify_failure`,
/// timeout} wins the compare-and-set on `completed`; everything after it
/// is a no-op. Scoped to a single run and never shared across runs.
pub(crate) struct Call<F> {
    id: Uuid,
    started: Instant,
    completed: AtomicBool,
    timed_out: AtomicBool,
    fallback_args: Mutex<Option<F>>,
    timer: Mutex<Option<AbortHandle>>,
}

impl<F> Call<F> {
    pub(crate) fn new(fallback_args: F) -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            completed: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            fallback_args: Mutex::new(Some(fallback_args)),
            timer: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub(crate) fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    /// Claims the outcome. Returns `true` for the single winner.
    pub(crate) fn try_complete(&self) -> bool {
        let won = self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.disarm_timer();
        }
        won
    }

    /// Claims the outcome for the timeout. Returns `true` if the timeout won.
    pub(crate) fn try_time_out(&self) -> bool {
        let won = self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.timed_out.store(true, Ordering::Release);
        }
        won
    }

    /// Hands the fallback arguments to the winner.
    pub(crate) fn take_fallback_args(&self) -> Option<F> {
        self.fallback_args
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub(crate) fn set_timer(&self, timer: AbortHandle) {
        let mut slot = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.is_completed() {
            timer.abort();
        } else {
            *slot = Some(timer);
        }
    }

    fn disarm_timer(&self) {
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            timer.abort();
        }
    }
}

/// A single-use handle passed to a [`Command::Context`](crate::Command::Context).
///
/// The command reports its outcome by calling [`notify_success`](Self::notify_success)
/// or [`notify_failure`](Self::notify_failure), from any thread and at any
/// time. Only the first report counts, and none counts once the run has
/// timed out.
///
/// The handle holds only a weak reference to its breaker: it never keeps
/// the breaker alive, and reports made after the breaker is dropped are
/// ignored.
///
/// # Example
///
/// ```rust,ignore
/// use circuitbridge::{CircuitBreaker, Command};
///
/// let breaker = CircuitBreaker::builder()
///     .command(Command::context(|invocation: circuitbridge::Invocation<u64, ()>| {
///         let delay = *invocation.args();
///         tokio::spawn(async move {
///             tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
///             invocation.notify_success();
///         });
///     }))
///     .fallback(|error, _| eprintln!("fallback: {error}"))
///     .build()?;
/// ```
pub struct Invocation<A, F> {
    args: A,
    call: std::sync::Arc<Call<F>>,
    breaker: Weak<Shared<A, F>>,
}

impl<A, F> Invocation<A, F>
where
    A: Send + 'static,
    F: Send + 'static,
{
    pub(crate) fn new(args: A, call: std::sync::Arc<Call<F>>, breaker: Weak<Shared<A, F>>) -> Self {
        Self {
            args,
            call,
            breaker,
        }
    }

    /// The command input passed to `run`.
    pub fn args(&self) -> &A {
        &self.args
    }

    /// Identifier of this run, as it appears in logs.
    pub fn id(&self) -> Uuid {
        self.call.id()
    }

    /// Returns `true` once any outcome has been recorded for this run.
    pub fn is_completed(&self) -> bool {
        self.call.is_completed()
    }

    /// Returns `true` if the run's deadline passed before it was reported.
    pub fn is_timed_out(&self) -> bool {
        self.call.is_timed_out()
    }

    /// Reports success. No-op after a timeout or an earlier report.
    pub fn notify_success(&self) {
        if self.call.is_timed_out() {
            return;
        }
        if let Some(breaker) = self.breaker.upgrade() {
            breaker.complete_success(&self.call);
        }
    }

    /// Reports failure with an application-supplied reason.
    ///
    /// No-op after a timeout or an earlier report.
    pub fn notify_failure(&self, reason: impl fmt::Display) {
        self.notify_error(BreakerError::invocation(reason.to_string()));
    }

    /// Reports failure with a specific outcome kind.
    ///
    /// No-op after a timeout or an earlier report.
    pub fn notify_error(&self, error: BreakerError) {
        if self.call.is_timed_out() {
            return;
        }
        if let Some(breaker) = self.breaker.upgrade() {
            breaker.complete_failure(&self.call, error);
        }
    }
}

impl<A: fmt::Debug, F> fmt::Debug for Invocation<A, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("id", &self.call.id())
            .field("args", &self.args)
            .field("completed", &self.call.is_completed())
            .field("timed_out", &self.call.is_timed_out())
            .finish()
    }
}
