//! Circuit breaker implementation.

use crate::bulkhead::Bulkhead;
use crate::circuit_breaker::command::{panic_message, Command, Fallback};
use crate::circuit_breaker::config::CircuitBreakerConfig;
use crate::circuit_breaker::invocation::{Call, Invocation};
use crate::core::{BreakerError, CircuitState, ConfigError, ConfigResult, MonotonicClock};
use crate::monitor::events::{self, OutcomeEvent, TransitionEvent};
use crate::monitor::hystrix::{HystrixMonitor, HystrixProvider, HystrixSnapshot};
use crate::stats::{FailureWindow, LatencyStats, StatsSnapshot};

use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

/// A circuit breaker guarding a command.
///
/// The breaker monitors failures and stops invoking the command while the
/// dependency behind it is unhealthy.
///
/// # States
///
/// - **Closed**: Normal operation. Runs are dispatched, failures are recorded.
/// - **Open**: The dependency is failing. Runs fail fast without invoking
///   the command until the reset timer fires.
/// - **Half-Open**: Probing. A limited number of runs are let through; the
///   first success closes the circuit, the first failure reopens it.
///
/// The circuit trips when `max_failures` failures fall within a
/// `rolling_window` span.
///
/// `run` never blocks on the command and never returns an error: every
/// run that does not succeed invokes the fallback exactly once.
///
/// Cloning is cheap; clones share the same circuit.
///
/// # Example
///
/// ```rust,ignore
/// use circuitbridge::{CircuitBreaker, CircuitBreakerConfig};
///
/// let breaker = CircuitBreaker::builder()
///     .with_config(CircuitBreakerConfig::new().with_name("inventory"))
///     .direct(|sku: String| lookup(&sku).map_err(Into::into))
///     .fallback(|error, sku: String| tracing::warn!(%sku, %error, "lookup skipped"))
///     .build()?;
///
/// breaker.run("A-113".to_string(), "A-113".to_string());
/// ```
pub struct CircuitBreaker<A, F> {
    shared: Arc<Shared<A, F>>,
}

/// State shared between a breaker, its in-flight runs and its timers.
///
/// Runs and timers only hold weak references to it.
pub(crate) struct Shared<A, F> {
    me: Weak<Shared<A, F>>,
    config: CircuitBreakerConfig,
    command: Command<A, F>,
    fallback: Fallback<F>,
    circuit: Mutex<Circuit>,
    failures: FailureWindow,
    stats: LatencyStats,
    bulkhead: Option<Bulkhead>,
    runtime: Handle,
    clock: MonotonicClock,
}

/// Everything that changes on a state transition. Guarded by one lock.
#[derive(Debug, Default)]
struct Circuit {
    state: CircuitState,
    probes: u32,
    reset_timer: Option<JoinHandle<()>>,
    reset_epoch: u64,
    reset_deadline: Option<Instant>,
}

impl Circuit {
    fn transition(&mut self, to: CircuitState) -> CircuitState {
        self.probes = 0;
        std::mem::replace(&mut self.state, to)
    }

    fn disarm_reset_timer(&mut self) {
        self.reset_epoch = self.reset_epoch.wrapping_add(1);
        self.reset_deadline = None;
        if let Some(timer) = self.reset_timer.take() {
            timer.abort();
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.reset_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

enum Admission {
    Dispatch,
    Reject { remaining: Option<Duration> },
}

impl<A, F> CircuitBreaker<A, F>
where
    A: Send + 'static,
    F: Send + 'static,
{
    /// Returns a builder for a new circuit breaker.
    pub fn builder() -> CircuitBreakerBuilder<A, F> {
        CircuitBreakerBuilder::new()
    }

    /// Runs the command with `args`.
    ///
    /// Returns as soon as the command has been dispatched (or rejected).
    /// The outcome is delivered asynchronously: on anything but success,
    /// `fallback` is called once with the outcome kind and `fallback_args`.
    pub fn run(&self, args: A, fallback_args: F) {
        let shared = &self.shared;
        shared.stats.track_request();

        match shared.admit() {
            Admission::Reject { remaining } => shared.fast_fail(remaining, fallback_args),
            Admission::Dispatch => {
                let started = Instant::now();
                shared.dispatch(args, fallback_args);
                shared.stats.track_total_latency(started.elapsed());
            }
        }
    }

    /// Records a success that did not come from a dispatched run.
    ///
    /// Counts as a request of its own.
    pub fn notify_success(&self) {
        self.shared.stats.track_request();
        self.shared.handle_success(None);
    }

    /// Records a failure that did not come from a dispatched run.
    ///
    /// Counts as a request of its own. The failure counts towards the trip
    /// rule unless `error` is a fast-fail, and `fallback` is called with
    /// `error` and `fallback_args`.
    pub fn notify_failure(&self, error: BreakerError, fallback_args: F) {
        self.shared.stats.track_request();
        self.shared.handle_failure(None, error, Some(fallback_args));
    }

    /// Forces the circuit open and (re)arms the reset timer.
    pub fn force_open(&self) {
        let mut circuit = self.shared.lock_circuit();
        self.shared.open(&mut circuit, "forced open");
    }

    /// Forces the circuit closed and clears the failure window.
    pub fn force_closed(&self) {
        let mut circuit = self.shared.lock_circuit();
        self.shared.close(&mut circuit, "forced closed");
    }

    /// Forces the circuit half-open and disarms any pending reset timer.
    pub fn force_half_open(&self) {
        let mut circuit = self.shared.lock_circuit();
        self.shared.half_open(&mut circuit, "forced half-open");
    }
}

impl<A, F> CircuitBreaker<A, F> {
    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.shared.lock_circuit().state
    }

    /// Returns the number of failures in the failure window.
    pub fn number_of_failures(&self) -> usize {
        self.shared.failures.count()
    }

    /// Returns true while a reset timer is pending.
    pub fn is_reset_timer_armed(&self) -> bool {
        self.shared
            .lock_circuit()
            .reset_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Returns the breaker name.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Returns the Hystrix group, if any.
    pub fn group(&self) -> Option<&str> {
        self.shared.config.group.as_deref()
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.shared.config
    }

    /// Returns the live statistics.
    pub fn stats(&self) -> &LatencyStats {
        &self.shared.stats
    }

    /// Returns a point-in-time copy of the statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Zeroes every counter and clears latency samples.
    pub fn reset_stats(&self) {
        self.shared.stats.reset();
    }

    /// Logs the current statistics at debug level.
    pub fn log_snapshot(&self) {
        self.shared.stats.snapshot().log(&self.shared.config.name);
    }

    /// Returns a Hystrix compatible snapshot.
    pub fn hystrix_snapshot(&self) -> HystrixSnapshot {
        self.shared.hystrix_snapshot()
    }

    /// Returns the bulkhead, if one is configured.
    pub fn bulkhead(&self) -> Option<&Bulkhead> {
        self.shared.bulkhead.as_ref()
    }
}

impl<A, F> Clone for CircuitBreaker<A, F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A, F> fmt::Debug for CircuitBreaker<A, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .field("failures", &self.number_of_failures())
            .field("command", &self.shared.command)
            .field("config", &self.shared.config)
            .finish()
    }
}

impl<A, F> Shared<A, F> {
    fn lock_circuit(&self) -> MutexGuard<'_, Circuit> {
        self.circuit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn hystrix_snapshot(&self) -> HystrixSnapshot {
        let state = self.lock_circuit().state;
        HystrixSnapshot::new(&self.config, state, self.stats.snapshot())
    }

    fn emit_transition(&self, from: CircuitState, to: CircuitState, reason: &str) {
        if from == to {
            tracing::trace!(breaker = %self.config.name, state = %to, reason, "State unchanged");
            return;
        }
        events::emit_state_transition(&TransitionEvent::new(
            self.config.name.clone(),
            from,
            to,
            reason,
        ));
    }

    fn close(&self, circuit: &mut Circuit, reason: &str) {
        self.failures.clear();
        circuit.disarm_reset_timer();
        let from = circuit.transition(CircuitState::Closed);
        if from != CircuitState::Closed {
            self.stats.track_closed();
        }
        self.emit_transition(from, CircuitState::Closed, reason);
    }

    fn half_open(&self, circuit: &mut Circuit, reason: &str) {
        circuit.disarm_reset_timer();
        let from = circuit.transition(CircuitState::HalfOpen);
        self.emit_transition(from, CircuitState::HalfOpen, reason);
    }
}

impl<A, F> Shared<A, F>
where
    A: Send + 'static,
    F: Send + 'static,
{
    fn admit(&self) -> Admission {
        let mut circuit = self.lock_circuit();
        match circuit.state {
            CircuitState::Closed => Admission::Dispatch,
            CircuitState::Open => Admission::Reject {
                remaining: circuit.remaining(),
            },
            CircuitState::HalfOpen => {
                if circuit.probes < self.config.half_open_max_probes {
                    circuit.probes += 1;
                    tracing::debug!(
                        breaker = %self.config.name,
                        probe = circuit.probes,
                        "Admitting half-open probe"
                    );
                    Admission::Dispatch
                } else {
                    Admission::Reject { remaining: None }
                }
            }
        }
    }

    fn fast_fail(&self, remaining: Option<Duration>, fallback_args: F) {
        self.stats.track_rejected();
        events::emit_fast_fail(&self.config.name, remaining);
        (self.fallback)(BreakerError::FastFail { remaining }, fallback_args);
    }

    /// Queues one execution of the command. The timeout is armed when the
    /// command actually starts, after bulkhead admission.
    fn dispatch(&self, args: A, fallback_args: F) {
        let call = Arc::new(Call::new(fallback_args));
        tracing::trace!(breaker = %self.config.name, call_id = %call.id(), "Dispatching command");

        let task = execute(
            self.me.clone(),
            self.command.clone(),
            args,
            call,
            self.config.timeout,
        );
        match &self.bulkhead {
            Some(bulkhead) => bulkhead.enqueue(task),
            None => {
                self.runtime.spawn(task);
            }
        }
    }

    pub(crate) fn complete_success(&self, call: &Call<F>) {
        if !call.try_complete() {
            return;
        }
        self.stats.track_execution_latency(call.elapsed());
        self.handle_success(Some(call.id()));
    }

    pub(crate) fn complete_failure(&self, call: &Call<F>, error: BreakerError) {
        if !call.try_complete() {
            return;
        }
        self.stats.track_execution_latency(call.elapsed());
        self.handle_failure(Some(call.id()), error, call.take_fallback_args());
    }

    fn time_out(&self, call: &Call<F>) {
        if !call.try_time_out() {
            return;
        }
        self.stats.track_timeout();
        self.stats.track_execution_latency(call.elapsed());
        events::emit_timeout(&self.config.name, call.id(), self.config.timeout);
        self.handle_failure(
            Some(call.id()),
            BreakerError::timeout(self.config.timeout),
            call.take_fallback_args(),
        );
    }

    fn handle_success(&self, call_id: Option<Uuid>) {
        let mut circuit = self.lock_circuit();
        if circuit.state.is_half_open() {
            self.close(&mut circuit, "half-open probe succeeded");
        }
        self.stats.track_successful_response();
        tracing::trace!(breaker = %self.config.name, call_id = ?call_id, "Command succeeded");
    }

    fn handle_failure(&self, call_id: Option<Uuid>, error: BreakerError, fallback_args: Option<F>) {
        if !error.counts_as_failure() {
            self.handle_rejection(call_id, error, fallback_args);
            return;
        }

        let error = {
            let mut circuit = self.lock_circuit();
            self.failures.add(self.clock.now_millis());
            self.stats.track_failed_response();

            match circuit.state {
                CircuitState::HalfOpen => {
                    self.open(&mut circuit, "half-open probe failed");
                    BreakerError::half_open_probe(error)
                }
                CircuitState::Closed
                    if self.failures.exceeds(self.config.rolling_window_millis()) =>
                {
                    self.open(&mut circuit, "failure threshold reached");
                    error
                }
                _ => error,
            }
        };

        events::emit_failure(
            &OutcomeEvent::new(self.config.name.clone(), call_id, &error),
            self.failures.count(),
        );
        if let Some(args) = fallback_args {
            (self.fallback)(error, args);
        }
    }

    /// A reported rejection leaves the failure window and state untouched.
    fn handle_rejection(&self, call_id: Option<Uuid>, error: BreakerError, fallback_args: Option<F>) {
        {
            let mut circuit = self.lock_circuit();
            // A probe that reports a rejection frees its slot.
            if call_id.is_some() && circuit.state.is_half_open() {
                circuit.probes = circuit.probes.saturating_sub(1);
            }
        }
        self.stats.track_rejected();
        tracing::debug!(
            breaker = %self.config.name,
            call_id = ?call_id,
            kind = error.kind(),
            "Rejection reported, failure window unchanged"
        );
        if let Some(args) = fallback_args {
            (self.fallback)(error, args);
        }
    }

    fn open(&self, circuit: &mut Circuit, reason: &str) {
        let from = circuit.transition(CircuitState::Open);
        self.arm_reset_timer(circuit);
        self.stats.track_opened();
        self.emit_transition(from, CircuitState::Open, reason);
    }

    /// Replaces any pending reset timer with a fresh one.
    fn arm_reset_timer(&self, circuit: &mut Circuit) {
        circuit.disarm_reset_timer();
        let epoch = circuit.reset_epoch;
        let delay = self.config.reset_timeout;
        let breaker = self.me.clone();

        circuit.reset_deadline = Some(Instant::now() + delay);
        circuit.reset_timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = breaker.upgrade() {
                shared.on_reset_timer(epoch);
            }
        }));
    }

    fn on_reset_timer(&self, epoch: u64) {
        let mut circuit = self.lock_circuit();
        if circuit.reset_epoch != epoch || !circuit.state.is_open() {
            tracing::trace!(breaker = %self.config.name, epoch, "Ignoring superseded reset timer");
            return;
        }
        // Firing timer; do not abort ourselves.
        circuit.reset_timer = None;
        self.half_open(&mut circuit, "reset timeout elapsed");
    }
}

impl<A, F> Drop for Shared<A, F> {
    fn drop(&mut self) {
        let circuit = self
            .circuit
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(timer) = circuit.reset_timer.take() {
            timer.abort();
        }
    }
}

impl<A, F> HystrixProvider for Shared<A, F>
where
    A: Send + 'static,
    F: Send + 'static,
{
    fn provider_name(&self) -> String {
        self.config.name.clone()
    }

    fn hystrix_snapshot(&self) -> HystrixSnapshot {
        Shared::hystrix_snapshot(self)
    }
}

/// Runs one dispatched command to completion, racing its deadline.
async fn execute<A, F>(
    breaker: Weak<Shared<A, F>>,
    command: Command<A, F>,
    args: A,
    call: Arc<Call<F>>,
    timeout: Duration,
) where
    A: Send + 'static,
    F: Send + 'static,
{
    let timer = tokio::spawn({
        let breaker = breaker.clone();
        let call = Arc::clone(&call);
        async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = breaker.upgrade() {
                shared.time_out(&call);
            }
        }
    });
    call.set_timer(timer.abort_handle());

    let outcome = match command {
        Command::Direct(command) => match tokio::task::spawn_blocking(move || command(args)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(BreakerError::invocation(error.to_string())),
            Err(error) => Err(join_failure(error)),
        },
        Command::Async(command) => {
            match AssertUnwindSafe(async move { command(args).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(BreakerError::invocation(error.to_string())),
                Err(payload) => Err(BreakerError::Panicked {
                    message: panic_message(payload.as_ref()),
                }),
            }
        }
        Command::Context(command) => {
            let invocation = Invocation::new(args, Arc::clone(&call), breaker.clone());
            match tokio::task::spawn_blocking(move || command(invocation)).await {
                // The command reports through its invocation.
                Ok(()) => return,
                Err(error) => Err(join_failure(error)),
            }
        }
    };

    if call.is_timed_out() {
        tracing::debug!(call_id = %call.id(), "Command finished after its deadline; outcome ignored");
        return;
    }
    let Some(shared) = breaker.upgrade() else {
        return;
    };
    match outcome {
        Ok(()) => shared.complete_success(&call),
        Err(error) => shared.complete_failure(&call, error),
    }
}

fn join_failure(error: JoinError) -> BreakerError {
    if error.is_panic() {
        let payload = error.into_panic();
        BreakerError::Panicked {
            message: panic_message(payload.as_ref()),
        }
    } else {
        BreakerError::invocation("command task was cancelled")
    }
}

/// Builder for [`CircuitBreaker`].
pub struct CircuitBreakerBuilder<A, F> {
    config: CircuitBreakerConfig,
    command: Option<Command<A, F>>,
    fallback: Option<Fallback<F>>,
    monitors: Vec<Arc<dyn HystrixMonitor>>,
    runtime: Option<Handle>,
}

impl<A, F> CircuitBreakerBuilder<A, F>
where
    A: Send + 'static,
    F: Send + 'static,
{
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            command: None,
            fallback: None,
            monitors: Vec::new(),
            runtime: None,
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the command.
    pub fn command(mut self, command: Command<A, F>) -> Self {
        self.command = Some(command);
        self
    }

    /// Sets a blocking, fallible command.
    pub fn direct<C>(self, command: C) -> Self
    where
        C: Fn(A) -> Result<(), crate::core::CommandError> + Send + Sync + 'static,
    {
        self.command(Command::direct(command))
    }

    /// Sets an async, fallible command.
    pub fn future<C, Fut>(self, command: C) -> Self
    where
        C: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), crate::core::CommandError>> + Send + 'static,
    {
        self.command(Command::future(command))
    }

    /// Sets a command that reports through an [`Invocation`].
    pub fn context<C>(self, command: C) -> Self
    where
        C: Fn(Invocation<A, F>) + Send + Sync + 'static,
    {
        self.command(Command::context(command))
    }

    /// Sets the fallback.
    pub fn fallback<C>(mut self, fallback: C) -> Self
    where
        C: Fn(BreakerError, F) + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Adds a monitor that is registered with the breaker on build.
    pub fn with_monitor(mut self, monitor: Arc<dyn HystrixMonitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// Sets the runtime timers and commands are spawned on.
    ///
    /// Defaults to the runtime `build` is called from.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the circuit breaker.
    pub fn build(self) -> ConfigResult<CircuitBreaker<A, F>> {
        self.config.validate()?;
        let command = self.command.ok_or(ConfigError::MissingCommand)?;
        let fallback = self.fallback.ok_or(ConfigError::MissingFallback)?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| ConfigError::NoRuntime {
                message: e.to_string(),
            })?,
        };

        let bulkhead = Bulkhead::new(self.config.bulkhead, &runtime);
        let config = self.config;
        let shared = Arc::new_cyclic(|me| Shared {
            me: me.clone(),
            failures: FailureWindow::new(config.max_failures),
            stats: LatencyStats::with_capacity(config.latency_sample_capacity),
            config,
            command,
            fallback,
            circuit: Mutex::new(Circuit::default()),
            bulkhead,
            runtime,
            clock: MonotonicClock::new(),
        });

        let provider: Arc<dyn HystrixProvider> = shared.clone();
        for monitor in &self.monitors {
            monitor.register(Arc::downgrade(&provider));
        }

        tracing::debug!(
            breaker = %shared.config.name,
            command = shared.command.kind(),
            max_failures = shared.config.max_failures,
            rolling_window_ms = shared.config.rolling_window_millis(),
            bulkhead = shared.config.bulkhead,
            "Circuit breaker created"
        );

        Ok(CircuitBreaker { shared })
    }
}

impl<A, F> Default for CircuitBreakerBuilder<A, F>
where
    A: Send + 'static,
    F: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, F> fmt::Debug for CircuitBreakerBuilder<A, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerBuilder")
            .field("config", &self.config)
            .field("command", &self.command)
            .field("has_fallback", &self.fallback.is_some())
            .field("monitors", &self.monitors.len())
            .finish()
    }
}
