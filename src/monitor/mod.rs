//! Observability for circuit breakers.
//!
//! - [`events`] emits structured `tracing` events under the
//!   `circuitbridge::events` target for state transitions and failed runs.
//! - [`hystrix`] produces Hystrix dashboard compatible snapshots and the
//!   provider/monitor traits used to collect them.

pub mod events;
pub mod hystrix;

pub use events::{
    emit_fast_fail, emit_failure, emit_state_transition, emit_timeout, BreakerEvent, OutcomeEvent,
    TransitionEvent,
};
pub use hystrix::{HystrixCollector, HystrixMonitor, HystrixProvider, HystrixSnapshot};
