//! The shapes of work a circuit breaker can wrap.

use crate::circuit_breaker::invocation::Invocation;
use crate::core::{BreakerError, CommandError};

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type DirectFn<A> = dyn Fn(A) -> Result<(), CommandError> + Send + Sync;
type AsyncFn<A> = dyn Fn(A) -> BoxFuture<'static, Result<(), CommandError>> + Send + Sync;
type ContextFn<A, F> = dyn Fn(Invocation<A, F>) + Send + Sync;

/// The command wrapped by a circuit breaker.
///
/// The variant is chosen once, at construction; dispatch branches on it.
///
/// - [`Command::Direct`]: a blocking function. Returning `Ok` is a success,
///   `Err` a failure. Runs on the blocking thread pool.
/// - [`Command::Async`]: an async function, resolved the same way.
/// - [`Command::Context`]: receives an [`Invocation`] and reports its own
///   outcome through it, possibly much later and from another task.
pub enum Command<A, F> {
    /// Blocking function of the input.
    Direct(Arc<DirectFn<A>>),
    /// Async function of the input.
    Async(Arc<AsyncFn<A>>),
    /// Function handed an invocation to notify.
    Context(Arc<ContextFn<A, F>>),
}

impl<A, F> Command<A, F> {
    /// Wraps a blocking, fallible function.
    pub fn direct<C>(command: C) -> Self
    where
        C: Fn(A) -> Result<(), CommandError> + Send + Sync + 'static,
    {
        Self::Direct(Arc::new(command))
    }

    /// Wraps a blocking function that cannot report failure.
    ///
    /// Only timeouts and panics count against it.
    pub fn infallible<C>(command: C) -> Self
    where
        C: Fn(A) + Send + Sync + 'static,
    {
        Self::Direct(Arc::new(move |args| {
            command(args);
            Ok(())
        }))
    }

    /// Wraps an async, fallible function.
    pub fn future<C, Fut>(command: C) -> Self
    where
        C: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        Self::Async(Arc::new(move |args| command(args).boxed()))
    }

    /// Wraps a function that reports through an [`Invocation`].
    pub fn context<C>(command: C) -> Self
    where
        C: Fn(Invocation<A, F>) + Send + Sync + 'static,
    {
        Self::Context(Arc::new(command))
    }

    /// Returns the name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::Async(_) => "async",
            Self::Context(_) => "context",
        }
    }
}

impl<A, F> Clone for Command<A, F> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(f) => Self::Direct(Arc::clone(f)),
            Self::Async(f) => Self::Async(Arc::clone(f)),
            Self::Context(f) => Self::Context(Arc::clone(f)),
        }
    }
}

impl<A, F> fmt::Debug for Command<A, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Command").field(&self.kind()).finish()
    }
}

/// Invoked exactly once for every run that does not succeed.
///
/// Receives the outcome kind and the fallback arguments passed to
/// [`CircuitBreaker::run`](crate::CircuitBreaker::run). It should be fast
/// and must not panic.
pub type Fallback<F> = Arc<dyn Fn(BreakerError, F) + Send + Sync>;

/// Converts a panic payload into a readable message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_kinds() {
        let direct: Command<u32, ()> = Command::direct(|_| Ok(()));
        let infallible: Command<u32, ()> = Command::infallible(|_| {});
        let future: Command<u32, ()> = Command::future(|_| async { Ok(()) });
        let context: Command<u32, ()> = Command::context(|invocation| invocation.notify_success());

        assert_eq!(direct.kind(), "direct");
        assert_eq!(infallible.kind(), "direct");
        assert_eq!(future.kind(), "async");
        assert_eq!(context.kind(), "context");
        assert_eq!(format!("{:?}", context.clone()), "Command(\"context\")");
    }

    #[test]
    fn test_direct_error_passthrough() {
        let command: Command<u32, ()> = Command::direct(|n| {
            if n > 10 {
                Err("too large".into())
            } else {
                Ok(())
            }
        });
        let Command::Direct(f) = command else {
            panic!("expected direct command");
        };
        assert!(f(3).is_ok());
        assert_eq!(f(11).unwrap_err().to_string(), "too large");
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("kaboom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "kaboom");

        let payload = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 1");
    }
}
