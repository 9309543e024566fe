//! Units of pending work, and the capability used to run them.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::warn;

/// A unit of pending work: a priority weight plus an opaque payload.
///
/// Higher weights are more urgent. The payload is never inspected by the collector or the
/// dispatcher; it is handed to the [`Executor`] unchanged once the load is released.
#[derive(Debug)]
pub struct Load<T> {
    priority: u16,
    payload: T,
}

impl<T> Load<T> {
    pub fn new(priority: u16, payload: T) -> Self {
        Self { priority, payload }
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// The single capability the dispatcher needs from its host: run a released payload.
///
/// Completion of the returned future is the only signal the dispatcher reads; it frees the
/// worker slot the execution was holding.
pub trait Executor<T>: Send + Sync + 'static {
    fn execute(&self, payload: T) -> BoxFuture<'static, ()>;
}

impl<T, F, Fut> Executor<T> for F
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn execute(&self, payload: T) -> BoxFuture<'static, ()> {
        self(payload).boxed()
    }
}

/// An executor that abandons any execution still running after `limit`.
///
/// This is how a single slow execution is kept from holding a worker slot indefinitely: the
/// deadline lives on the executor side, the dispatcher only ever sees completion.
pub struct Deadline<E> {
    inner: E,
    limit: Duration,
}

/// Wrap `executor` so that each execution is given at most `limit` to complete.
pub fn with_deadline<E>(executor: E, limit: Duration) -> Deadline<E> {
    Deadline {
        inner: executor,
        limit,
    }
}

impl<T, E> Executor<T> for Deadline<E>
where
    E: Executor<T>,
{
    fn execute(&self, payload: T) -> BoxFuture<'static, ()> {
        let limit = self.limit;
        let execution = self.inner.execute(payload);
        async move {
            if tokio::time::timeout(limit, execution).await.is_err() {
                warn!(?limit, "execution exceeded its deadline and was abandoned");
            }
        }
        .boxed()
    }
}
