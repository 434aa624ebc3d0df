//! Reusable mutation handles
//!
//! A [`MutationHandle`] binds a write function and an options builder once,
//! then issues mutations per input and reports whether any are in flight.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::{BoxFuture, FutureExt};
use query_object::{MutationCoordinator, MutationOptions, PendingMutation};
use serde::Serialize;

type WriteFn<I, R> = Arc<dyn Fn(I) -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync>;
type OptionsFn<I> = Arc<dyn Fn(&I) -> MutationOptions + Send + Sync>;

pub struct MutationHandle<I, R> {
    coordinator: MutationCoordinator,
    write: WriteFn<I, R>,
    options: OptionsFn<I>,
    in_flight: Arc<AtomicUsize>,
}

impl<I, R> Clone for MutationHandle<I, R> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            write: self.write.clone(),
            options: self.options.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<I, R> std::fmt::Debug for MutationHandle<I, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationHandle")
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl<I, R> MutationHandle<I, R>
where
    I: Send + 'static,
    R: Serialize + Send + 'static,
{
    pub(crate) fn new<W, Fut, O>(coordinator: MutationCoordinator, write: W, options: O) -> Self
    where
        W: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        O: Fn(&I) -> MutationOptions + Send + Sync + 'static,
    {
        Self {
            coordinator,
            write: Arc::new(move |input| write(input).boxed()),
            options: Arc::new(options),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Patch optimistically and issue the write for `input`
    pub fn mutate(&self, input: I) -> PendingMutation<R> {
        let options = (self.options)(&input).tracked_by(self.in_flight.clone());
        let write = self.write.clone();
        self.coordinator.mutate(move || write(input), options)
    }
}

impl<I, R> MutationHandle<I, R> {
    pub fn is_in_flight(&self) -> bool {
        self.in_flight_count() > 0
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}
