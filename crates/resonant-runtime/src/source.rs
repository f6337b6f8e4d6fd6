#![forbid(unsafe_code)]

//! Deferred sources: variables whose initial value arrives later.
//!
//! A source is any future resolving to JSON. Pending sources are polled once
//! per tick with a no-op waker; the store has no executor of its own, so a
//! source makes progress only when the host ticks.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::error::SourceError;

pub(crate) type SourceFuture =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, SourceError>>>>;

pub(crate) struct PendingSource {
    pub(crate) name: String,
    pub(crate) persist: bool,
    future: SourceFuture,
}

impl PendingSource {
    pub(crate) fn new<F, E>(name: &str, persist: bool, future: F) -> Self
    where
        F: Future<Output = Result<serde_json::Value, E>> + 'static,
        E: Into<SourceError>,
    {
        Self {
            name: name.to_owned(),
            persist,
            future: Box::pin(async move { future.await.map_err(Into::into) }),
        }
    }

    pub(crate) fn poll(&mut self) -> Poll<Result<serde_json::Value, SourceError>> {
        let mut cx = Context::from_waker(Waker::noop());
        self.future.as_mut().poll(&mut cx)
    }
}

/// Poll every source once; return the resolved ones and keep the rest.
pub(crate) fn poll_all(
    pending: &mut Vec<PendingSource>,
) -> Vec<(PendingSource, Result<serde_json::Value, SourceError>)> {
    let mut resolved = Vec::new();
    let mut still = Vec::with_capacity(pending.len());
    for mut source in pending.drain(..) {
        match source.poll() {
            Poll::Ready(result) => resolved.push((source, result)),
            Poll::Pending => still.push(source),
        }
    }
    *pending = still;
    resolved
}
