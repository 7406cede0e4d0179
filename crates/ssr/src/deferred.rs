//! Deferred-data channel.
//!
//! Values that are not ready when the document is flushed are registered in
//! a [`DeferredMap`] and stand in the payload as `Value::Deferred(id)`. After
//! the document is sent, a driver task awaits them all and pushes each one
//! through a [`DeferredChannel`] as soon as it settles, in completion order.
//! Dropping the response body closes the channel: the driver stops, pending
//! futures are dropped and later pushes fail with [`RenderError::Cancelled`].

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use pagewright_core::Value;
use tokio::sync::mpsc;

use crate::error::{RenderError, Result};

/// How a deferred value settled: `Ok` resolves, `Err` rejects the client
/// promise with the given error value.
pub type Settlement = std::result::Result<Value, Value>;

/// Values delivered after the document, keyed by id.
#[derive(Default)]
pub struct DeferredMap {
    next: u32,
    pending: Vec<(u32, BoxFuture<'static, Settlement>)>,
}

impl DeferredMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `future` and return the placeholder to embed in its place.
    pub fn defer<F>(&mut self, future: F) -> Value
    where
        F: Future<Output = Settlement> + Send + 'static,
    {
        Value::Deferred(self.adopt(future.boxed()))
    }

    pub(crate) fn adopt(&mut self, future: BoxFuture<'static, Settlement>) -> u32 {
        let id = self.next;
        self.next += 1;
        self.pending.push((id, future));
        id
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn into_pending(self) -> Vec<(u32, BoxFuture<'static, Settlement>)> {
        self.pending
    }
}

impl std::fmt::Debug for DeferredMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<u32> = self.pending.iter().map(|(id, _)| *id).collect();
        f.debug_struct("DeferredMap")
            .field("next", &self.next)
            .field("pending", &ids)
            .finish()
    }
}

/// One settled deferred value.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Delivery {
    pub id: u32,
    pub settlement: Settlement,
}

/// Producer half of the channel.
#[derive(Debug)]
pub(crate) struct DeferredChannel {
    sender: Option<mpsc::UnboundedSender<Delivery>>,
}

/// Open a channel. The receiver belongs to the response body.
pub(crate) fn open() -> (DeferredChannel, mpsc::UnboundedReceiver<Delivery>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        DeferredChannel {
            sender: Some(sender),
        },
        receiver,
    )
}

impl DeferredChannel {
    /// Send a settled value. Fails once the channel is closed.
    pub fn push(&self, id: u32, settlement: Settlement) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(RenderError::Cancelled)?;
        sender
            .send(Delivery { id, settlement })
            .map_err(|_| RenderError::Cancelled)
    }

    /// End the stream after the last delivery.
    pub fn close(&mut self) {
        self.sender = None;
    }

    pub fn is_closed(&self) -> bool {
        self.sender.as_ref().is_none_or(|s| s.is_closed())
    }

    /// Resolves when the consumer goes away.
    async fn consumer_gone(&self) {
        if let Some(sender) = &self.sender {
            sender.closed().await;
        }
    }
}

/// Await every pending value and push it as soon as it settles.
///
/// Returns early, dropping whatever is still pending, when the consumer
/// closes the channel.
pub(crate) async fn drive(
    pending: Vec<(u32, BoxFuture<'static, Settlement>)>,
    mut channel: DeferredChannel,
) {
    let total = pending.len();
    let mut futures: FuturesUnordered<_> = pending
        .into_iter()
        .map(|(id, future)| future.map(move |settlement| (id, settlement)))
        .collect();
    let mut delivered = 0usize;

    while !channel.is_closed() {
        tokio::select! {
            _ = channel.consumer_gone() => {
                tracing::debug!(delivered, total, "Deferred channel closed by consumer");
                break;
            }
            next = futures.next() => match next {
                Some((id, settlement)) => {
                    if let Err(e) = channel.push(id, settlement) {
                        tracing::debug!(id, delivered, total, error = %e, "Deferred delivery stopped");
                        break;
                    }
                    delivered += 1;
                }
                None => break,
            }
        }
    }

    drop(futures);
    channel.close();
}
