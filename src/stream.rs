//! Subscriber-facing event stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::event::Event;

/// A subscriber's view of the relay: an async stream of events matching its
/// table filter.
///
/// Events are shared, not copied: one [`Event`] allocation fans out to every
/// subscriber. The stream ends when the subscription is removed (its
/// cancellation fired or its queue was dropped) or the server shuts down.
pub struct EventStream {
   inner: ReceiverStream<Arc<Event>>,
}

impl std::fmt::Debug for EventStream {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("EventStream").finish_non_exhaustive()
   }
}

impl EventStream {
   pub(crate) fn new(receiver: mpsc::Receiver<Arc<Event>>) -> Self {
      Self {
         inner: ReceiverStream::new(receiver),
      }
   }
}

impl Stream for EventStream {
   type Item = Arc<Event>;

   fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
      Pin::new(&mut self.inner).poll_next(cx)
   }
}
