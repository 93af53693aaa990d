//! Subscriber capabilities: how the event loop hands events to subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::Event;

/// Outcome of offering an event to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
   /// The subscription stays in the active set.
   Keep,
   /// The subscription is removed and never contacted again.
   Drop,
}

/// A registered subscriber, as seen by the event loop.
///
/// The loop offers every event to every active subscription; the first
/// [`Offer::Drop`] removes it from the set in the same delivery pass.
#[async_trait]
pub trait Subscription: Send {
   async fn offer(&mut self, event: &Arc<Event>) -> Offer;
}

/// The standard subscription: a table filter in front of a rendezvous queue.
///
/// The queue has capacity one, so a subscriber that stops consuming blocks
/// the event loop (and with it every other subscriber) until the subscriber's
/// cancellation fires. A stuck subscriber is detected by its own
/// cancellation, never by silently dropping its events.
pub(crate) struct ChannelSubscription {
   filter: Regex,
   sender: mpsc::Sender<Arc<Event>>,
   cancel: CancellationToken,
}

impl ChannelSubscription {
   pub(crate) fn new(
      filter: Regex,
      sender: mpsc::Sender<Arc<Event>>,
      cancel: CancellationToken,
   ) -> Self {
      Self {
         filter,
         sender,
         cancel,
      }
   }
}

#[async_trait]
impl Subscription for ChannelSubscription {
   async fn offer(&mut self, event: &Arc<Event>) -> Offer {
      if !self.filter.is_match(&event.table) {
         return Offer::Keep;
      }
      tokio::select! {
         _ = self.cancel.cancelled() => Offer::Drop,
         sent = self.sender.send(Arc::clone(event)) => match sent {
            Ok(()) => Offer::Keep,
            Err(_) => Offer::Drop,
         },
      }
   }
}

/// Boxed error produced by a subscriber's sink.
pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Where a pumped subscriber's events end up, typically a streaming RPC
/// response. A send failure terminates that subscriber only.
#[async_trait]
pub trait EventSink: Send {
   async fn send(&mut self, event: Arc<Event>) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::event::Operation;

   fn event(table: &str) -> Arc<Event> {
      Arc::new(Event {
         schema: "public".into(),
         table: table.into(),
         op: Operation::Insert,
         id: "1".into(),
         payload: None,
         changes: None,
      })
   }

   fn subscription(
      filter: &str,
      capacity: usize,
      cancel: CancellationToken,
   ) -> (ChannelSubscription, mpsc::Receiver<Arc<Event>>) {
      let (sender, receiver) = mpsc::channel(capacity);
      (
         ChannelSubscription::new(Regex::new(filter).unwrap(), sender, cancel),
         receiver,
      )
   }

   #[tokio::test]
   async fn filter_miss_keeps_without_delivering() {
      let (mut sub, mut receiver) = subscription("^users$", 1, CancellationToken::new());

      assert_eq!(sub.offer(&event("notes")).await, Offer::Keep);
      assert!(receiver.try_recv().is_err());
   }

   #[tokio::test]
   async fn matching_event_is_handed_off() {
      let (mut sub, mut receiver) = subscription("^notes$", 1, CancellationToken::new());

      assert_eq!(sub.offer(&event("notes")).await, Offer::Keep);
      assert_eq!(receiver.recv().await.unwrap().table, "notes");
   }

   #[tokio::test]
   async fn cancelled_subscriber_drops_on_full_queue() {
      let cancel = CancellationToken::new();
      let (mut sub, _receiver) = subscription(".*", 1, cancel.clone());

      // First offer fills the queue; with the token cancelled the second
      // cannot block forever.
      assert_eq!(sub.offer(&event("notes")).await, Offer::Keep);
      cancel.cancel();
      assert_eq!(sub.offer(&event("notes")).await, Offer::Drop);
   }

   #[tokio::test]
   async fn gone_receiver_drops() {
      let (mut sub, receiver) = subscription(".*", 1, CancellationToken::new());
      drop(receiver);

      assert_eq!(sub.offer(&event("notes")).await, Offer::Drop);
   }
}
