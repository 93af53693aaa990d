//! The event ingestion loop.
//!
//! One loop per server. It is the single owner of the subscriber set: new
//! subscriptions arrive over a rendezvous channel, removals happen in the
//! delivery pass, and no lock guards any of it. Everything a notification
//! goes through on its way to subscribers (decode, redaction, merge-patch
//! synthesis, oversize fallback) runs inside this loop, strictly in arrival
//! order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::Result;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::event::{Event, Operation, RawEvent};
use crate::patch::merge_patch;
use crate::redact::FieldRedactions;
use crate::source::{Notification, NotificationSource};
use crate::stream::EventStream;
use crate::subscription::{ChannelSubscription, EventSink, Offer, Subscription};
use crate::triggers::fetch_row_sql;

/// Row lookup used to recover payloads that exceeded the NOTIFY limit.
#[async_trait]
pub trait RowLookup: Send + Sync {
   /// Fetches the current row of `table` with the given id, serialized as
   /// JSON text, or `None` when the row no longer exists.
   async fn fetch_row_json(
      &self,
      table: &str,
      id: &str,
      id_type: &str,
   ) -> std::result::Result<Option<String>, sqlx::Error>;
}

#[async_trait]
impl RowLookup for PgPool {
   async fn fetch_row_json(
      &self,
      table: &str,
      id: &str,
      id_type: &str,
   ) -> std::result::Result<Option<String>, sqlx::Error> {
      let sql = fetch_row_sql(table, id_type);
      sqlx::query_scalar::<_, String>(&sql)
         .bind(id)
         .fetch_optional(self)
         .await
   }
}

/// Registration side of the event loop's rendezvous channel.
///
/// Cloneable; every handle feeds the same loop. Registration blocks until the
/// loop accepts the subscription, so a handle returning `Ok` means the
/// subscriber is live.
#[derive(Clone)]
pub struct SubscribeHandle {
   sender: mpsc::Sender<Box<dyn Subscription>>,
}

impl SubscribeHandle {
   /// Registers a subscription with the event loop.
   pub async fn register(&self, subscription: Box<dyn Subscription>) -> Result<()> {
      self
         .sender
         .send(subscription)
         .await
         .map_err(|_| Error::Terminated)
   }

   /// Subscribes to events whose table matches `table_regexp`.
   ///
   /// The empty string matches every table. The subscription is removed when
   /// `cancel` fires or the returned stream is dropped.
   pub async fn subscribe(
      &self,
      table_regexp: &str,
      cancel: CancellationToken,
   ) -> Result<EventStream> {
      let filter = Regex::new(table_regexp)?;
      let (sender, receiver) = mpsc::channel(1);
      self
         .register(Box::new(ChannelSubscription::new(filter, sender, cancel)))
         .await?;
      Ok(EventStream::new(receiver))
   }

   /// Subscribes and pumps every matching event into `sink` until the
   /// subscriber is cancelled, the server shuts down, or the sink fails.
   ///
   /// A sink failure surfaces as [`Error::SinkWrite`] and terminates only
   /// this subscriber.
   pub async fn stream_to<S>(
      &self,
      table_regexp: &str,
      sink: &mut S,
      cancel: CancellationToken,
   ) -> Result<()>
   where
      S: EventSink,
   {
      let mut events = self.subscribe(table_regexp, cancel.clone()).await?;
      loop {
         tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = events.next() => match event {
               Some(event) => sink.send(event).await.map_err(Error::SinkWrite)?,
               None => return Ok(()),
            }
         }
      }
   }
}

/// The ingestion loop, generic over its two database seams so it can be
/// driven end-to-end in tests.
///
/// Constructed alongside a [`SubscribeHandle`]; the caller spawns
/// [`run`](Self::run) and registers subscribers through the handle.
pub struct EventLoop<S, D> {
   source: S,
   db: D,
   redactions: FieldRedactions,
   ping_interval: Duration,
   fallback_id_type: String,
   subscriptions: mpsc::Receiver<Box<dyn Subscription>>,
   cancel: CancellationToken,
}

impl<S, D> EventLoop<S, D>
where
   S: NotificationSource,
   D: RowLookup,
{
   pub fn new(
      source: S,
      db: D,
      config: &ServerConfig,
      cancel: CancellationToken,
   ) -> (Self, SubscribeHandle) {
      let (sender, receiver) = mpsc::channel(1);
      (
         Self {
            source,
            db,
            redactions: config.redactions.clone(),
            ping_interval: config.ping_interval,
            fallback_id_type: config.fallback_id_type.clone(),
            subscriptions: receiver,
            cancel,
         },
         SubscribeHandle { sender },
      )
   }

   /// Runs until the server scope is cancelled (`Ok`) or a transport error
   /// compromises the notification stream (fatal `Err`).
   pub async fn run(mut self) -> Result<()> {
      let mut subscribers: Vec<Box<dyn Subscription>> = Vec::new();
      let mut accepting = true;
      loop {
         // Biased polling keeps the branches deterministic: cancellation is
         // honored before anything else, and a subscription handed over
         // before a notification arrives is active for that notification.
         // The ping branch only fires when every other branch is idle.
         tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
               debug!("server scope cancelled, stopping event loop");
               return Ok(());
            }
            registered = self.subscriptions.recv(), if accepting => match registered {
               Some(subscription) => {
                  subscribers.push(subscription);
                  debug!(active = subscribers.len(), "registered subscriber");
               }
               None => accepting = false,
            },
            incoming = self.source.recv() => match incoming? {
               Some(notification) => {
                  self.handle_notification(&mut subscribers, notification).await?;
               }
               None => return Err(Error::ConnectionReset),
            },
            // A fresh sleep every iteration: any other branch firing defers
            // the next ping by a full interval.
            _ = time::sleep(self.ping_interval) => {
               trace!(interval = ?self.ping_interval, "pinging listener");
               self.source.ping().await?;
            }
         }
      }
   }

   async fn handle_notification(
      &self,
      subscribers: &mut Vec<Box<dyn Subscription>>,
      notification: Notification,
   ) -> Result<()> {
      trace!(channel = %notification.channel, "received notification");
      let mut raw: RawEvent =
         serde_json::from_str(&notification.payload).map_err(Error::Decode)?;
      self.redactions.redact(&mut raw);

      let RawEvent {
         schema,
         table,
         op,
         id,
         payload,
         previous,
      } = raw;
      let mut event = Event {
         schema,
         table,
         op,
         id,
         payload,
         changes: None,
      };

      if event.op == Operation::Update
         && let (Some(payload), Some(previous)) = (event.payload.as_ref(), previous.as_ref())
      {
         event.changes = Some(merge_patch(Some(previous), Some(payload)));
      }

      if event.payload.is_none() && !event.id.is_empty() {
         self.fallback_lookup(&mut event).await;
      }

      let event = Arc::new(event);
      let mut index = 0;
      while index < subscribers.len() {
         match subscribers[index].offer(&event).await {
            Offer::Keep => index += 1,
            Offer::Drop => {
               subscribers.swap_remove(index);
               debug!(active = subscribers.len(), "removed subscriber");
            }
         }
      }
      Ok(())
   }

   /// Recovers a payload shed by the trigger's size ladder with a direct row
   /// lookup. Best effort: on any failure the event goes out without a
   /// payload. `previous` is never reconstructed.
   async fn fallback_lookup(&self, event: &mut Event) {
      match self
         .db
         .fetch_row_json(&event.table, &event.id, &self.fallback_id_type)
         .await
      {
         Ok(Some(row)) => match serde_json::from_str::<Map<String, Value>>(&row) {
            Ok(payload) => event.payload = Some(payload),
            Err(err) => {
               error!(table = %event.table, id = %event.id, error = %err, "fallback row decode failed");
            }
         },
         Ok(None) => {
            warn!(table = %event.table, id = %event.id, "fallback lookup matched no row");
         }
         Err(err) => {
            error!(table = %event.table, id = %event.id, error = %err, "fallback lookup failed");
         }
      }
   }
}
