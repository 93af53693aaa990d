//! Server assembly: connection, trigger management, and the subscriber
//! entry points.

use regex::Regex;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Result;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::ingest::{EventLoop, SubscribeHandle};
use crate::source::PgNotificationSource;
use crate::stream::EventStream;
use crate::subscription::EventSink;
use crate::triggers;

/// Handle to a running pqstream server.
///
/// [`Server::connect`] follows the client/driver split: it returns this
/// cloneable handle together with the [`EventLoop`] that does the work. The
/// caller spawns the loop and uses the handle for trigger management and
/// subscriptions.
///
/// ```no_run
/// use pqstream::{Server, ServerConfig};
/// use tokio_stream::StreamExt;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() -> pqstream::Result<()> {
/// let (server, event_loop) =
///    Server::connect("postgres://localhost/app", ServerConfig::default()).await?;
/// let driver = tokio::spawn(event_loop.run());
///
/// server.install_triggers().await?;
/// let mut events = server.subscribe("^notes$", CancellationToken::new()).await?;
/// while let Some(event) = events.next().await {
///    println!("{} {} id={}", event.op, event.table, event.id);
/// }
/// # drop(driver);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Server {
   pool: PgPool,
   table_filter: Option<Regex>,
   subscriptions: SubscribeHandle,
   cancel: CancellationToken,
}

impl Server {
   /// Connects to the database, verifies liveness, and opens the LISTEN
   /// connection.
   ///
   /// The returned [`EventLoop`] must be spawned for events to flow.
   pub async fn connect(
      url: &str,
      config: ServerConfig,
   ) -> Result<(Self, EventLoop<PgNotificationSource, PgPool>)> {
      let pool = PgPool::connect(url).await.map_err(Error::Connect)?;
      sqlx::query("SELECT 1")
         .execute(&pool)
         .await
         .map_err(Error::Connect)?;

      let source = PgNotificationSource::connect(&pool).await?;
      let cancel = config.cancellation.clone().unwrap_or_default();
      let (event_loop, subscriptions) =
         EventLoop::new(source, pool.clone(), &config, cancel.clone());

      let server = Self {
         pool,
         table_filter: config.table_regexp,
         subscriptions,
         cancel,
      };
      Ok((server, event_loop))
   }

   /// Base tables in schema `public` matching the configured table filter.
   pub async fn table_names(&self) -> Result<Vec<String>> {
      triggers::table_names(&self.pool, self.table_filter.as_ref()).await
   }

   /// Creates the notify procedure and installs the trigger on every managed
   /// table. On a partial failure, [`remove_triggers`](Self::remove_triggers)
   /// cleans up what was installed.
   pub async fn install_triggers(&self) -> Result<()> {
      triggers::install_triggers(&self.pool, self.table_filter.as_ref()).await
   }

   /// Drops the notify trigger from every managed table. Idempotent.
   pub async fn remove_triggers(&self) -> Result<()> {
      triggers::remove_triggers(&self.pool, self.table_filter.as_ref()).await
   }

   /// Subscribes to events whose table matches `table_regexp`; the empty
   /// string matches every table.
   pub async fn subscribe(
      &self,
      table_regexp: &str,
      cancel: CancellationToken,
   ) -> Result<EventStream> {
      self.subscriptions.subscribe(table_regexp, cancel).await
   }

   /// Subscribes and pumps matching events into `sink` until `cancel` fires,
   /// the server shuts down, or the sink fails.
   pub async fn stream_to<S>(
      &self,
      table_regexp: &str,
      sink: &mut S,
      cancel: CancellationToken,
   ) -> Result<()>
   where
      S: EventSink,
   {
      self.subscriptions.stream_to(table_regexp, sink, cancel).await
   }

   /// Token bound to the server lifetime; cancelling it stops the event
   /// loop cleanly.
   pub fn cancellation_token(&self) -> CancellationToken {
      self.cancel.clone()
   }

   pub fn pool(&self) -> &PgPool {
      &self.pool
   }

   /// Stops the server: cancels the server scope, which makes the returning
   /// event loop drop the LISTEN connection, then closes the pool.
   pub async fn close(&self) {
      debug!("closing server");
      self.cancel.cancel();
      self.pool.close().await;
   }
}
