//! Error types for the pqstream crate.

use crate::subscription::SinkError;

/// Errors that can occur while relaying database events.
///
/// Transport errors (`ListenerPing`, `ConnectionReset`, `Decode`) are fatal to
/// the event loop: once the notification serializer is compromised no further
/// event can be delivered safely. Enrichment failures (oversize fallback) are
/// logged and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// A subscriber supplied an invalid table filter expression.
   #[error("invalid table filter: {0}")]
   BadFilter(#[from] regex::Error),

   /// The redaction configuration text could not be decoded.
   #[error("invalid redactions: {0}")]
   Redactions(#[source] serde_json::Error),

   /// Failed to connect to or verify the database.
   #[error("connect: {0}")]
   Connect(#[source] sqlx::Error),

   /// Failed to establish or read the LISTEN connection.
   #[error("listen: {0}")]
   Listen(#[source] sqlx::Error),

   /// The table catalog could not be read.
   #[error("catalog query: {0}")]
   CatalogQuery(#[source] sqlx::Error),

   /// The notify trigger procedure could not be created.
   #[error("create trigger function: {0}")]
   CreateFunction(#[source] sqlx::Error),

   /// Installing the notify trigger on a table failed.
   #[error("install trigger on table {table}: {source}")]
   InstallTrigger {
      table: String,
      #[source]
      source: sqlx::Error,
   },

   /// Removing the notify trigger from a table failed.
   #[error("remove trigger on table {table}: {source}")]
   RemoveTrigger {
      table: String,
      #[source]
      source: sqlx::Error,
   },

   /// No tables matched the configured table filter.
   #[error("no tables found")]
   NoTables,

   /// The periodic liveness ping of the listener failed.
   #[error("listener ping: {0}")]
   ListenerPing(#[source] sqlx::Error),

   /// The LISTEN connection signalled a reconnect by yielding an empty
   /// notification. Events may have been lost; the caller decides whether
   /// to restart.
   #[error("notification connection reset")]
   ConnectionReset,

   /// A notification payload was not valid event JSON.
   #[error("decode notification: {0}")]
   Decode(#[source] serde_json::Error),

   /// The event loop is no longer running.
   #[error("event loop terminated")]
   Terminated,

   /// Writing an event to a subscriber's sink failed.
   #[error("sink write: {0}")]
   SinkWrite(#[source] SinkError),
}
