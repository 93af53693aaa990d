//! Server configuration.

use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::redact::FieldRedactions;

/// How long the event loop may sit idle before pinging the listener.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(9);

/// Column type the oversize fallback query casts the row id to.
///
/// Tables with non-integer primary keys need
/// [`ServerConfig::with_fallback_id_type`].
pub const FALLBACK_ID_COLUMN_TYPE: &str = "integer";

/// Configuration for a pqstream server.
///
/// `table_regexp` restricts which tables have the notify trigger installed
/// and removed; it does not filter outbound events. Each subscriber carries
/// its own filter.
#[derive(Debug, Clone)]
pub struct ServerConfig {
   /// Tables to manage; `None` matches every base table in schema `public`.
   pub table_regexp: Option<Regex>,

   /// Fields to strip from payloads before any further processing.
   pub redactions: FieldRedactions,

   /// Idle interval between listener liveness pings.
   pub ping_interval: Duration,

   /// Cast applied to the id parameter of the oversize fallback query.
   pub fallback_id_type: String,

   /// Server-scope cancellation; a fresh token is created when absent.
   pub cancellation: Option<CancellationToken>,
}

impl Default for ServerConfig {
   fn default() -> Self {
      Self {
         table_regexp: None,
         redactions: FieldRedactions::default(),
         ping_interval: DEFAULT_PING_INTERVAL,
         fallback_id_type: FALLBACK_ID_COLUMN_TYPE.to_string(),
         cancellation: None,
      }
   }
}

impl ServerConfig {
   pub fn new() -> Self {
      Self::default()
   }

   /// Restricts which tables get triggers installed and removed.
   pub fn with_table_regexp(mut self, regexp: Regex) -> Self {
      self.table_regexp = Some(regexp);
      self
   }

   /// Sets the fields redacted from the event feed.
   pub fn with_redactions(mut self, redactions: FieldRedactions) -> Self {
      self.redactions = redactions;
      self
   }

   /// Sets the idle interval between listener liveness pings.
   pub fn with_ping_interval(mut self, interval: Duration) -> Self {
      self.ping_interval = interval;
      self
   }

   /// Sets the column type used to look up rows whose notification exceeded
   /// the NOTIFY payload limit.
   pub fn with_fallback_id_type(mut self, id_type: impl Into<String>) -> Self {
      self.fallback_id_type = id_type.into();
      self
   }

   /// Binds the server lifetime to an existing cancellation scope.
   pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
      self.cancellation = Some(cancellation);
      self
   }
}
