//! Change-data-capture relay for PostgreSQL.
//!
//! pqstream attaches to a PostgreSQL cluster, installs row-level triggers
//! that publish every INSERT, UPDATE, and DELETE as JSON on a NOTIFY channel,
//! and fans the resulting event stream out to any number of subscribers,
//! each with its own table filter.
//!
//! Along the way each notification is enriched: UPDATE events carry an
//! RFC 7396 merge patch of what changed, configured fields are redacted
//! before anything else sees them, and rows whose notification exceeded the
//! NOTIFY payload limit are recovered with a fallback lookup.
//!
//! Delivery is at-most-once and ordered per subscriber; there is no
//! persistence and no replication slot, just triggers, LISTEN/NOTIFY, and a
//! single ingestion loop that owns the subscriber set.

pub mod config;
pub mod error;
pub mod event;
pub mod ingest;
pub mod patch;
pub mod redact;
pub mod server;
pub mod source;
pub mod stream;
pub mod subscription;
pub mod triggers;

pub use config::{DEFAULT_PING_INTERVAL, FALLBACK_ID_COLUMN_TYPE, ServerConfig};
pub use error::Error;
pub use event::{Event, Operation, RawEvent};
pub use ingest::{EventLoop, RowLookup, SubscribeHandle};
pub use patch::merge_patch;
pub use redact::FieldRedactions;
pub use server::Server;
pub use source::{NOTIFY_CHANNEL, NOTIFY_CHANNEL_CTL, Notification, NotificationSource, PgNotificationSource};
pub use stream::EventStream;
pub use subscription::{EventSink, Offer, SinkError, Subscription};

pub type Result<T> = std::result::Result<T, Error>;
