//! The LISTEN side of the relay: where notifications come from.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::debug;

use crate::Result;
use crate::error::Error;

/// Channel the notify trigger publishes on.
pub const NOTIFY_CHANNEL: &str = "pqstream_notify";

/// Reserved control channel. Subscribed alongside [`NOTIFY_CHANNEL`] for
/// forward compatibility; nothing is published on it today.
pub const NOTIFY_CHANNEL_CTL: &str = "pqstream_notify-ctl";

/// A raw notification as delivered by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
   pub channel: String,
   pub payload: String,
}

/// A push channel of database notifications.
///
/// The production implementation is [`PgNotificationSource`]; tests drive the
/// event loop with scripted sources. `recv` resolves to `Ok(None)` when the
/// underlying connection was lost and re-established; notifications may have
/// been missed, and the event loop treats that as fatal.
#[async_trait]
pub trait NotificationSource: Send {
   async fn recv(&mut self) -> Result<Option<Notification>>;

   /// Verifies the listener is still alive. Called by the event loop after
   /// an idle interval.
   async fn ping(&mut self) -> Result<()>;
}

/// Notifications from a PostgreSQL LISTEN connection.
///
/// The listener reconnects on its own; a reconnect surfaces as `Ok(None)`
/// from `recv`.
pub struct PgNotificationSource {
   listener: PgListener,
   pool: PgPool,
}

impl PgNotificationSource {
   /// Opens a LISTEN connection over `pool` subscribed to both relay
   /// channels.
   pub async fn connect(pool: &PgPool) -> Result<Self> {
      let mut listener = PgListener::connect_with(pool).await.map_err(Error::Listen)?;
      listener.listen(NOTIFY_CHANNEL).await.map_err(Error::Listen)?;
      listener
         .listen(NOTIFY_CHANNEL_CTL)
         .await
         .map_err(Error::Listen)?;
      debug!(channel = NOTIFY_CHANNEL, "listening for notifications");
      Ok(Self {
         listener,
         pool: pool.clone(),
      })
   }
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
   async fn recv(&mut self) -> Result<Option<Notification>> {
      let notification = self.listener.try_recv().await.map_err(Error::Listen)?;
      Ok(notification.map(|n| Notification {
         channel: n.channel().to_string(),
         payload: n.payload().to_string(),
      }))
   }

   // PgListener does not expose a ping of its own; a round trip through the
   // shared pool stands in as the liveness probe.
   async fn ping(&mut self) -> Result<()> {
      sqlx::query("SELECT 1")
         .execute(&self.pool)
         .await
         .map_err(Error::ListenerPing)?;
      Ok(())
   }
}
