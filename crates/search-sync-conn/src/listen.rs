//! Dedicated LISTEN/NOTIFY connection.
//!
//! Notifications are read off a connection that is not part of the pool and
//! stays open for the life of the process. The connection driver runs on its
//! own task and forwards each notification over an unbounded channel, so a
//! slow consumer never stalls the socket.

use futures::{stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, NoTls};
use tracing::{debug, error, info, warn};

use crate::error::ConnError;

/// A change notification as published by a table trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel name, equal to the source table name
    pub channel: String,
    /// JSON row payload
    pub payload: String,
}

/// Open subscription on a connection outside the pool.
///
/// Dropping it closes the connection.
pub struct PgListenConnection {
    // Kept alive: dropping the client terminates the connection.
    _client: Client,
    receiver: mpsc::UnboundedReceiver<Notification>,
    driver: JoinHandle<()>,
}

impl PgListenConnection {
    /// Connect and subscribe to the given channels.
    pub async fn connect(database_url: &str, channels: &[&str]) -> Result<Self, ConnError> {
        let (client, mut connection) = tokio_postgres::connect(database_url, NoTls).await?;
        let (sender, receiver) = mpsc::unbounded_channel();

        let driver = tokio::spawn(async move {
            let mut messages = stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(n)) => {
                        let notification = Notification {
                            channel: n.channel().to_string(),
                            payload: n.payload().to_string(),
                        };
                        if sender.send(notification).is_err() {
                            debug!("notification receiver dropped, stopping listener");
                            break;
                        }
                    }
                    Ok(AsyncMessage::Notice(notice)) => {
                        warn!(notice = %notice.message(), "database notice");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "listen connection failed");
                        break;
                    }
                }
            }
        });

        let statements: String = channels.iter().map(|c| format!("LISTEN {c}; ")).collect();
        client.batch_execute(&statements).await?;
        info!(channels = ?channels, "listening for changes");

        Ok(Self {
            _client: client,
            receiver,
            driver,
        })
    }

    /// Next notification, or `None` once the connection has closed.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }
}

impl Drop for PgListenConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
