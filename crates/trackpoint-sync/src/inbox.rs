//! # Background Inbox
//!
//! Receives foreground-to-background pushes and applies them to the
//! background scope.
//!
//! ```text
//! foreground                       background
//! BackgroundMailbox::post(msg) ──► BackgroundInbox::run
//!                                     └─► Database::apply_message(msg)
//!                                         (config + auth overwritten,
//!                                          queue untouched)
//! ```

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use trackpoint_core::BackgroundMessage;
use trackpoint_store::Database;

use crate::error::{SyncError, SyncResult};

/// Applies pushed messages to the background scope.
pub struct BackgroundInbox {
    db: Database,
    message_rx: mpsc::Receiver<Envelope>,
    shutdown_rx: mpsc::Receiver<()>,
}

struct Envelope {
    message: BackgroundMessage,
    ack: Option<oneshot::Sender<SyncResult<()>>>,
}

/// Handle for posting to the inbox.
#[derive(Clone)]
pub struct BackgroundMailbox {
    message_tx: mpsc::Sender<Envelope>,
    shutdown_tx: mpsc::Sender<()>,
}

impl BackgroundMailbox {
    /// Posts a message for the background context.
    pub async fn post(&self, message: BackgroundMessage) -> SyncResult<()> {
        self.send(Envelope { message, ack: None }).await
    }

    /// Posts a message and waits until it has been applied.
    pub async fn deliver(&self, message: BackgroundMessage) -> SyncResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Envelope {
            message,
            ack: Some(ack_tx),
        })
        .await?;

        ack_rx
            .await
            .map_err(|_| SyncError::ChannelError("Background inbox dropped the message".into()))?
    }

    async fn send(&self, envelope: Envelope) -> SyncResult<()> {
        self.message_tx
            .send(envelope)
            .await
            .map_err(|_| SyncError::ChannelError("Background inbox closed".into()))
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

impl BackgroundInbox {
    /// Creates a new inbox and returns its mailbox.
    pub fn new(db: Database) -> (Self, BackgroundMailbox) {
        let (message_tx, message_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let inbox = BackgroundInbox {
            db,
            message_rx,
            shutdown_rx,
        };
        (inbox, BackgroundMailbox { message_tx, shutdown_tx })
    }

    /// Runs the inbox loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!("Background inbox starting");

        loop {
            tokio::select! {
                Some(envelope) = self.message_rx.recv() => {
                    self.apply(envelope).await;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Background inbox shutting down");
                    break;
                }
            }
        }

        // Apply whatever was posted before shutdown
        while let Ok(envelope) = self.message_rx.try_recv() {
            self.apply(envelope).await;
        }

        info!("Background inbox stopped");
    }

    async fn apply(&self, envelope: Envelope) {
        let result = self
            .db
            .apply_message(&envelope.message)
            .await
            .map_err(SyncError::from);

        match result {
            Ok(()) => debug!("Applied background message"),
            Err(ref e) => error!(error = %e, "Failed to apply background message"),
        }

        if let Some(ack) = envelope.ack {
            let _ = ack.send(result);
        }
    }
}
