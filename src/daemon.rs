//! Daemon - wires the session, dispatchers, and HTTP API together

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::{ApiServer, ApiState};
use crate::channel::{Channel, InboundMessage, WhatsAppChannel};
use crate::inbound::InboundDispatcher;
use crate::media::MediaStore;
use crate::token::TokenProvider;
use crate::{Config, Error, Result};

/// The courier daemon
pub struct Daemon {
    config: Config,
    port: u16,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config, port: u16) -> Self {
        Self { config, port }
    }

    /// Run until a fatal error
    ///
    /// Session loss is deliberately fatal: `run` returns an error, the
    /// process exits nonzero, and the external supervisor restarts it
    /// with a clean connection. There is no internal reconnect loop.
    ///
    /// # Errors
    ///
    /// Returns error if the channel cannot connect, the API server fails,
    /// or the session event stream closes.
    pub async fn run(self) -> Result<()> {
        let (mut whatsapp, events) = WhatsAppChannel::with_receiver(self.config.session.clone());
        whatsapp.connect().await?;
        let whatsapp = Arc::new(whatsapp);
        let session: Arc<dyn Channel> = whatsapp.clone();

        let media = MediaStore::new(self.config.storage.clone());
        let dispatcher = Arc::new(InboundDispatcher::new(
            session.clone(),
            TokenProvider::new(self.config.service_account.clone()),
            media.clone(),
            self.config.webhooks.clone(),
        ));

        let state = Arc::new(ApiState {
            session,
            media,
            whatsapp: Some(whatsapp),
            verify_token: self.config.session.verify_token.clone(),
        });

        let api = ApiServer::new(state, self.port).spawn();
        let relay = tokio::spawn(relay_loop(events, dispatcher));

        tracing::info!(port = self.port, "courier gateway running");

        tokio::select! {
            result = api => match result {
                Ok(server_result) => server_result,
                Err(e) => Err(Error::Session(format!("api server task failed: {e}"))),
            },
            result = relay => {
                result.map_err(|e| Error::Session(format!("relay task failed: {e}")))?;
                Err(Error::Session("session event stream closed".to_string()))
            }
        }
    }
}

/// Drain session events, dispatching each in its own task so a slow
/// upload or webhook never blocks the next message
async fn relay_loop(
    mut events: mpsc::Receiver<InboundMessage>,
    dispatcher: Arc<InboundDispatcher>,
) {
    while let Some(message) = events.recv().await {
        tracing::info!(from = %message.from, to = %message.to, "inbound message received");

        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            match dispatcher.dispatch(message).await {
                Ok(outcome) => tracing::debug!(?outcome, "inbound dispatch finished"),
                Err(e) => tracing::error!(error = %e, "inbound dispatch failed"),
            }
        });
    }
}
