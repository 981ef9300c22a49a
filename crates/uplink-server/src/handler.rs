//! The protocol state machine, invoked once per physical-connection
//! lifecycle event.
//!
//! Two independent event sources drive it: the inbound request path
//! (channel establishment and side-channel data frames), which runs
//! with the session lock held for its entire body, and channel
//! lifecycle notifications (cancel/resume/message delivery), which are
//! framing-layer writes and never take the session lock.

use std::sync::Arc;

use bytes::Bytes;
use uplink_core::{frame, CriticalNotification, PushError, SessionId, UiId};

use crate::channel::Channel;
use crate::connection::PushConnection;
use crate::protocol::{JsonRpcDecoder, JsonStateSerializer, RpcDecoder, StateSerializer};
use crate::session::{SessionRegistry, Ui};

/// One inbound physical-connection event.
pub struct PushRequest {
    pub session_id: SessionId,
    pub ui_id: UiId,
    pub kind: RequestKind,
}

/// What the request carries. Channel establishment brings a fresh
/// channel; a data frame brings only a body — by construction it cannot
/// register a channel.
pub enum RequestKind {
    Establish { channel: Channel },
    Message { body: String },
}

/// Notification from the underlying transport for one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The client closed the connection.
    Cancelled,
    /// A suspended connection was committed back to the client. Only
    /// expected for the one-shot transports.
    Resuming,
    /// A message was enqueued for this specific channel. Always
    /// one-to-one, never fan-out.
    Message(String),
}

pub struct PushHandler {
    registry: Arc<SessionRegistry>,
    serializer: Arc<dyn StateSerializer>,
    decoder: Arc<dyn RpcDecoder>,
}

impl PushHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self::with_protocol(
            registry,
            Arc::new(JsonStateSerializer),
            Arc::new(JsonRpcDecoder),
        )
    }

    pub fn with_protocol(
        registry: Arc<SessionRegistry>,
        serializer: Arc<dyn StateSerializer>,
        decoder: Arc<dyn RpcDecoder>,
    ) -> Self {
        Self {
            registry,
            serializer,
            decoder,
        }
    }

    /// Inbound request path. Resolves the session, then holds the
    /// session lock for everything that follows; the guard drop
    /// releases it on every exit path. Failures never escape.
    pub async fn on_request(&self, request: PushRequest) {
        let session = match self.registry.resolve(&request.session_id) {
            Ok(session) => session,
            Err(_) => {
                tracing::debug!(
                    session_id = %request.session_id,
                    "dropping push request for unknown or expired session"
                );
                return;
            }
        };

        let mut uis = session.lock().await;
        let Some(ui) = uis.ui_mut(request.ui_id) else {
            // Signals a resolver bug upstream, not a client error.
            tracing::warn!(
                session_id = %request.session_id,
                ui_id = %request.ui_id,
                "could not find the requested UI in session"
            );
            return;
        };
        debug_assert!(
            ui.push_mode().is_enabled(),
            "push request routed to a UI with push disabled"
        );

        let result = match request.kind {
            RequestKind::Establish { channel } => {
                self.establish(&request.session_id, ui, channel)
            }
            RequestKind::Message { body } => self.apply_message(ui, &body),
        };

        if let Err(e) = result {
            tracing::info!(
                session_id = %request.session_id,
                error = %e,
                "an error occurred while writing a push response"
            );
        }
    }

    /// Register a fresh channel as the UI's push channel and leave the
    /// connection open.
    fn establish(
        &self,
        session_id: &SessionId,
        ui: &mut Ui,
        channel: Channel,
    ) -> Result<(), PushError> {
        tracing::debug!(
            connection_id = %channel.id(),
            transport = %channel.kind(),
            "new push connection"
        );

        if channel.kind().policy().pad_on_open {
            // Defeats minimum-buffer heuristics that withhold small
            // initial payloads.
            channel.write(Bytes::from_static(frame::streaming_padding().as_bytes()))?;
        }
        channel.suspend();

        let mut connection = PushConnection::new(session_id.clone(), ui.id());
        connection.connect(channel);
        ui.set_push_connection(connection);
        Ok(())
    }

    /// A data frame arrived over the side channel. Decode it against
    /// the UI, then flush resulting state via the push channel; the
    /// side-channel request itself gets no body.
    fn apply_message(&self, ui: &mut Ui, body: &str) -> Result<(), PushError> {
        if ui.connected_push().is_none() {
            // Data arrived with no valid channel. Can happen if the UI
            // holds a connection of unexpected state, e.g. after the
            // session was serialized while the channel was open.
            debug_assert!(false, "data frame received with no connected push channel");
            tracing::warn!(
                ui_id = %ui.id(),
                "data frame received with no connected push channel"
            );
            return Ok(());
        }

        match self.decoder.decode(ui, body) {
            Ok(()) => ui.push(self.serializer.as_ref(), false),
            Err(e) if e.forces_resync() => {
                match &e {
                    PushError::InvalidSecurityToken => {
                        tracing::warn!("invalid security token received in push message");
                    }
                    _ => {
                        tracing::error!(error = %e, "error decoding push message");
                    }
                }
                // Refresh on the client side.
                let notification = CriticalNotification::reload().message_body();
                ui.connected_push()
                    .ok_or(PushError::NotConnected)?
                    .send_message(&notification)
            }
            Err(other) => Err(other),
        }
    }

    /// Channel lifecycle notifications. Framing-layer only; any state
    /// change is deferred to a lock-guarded task.
    pub fn on_channel_event(&self, channel: &Channel, event: ChannelEvent) {
        match event {
            ChannelEvent::Cancelled => {
                tracing::debug!(connection_id = %channel.id(), "connection closed by client");
                channel.cancel();
                self.spawn_detach(channel);
            }
            ChannelEvent::Resuming => {
                tracing::debug!(connection_id = %channel.id(), "resuming suspended connection");
            }
            ChannelEvent::Message(message) => {
                tracing::debug!(
                    connection_id = %channel.id(),
                    len = message.len(),
                    "writing message to connection"
                );
                let framed = frame::wrap(&message);
                if let Err(e) = channel.write(Bytes::from(framed.into_bytes())) {
                    tracing::info!(error = %e, "an error occurred while writing a push message");
                    return;
                }
                let policy = channel.kind().policy();
                if policy.flush_after_write {
                    if let Err(e) = channel.flush() {
                        tracing::info!(error = %e, "an error occurred while flushing a push message");
                        return;
                    }
                }
                if policy.resume_after_write {
                    // One-shot transports: close out after a single
                    // delivery, the client re-establishes.
                    channel.resume();
                }
            }
        }
    }

    /// Detach the UI's dangling connection after a cancellation, under
    /// the session lock.
    fn spawn_detach(&self, channel: &Channel) {
        let Some((session_id, ui_id)) = channel.owner() else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let channel_id = channel.id().clone();
        tokio::spawn(async move {
            let Ok(session) = registry.resolve(&session_id) else {
                return;
            };
            let mut uis = session.lock().await;
            let Some(ui) = uis.ui_mut(ui_id) else {
                return;
            };
            let bound_here =
                ui.push_connection().and_then(|c| c.channel_id()) == Some(&channel_id);
            if bound_here {
                if let Some(mut connection) = ui.clear_push_connection() {
                    connection.disconnect();
                }
                tracing::debug!(
                    session_id = %session_id,
                    ui_id = %ui_id,
                    "detached push connection after cancellation"
                );
            }
        });
    }
}
