//! Binding between one UI and its active physical channel.

use uplink_core::{ConnectionId, PushError, SessionId, UiId};

use crate::channel::Channel;

/// The logical server→client delivery path bound to one UI. Owns the
/// channel while connected; refers to its UI by id only so it never
/// keeps the UI alive.
pub struct PushConnection {
    session_id: SessionId,
    ui_id: UiId,
    channel: Option<Channel>,
    connected: bool,
}

impl PushConnection {
    pub fn new(session_id: SessionId, ui_id: UiId) -> Self {
        Self {
            session_id,
            ui_id,
            channel: None,
            connected: false,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn ui_id(&self) -> UiId {
        self.ui_id
    }

    /// Bind a freshly suspended channel. Called once per connection
    /// instance.
    pub fn connect(&mut self, channel: Channel) {
        debug_assert!(self.channel.is_none(), "connect called twice");
        debug_assert!(channel.is_suspended(), "channel bound before suspension");
        channel.bind_owner(self.session_id.clone(), self.ui_id);
        self.channel = Some(channel);
        self.connected = true;
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.channel.as_ref().is_some_and(Channel::is_open)
    }

    pub fn channel_id(&self) -> Option<&ConnectionId> {
        self.channel.as_ref().map(Channel::id)
    }

    /// Enqueue a serialized sync payload for delivery.
    pub fn push(&self, sync_payload: String) -> Result<(), PushError> {
        self.enqueue(sync_payload)
    }

    /// Enqueue a pre-built raw payload, bypassing the state-diff path.
    /// Used for out-of-band notifications such as forced reloads.
    pub fn send_message(&self, raw: &str) -> Result<(), PushError> {
        self.enqueue(raw.to_owned())
    }

    /// Unbind the channel and mark not-connected. Idempotent; a
    /// disconnected connection is discarded, not reused.
    pub fn disconnect(&mut self) {
        self.channel = None;
        self.connected = false;
    }

    fn enqueue(&self, message: String) -> Result<(), PushError> {
        let channel = self.channel.as_ref().ok_or(PushError::NotConnected)?;
        channel.enqueue(message)
    }
}
