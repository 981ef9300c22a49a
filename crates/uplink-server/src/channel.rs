//! The physical connection abstraction the push handler drives.
//!
//! A channel is created when a physical connection arrives, suspended to
//! keep it open without a terminal response, and either resumed (closed
//! out by the server, the one-shot transports) or cancelled (closed by
//! the client). Written frames go out as [`WireEvent`]s consumed by the
//! HTTP or WebSocket writer; outbound messages awaiting delivery sit in
//! a per-channel queue pumped one at a time into the handler.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uplink_core::{ConnectionId, PushError, SessionId, TransportKind, UiId};

/// What the writer side of the physical connection sees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireEvent {
    Data(Bytes),
    Flush,
    Close,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChannelState {
    Created,
    Suspended,
    Resumed,
    Cancelled,
}

/// Receiver halves handed to whoever services the physical connection.
pub struct ChannelQueues {
    /// Frames to put on the wire.
    pub wire: mpsc::Receiver<WireEvent>,
    /// Raw messages awaiting one-at-a-time delivery.
    pub deliver: mpsc::Receiver<String>,
}

#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    kind: TransportKind,
    wire_tx: mpsc::Sender<WireEvent>,
    deliver_tx: mpsc::Sender<String>,
    state: Mutex<ChannelState>,
    owner: Mutex<Option<(SessionId, UiId)>>,
    cancel: CancellationToken,
}

impl Channel {
    /// Create a channel plus the receiver halves for its servicing
    /// tasks. `queue` bounds both the wire and delivery queues.
    pub fn open(kind: TransportKind, queue: usize) -> (Self, ChannelQueues) {
        let (wire_tx, wire_rx) = mpsc::channel(queue);
        let (deliver_tx, deliver_rx) = mpsc::channel(queue);
        let channel = Self {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                kind,
                wire_tx,
                deliver_tx,
                state: Mutex::new(ChannelState::Created),
                owner: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        };
        let queues = ChannelQueues {
            wire: wire_rx,
            deliver: deliver_rx,
        };
        (channel, queues)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    /// Record which UI this channel was registered to. Read back by the
    /// cancellation path to detach the dangling connection.
    pub fn bind_owner(&self, session_id: SessionId, ui_id: UiId) {
        *self.inner.owner.lock() = Some((session_id, ui_id));
    }

    pub fn owner(&self) -> Option<(SessionId, UiId)> {
        self.inner.owner.lock().clone()
    }

    /// Keep the connection open without a terminal response.
    pub fn suspend(&self) {
        let mut state = self.inner.state.lock();
        if *state == ChannelState::Created {
            *state = ChannelState::Suspended;
        }
    }

    pub fn is_suspended(&self) -> bool {
        *self.inner.state.lock() == ChannelState::Suspended
    }

    pub fn is_resumed(&self) -> bool {
        *self.inner.state.lock() == ChannelState::Resumed
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.state.lock() == ChannelState::Cancelled
    }

    /// Suspended and not yet closed from either side.
    pub fn is_open(&self) -> bool {
        self.is_suspended()
    }

    /// Write raw bytes to the wire. Allowed before and during
    /// suspension; fails once the channel is resumed or cancelled.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), PushError> {
        {
            let state = self.inner.state.lock();
            if matches!(*state, ChannelState::Resumed | ChannelState::Cancelled) {
                return Err(PushError::ChannelClosed);
            }
        }
        self.send_wire(WireEvent::Data(data.into()))
    }

    /// Ask the writer to flush buffered output.
    pub fn flush(&self) -> Result<(), PushError> {
        self.send_wire(WireEvent::Flush)
    }

    /// Commit the suspended connection back to the client. One-way; a
    /// resumed channel is never reused.
    pub fn resume(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state != ChannelState::Suspended {
                return;
            }
            *state = ChannelState::Resumed;
        }
        // Best effort: the writer may already be gone.
        let _ = self.send_wire(WireEvent::Close);
    }

    /// The client closed the connection.
    pub fn cancel(&self) {
        {
            let mut state = self.inner.state.lock();
            if matches!(*state, ChannelState::Resumed | ChannelState::Cancelled) {
                return;
            }
            *state = ChannelState::Cancelled;
        }
        self.inner.cancel.cancel();
    }

    /// Completes when the channel is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }

    /// Completes when the wire receiver is dropped, i.e. nothing is
    /// servicing the physical connection any more.
    pub async fn wire_closed(&self) {
        self.inner.wire_tx.closed().await
    }

    /// Enqueue an outbound message for delivery over this channel.
    pub fn enqueue(&self, message: String) -> Result<(), PushError> {
        if !self.is_open() {
            return Err(PushError::ChannelClosed);
        }
        match self.inner.deliver_tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %self.inner.id,
                    msg_len = msg.len(),
                    "delivery queue full, dropping message"
                );
                Err(PushError::Write("delivery queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PushError::ChannelClosed),
        }
    }

    fn send_wire(&self, event: WireEvent) -> Result<(), PushError> {
        match self.inner.wire_tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    connection_id = %self.inner.id,
                    "wire queue full, dropping frame"
                );
                Err(PushError::Write("wire queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PushError::ChannelClosed),
        }
    }
}
