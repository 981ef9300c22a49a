use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical delivery mechanism negotiated by the client. Each kind has
/// its own framing/flush/resume rules, captured in [`DeliveryPolicy`].
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Streaming,
    Websocket,
    Sse,
    LongPolling,
    Jsonp,
}

/// What the delivery path does around a written frame for a given
/// transport. Adding a transport means adding one row here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Write the anti-buffering padding block before suspending.
    pub pad_on_open: bool,
    /// Flush the output explicitly after each frame so intermediaries
    /// don't delay delivery.
    pub flush_after_write: bool,
    /// Close out the suspended connection after a single delivery; the
    /// client re-establishes to receive the next message.
    pub resume_after_write: bool,
}

impl TransportKind {
    pub fn policy(self) -> DeliveryPolicy {
        match self {
            TransportKind::Streaming => DeliveryPolicy {
                pad_on_open: true,
                flush_after_write: true,
                resume_after_write: false,
            },
            TransportKind::Websocket | TransportKind::Sse => DeliveryPolicy {
                pad_on_open: false,
                flush_after_write: false,
                resume_after_write: false,
            },
            TransportKind::LongPolling | TransportKind::Jsonp => DeliveryPolicy {
                pad_on_open: false,
                flush_after_write: false,
                resume_after_write: true,
            },
        }
    }

    /// True when client→server traffic rides the same channel instead
    /// of a separate side-channel request.
    pub fn is_bidirectional(self) -> bool {
        matches!(self, TransportKind::Websocket)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Streaming => "streaming",
            TransportKind::Websocket => "websocket",
            TransportKind::Sse => "sse",
            TransportKind::LongPolling => "long-polling",
            TransportKind::Jsonp => "jsonp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "streaming" => Ok(TransportKind::Streaming),
            "websocket" => Ok(TransportKind::Websocket),
            "sse" => Ok(TransportKind::Sse),
            "long-polling" => Ok(TransportKind::LongPolling),
            "jsonp" => Ok(TransportKind::Jsonp),
            other => Err(UnknownTransport(other.to_owned())),
        }
    }
}

/// A transport name we don't recognize. Only reachable while parsing
/// client input; once a `TransportKind` exists every dispatch on it is
/// exhaustive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport: {0}")]
pub struct UnknownTransport(pub String);
