use crate::ids::UiId;

/// Errors surfaced by the push layer. Nothing here is fatal to the
/// hosting process; the worst outcome is one client connection entering
/// a broken state that self-heals via a forced reload.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PushError {
    // Connection resolution — recoverable, silent abort
    #[error("session not found or expired")]
    SessionExpired,
    #[error("UI {0} not found in session")]
    UiNotFound(UiId),

    // Protocol invariant violations — no-op in production, assert in debug
    #[error("push is disabled for this UI")]
    PushDisabled,
    #[error("no connected push channel for this UI")]
    NotConnected,

    // Payload decode — reported to the client via a reload instruction
    #[error("malformed message payload: {0}")]
    InvalidPayload(String),
    #[error("security token mismatch")]
    InvalidSecurityToken,

    // Transport writes — logged, connection abandoned
    #[error("channel closed")]
    ChannelClosed,
    #[error("channel write failed: {0}")]
    Write(String),
}

impl PushError {
    /// Decode failures that must trigger a full client reload.
    pub fn forces_resync(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload(_) | Self::InvalidSecurityToken
        )
    }

    /// True for write-layer failures where the connection is abandoned
    /// rather than the client notified.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Self::ChannelClosed | Self::Write(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::SessionExpired => "session_expired",
            Self::UiNotFound(_) => "ui_not_found",
            Self::PushDisabled => "push_disabled",
            Self::NotConnected => "not_connected",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::InvalidSecurityToken => "invalid_security_token",
            Self::ChannelClosed => "channel_closed",
            Self::Write(_) => "write_failed",
        }
    }
}

impl From<serde_json::Error> for PushError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}
