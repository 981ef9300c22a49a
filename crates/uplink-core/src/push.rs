use serde::{Deserialize, Serialize};

/// How a UI delivers state changes to the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushMode {
    /// No push channel; the client polls.
    #[default]
    Disabled,
    /// Every state change is pushed as soon as it is applied.
    Automatic,
    /// The application decides when to push.
    Manual,
}

impl PushMode {
    pub fn is_enabled(self) -> bool {
        !matches!(self, PushMode::Disabled)
    }
}

/// Out-of-band notification instructing the client to recover, sent
/// over the push channel when server and client state may have
/// diverged. All fields nullable; the all-null instance means "reload".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalNotification {
    pub caption: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub url: Option<String>,
}

impl CriticalNotification {
    /// The bare forced-reload instruction.
    pub fn reload() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> String {
        // Serialization of a struct with only Option<String> fields
        // cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The notification as a push-frame body (braceless object body;
    /// the frame wrapper supplies the braces).
    pub fn message_body(&self) -> String {
        let json = self.to_json();
        crate::frame::object_body(&json).to_owned()
    }
}
