//! Seams to the state-diff serializer and the RPC decoder.
//!
//! Both run under the session lock, so the traits are synchronous. The
//! JSON implementations give the seams concrete wire shapes: sync
//! payloads are the object body of `{"syncId":n,"changes":[..]}`
//! (braceless, the push frame supplies the braces), inbound bodies are
//! `{"csrfToken":"..","rpc":[..]}`.

use serde::Deserialize;
use uplink_core::{frame, PushError};

use crate::session::Ui;

/// Turns a UI's pending state delta into an opaque message payload.
pub trait StateSerializer: Send + Sync {
    fn serialize(&self, ui: &mut Ui, initial: bool) -> Result<String, PushError>;
}

/// Turns an inbound payload into state mutations on a UI.
pub trait RpcDecoder: Send + Sync {
    fn decode(&self, ui: &mut Ui, body: &str) -> Result<(), PushError>;
}

pub struct JsonStateSerializer;

impl StateSerializer for JsonStateSerializer {
    fn serialize(&self, ui: &mut Ui, initial: bool) -> Result<String, PushError> {
        let (sync_id, changes) = ui.drain_changes();
        let payload = if initial {
            serde_json::json!({
                "syncId": sync_id,
                "resynchronize": true,
                "changes": changes,
            })
        } else {
            serde_json::json!({
                "syncId": sync_id,
                "changes": changes,
            })
        };
        // The push frame wrapper supplies the outer braces.
        let json = serde_json::to_string(&payload)?;
        Ok(frame::object_body(&json).to_owned())
    }
}

#[derive(Deserialize)]
struct RpcBody {
    #[serde(rename = "csrfToken")]
    csrf_token: Option<String>,
    #[serde(default)]
    rpc: Vec<serde_json::Value>,
}

pub struct JsonRpcDecoder;

impl RpcDecoder for JsonRpcDecoder {
    fn decode(&self, ui: &mut Ui, body: &str) -> Result<(), PushError> {
        let parsed: RpcBody = serde_json::from_str(body)?;
        if parsed.csrf_token.as_deref() != Some(ui.security_token()) {
            return Err(PushError::InvalidSecurityToken);
        }
        for invocation in parsed.rpc {
            ui.apply_rpc(invocation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use uplink_core::PushMode;

    async fn with_ui<F: FnOnce(&mut Ui)>(f: F) {
        let session = Session::new(PushMode::Automatic);
        let mut uis = session.lock().await;
        let ui = uis.create_ui(PushMode::Automatic);
        f(ui);
    }

    #[tokio::test]
    async fn serializer_drains_pending_changes() {
        with_ui(|ui| {
            ui.queue_change(serde_json::json!({"caption": "Save"}));
            let payload = JsonStateSerializer.serialize(ui, false).unwrap();
            assert!(!payload.starts_with('{'), "payload must be braceless");
            let value: serde_json::Value =
                serde_json::from_str(&format!("{{{payload}}}")).unwrap();
            assert_eq!(value["syncId"], 1);
            assert_eq!(value["changes"][0]["caption"], "Save");
            assert!(value.get("resynchronize").is_none());
            assert!(!ui.has_pending_changes());
        })
        .await;
    }

    #[tokio::test]
    async fn initial_payload_requests_resynchronize() {
        with_ui(|ui| {
            let payload = JsonStateSerializer.serialize(ui, true).unwrap();
            let value: serde_json::Value =
                serde_json::from_str(&format!("{{{payload}}}")).unwrap();
            assert_eq!(value["resynchronize"], true);
        })
        .await;
    }

    #[tokio::test]
    async fn decoder_applies_rpc_with_valid_token() {
        with_ui(|ui| {
            let body = serde_json::json!({
                "csrfToken": ui.security_token(),
                "rpc": [["0", "click", []], ["1", "setValue", ["abc"]]],
            })
            .to_string();

            JsonRpcDecoder.decode(ui, &body).unwrap();
            assert_eq!(ui.rpc_journal().len(), 2);
        })
        .await;
    }

    #[tokio::test]
    async fn decoder_rejects_stale_token() {
        with_ui(|ui| {
            let body = r#"{"csrfToken":"stale","rpc":[["0","click",[]]]}"#;
            let err = JsonRpcDecoder.decode(ui, body).unwrap_err();
            assert!(matches!(err, PushError::InvalidSecurityToken));
            assert!(ui.rpc_journal().is_empty());
        })
        .await;
    }

    #[tokio::test]
    async fn decoder_rejects_missing_token() {
        with_ui(|ui| {
            let err = JsonRpcDecoder.decode(ui, r#"{"rpc":[]}"#).unwrap_err();
            assert!(matches!(err, PushError::InvalidSecurityToken));
        })
        .await;
    }

    #[tokio::test]
    async fn decoder_classifies_malformed_payload() {
        with_ui(|ui| {
            let err = JsonRpcDecoder.decode(ui, "{not json").unwrap_err();
            assert!(matches!(err, PushError::InvalidPayload(_)));
            assert!(err.forces_resync());
        })
        .await;
    }
}
