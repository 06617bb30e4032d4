//! JSON frames spoken on the control socket

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.0";
/// Used when a `tempban` request carries no duration
pub const DEFAULT_TEMPBAN_SECONDS: i64 = 3600;

/// Inbound moderation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub action: Option<String>,
    pub player_name: Option<String>,
    pub reason: Option<String>,
    /// Seconds
    pub duration: Option<i64>,
}

/// Outbound frame, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Greeting sent when a client connects
    Connected {
        message: String,
        version: String,
        /// Epoch millis
        timestamp: i64,
    },
    Success {
        action: String,
        message: String,
    },
    Error {
        message: String,
    },
    /// Fan-out to every client after an accepted action
    Action {
        action: String,
        #[serde(rename = "playerName")]
        player_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<i64>,
    },
}

impl ControlFrame {
    #[must_use]
    pub fn connected(timestamp: i64) -> Self {
        Self::Connected {
            message: "Connected to game server".to_string(),
            version: PROTOCOL_VERSION.to_string(),
            timestamp,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn success(action: &str, message: impl Into<String>) -> Self {
        Self::Success {
            action: action.to_string(),
            message: message.into(),
        }
    }

    /// Serialize for the wire
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which only a broken `Serialize` impl
    /// could produce.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_field_names() {
        let request: ControlRequest = serde_json::from_str(
            r#"{"action":"tempban","playerName":"Bob","reason":"xray","duration":60}"#,
        )
        .unwrap();
        assert_eq!(request.action.as_deref(), Some("tempban"));
        assert_eq!(request.player_name.as_deref(), Some("Bob"));
        assert_eq!(request.duration, Some(60));

        let bare: ControlRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(bare, ControlRequest::default());
    }

    #[test]
    fn test_frame_shapes() {
        let action = ControlFrame::Action {
            action: "ban".to_string(),
            player_name: "Bob".to_string(),
            reason: Some("xray".to_string()),
            duration: None,
        };
        let value: serde_json::Value = serde_json::from_str(&action.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "action", "action": "ban", "playerName": "Bob", "reason": "xray"})
        );

        let greeting: serde_json::Value =
            serde_json::from_str(&ControlFrame::connected(42).to_json().unwrap()).unwrap();
        assert_eq!(greeting["type"], "connected");
        assert_eq!(greeting["version"], "1.0");
        assert_eq!(greeting["timestamp"], 42);

        let error: serde_json::Value =
            serde_json::from_str(&ControlFrame::error("nope").to_json().unwrap()).unwrap();
        assert_eq!(error, json!({"type": "error", "message": "nope"}));
    }
}
