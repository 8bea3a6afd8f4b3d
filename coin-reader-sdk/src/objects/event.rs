//! Messages pushed by a coin reader to its remote listener.
//!
//! Every message is a single WebSocket text frame holding one JSON
//! object. The `"event"` field names the message kind:
//!
//! ```json
//! {"event":"coin_inserted","delta":1,"timestamp":1718000000}
//! ```
//!
//! One frame is sent per detected pulse; frames are never batched.

use serde::{Deserialize, Serialize};

/// Reader-to-listener message.
///
/// Serialized as an internally-tagged JSON object so listeners can
/// dispatch on the `"event"` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReporterMessage {
    /// A coin passed the acceptor.
    CoinInserted {
        /// Number of coins this message accounts for. Always `1`.
        delta: u32,
        /// Unix timestamp (seconds) at which the pulse was detected.
        timestamp: i64,
    },
}

impl ReporterMessage {
    /// Build a `coin_inserted` message for a single coin.
    pub fn coin_inserted(timestamp: i64) -> Self {
        ReporterMessage::CoinInserted {
            delta: 1,
            timestamp,
        }
    }

    /// Encode as the JSON text carried by one frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_inserted_wire_shape() {
        let json = ReporterMessage::coin_inserted(1_718_000_000).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["event"], "coin_inserted");
        assert_eq!(value["delta"], 1);
        assert_eq!(value["timestamp"], 1_718_000_000i64);
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let json = r#"{"event":"coin_removed","delta":1,"timestamp":0}"#;
        assert!(serde_json::from_str::<ReporterMessage>(json).is_err());
    }
}
