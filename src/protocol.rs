//! Wire contract with the remote inference endpoint
//!
//! Outbound messages are frame submissions carrying a base64 JPEG payload and
//! a capture timestamp. Inbound messages are either a prediction or a server
//! error report; any other shape is unparseable and gets dropped by the
//! transport.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One sampled, resized, compressed frame, ready for submission.
///
/// Ephemeral: produced once per encoder tick and consumed immediately by the
/// transport, never retained.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// JPEG bytes
    pub image: Bytes,
    /// Capture time, epoch milliseconds
    pub captured_at_ms: u64,
}

/// Messages sent to the inference server.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Frame { image: String, timestamp: u64 },
}

impl ClientMessage {
    /// Builds a frame submission from an encoded frame.
    pub fn frame(frame: &EncodedFrame) -> Self {
        ClientMessage::Frame {
            image: BASE64.encode(&frame.image),
            timestamp: frame.captured_at_ms,
        }
    }

    pub fn to_json(&self) -> String {
        // Serialization of these shapes cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Messages received from the inference server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Prediction { prediction: Prediction },
    Error { message: String },
}

impl ServerMessage {
    /// Parses an inbound text payload. `None` means unparseable.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// A classification result returned asynchronously by the server.
///
/// Fields beyond letter and confidence are service-defined and passed through
/// opaquely.
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub letter: String,
    pub confidence: f32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Derives the WebSocket endpoint from the configured server URL: the scheme
/// upgrades from http(s) to ws(s) and the stream path is appended.
pub fn ws_url(server_url: &str) -> String {
    let base = if let Some(rest) = server_url.strip_prefix("https") {
        format!("wss{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http") {
        format!("ws{rest}")
    } else {
        server_url.to_string()
    };

    format!("{}/stream", base.trim_end_matches('/'))
}
