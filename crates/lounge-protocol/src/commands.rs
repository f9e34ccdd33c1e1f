use lounge_core::{types::NewMessage, LoungeError};
use serde::Deserialize;

/// Client → Server frame, discriminated by `type`.
/// Wire: `{ "type": "message", "content": "hi", "replyTo": "…", "videoId": "…" }`
///
/// The set is closed: anything with an unrecognised `type` lands in `Unknown`
/// and is ignored by the router rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Message(NewMessage),
    Ping,
    Typing,
    #[serde(other)]
    Unknown,
}

impl ClientCommand {
    /// Decode one raw inbound frame.
    pub fn decode(raw: &[u8]) -> lounge_core::Result<Self> {
        serde_json::from_slice(raw).map_err(|e| LoungeError::Protocol(e.to_string()))
    }
}
