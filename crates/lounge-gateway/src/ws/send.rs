use axum::extract::ws::{Message, Utf8Bytes};
use lounge_protocol::ServerEvent;
use tracing::error;

/// One serialized outbound event. Cloning shares the buffer, so a broadcast
/// serializes once no matter how many mailboxes it lands in.
pub type Frame = Utf8Bytes;

/// Serialize an event into a wire frame. Serialization of our own event
/// types cannot fail in practice; if it does the event is logged and dropped.
pub fn encode(event: &ServerEvent) -> Option<Frame> {
    match event.to_json() {
        Ok(json) => Some(Frame::from(json)),
        Err(e) => {
            error!(kind = event.kind(), error = %e, "failed to serialize event");
            None
        }
    }
}

/// Wrap a frame as a WS text message.
pub fn text(frame: Frame) -> Message {
    Message::Text(frame)
}
