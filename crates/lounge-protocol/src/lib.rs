//! Wire envelopes for the community chat WebSocket.

pub mod commands;
pub mod events;

pub use commands::ClientCommand;
pub use events::ServerEvent;
