//! LiveTail: WebSocket streaming of registry changes and sensor windows.

mod gateway;
mod messages;

pub use gateway::{handle_client_message, serve_socket, snapshot, Namespace, Subscription};
pub use messages::{ClientMessage, WsMessage};
