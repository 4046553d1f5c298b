//! Push updates from the backend
//!
//! A long-lived channel carrying best-effort notifications: menu changes,
//! order status and item availability. Nothing depends on it for
//! correctness, so failures are logged and retried, never surfaced as
//! errors.
//!
//! ## Usage
//!
//! ```ignore
//! let channel = RealtimeChannel::new(settings, WebSocketConnector, monitor);
//! let _sub = channel.on(MessageType::OrderStatus, |data| println!("{}", data));
//! channel.connect("wss://api.example.com/ws");
//! ```

mod channel;
mod message;

pub use channel::{
    ChannelError, ChannelSettings, ChannelStatus, Connection, Connector, FrameSink, FrameStream,
    RealtimeChannel, WebSocketConnector,
};
pub use message::{ChannelMessage, MessageType};
