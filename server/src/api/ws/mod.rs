//! Duplex WebSocket session layer

pub mod frames;
pub mod session;

pub use session::{WsApiState, routes};
