//! HTTP control plane and WebSocket session layer

pub mod routes;
pub mod server;
pub mod types;
pub mod ws;

pub use server::ApiServer;
