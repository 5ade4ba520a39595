pub mod audit_ws;
pub mod error;
pub mod router;
pub mod server;
pub mod types;
pub mod websocket;

pub use server::ApiServer;
