//! JSON-RPC server exposing 3-way match outcome predictions over stdio.

pub mod config;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use config::resolve_config_path;
pub use protocol::ProtocolHandler;
pub use session::PredictionSession;
pub use transport::StdioTransport;
