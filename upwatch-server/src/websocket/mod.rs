pub mod broadcaster;
pub mod connection;
pub mod handshake;
pub mod messages;
pub mod reader;
pub mod registry;

pub use broadcaster::broadcast;
pub use connection::Connection;
pub use messages::WSMessage;
pub use registry::ConnectionRegistry;
