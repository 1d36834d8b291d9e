pub mod connection;
pub mod presence;
pub mod registry;

pub use registry::{ConnectionRegistry, SocketHandle, SocketId, SocketSendFailure};
