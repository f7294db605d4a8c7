//! Wire framing plus the server and client halves of the host/shim protocol.

mod client;
mod framing;
mod server;

pub use client::{IpcClient, IpcClientError};
pub use framing::{Frame, FrameHeader, FrameReader};
pub use server::IpcServer;
