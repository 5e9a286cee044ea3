//! Loopback IPC between the control plane and each child process.
//!
//! The wire format is newline-delimited UTF-8 JSON objects, each shaped as
//! `{type, data}`. There is no length prefix and no authentication; trust
//! relies on the loopback-only binding of the child's control socket.

pub mod channel;
pub mod message;

pub use channel::IpcChannel;
pub use message::{InboundKind, IpcMessage};
