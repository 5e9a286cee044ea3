//! Write side of one child's IPC control connection.
//!
//! The channel wraps the write half of a loopback TCP stream. Reading and
//! dispatch of inbound lines is owned by the supervisor's reader task; the
//! channel only exposes a non-throwing `send`. Each channel instance carries
//! a generation counter so a reader that outlived its socket cannot tear
//! down a successor channel for the same logical server.

use crate::ipc::IpcMessage;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::debug;

/// Client connection to one logical server's control socket.
pub struct IpcChannel {
    writer: Mutex<OwnedWriteHalf>,
    generation: u64,
}

impl IpcChannel {
    /// Wraps the write half of a freshly connected control socket.
    pub fn new(writer: OwnedWriteHalf, generation: u64) -> Self {
        Self {
            writer: Mutex::new(writer),
            generation,
        }
    }

    /// Generation counter identifying this channel instance.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Serializes the message, appends a newline, and writes it out.
    ///
    /// Returns `true` on success and `false` on any write failure; this
    /// never propagates an error to the caller. A failed send leaves the
    /// socket for the reader task to observe and discard.
    pub async fn send(&self, message: &IpcMessage) -> bool {
        let wire = message.to_wire();
        let mut writer = self.writer.lock().await;
        match writer.write_all(wire.as_bytes()).await {
            Ok(()) => writer.flush().await.is_ok(),
            Err(e) => {
                debug!("IPC write failed: {e}");
                false
            }
        }
    }
}
