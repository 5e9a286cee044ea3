//! IPC message types for the child control socket.
//!
//! Messages are a permissive tagged union: `type` selects the interpretation
//! and `data` carries an arbitrary JSON object. Inbound types the control
//! plane understands form a closed, enumerated set validated at the boundary;
//! unrecognized types are logged for observability and otherwise ignored.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A single IPC wire message: `{type, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcMessage {
    /// Message type tag selecting the interpretation of `data`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form payload. Defaults to `null` when absent on the wire.
    #[serde(default)]
    pub data: Value,
}

impl IpcMessage {
    /// Creates a message with an arbitrary type and payload.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Cooperative termination request giving the child a chance to save
    /// state before exiting.
    pub fn shutdown_gracefully() -> Self {
        Self::new("shutdownGracefully", Value::Null)
    }

    /// Requests a fresh player roster from the child.
    pub fn get_players() -> Self {
        Self::new("getPlayers", Value::Null)
    }

    /// In-game announcement shown to connected players.
    pub fn announce(message: impl Into<String>) -> Self {
        Self::new("announce", json!({ "message": message.into() }))
    }

    /// Restart countdown the child is trusted to honor by exiting with
    /// code 0 once the countdown elapses.
    pub fn restart_countdown(seconds: u32, message: impl Into<String>) -> Self {
        Self::new(
            "restartCountdown",
            json!({ "seconds": seconds, "message": message.into() }),
        )
    }

    /// Asks the child to restore a game-state backup from the given path.
    /// The blob contents are opaque to the control plane.
    pub fn restore_backup(path: impl Into<String>) -> Self {
        Self::new("restoreBackup", json!({ "path": path.into() }))
    }

    /// Serializes to the wire form: compact JSON followed by a newline.
    pub fn to_wire(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"));
        line.push('\n');
        line
    }
}

/// Closed set of inbound message types the control plane acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    PlayerList,
    PartyList,
    WaveData,
    NpcList,
    Unknown,
}

impl InboundKind {
    /// Classifies a wire `type` tag.
    pub fn classify(kind: &str) -> Self {
        match kind {
            "playerList" => InboundKind::PlayerList,
            "partyList" => InboundKind::PartyList,
            "waveData" => InboundKind::WaveData,
            "npcList" => InboundKind::NpcList,
            _ => InboundKind::Unknown,
        }
    }
}
