//! Status broadcasting to connected operator sessions.
//!
//! A fixed-interval loop polls every logical server: when an IPC channel is
//! open it requests a fresh player roster, otherwise it attempts a throttled
//! reconnect. After each tick (and immediately on any state change, via the
//! supervisor's own broadcasts) a consolidated snapshot per logical server is
//! published over the pub/sub channel every operator WebSocket session
//! subscribes to.

use crate::ipc::IpcMessage;
use crate::logstore::LogEntry;
use crate::supervisor::{ServerStatus, Supervisor};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Interval between broadcaster ticks.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(5);

/// Consolidated per-server status pushed to operator sessions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub id: String,
    pub name: String,
    pub status: ServerStatus,
    pub uptime_ms: u64,
    pub player_count: usize,
    pub port: u16,
    /// Mode-specific extras; `null` when the mode does not report them.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub party_list: Value,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub wave_data: Value,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub npc_list: Value,
}

/// Server→client events on the operator pub/sub channel.
///
/// Externally a `{type, data}` tagged union; there are no client→server
/// events beyond the initial handshake.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum OperatorEvent {
    ServerStatus(StatusSnapshot),
    ServerLog {
        server: String,
        entry: LogEntry,
    },
    ServerLogs {
        server: String,
        entries: Vec<LogEntry>,
    },
    PlayerListUpdate {
        server: String,
        players: Vec<String>,
    },
    PartyListUpdate {
        server: String,
        parties: Value,
    },
    WaveDataUpdate {
        server: String,
        wave: Value,
    },
    NpcListUpdate {
        server: String,
        npcs: Value,
    },
}

/// Spawns the broadcaster loop. Runs until the shutdown channel fires.
pub fn spawn_broadcaster(
    supervisor: Arc<Supervisor>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(BROADCAST_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick(&supervisor).await;
                }
                _ = shutdown.recv() => {
                    info!("status broadcaster stopping");
                    break;
                }
            }
        }
    })
}

/// One broadcaster tick: roster refresh or throttled reconnect per server,
/// then a consolidated snapshot publish.
async fn tick(supervisor: &Arc<Supervisor>) {
    for id in supervisor.server_ids().await {
        if supervisor.ipc_open(&id).await {
            // Best-effort; a failed send is observed by the reader task.
            supervisor.send_ipc(&id, &IpcMessage::get_players()).await;
        } else if supervisor.should_attempt_ipc(&id).await {
            supervisor.connect_ipc(&id).await;
        }
    }
    for snapshot in supervisor.snapshots().await {
        supervisor.publish(OperatorEvent::ServerStatus(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::LogicalServerConfig;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn config(id: &str) -> LogicalServerConfig {
        LogicalServerConfig {
            id: id.to_string(),
            name: format!("{id} server"),
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            working_dir: None,
            env: HashMap::new(),
            port: 7777,
            ipc_port: 0,
            ready_marker: "READY".to_string(),
        }
    }

    #[test]
    fn test_operator_event_wire_shape() {
        let event = OperatorEvent::PlayerListUpdate {
            server: "pvp".to_string(),
            players: vec!["alice".to_string()],
        };
        let wire: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "playerListUpdate");
        assert_eq!(wire["data"]["server"], "pvp");
        assert_eq!(wire["data"]["players"][0], "alice");
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = StatusSnapshot {
            id: "pvp".to_string(),
            name: "PvP".to_string(),
            status: ServerStatus::Online,
            uptime_ms: 1234,
            player_count: 2,
            port: 7777,
            party_list: Value::Null,
            wave_data: Value::Null,
            npc_list: Value::Null,
        };
        let wire: Value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(wire["uptimeMs"], 1234);
        assert_eq!(wire["playerCount"], 2);
        assert_eq!(wire["status"], "online");
        // Null extras are omitted from the wire
        assert!(wire.get("partyList").is_none());
    }

    #[tokio::test]
    async fn test_tick_publishes_snapshots() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(vec![config("pvp"), config("pve")], dir.path());
        let mut rx = sup.subscribe();

        tick(&sup).await;

        let mut statuses = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, OperatorEvent::ServerStatus(_)) {
                statuses += 1;
            }
        }
        assert_eq!(statuses, 2);
    }
}
