//! Restart orchestration: the stop → start state machine.
//!
//! Per logical server the lifecycle cycles
//! `running → stopping → offline → starting → running`, with a no-op stop
//! self-loop on `offline` and an auto-restart edge taken when the prior exit
//! code was zero. Exit code 0 is the cooperative convention: the child asking
//! to be relaunched (for example after an admin command), as opposed to a
//! crash, which is logged but never auto-restarted so a crash loop cannot
//! amplify itself.

use crate::error::SupervisorError;
use crate::ipc::IpcMessage;
use crate::logstore::Severity;
use crate::supervisor::{ServerStatus, Supervisor, ANNOUNCE_GRACE};
use std::sync::Arc;

/// What the exit observer should do after a child terminates.
///
/// A pure function of the previous exit code; the direct-restart path
/// overrides it via the supervisor's `restart_pending` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Relaunch once the listening port is released.
    Restart,
    /// Stay offline; a crash is surfaced to operators, not retried.
    StayOffline,
}

impl RestartDecision {
    /// Maps an exit code to a decision: exactly 0 means a cooperative,
    /// intentional exit requesting relaunch. Non-zero codes and
    /// signal-terminated exits (no code) stay offline.
    pub fn from_exit(code: Option<i32>) -> Self {
        match code {
            Some(0) => RestartDecision::Restart,
            _ => RestartDecision::StayOffline,
        }
    }
}

impl Supervisor {
    /// Restarts one logical server.
    ///
    /// * Not running: degrades to a plain start.
    /// * `countdown_secs == 0` or no IPC channel: the direct-restart path.
    /// * Otherwise a `restartCountdown` message is sent and the child is
    ///   trusted to exit cooperatively (code 0) when the countdown elapses,
    ///   which the exit observer turns into an auto-restart. If that send
    ///   fails the direct path is taken instead.
    pub async fn restart(
        self: &Arc<Self>,
        id: &str,
        countdown_secs: u32,
        message: Option<String>,
    ) -> Result<(), SupervisorError> {
        let (running, ipc) = {
            let servers = self.servers.read().await;
            let state = servers
                .get(id)
                .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))?;
            (state.pid.is_some(), state.ipc.clone())
        };

        if !running {
            return self.start(id).await;
        }

        if countdown_secs == 0 || ipc.is_none() {
            return self.direct_restart(id).await;
        }

        let text = message.unwrap_or_else(|| "Server restarting".to_string());
        let countdown = IpcMessage::restart_countdown(countdown_secs, text);
        if self
            .send_ipc(id, &countdown)
            .await
        {
            self.log(
                id,
                Severity::Info,
                format!("restart countdown started ({countdown_secs}s)"),
            )
            .await;
            Ok(())
        } else {
            // Channel went away between the check and the send; fall back to
            // the non-cooperative path.
            self.direct_restart(id).await
        }
    }

    /// The non-cooperative restart path used when no IPC channel is
    /// available or no countdown was requested.
    ///
    /// Announces best-effort over IPC with a short grace window, destroys
    /// the channel, marks the restart pending, and signals termination. The
    /// exit observer completes the cycle: it waits for the game port to be
    /// released and starts the process again. A watchdog forces a kill if
    /// the process ignores the signal.
    pub async fn direct_restart(self: &Arc<Self>, id: &str) -> Result<(), SupervisorError> {
        let ipc = {
            let servers = self.servers.read().await;
            let state = servers
                .get(id)
                .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))?;
            if state.pid.is_none() {
                drop(servers);
                return self.start(id).await;
            }
            state.ipc.clone()
        };

        if let Some(channel) = ipc {
            channel
                .send(&IpcMessage::announce("Server is restarting now"))
                .await;
            tokio::time::sleep(ANNOUNCE_GRACE).await;
        }

        let pid = {
            let mut servers = self.servers.write().await;
            let state = servers
                .get_mut(id)
                .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))?;
            let Some(pid) = state.pid else {
                // Exited during the announce grace window; the pending flag
                // was never set, so just start fresh.
                drop(servers);
                return self.start(id).await;
            };
            state.ipc = None;
            state.restart_pending = true;
            state.status = ServerStatus::Stopping;
            pid
        };

        self.log(id, Severity::Info, "direct restart: terminating process")
            .await;
        self.broadcast_status(id).await;
        super::signal_terminate(pid);
        self.spawn_kill_watchdog(id, pid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::LogicalServerConfig;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_restart_decision_from_exit() {
        assert_eq!(RestartDecision::from_exit(Some(0)), RestartDecision::Restart);
        assert_eq!(
            RestartDecision::from_exit(Some(1)),
            RestartDecision::StayOffline
        );
        assert_eq!(
            RestartDecision::from_exit(Some(139)),
            RestartDecision::StayOffline
        );
        // Signal-terminated: no exit code
        assert_eq!(RestartDecision::from_exit(None), RestartDecision::StayOffline);
    }

    fn sleeper(id: &str) -> LogicalServerConfig {
        LogicalServerConfig {
            id: id.to_string(),
            name: format!("{id} server"),
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            working_dir: None,
            env: HashMap::new(),
            port: 0,
            ipc_port: 0,
            ready_marker: "READY".to_string(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restart_while_offline_degrades_to_start() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(vec![sleeper("pve")], dir.path());
        assert_eq!(sup.status("pve").await.unwrap(), ServerStatus::Offline);

        sup.restart("pve", 0, None).await.unwrap();
        assert_eq!(sup.status("pve").await.unwrap(), ServerStatus::Starting);
        assert!(sup.debug_state("pve").await.unwrap().pid.is_some());

        sup.stop("pve").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_direct_restart_cycles_and_respawns() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(vec![sleeper("pve")], dir.path());
        sup.start("pve").await.unwrap();
        let first_pid = sup.debug_state("pve").await.unwrap().pid.unwrap();

        // Running with no IPC channel: restart takes the direct path
        sup.restart("pve", 0, None).await.unwrap();
        assert_eq!(sup.status("pve").await.unwrap(), ServerStatus::Stopping);

        // SIGTERM ends `sleep`; restart_pending forces a respawn even though
        // the exit was not code 0
        let mut respawned = None;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let state = sup.debug_state("pve").await.unwrap();
            if let Some(pid) = state.pid {
                if pid != first_pid {
                    respawned = Some(pid);
                    break;
                }
            }
        }
        assert!(respawned.is_some(), "process was not respawned");
        assert_eq!(sup.status("pve").await.unwrap(), ServerStatus::Starting);

        sup.stop("pve").await.unwrap();
    }
}
