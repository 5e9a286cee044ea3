//! Process supervision for logical game servers.
//!
//! The [`Supervisor`] owns the registry of logical servers (an explicitly
//! owned map from server id to [`ServerState`]) and is the only component
//! that mutates it. Each logical server is backed by at most one OS child
//! process at a time; the supervisor spawns it, wires its output streams to
//! the log store, tracks its IPC channel, and observes its exit.

pub mod restart;

use crate::broadcaster::{OperatorEvent, StatusSnapshot};
use crate::error::SupervisorError;
use crate::ipc::{channel::IpcChannel, InboundKind, IpcMessage};
use crate::logstore::{LogEntry, LogStore, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Delay between observing the readiness marker and the first IPC attempt.
pub const READY_IPC_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on waiting for the OS to release the game port before a
/// respawn. The port is probed; this is only the fallback ceiling.
pub const PORT_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a stopping process gets before a forced kill.
pub const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum spacing between IPC reconnection attempts per logical server.
pub const IPC_RECONNECT_THROTTLE: Duration = Duration::from_secs(15);

/// Grace period after a best-effort restart announcement.
pub const ANNOUNCE_GRACE: Duration = Duration::from_millis(500);

/// Lifecycle status of one logical server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    /// No process.
    #[serde(rename = "offline")]
    Offline,
    /// Process spawned, readiness marker not yet observed over IPC.
    #[serde(rename = "starting")]
    Starting,
    /// Process alive with an open IPC channel.
    #[serde(rename = "online")]
    Online,
    /// Degraded: process alive but the IPC channel is down.
    #[serde(rename = "no-ipc")]
    NoIpc,
    /// Transient state while a stop or restart is in flight.
    #[serde(rename = "stopping")]
    Stopping,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerStatus::Offline => "offline",
            ServerStatus::Starting => "starting",
            ServerStatus::Online => "online",
            ServerStatus::NoIpc => "no-ipc",
            ServerStatus::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Static configuration for one logical server (e.g. "pvp", "pve").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalServerConfig {
    /// Stable identifier used in routes and log file names.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Launch command (program path).
    pub command: String,
    /// Arguments passed to the launch command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Port game clients connect to.
    pub port: u16,
    /// Loopback control-socket port the child listens on.
    pub ipc_port: u16,
    /// Stdout substring that marks the child as ready for IPC.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
}

fn default_ready_marker() -> String {
    "Server listening".to_string()
}

/// Read-only diagnostic view of one logical server.
#[derive(Debug, Clone, Serialize)]
pub struct DebugState {
    pub pid: Option<u32>,
    pub ipc_writable: bool,
    pub uptime_ms: Option<u64>,
    pub player_count: usize,
}

/// Mutable runtime state for one logical server.
///
/// Invariant: `pid` is `Some` iff a process is believed running, and at most
/// one process exists per logical server at any time.
pub(crate) struct ServerState {
    pub(crate) config: LogicalServerConfig,
    pub(crate) pid: Option<u32>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) status: ServerStatus,
    pub(crate) players: Vec<String>,
    pub(crate) party_list: Value,
    pub(crate) wave_data: Value,
    pub(crate) npc_list: Value,
    pub(crate) ipc: Option<Arc<IpcChannel>>,
    pub(crate) ipc_generation: u64,
    pub(crate) last_ipc_attempt: Option<Instant>,
    /// Set by the direct-restart path so the exit observer restarts the
    /// process regardless of its exit code.
    pub(crate) restart_pending: bool,
    pub(crate) log: LogStore,
}

impl ServerState {
    fn new(config: LogicalServerConfig, log_dir: &Path) -> Self {
        let log = LogStore::new(log_dir.join(format!("{}.log", config.id)));
        Self {
            config,
            pid: None,
            started_at: None,
            status: ServerStatus::Offline,
            players: Vec::new(),
            party_list: Value::Null,
            wave_data: Value::Null,
            npc_list: Value::Null,
            ipc: None,
            ipc_generation: 0,
            last_ipc_attempt: None,
            restart_pending: false,
            log,
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            status: self.status,
            uptime_ms: self
                .started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
            player_count: self.players.len(),
            port: self.config.port,
            party_list: self.party_list.clone(),
            wave_data: self.wave_data.clone(),
            npc_list: self.npc_list.clone(),
        }
    }
}

/// Owner of the logical-server registry and all process lifecycle operations.
pub struct Supervisor {
    pub(crate) servers: RwLock<HashMap<String, ServerState>>,
    system_log: Mutex<LogStore>,
    events: broadcast::Sender<OperatorEvent>,
}

impl Supervisor {
    /// Creates a supervisor owning one [`ServerState`] per configured logical
    /// server, with log files rooted at `log_dir`.
    pub fn new(configs: Vec<LogicalServerConfig>, log_dir: impl AsRef<Path>) -> Arc<Self> {
        let log_dir = log_dir.as_ref();
        let servers = configs
            .into_iter()
            .map(|c| (c.id.clone(), ServerState::new(c, log_dir)))
            .collect();
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            servers: RwLock::new(servers),
            system_log: Mutex::new(LogStore::new(log_dir.join("system.log"))),
            events,
        })
    }

    /// Seeds every in-memory log buffer from its persisted file. Called once
    /// at boot.
    pub async fn load_logs(&self) -> std::io::Result<()> {
        let mut servers = self.servers.write().await;
        for state in servers.values_mut() {
            state.log.load().await?;
        }
        self.system_log.lock().await.load().await
    }

    /// Subscribes to the operator pub/sub stream.
    pub fn subscribe(&self) -> broadcast::Receiver<OperatorEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: OperatorEvent) {
        // Only fails when no operator session is connected, which is fine.
        let _ = self.events.send(event);
    }

    /// All configured logical server ids.
    pub async fn server_ids(&self) -> Vec<String> {
        self.servers.read().await.keys().cloned().collect()
    }

    /// Ids of logical servers with a live process.
    pub async fn running_ids(&self) -> Vec<String> {
        self.servers
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.pid.is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Current status of one logical server.
    pub async fn status(&self, id: &str) -> Result<ServerStatus, SupervisorError> {
        self.servers
            .read()
            .await
            .get(id)
            .map(|s| s.status)
            .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))
    }

    /// Appends an operator-facing log entry for one logical server and
    /// publishes it to connected sessions.
    pub async fn log(&self, id: &str, severity: Severity, message: impl Into<String>) {
        let entry = LogEntry::new(severity, message);
        {
            let mut servers = self.servers.write().await;
            if let Some(state) = servers.get_mut(id) {
                if let Err(e) = state.log.append(entry.clone()).await {
                    error!("failed to persist log entry for '{id}': {e}");
                }
            } else {
                warn!("dropping log entry for unknown server '{id}'");
                return;
            }
        }
        self.publish(OperatorEvent::ServerLog {
            server: id.to_string(),
            entry,
        });
    }

    /// Appends a system-level log entry (control-plane events not tied to a
    /// single logical server).
    pub async fn log_system(&self, severity: Severity, message: impl Into<String>) {
        let entry = LogEntry::new(severity, message);
        if let Err(e) = self.system_log.lock().await.append(entry.clone()).await {
            error!("failed to persist system log entry: {e}");
        }
        self.publish(OperatorEvent::ServerLog {
            server: "system".to_string(),
            entry,
        });
    }

    /// Starts the configured child process for `id`.
    ///
    /// Fails with [`SupervisorError::AlreadyRunning`] when a process handle
    /// exists. Spawn failures surface synchronously as an error log entry and
    /// a rejected result; they are never retried automatically.
    ///
    /// Boxed: the exit observer's respawn path re-enters `start`, and the
    /// indirection keeps that recursion representable as a `Send` future.
    pub fn start<'a>(
        self: &'a Arc<Self>,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), SupervisorError>> + Send + 'a>> {
        Box::pin(self.start_inner(id))
    }

    async fn start_inner(self: &Arc<Self>, id: &str) -> Result<(), SupervisorError> {
        let spawn_error;
        {
            let mut servers = self.servers.write().await;
            let state = servers
                .get_mut(id)
                .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))?;
            if state.pid.is_some() {
                return Err(SupervisorError::AlreadyRunning(id.to_string()));
            }

            let ready_marker = state.config.ready_marker.clone();
            let mut command = Command::new(&state.config.command);
            command
                .args(&state.config.args)
                .envs(&state.config.env)
                .env("GAME_PORT", state.config.port.to_string())
                .env("IPC_PORT", state.config.ipc_port.to_string())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .stdin(Stdio::null());
            if let Some(dir) = &state.config.working_dir {
                command.current_dir(dir);
            }

            match command.spawn() {
                // A spawned child without a pid has already been reaped;
                // treat it as a failed spawn rather than tracking pid 0.
                Ok(mut child) if child.id().is_none() => {
                    let _ = child.start_kill();
                    spawn_error = Some(std::io::Error::other(
                        "spawned process exited before a pid could be recorded",
                    ));
                }
                Ok(mut child) => {
                    let pid = child.id().expect("pid checked above");
                    state.pid = Some(pid);
                    state.started_at = Some(Instant::now());
                    state.status = ServerStatus::Starting;
                    state.restart_pending = false;
                    state.players.clear();
                    info!("🚀 Spawned '{id}' (pid {pid})");

                    let stdout = child.stdout.take();
                    let stderr = child.stderr.take();

                    if let Some(stdout) = stdout {
                        let sup = self.clone();
                        let id = id.to_string();
                        tokio::spawn(async move {
                            sup.observe_stdout(&id, stdout, &ready_marker).await;
                        });
                    }
                    if let Some(stderr) = stderr {
                        let sup = self.clone();
                        let id = id.to_string();
                        tokio::spawn(async move {
                            let mut lines = BufReader::new(stderr).lines();
                            while let Ok(Some(line)) = lines.next_line().await {
                                sup.log(&id, Severity::Error, line).await;
                            }
                        });
                    }

                    // Single exit observer per spawn; the auto-restart
                    // decision is made from the exit code when it fires.
                    let sup = self.clone();
                    let id_owned = id.to_string();
                    tokio::spawn(async move {
                        let exit = child.wait().await;
                        sup.handle_exit(&id_owned, exit.ok().and_then(|s| s.code()))
                            .await;
                    });
                    spawn_error = None;
                }
                Err(e) => spawn_error = Some(e),
            }
        }

        match spawn_error {
            Some(e) => {
                self.log(
                    id,
                    Severity::Error,
                    format!("failed to start server process: {e}"),
                )
                .await;
                Err(SupervisorError::Spawn {
                    id: id.to_string(),
                    source: e,
                })
            }
            None => {
                self.log(id, Severity::Info, "server process starting").await;
                self.broadcast_status(id).await;
                Ok(())
            }
        }
    }

    /// Reads child stdout line by line: every line becomes an `info` log
    /// entry, and the first readiness marker schedules an IPC attempt.
    async fn observe_stdout(
        self: &Arc<Self>,
        id: &str,
        stdout: tokio::process::ChildStdout,
        ready_marker: &str,
    ) {
        let mut lines = BufReader::new(stdout).lines();
        let mut ready_seen = false;
        while let Ok(Some(line)) = lines.next_line().await {
            if !ready_seen && line.contains(ready_marker) {
                ready_seen = true;
                let sup = self.clone();
                let id = id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(READY_IPC_DELAY).await;
                    sup.connect_ipc(&id).await;
                });
            }
            self.log(id, Severity::Info, line).await;
        }
    }

    /// Requests a stop for `id`: graceful over IPC when a channel is open,
    /// otherwise a termination signal to the tracked pid. A watchdog forces
    /// a kill if the process has not exited within [`FORCE_KILL_TIMEOUT`].
    pub async fn stop(self: &Arc<Self>, id: &str) -> Result<(), SupervisorError> {
        let (pid, ipc) = {
            let mut servers = self.servers.write().await;
            let state = servers
                .get_mut(id)
                .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))?;
            let pid = state
                .pid
                .ok_or_else(|| SupervisorError::NotRunning(id.to_string()))?;
            state.status = ServerStatus::Stopping;
            (pid, state.ipc.clone())
        };
        self.broadcast_status(id).await;

        let graceful = match ipc {
            Some(channel) => channel.send(&IpcMessage::shutdown_gracefully()).await,
            None => false,
        };
        if graceful {
            self.log(id, Severity::Info, "graceful shutdown requested over IPC")
                .await;
        } else {
            self.log(id, Severity::Info, "sending termination signal")
                .await;
            signal_terminate(pid);
        }

        self.spawn_kill_watchdog(id, pid);
        Ok(())
    }

    /// Forces a kill if the same pid is still tracked after the timeout.
    pub(crate) fn spawn_kill_watchdog(self: &Arc<Self>, id: &str, pid: u32) {
        let sup = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(FORCE_KILL_TIMEOUT).await;
            let still_tracked = sup
                .servers
                .read()
                .await
                .get(&id)
                .map_or(false, |s| s.pid == Some(pid));
            if still_tracked {
                sup.log(
                    &id,
                    Severity::Warning,
                    format!(
                        "process {pid} did not exit within {}s, forcing kill",
                        FORCE_KILL_TIMEOUT.as_secs()
                    ),
                )
                .await;
                signal_kill(pid);
            }
        });
    }

    /// Read-only diagnostic state: pid, IPC writability, uptime, players.
    pub async fn debug_state(&self, id: &str) -> Result<DebugState, SupervisorError> {
        let servers = self.servers.read().await;
        let state = servers
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))?;
        Ok(DebugState {
            pid: state.pid,
            ipc_writable: state.ipc.is_some(),
            uptime_ms: state.started_at.map(|t| t.elapsed().as_millis() as u64),
            player_count: state.players.len(),
        })
    }

    /// Exit observer shared by every spawn path. Clears process state, drops
    /// the IPC channel, broadcasts the offline status, and applies the
    /// auto-restart decision.
    async fn handle_exit(self: &Arc<Self>, id: &str, code: Option<i32>) {
        let (decision, port) = {
            let mut servers = self.servers.write().await;
            let Some(state) = servers.get_mut(id) else {
                return;
            };
            state.pid = None;
            state.started_at = None;
            state.status = ServerStatus::Offline;
            state.players.clear();
            state.ipc = None;
            let pending = std::mem::take(&mut state.restart_pending);
            let decision = if pending {
                restart::RestartDecision::Restart
            } else {
                restart::RestartDecision::from_exit(code)
            };
            (decision, state.config.port)
        };

        match code {
            Some(0) => {
                self.log(id, Severity::Info, "process exited cleanly (code 0)")
                    .await
            }
            Some(c) => {
                self.log(
                    id,
                    Severity::Error,
                    format!("process exited with code {c}"),
                )
                .await
            }
            None => {
                self.log(id, Severity::Warning, "process terminated by signal")
                    .await
            }
        }
        self.broadcast_status(id).await;

        if decision == restart::RestartDecision::Restart {
            let sup = self.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                wait_for_port_release(port).await;
                if let Err(e) = sup.start(&id).await {
                    sup.log(&id, Severity::Error, format!("automatic restart failed: {e}"))
                        .await;
                }
            });
        }
    }

    /// Attempts to (re)establish the IPC channel for `id`.
    ///
    /// Idempotent: any existing channel is torn down first. Connection
    /// refused is the expected condition while the child has no listener yet
    /// and is deliberately not logged; all other errors are.
    pub async fn connect_ipc(self: &Arc<Self>, id: &str) {
        let (ipc_port, generation) = {
            let mut servers = self.servers.write().await;
            let Some(state) = servers.get_mut(id) else {
                return;
            };
            state.last_ipc_attempt = Some(Instant::now());
            state.ipc = None;
            state.ipc_generation += 1;
            (state.config.ipc_port, state.ipc_generation)
        };

        match TcpStream::connect(("127.0.0.1", ipc_port)).await {
            Ok(stream) => {
                let (read_half, write_half) = stream.into_split();
                {
                    let mut servers = self.servers.write().await;
                    let Some(state) = servers.get_mut(id) else {
                        return;
                    };
                    if state.ipc_generation != generation {
                        // A newer attempt superseded this one.
                        return;
                    }
                    state.ipc = Some(Arc::new(IpcChannel::new(write_half, generation)));
                    state.status = ServerStatus::Online;
                }
                self.log(id, Severity::Success, "IPC channel established")
                    .await;
                self.broadcast_status(id).await;

                let sup = self.clone();
                let id = id.to_string();
                tokio::spawn(async move {
                    sup.read_ipc_loop(&id, read_half, generation).await;
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!("IPC connect to '{id}' refused (child not listening yet)");
            }
            Err(e) => {
                self.log(id, Severity::Error, format!("IPC connect failed: {e}"))
                    .await;
            }
        }
    }

    /// Whether `id` has a process but no IPC channel and is past the
    /// reconnect throttle window.
    pub async fn should_attempt_ipc(&self, id: &str) -> bool {
        let servers = self.servers.read().await;
        let Some(state) = servers.get(id) else {
            return false;
        };
        state.pid.is_some()
            && state.ipc.is_none()
            && state
                .last_ipc_attempt
                .map_or(true, |t| t.elapsed() >= IPC_RECONNECT_THROTTLE)
    }

    /// Whether `id` currently has an open IPC channel.
    pub async fn ipc_open(&self, id: &str) -> bool {
        self.servers
            .read()
            .await
            .get(id)
            .map_or(false, |s| s.ipc.is_some())
    }

    /// Sends a message over `id`'s IPC channel. Returns `false` when no
    /// channel is open or the write fails; never errors.
    pub async fn send_ipc(&self, id: &str, message: &IpcMessage) -> bool {
        let channel = self.servers.read().await.get(id).and_then(|s| s.ipc.clone());
        match channel {
            Some(channel) => channel.send(message).await,
            None => false,
        }
    }

    /// Reads newline-delimited JSON from the control socket until it closes.
    /// Malformed lines are logged and dropped; the channel stays open.
    async fn read_ipc_loop(
        self: &Arc<Self>,
        id: &str,
        read_half: tokio::net::tcp::OwnedReadHalf,
        generation: u64,
    ) {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<IpcMessage>(&line) {
                        Ok(message) => self.dispatch_ipc(id, message).await,
                        Err(e) => {
                            self.log(
                                id,
                                Severity::Warning,
                                format!("dropped malformed IPC line: {e}"),
                            )
                            .await;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::ConnectionReset {
                        self.log(id, Severity::Error, format!("IPC read error: {e}"))
                            .await;
                    }
                    break;
                }
            }
        }
        self.ipc_lost(id, generation).await;
    }

    /// Degrades status after a channel error or close: `no-ipc` when the
    /// process is still alive, `offline` otherwise.
    async fn ipc_lost(self: &Arc<Self>, id: &str, generation: u64) {
        {
            let mut servers = self.servers.write().await;
            let Some(state) = servers.get_mut(id) else {
                return;
            };
            if state.ipc.as_ref().map(|c| c.generation()) != Some(generation)
                && state.ipc.is_some()
            {
                // A newer channel replaced this one; nothing to degrade.
                return;
            }
            state.ipc = None;
            if state.status != ServerStatus::Stopping {
                state.status = if state.pid.is_some() {
                    ServerStatus::NoIpc
                } else {
                    ServerStatus::Offline
                };
            }
        }
        self.broadcast_status(id).await;
    }

    /// Dispatches one inbound IPC message by its `type` tag.
    async fn dispatch_ipc(self: &Arc<Self>, id: &str, message: IpcMessage) {
        match InboundKind::classify(&message.kind) {
            InboundKind::PlayerList => {
                let players = parse_players(&message.data);
                {
                    let mut servers = self.servers.write().await;
                    if let Some(state) = servers.get_mut(id) {
                        state.players = players.clone();
                    }
                }
                self.publish(OperatorEvent::PlayerListUpdate {
                    server: id.to_string(),
                    players,
                });
            }
            InboundKind::PartyList => {
                let data = message.data.clone();
                {
                    let mut servers = self.servers.write().await;
                    if let Some(state) = servers.get_mut(id) {
                        state.party_list = message.data;
                    }
                }
                self.publish(OperatorEvent::PartyListUpdate {
                    server: id.to_string(),
                    parties: data,
                });
            }
            InboundKind::WaveData => {
                let data = message.data.clone();
                {
                    let mut servers = self.servers.write().await;
                    if let Some(state) = servers.get_mut(id) {
                        state.wave_data = message.data;
                    }
                }
                self.publish(OperatorEvent::WaveDataUpdate {
                    server: id.to_string(),
                    wave: data,
                });
            }
            InboundKind::NpcList => {
                let data = message.data.clone();
                {
                    let mut servers = self.servers.write().await;
                    if let Some(state) = servers.get_mut(id) {
                        state.npc_list = message.data;
                    }
                }
                self.publish(OperatorEvent::NpcListUpdate {
                    server: id.to_string(),
                    npcs: data,
                });
            }
            InboundKind::Unknown => {
                // Permissive contract: unknown types are ignored, but logged
                // so protocol drift stays observable.
                debug!("ignoring unrecognized IPC message type '{}' from '{id}'", message.kind);
            }
        }
    }

    /// Snapshot of one logical server, if configured.
    pub async fn snapshot(&self, id: &str) -> Option<StatusSnapshot> {
        self.servers.read().await.get(id).map(|s| s.snapshot())
    }

    /// Snapshots of every logical server.
    pub async fn snapshots(&self) -> Vec<StatusSnapshot> {
        self.servers.read().await.values().map(|s| s.snapshot()).collect()
    }

    /// Publishes the current snapshot for one logical server.
    pub(crate) async fn broadcast_status(&self, id: &str) {
        if let Some(snapshot) = self.snapshot(id).await {
            self.publish(OperatorEvent::ServerStatus(snapshot));
        }
    }

    /// Most recent `limit` operator log entries for `id` (or "system").
    pub async fn logs_tail(&self, id: &str, limit: usize) -> Result<Vec<LogEntry>, SupervisorError> {
        if id == "system" {
            return Ok(self.system_log.lock().await.tail(limit));
        }
        let servers = self.servers.read().await;
        let state = servers
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))?;
        Ok(state.log.tail(limit))
    }

    /// Full persisted+in-memory log history for session replay.
    pub async fn log_history(&self, id: &str) -> Result<Vec<LogEntry>, SupervisorError> {
        if id == "system" {
            return Ok(self.system_log.lock().await.history().await?);
        }
        let servers = self.servers.read().await;
        let state = servers
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))?;
        Ok(state.log.history().await?)
    }

    /// Clears both the in-memory buffer and the persisted file for `id`.
    pub async fn clear_logs(&self, id: &str) -> Result<(), SupervisorError> {
        let mut servers = self.servers.write().await;
        let state = servers
            .get_mut(id)
            .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))?;
        state.log.clear().await?;
        Ok(())
    }

    /// Path of the raw persisted log file for `id`, for downloads.
    pub async fn log_file_path(&self, id: &str) -> Result<PathBuf, SupervisorError> {
        let servers = self.servers.read().await;
        let state = servers
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownServer(id.to_string()))?;
        Ok(state.log.path().to_path_buf())
    }
}

/// Extracts a player roster from a `playerList` payload. Accepts either a
/// bare array of names or `{players: [...]}`.
fn parse_players(data: &Value) -> Vec<String> {
    let list = match data {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("players") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    list.iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Polls until the game port can be bound again, bounded by
/// [`PORT_RELEASE_TIMEOUT`]. Replaces a blind fixed sleep so respawns do not
/// race the OS releasing the listener.
pub(crate) async fn wait_for_port_release(port: u16) {
    let deadline = Instant::now() + PORT_RELEASE_TIMEOUT;
    loop {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                drop(listener);
                return;
            }
            Err(_) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Err(_) => return,
        }
    }
}

// pid 0 would address the caller's entire process group.
#[cfg(unix)]
fn signal_terminate(pid: u32) {
    if pid == 0 {
        return;
    }
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(unix)]
fn signal_kill(pid: u32) {
    if pid == 0 {
        return;
    }
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(windows)]
fn signal_terminate(pid: u32) {
    if pid == 0 {
        return;
    }
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .status();
}

#[cfg(windows)]
fn signal_kill(pid: u32) {
    if pid == 0 {
        return;
    }
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(id: &str, command: &str) -> LogicalServerConfig {
        LogicalServerConfig {
            id: id.to_string(),
            name: format!("{id} server"),
            command: command.to_string(),
            args: vec![],
            working_dir: None,
            env: HashMap::new(),
            port: 0,
            ipc_port: 0,
            ready_marker: "READY".to_string(),
        }
    }

    fn sleeper(id: &str) -> LogicalServerConfig {
        let mut cfg = test_config(id, "sleep");
        cfg.args = vec!["30".to_string()];
        cfg
    }

    #[tokio::test]
    async fn test_unknown_server_is_rejected() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(vec![], dir.path());
        assert!(matches!(
            sup.start("ghost").await,
            Err(SupervisorError::UnknownServer(_))
        ));
        assert!(matches!(
            sup.stop("ghost").await,
            Err(SupervisorError::UnknownServer(_))
        ));
        assert!(matches!(
            sup.debug_state("ghost").await,
            Err(SupervisorError::UnknownServer(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_rejected() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(vec![sleeper("pvp")], dir.path());
        assert!(matches!(
            sup.stop("pvp").await,
            Err(SupervisorError::NotRunning(_))
        ));
        // No state mutation
        assert_eq!(sup.status("pvp").await.unwrap(), ServerStatus::Offline);
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_and_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(
            vec![test_config("pvp", "/nonexistent/binary/for/test")],
            dir.path(),
        );
        assert!(matches!(
            sup.start("pvp").await,
            Err(SupervisorError::Spawn { .. })
        ));
        assert_eq!(sup.status("pvp").await.unwrap(), ServerStatus::Offline);
        let state = sup.debug_state("pvp").await.unwrap();
        assert!(state.pid.is_none());

        // The failure landed in the operator log
        let tail = sup.logs_tail("pvp", 10).await.unwrap();
        assert!(tail.iter().any(|e| e.severity == Severity::Error));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_at_most_one_process() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(vec![sleeper("pvp")], dir.path());
        sup.start("pvp").await.unwrap();
        let first_pid = sup.debug_state("pvp").await.unwrap().pid;
        assert!(first_pid.is_some());

        // Second start fails and leaves the existing handle untouched
        assert!(matches!(
            sup.start("pvp").await,
            Err(SupervisorError::AlreadyRunning(_))
        ));
        assert_eq!(sup.debug_state("pvp").await.unwrap().pid, first_pid);

        sup.stop("pvp").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_transitions_through_stopping_to_offline() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(vec![sleeper("pve")], dir.path());
        sup.start("pve").await.unwrap();
        assert_eq!(sup.status("pve").await.unwrap(), ServerStatus::Starting);

        sup.stop("pve").await.unwrap();
        assert_eq!(sup.status("pve").await.unwrap(), ServerStatus::Stopping);

        // SIGTERM kills `sleep` promptly; the exit observer finalizes state
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sup.status("pve").await.unwrap(), ServerStatus::Offline);
        assert!(sup.debug_state("pve").await.unwrap().pid.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crash_exit_does_not_auto_restart() {
        let dir = TempDir::new().unwrap();
        let mut cfg = test_config("pvp", "sh");
        cfg.args = vec!["-c".to_string(), "exit 1".to_string()];
        let sup = Supervisor::new(vec![cfg], dir.path());

        sup.start("pvp").await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sup.status("pvp").await.unwrap(), ServerStatus::Offline);

        // Well past any restart delay: still offline
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(sup.status("pvp").await.unwrap(), ServerStatus::Offline);
        assert!(sup.debug_state("pvp").await.unwrap().pid.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_throttle() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(vec![sleeper("pvp")], dir.path());

        // No process: never attempt
        assert!(!sup.should_attempt_ipc("pvp").await);

        {
            let mut servers = sup.servers.write().await;
            let state = servers.get_mut("pvp").unwrap();
            state.pid = Some(99999);
            state.last_ipc_attempt = Some(Instant::now());
        }
        // Attempt just happened: throttled
        assert!(!sup.should_attempt_ipc("pvp").await);

        {
            let mut servers = sup.servers.write().await;
            let state = servers.get_mut("pvp").unwrap();
            state.last_ipc_attempt = Some(Instant::now() - IPC_RECONNECT_THROTTLE);
        }
        assert!(sup.should_attempt_ipc("pvp").await);
    }

    #[tokio::test]
    async fn test_send_ipc_without_channel_returns_false() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(vec![sleeper("pvp")], dir.path());
        assert!(!sup.send_ipc("pvp", &IpcMessage::get_players()).await);
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_helpers_ignore_pid_zero() {
        // kill(0, sig) signals the whole process group; the guards must
        // make these no-ops or this test process dies here.
        signal_terminate(0);
        signal_kill(0);
    }

    #[test]
    fn test_parse_players_shapes() {
        assert_eq!(
            parse_players(&serde_json::json!(["alice", "bob"])),
            vec!["alice", "bob"]
        );
        assert_eq!(
            parse_players(&serde_json::json!({"players": ["carol"]})),
            vec!["carol"]
        );
        assert!(parse_players(&serde_json::json!({"count": 3})).is_empty());
        assert!(parse_players(&Value::Null).is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_defaults() {
        let dir = TempDir::new().unwrap();
        let mut cfg = sleeper("pvp");
        cfg.port = 7777;
        let sup = Supervisor::new(vec![cfg], dir.path());
        let snap = sup.snapshot("pvp").await.unwrap();
        assert_eq!(snap.id, "pvp");
        assert_eq!(snap.status, ServerStatus::Offline);
        assert_eq!(snap.uptime_ms, 0);
        assert_eq!(snap.player_count, 0);
        assert_eq!(snap.port, 7777);
    }
}
