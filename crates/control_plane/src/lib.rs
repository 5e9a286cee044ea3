//! # Control Plane - Game Server Supervision Foundation
//!
//! A production-ready control plane for supervising game-server processes on a
//! single host. This crate handles process lifecycle management, loopback IPC,
//! log persistence, and the authenticated operator surface while treating the
//! game servers themselves as opaque child processes.
//!
//! ## Design Philosophy
//!
//! The control plane contains **NO game logic** - it only provides supervision
//! infrastructure:
//!
//! * **Process supervision** - Spawning, stopping, and restarting each logical
//!   server's child process, with exit-code-driven auto-restart
//! * **IPC channels** - Newline-delimited JSON over loopback TCP to each child
//! * **Log store** - Bounded in-memory logs mirrored to rotating files
//! * **Status broadcasting** - Periodic consolidated snapshots pushed to every
//!   connected operator session
//! * **Update orchestration** - Pulling source updates and restarting affected
//!   servers
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Supervisor** - Owns the registry of logical servers and funnels all
//!   state mutation through its API
//! * **IPC Channel** - Persistent client connection to one child's control
//!   socket
//! * **Status Broadcaster** - 5-second polling loop plus pub/sub fan-out
//! * **Update Orchestrator** - Git-driven update and restart coordination
//! * **Control Endpoint** - Authenticated HTTP + WebSocket operator surface
//!
//! ### Data Flow
//!
//! 1. Operator action arrives at the control endpoint
//! 2. The endpoint translates it into a supervisor or orchestrator call
//! 3. The supervisor drives the child process via OS signal or IPC message
//! 4. Child output and IPC events feed the log store and broadcaster
//! 5. The broadcaster pushes consolidated snapshots to operator sessions
//!
//! ## Thread Safety
//!
//! The server registry lives behind `Arc<RwLock<HashMap>>` and is mutated
//! only through [`Supervisor`] methods. Log files have a single writer per
//! logical server, serialized through the registry lock.

pub use backups::{BackupInfo, BackupManager};
pub use broadcaster::{spawn_broadcaster, OperatorEvent, StatusSnapshot};
pub use error::SupervisorError;
pub use ipc::IpcMessage;
pub use logstore::{LogEntry, LogStore, Severity};
pub use supervisor::{DebugState, LogicalServerConfig, ServerStatus, Supervisor};
pub use update::{UpdateOrchestrator, UpdateOutcome, UpdateSettings};

// Public module declarations
pub mod backups;
pub mod broadcaster;
pub mod commands;
pub mod error;
pub mod http;
pub mod ipc;
pub mod logstore;
pub mod supervisor;
pub mod update;
