//! Operator WebSocket sessions.
//!
//! Each session is server→client only after the upgrade. On connect the
//! client receives a full replay (persisted log history per logical server
//! plus the system log, then a current snapshot per server) before live
//! events start flowing, so a freshly opened console never misses state
//! that predates it. The broadcast subscription is taken before the replay
//! is sent, closing the gap where an event lands between the two.

use crate::broadcaster::OperatorEvent;
use crate::supervisor::Supervisor;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Drives one upgraded operator socket until either side closes it.
pub async fn run_session(socket: WebSocket, supervisor: Arc<Supervisor>) {
    let mut events = supervisor.subscribe();
    let (mut sink, mut stream) = socket.split();

    if send_replay(&mut sink, &supervisor).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Slow consumer; the next periodic snapshot heals it.
                        warn!("operator session lagged, skipped {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // No client→server protocol; pings are answered by axum.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("operator session closed");
}

/// Sends the connect-time replay: log history per server (and "system"),
/// then a status snapshot per server.
async fn send_replay(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    supervisor: &Arc<Supervisor>,
) -> Result<(), axum::Error> {
    let mut ids = supervisor.server_ids().await;
    ids.push("system".to_string());
    for id in ids {
        let Ok(entries) = supervisor.log_history(&id).await else {
            continue;
        };
        let event = OperatorEvent::ServerLogs {
            server: id,
            entries,
        };
        send_event(sink, &event).await?;
    }
    for snapshot in supervisor.snapshots().await {
        send_event(sink, &OperatorEvent::ServerStatus(snapshot)).await?;
    }
    Ok(())
}

async fn send_event(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &OperatorEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    sink.send(Message::Text(text)).await
}
