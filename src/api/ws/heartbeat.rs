// src/api/ws/heartbeat.rs
// Server-side liveness pings. Purely a signal to the client; this layer never
// enforces an idle timeout.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

use crate::api::ws::connection::WsSender;
use crate::api::ws::message::WsServerMessage;
use crate::config::CONFIG;

pub struct HeartbeatTask;

impl HeartbeatTask {
    /// Spawn the ping loop. The task ends on the first failed send (socket
    /// gone); the main loop aborts it on disconnect.
    pub fn start(sender: WsSender) -> JoinHandle<()> {
        let period = Duration::from_secs(CONFIG.ws_heartbeat_interval.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let ping = WsServerMessage::Pong { ts: Utc::now().timestamp_millis() };
                if sender.send(&ping).await.is_err() {
                    debug!("Heartbeat send failed, ending task");
                    break;
                }
            }
        })
    }
}
