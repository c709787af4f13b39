//! Heartbeats
//!
//! A half-open TCP connection never reports EOF, so the pool would keep
//! handing it out. `HeartbeatMonitor` sends a `Heartbeat` request over every
//! pooled connection on an interval; one left unanswered past the timeout
//! has its session shut down and is looked up again so the pool submits it
//! for reconnection.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::pool::ConnectionPool;
use crate::pipeline::{Event, ForwardContext, Handler, PacketEvent};
use crate::transport::CmdType;
use crate::utils::{LinkError, Result};

/// Swallows heartbeat answers that arrive after their request timed out.
#[derive(Debug, Default)]
pub struct HeartbeatHandler;

impl HeartbeatHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Handler for HeartbeatHandler {
    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::Packet(PacketEvent { packet, .. }) if packet.cmd == CmdType::Heartbeat)
    }

    fn process(&self, _ctx: &mut ForwardContext, event: Event) -> Result<()> {
        let Event::Packet(PacketEvent { remote, packet }) = event else {
            return Err(LinkError::InvalidEventType {
                handler: "heartbeat".to_string(),
                event: event.kind(),
            });
        };
        debug!(remote = %remote, opaque = packet.opaque, "late heartbeat answer");
        Ok(())
    }
}

pub struct HeartbeatMonitor {
    pool: Arc<ConnectionPool>,
    interval: Duration,
    timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(pool: Arc<ConnectionPool>, interval: Duration, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pool,
            interval,
            timeout,
            task: Mutex::new(None),
        })
    }

    /// Heartbeats every live pooled connection once, concurrently. Returns
    /// the addresses whose heartbeat failed; their sessions are closed and
    /// handed to the reconnect path.
    pub async fn check_all(&self) -> Vec<String> {
        let live: Vec<_> = self
            .pool
            .snapshot_all()
            .into_values()
            .filter(|connection| !connection.is_closed())
            .collect();

        let results = join_all(live.iter().map(|connection| connection.heartbeat(self.timeout))).await;

        let mut failed = Vec::new();
        for (connection, result) in live.iter().zip(results) {
            if let Err(e) = result {
                warn!(address = connection.address(), error = %e, "heartbeat failed");
                failed.push(connection.address().to_string());
            }
        }
        for address in &failed {
            self.pool.find_by_address(address);
        }
        failed
    }

    /// Starts the heartbeat loop. Calling it again has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let monitor = Arc::downgrade(self);
        let interval = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.check_all().await;
            }
        }));
        info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "heartbeat started"
        );
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
