//! Reconnection scheduler
//!
//! Closed pooled connections are submitted here. A single worker drains the
//! submission channel and runs one recovery task per address; duplicate
//! submissions for an address already being recovered are dropped. A
//! recovery task redials and re-authenticates with a fixed pause between
//! attempts, installing the new session into the same `BrokerConnection`. A
//! target that exhausts its attempts is retired and its abandon hook runs
//! exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{Id as TaskId, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::client::connection::BrokerConnection;
use crate::client::credential::GroupCredential;
use crate::client::handshake::establish;
use crate::config::ReconnectSettings;
use crate::transport::Connector;

pub type AbandonHook = Box<dyn FnOnce(&str) + Send>;

pub struct ReconnectTask {
    pub target: Arc<BrokerConnection>,
    pub credential: Arc<GroupCredential>,
    pub on_abandon: AbandonHook,
}

impl ReconnectTask {
    pub fn new(
        target: Arc<BrokerConnection>,
        credential: Arc<GroupCredential>,
        on_abandon: impl FnOnce(&str) + Send + 'static,
    ) -> Self {
        Self {
            target,
            credential,
            on_abandon: Box::new(on_abandon),
        }
    }

    /// Retires the target and runs the hook, unless another caller retired
    /// it first.
    fn abandon(self) {
        if self.target.retire() {
            debug!(address = self.target.address(), "target already retired");
            return;
        }
        let address = self.target.address().to_string();
        (self.on_abandon)(&address);
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    interval: Duration,
    max_attempts: u32,
    handshake_timeout: Duration,
}

pub struct ReconnectScheduler {
    enabled: bool,
    interval: Duration,
    max_attempts: u32,
    tx: mpsc::UnboundedSender<ReconnectTask>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<ReconnectTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectScheduler {
    /// Creates an idle scheduler. Submissions queue up until `start`.
    pub fn new(settings: &ReconnectSettings) -> Arc<Self> {
        Self::with_policy(
            settings.enabled,
            Duration::from_secs(settings.interval_secs),
            settings.max_attempts,
        )
    }

    pub fn with_policy(enabled: bool, interval: Duration, max_attempts: u32) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            enabled,
            interval,
            max_attempts: max_attempts.max(1),
            tx,
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        })
    }

    /// Spawns the worker. Calling it again has no effect.
    pub fn start(&self, connector: Connector, handshake_timeout: Duration) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };
        let policy = RetryPolicy {
            interval: self.interval,
            max_attempts: self.max_attempts,
            handshake_timeout,
        };
        *self.worker.lock() = Some(tokio::spawn(run_worker(rx, connector, policy)));
        info!(
            enabled = self.enabled,
            interval_ms = self.interval.as_millis() as u64,
            max_attempts = self.max_attempts,
            "reconnect scheduler started"
        );
    }

    /// Queues `task` for recovery. With reconnection disabled the target is
    /// abandoned immediately. Retired targets are ignored.
    pub fn submit(&self, task: ReconnectTask) {
        if task.target.is_retired() {
            debug!(address = task.target.address(), "target already retired");
            return;
        }
        if !self.enabled {
            info!(address = task.target.address(), "reconnect disabled, abandoning");
            task.abandon();
            return;
        }
        if let Err(mpsc::error::SendError(task)) = self.tx.send(task) {
            warn!(address = task.target.address(), "scheduler stopped, abandoning");
            task.abandon();
        }
    }

    /// Stops the worker and every recovery in progress.
    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
            info!("reconnect scheduler stopped");
        }
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<ReconnectTask>,
    connector: Connector,
    policy: RetryPolicy,
) {
    let mut in_flight: HashSet<String> = HashSet::new();
    let mut owners: HashMap<TaskId, String> = HashMap::new();
    let mut recoveries = JoinSet::new();

    loop {
        tokio::select! {
            submitted = rx.recv() => {
                let Some(task) = submitted else { break };
                let address = task.target.address().to_string();
                if task.target.is_retired() || !task.target.is_closed() {
                    debug!(address = %address, "target needs no recovery");
                    continue;
                }
                if !in_flight.insert(address.clone()) {
                    debug!(address = %address, "reconnect already in progress");
                    continue;
                }
                let handle = recoveries.spawn(recover(task, connector.clone(), policy));
                owners.insert(handle.id(), address);
            }
            Some(done) = recoveries.join_next_with_id(), if !recoveries.is_empty() => {
                let id = match done {
                    Ok((id, ())) => id,
                    Err(e) => e.id(),
                };
                if let Some(address) = owners.remove(&id) {
                    in_flight.remove(&address);
                }
            }
        }
    }
}

async fn recover(task: ReconnectTask, connector: Connector, policy: RetryPolicy) {
    let address = task.target.address().to_string();

    for attempt in 1..=policy.max_attempts {
        if task.target.is_retired() {
            debug!(address = %address, "target evicted during reconnect");
            return;
        }
        match establish(&connector, &address, &task.credential, policy.handshake_timeout).await {
            Ok(session) => {
                if task.target.install(session) {
                    info!(address = %address, attempt, "reconnected");
                }
                return;
            }
            Err(e) if e.is_transient() => {
                warn!(address = %address, attempt, max_attempts = policy.max_attempts, error = %e, "reconnect attempt failed");
            }
            Err(e) => {
                error!(address = %address, attempt, error = %e, "broker refused reconnect");
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    warn!(address = %address, attempts = policy.max_attempts, "reconnect abandoned");
    task.abandon();
}
