use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::transport::{CmdType, Packet, Session};
use crate::utils::{LinkError, Result};

/// An authenticated connection to one broker address.
///
/// The pool hands out `Arc<BrokerConnection>`s; reconnection swaps the
/// underlying `Session` in place so every holder sees the recovered
/// transport. Once retired (evicted from the pool) a connection stays closed.
#[derive(Debug)]
pub struct BrokerConnection {
    id: Uuid,
    address: String,
    session: RwLock<Arc<Session>>,
    retired: AtomicBool,
}

impl BrokerConnection {
    pub fn new(address: impl Into<String>, session: Session) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            address: address.into(),
            session: RwLock::new(Arc::new(session)),
            retired: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.is_retired() || self.session.read().is_closed()
    }

    pub fn write(&self, packet: Packet) -> Result<()> {
        if self.is_retired() {
            return Err(LinkError::ConnectionClosed {
                address: self.address.clone(),
            });
        }
        self.session.read().write(packet)
    }

    /// Installs a freshly authenticated session. Returns false, shutting the
    /// session down, when the connection was retired in the meantime.
    pub(crate) fn install(&self, session: Session) -> bool {
        let mut current = self.session.write();
        // checked under the lock so a concurrent retire sees the new session
        if self.is_retired() {
            session.shutdown();
            return false;
        }
        let previous = std::mem::replace(&mut *current, Arc::new(session));
        drop(current);
        previous.shutdown();
        true
    }

    /// Marks the connection retired and closes its session. Returns true
    /// when it was already retired, so only the first caller sees false.
    pub fn retire(&self) -> bool {
        let was_retired = self.retired.swap(true, Ordering::AcqRel);
        self.session.read().shutdown();
        was_retired
    }

    pub fn shutdown(&self) {
        self.retire();
    }

    /// Sends a heartbeat over the current session and waits for the answer.
    /// A session that fails to answer is shut down, leaving the connection
    /// closed but not retired so it can be recovered.
    pub async fn heartbeat(&self, timeout: Duration) -> Result<()> {
        let session = self.session.read().clone();
        let result = session
            .request(Packet::new(CmdType::Heartbeat, Vec::new()), timeout)
            .await
            .and_then(|response| match response.cmd {
                CmdType::Heartbeat => Ok(()),
                other => Err(LinkError::invalid_packet(format!(
                    "expected Heartbeat, got {other:?}"
                ))),
            });
        if result.is_err() {
            session.shutdown();
        }
        result
    }
}
