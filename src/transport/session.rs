//! TCP sessions
//!
//! A `Session` owns one broker socket split into a read task and a write task
//! so reading and writing never wait on each other:
//! - the read task decodes packets with `PacketCodec`; responses are handed
//!   to the request waiting on the same opaque, everything else goes to the
//!   session's `PacketDispatcher`
//! - the write task drains an unbounded channel of outbound packets
//!
//! Either task stopping marks the session closed. A framing error stops the
//! read task, so a corrupt stream surfaces as a closed session. A closed session is never
//! reopened; reconnection builds a new one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::stat::FlowControl;
use crate::transport::packet::{MAX_PACKET_LEN, Packet, PacketCodec};
use crate::utils::{LinkError, Result};

type PendingTable = Arc<Mutex<HashMap<u32, oneshot::Sender<Packet>>>>;

/// Receives every inbound packet that is not a response to a pending request.
pub trait PacketDispatcher: Send + Sync {
    fn dispatch(&self, remote: &str, packet: Packet);
}

#[derive(Debug)]
pub struct Session {
    address: String,
    closed: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<Packet>,
    pending: PendingTable,
    next_opaque: AtomicU32,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Starts the read and write tasks for `stream`. Must be called from
    /// within a tokio runtime.
    pub fn open(
        address: impl Into<String>,
        stream: TcpStream,
        dispatcher: Arc<dyn PacketDispatcher>,
        flow: Arc<FlowControl>,
    ) -> Self {
        let address = address.into();
        if let Err(e) = stream.set_nodelay(true) {
            debug!(address = %address, error = %e, "could not disable nagle");
        }
        let (reader, writer) = stream.into_split();
        let reader = FramedRead::new(reader, PacketCodec);
        let writer = FramedWrite::new(writer, PacketCodec);
        let (outbound, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

        let read_task = tokio::spawn(read_loop(
            address.clone(),
            reader,
            pending.clone(),
            dispatcher,
            flow.clone(),
            closed.clone(),
        ));
        let write_task = tokio::spawn(write_loop(
            address.clone(),
            writer,
            rx,
            flow,
            closed.clone(),
        ));

        Self {
            address,
            closed,
            outbound,
            pending,
            next_opaque: AtomicU32::new(1),
            tasks: Mutex::new(vec![read_task, write_task]),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn assign_opaque(&self) -> u32 {
        loop {
            let opaque = self.next_opaque.fetch_add(1, Ordering::Relaxed);
            // zero means "unassigned"
            if opaque != 0 {
                return opaque;
            }
        }
    }

    /// Queues `packet` for the write task. Packets without an opaque get one.
    pub fn write(&self, mut packet: Packet) -> Result<()> {
        if self.is_closed() {
            return Err(LinkError::ConnectionClosed {
                address: self.address.clone(),
            });
        }
        if packet.data.len() > MAX_PACKET_LEN {
            return Err(LinkError::invalid_packet(format!(
                "length {} exceeds {MAX_PACKET_LEN}",
                packet.data.len()
            )));
        }
        if packet.opaque == 0 {
            packet.opaque = self.assign_opaque();
        }
        self.outbound
            .send(packet)
            .map_err(|_| LinkError::ConnectionClosed {
                address: self.address.clone(),
            })
    }

    /// Writes `packet` and waits for the response carrying the same opaque.
    pub async fn request(&self, mut packet: Packet, timeout: Duration) -> Result<Packet> {
        let opaque = self.assign_opaque();
        packet.opaque = opaque;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(opaque, tx);

        if let Err(e) = self.write(packet) {
            self.pending.lock().remove(&opaque);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // the read task dropped the waiter while shutting down
            Ok(Err(_)) => Err(LinkError::ConnectionClosed {
                address: self.address.clone(),
            }),
            Err(_) => {
                self.pending.lock().remove(&opaque);
                Err(LinkError::RequestTimeout {
                    address: self.address.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.pending.lock().clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_loop(
    address: String,
    mut reader: FramedRead<OwnedReadHalf, PacketCodec>,
    pending: PendingTable,
    dispatcher: Arc<dyn PacketDispatcher>,
    flow: Arc<FlowControl>,
    closed: Arc<AtomicBool>,
) {
    while let Some(frame) = reader.next().await {
        let packet = match frame {
            Ok(packet) => packet,
            Err(e) => {
                warn!(address = %address, error = %e, "read failed, closing session");
                break;
            }
        };
        flow.read.incr(1);
        if packet.cmd.is_response() {
            let waiter = pending.lock().remove(&packet.opaque);
            if let Some(waiter) = waiter {
                let _ = waiter.send(packet);
                continue;
            }
        }
        dispatcher.dispatch(&address, packet);
    }

    debug!(address = %address, "read task stopped");
    closed.store(true, Ordering::Release);
    pending.lock().clear();
}

async fn write_loop(
    address: String,
    mut writer: FramedWrite<OwnedWriteHalf, PacketCodec>,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    flow: Arc<FlowControl>,
    closed: Arc<AtomicBool>,
) {
    while let Some(packet) = rx.recv().await {
        match writer.send(packet).await {
            Ok(()) => flow.write.incr(1),
            Err(e @ LinkError::InvalidPacket { .. }) => {
                warn!(address = %address, error = %e, "packet dropped");
            }
            Err(e) => {
                warn!(address = %address, error = %e, "write failed, closing session");
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
}

/// Dials brokers and wraps the sockets into sessions that share one
/// dispatcher and flow counter.
#[derive(Clone)]
pub struct Connector {
    dial_timeout: Duration,
    dispatcher: Arc<dyn PacketDispatcher>,
    flow: Arc<FlowControl>,
}

impl Connector {
    pub fn new(
        dial_timeout: Duration,
        dispatcher: Arc<dyn PacketDispatcher>,
        flow: Arc<FlowControl>,
    ) -> Self {
        Self {
            dial_timeout,
            dispatcher,
            flow,
        }
    }

    pub async fn connect(&self, address: &str) -> Result<Session> {
        let stream = match tokio::time::timeout(self.dial_timeout, TcpStream::connect(address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(LinkError::transport(address, e)),
            Err(_) => {
                return Err(LinkError::DialTimeout {
                    address: address.to_string(),
                    timeout_ms: self.dial_timeout.as_millis() as u64,
                });
            }
        };

        debug!(address, "dialed broker");
        Ok(Session::open(
            address,
            stream,
            self.dispatcher.clone(),
            self.flow.clone(),
        ))
    }
}
