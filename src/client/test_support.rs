//! Loopback broker used by tests across the crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::client::connection::BrokerConnection;
use crate::client::credential::GroupCredential;
use crate::client::handshake::establish;
use crate::stat::FlowControl;
use crate::transport::{CmdType, ConnAuthAck, Connector, Packet, PacketCodec, PacketDispatcher};

pub struct NullDispatcher;

impl PacketDispatcher for NullDispatcher {
    fn dispatch(&self, _remote: &str, _packet: Packet) {}
}

pub fn test_connector() -> Connector {
    Connector::new(
        Duration::from_millis(500),
        Arc::new(NullDispatcher),
        FlowControl::new("test"),
    )
}

/// An address nothing listens on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

pub async fn connect(address: &str, credential: &GroupCredential) -> Arc<BrokerConnection> {
    let session = establish(&test_connector(), address, credential, Duration::from_millis(500))
        .await
        .unwrap();
    BrokerConnection::new(address, session)
}

/// Polls `condition` every 10ms for up to two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[derive(Clone)]
enum Outbound {
    Packet(Packet),
    Raw(Vec<u8>),
}

#[derive(Default)]
struct BrokerState {
    received: Mutex<Vec<Packet>>,
    handshakes: AtomicUsize,
    heartbeats: AtomicUsize,
    silent: AtomicBool,
}

/// Accepts connections, answers handshakes and heartbeats, and records every
/// other packet.
pub struct FakeBroker {
    pub address: String,
    state: Arc<BrokerState>,
    kill: broadcast::Sender<()>,
    push: broadcast::Sender<Outbound>,
    acceptor: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        Self::spawn(true).await
    }

    pub async fn rejecting() -> Self {
        Self::spawn(false).await
    }

    async fn spawn(accept_auth: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let state = Arc::new(BrokerState::default());
        let (kill, _) = broadcast::channel(4);
        let (push, _) = broadcast::channel(16);

        let acceptor = {
            let state = state.clone();
            let kill = kill.clone();
            let push = push.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(
                        stream,
                        accept_auth,
                        state.clone(),
                        kill.subscribe(),
                        push.subscribe(),
                    ));
                }
            })
        };

        Self {
            address,
            state,
            kill,
            push,
            acceptor,
        }
    }

    pub fn received(&self) -> Vec<Packet> {
        self.state.received.lock().clone()
    }

    pub fn handshakes(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    /// Heartbeat requests seen so far, answered or not.
    pub fn heartbeats(&self) -> usize {
        self.state.heartbeats.load(Ordering::SeqCst)
    }

    /// Stops answering heartbeats while keeping every socket open.
    pub fn go_silent(&self) {
        self.state.silent.store(true, Ordering::SeqCst);
    }

    /// Closes every connection accepted so far.
    pub fn drop_connections(&self) {
        let _ = self.kill.send(());
    }

    /// Writes `packet` to every open connection.
    pub fn push(&self, packet: Packet) {
        let _ = self.push.send(Outbound::Packet(packet));
    }

    /// Writes `bytes` unframed to every open connection.
    pub fn push_raw(&self, bytes: &[u8]) {
        let _ = self.push.send(Outbound::Raw(bytes.to_vec()));
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.acceptor.abort();
        let _ = self.kill.send(());
    }
}

async fn serve(
    stream: TcpStream,
    accept_auth: bool,
    state: Arc<BrokerState>,
    mut kill: broadcast::Receiver<()>,
    mut push: broadcast::Receiver<Outbound>,
) {
    let mut framed = Framed::new(stream, PacketCodec);

    loop {
        tokio::select! {
            _ = kill.recv() => return,
            pushed = push.recv() => {
                let sent = match pushed {
                    Ok(Outbound::Packet(packet)) => framed.send(packet).await.is_ok(),
                    Ok(Outbound::Raw(bytes)) => framed.get_mut().write_all(&bytes).await.is_ok(),
                    Err(_) => false,
                };
                if !sent {
                    return;
                }
            }
            read = framed.next() => {
                let Some(Ok(packet)) = read else { return };
                let response = match packet.cmd {
                    CmdType::ConnMeta => {
                        state.handshakes.fetch_add(1, Ordering::SeqCst);
                        let ack = ConnAuthAck {
                            status: accept_auth,
                            feedback: if accept_auth { "ok" } else { "bad secret" }.to_string(),
                        };
                        Packet::response(packet.opaque, CmdType::ConnAuthAck, serde_json::to_vec(&ack).unwrap())
                    }
                    CmdType::Heartbeat => {
                        state.heartbeats.fetch_add(1, Ordering::SeqCst);
                        if state.silent.load(Ordering::SeqCst) {
                            continue;
                        }
                        Packet::response(packet.opaque, CmdType::Heartbeat, packet.data)
                    }
                    _ => {
                        state.received.lock().push(packet);
                        continue;
                    }
                };
                if framed.send(response).await.is_err() {
                    return;
                }
            }
        }
    }
}
