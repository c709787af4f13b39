use super::*;
use crate::client::test_support::{FakeBroker, connect, wait_until};
use crate::client::{ConnectionPool, GroupCredential, ReconnectScheduler};
use crate::transport::CmdType;
use crate::utils::LinkError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Records every event it sees and forwards a remoting event.
struct Recorder {
    seen: Arc<Mutex<Vec<&'static str>>>,
    forward: bool,
}

impl Handler for Recorder {
    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::Packet(_))
    }

    fn process(&self, ctx: &mut ForwardContext, event: Event) -> Result<()> {
        self.seen.lock().push(event.kind());
        if self.forward {
            ctx.send_forward(Event::Remoting(RemotingEvent::to_host(
                "127.0.0.1:1",
                Packet::new(CmdType::Heartbeat, Vec::new()),
            )));
        }
        Ok(())
    }
}

struct Sink {
    seen: Arc<Mutex<Vec<&'static str>>>,
}

impl Handler for Sink {
    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::Remoting(_))
    }

    fn process(&self, _ctx: &mut ForwardContext, event: Event) -> Result<()> {
        self.seen.lock().push(event.kind());
        Err(LinkError::NoConnection {
            address: "sink".to_string(),
        })
    }
}

fn packet_event() -> Event {
    Event::Packet(PacketEvent {
        remote: "127.0.0.1:1".to_string(),
        packet: Packet::new(CmdType::Heartbeat, Vec::new()),
    })
}

fn disabled_pool() -> Arc<ConnectionPool> {
    ConnectionPool::new(ReconnectScheduler::with_policy(false, Duration::from_millis(10), 1))
}

#[test]
fn test_fire_skips_handlers_that_do_not_accept() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new();
    pipeline
        .register("sink", Sink { seen: seen.clone() })
        .register(
            "recorder",
            Recorder {
                seen: seen.clone(),
                forward: false,
            },
        );

    pipeline.fire(packet_event()).unwrap();
    assert_eq!(*seen.lock(), vec!["packet"]);
}

#[test]
fn test_fire_forwards_and_propagates_errors() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new();
    pipeline
        .register(
            "recorder",
            Recorder {
                seen: seen.clone(),
                forward: true,
            },
        )
        .register("sink", Sink { seen: seen.clone() });

    let result = pipeline.fire(packet_event());
    assert!(matches!(result, Err(LinkError::NoConnection { .. })));
    assert_eq!(*seen.lock(), vec!["packet", "remoting"]);
    assert_eq!(pipeline.names(), vec!["recorder", "sink"]);
}

#[test]
fn test_remoting_to_unknown_host_fails() {
    let mut pipeline = Pipeline::new();
    pipeline.register("remoting", RemotingHandler::new(disabled_pool()));

    let event = Event::Remoting(RemotingEvent::to_host(
        "127.0.0.1:1",
        Packet::new(CmdType::Heartbeat, Vec::new()),
    ));
    assert!(matches!(
        pipeline.fire(event),
        Err(LinkError::NoConnection { .. })
    ));
}

#[test]
fn test_remoting_to_group_without_connections_is_skipped() {
    let mut pipeline = Pipeline::new();
    pipeline.register("remoting", RemotingHandler::new(disabled_pool()));

    let event = Event::Remoting(RemotingEvent::to_groups(
        vec!["nobody".to_string()],
        Packet::new(CmdType::StringMessage, Vec::new()),
    ));
    assert!(pipeline.fire(event).is_ok());
}

#[tokio::test]
async fn test_remoting_writes_to_host_until_closed() {
    let broker = FakeBroker::start().await;
    let pool = disabled_pool();
    let credential = Arc::new(GroupCredential::new("s-mts", ""));
    pool.authenticate(credential.clone(), connect(&broker.address, &credential).await);

    let mut pipeline = Pipeline::new();
    pipeline.register("remoting", RemotingHandler::new(pool.clone()));

    let packet = Packet::new(CmdType::StringMessage, b"{}".to_vec());
    pipeline
        .fire(Event::Remoting(RemotingEvent::to_host(&broker.address, packet)))
        .unwrap();
    assert!(wait_until(|| broker.received().len() == 1).await);
    assert_eq!(broker.received()[0].cmd, CmdType::StringMessage);

    broker.drop_connections();
    let connection = pool.snapshot_all().remove(&broker.address).unwrap();
    assert!(wait_until(|| connection.is_closed()).await);

    let packet = Packet::new(CmdType::StringMessage, Vec::new());
    let result = pipeline.fire(Event::Remoting(RemotingEvent::to_host(&broker.address, packet)));
    assert!(matches!(result, Err(LinkError::ConnectionClosed { .. })));
}
