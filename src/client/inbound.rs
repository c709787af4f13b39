//! Client-side handling of packets pushed by brokers.
//!
//! Chain order: `PacketHandler` decodes message packets into `Accept` events,
//! `AcceptHandler` hands the message to the application and answers with a
//! `DeliverAck`, and the remoting handler writes that ack back.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::pipeline::{AcceptEvent, Event, ForwardContext, Handler, PacketEvent, Pipeline, RemotingEvent};
use crate::stat::FlowControl;
use crate::transport::message::unmarshal_message;
use crate::transport::{CmdType, DeliverAck, Message, Packet, PacketDispatcher};
use crate::utils::{LinkError, Result};

/// Application callback for delivered messages. Returning `false` reports
/// the delivery as failed so the broker redelivers.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &Message) -> bool;
}

#[derive(Debug, Default)]
pub struct PacketHandler;

impl PacketHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Handler for PacketHandler {
    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::Packet(_))
    }

    fn process(&self, ctx: &mut ForwardContext, event: Event) -> Result<()> {
        let Event::Packet(PacketEvent { remote, packet }) = event else {
            return Err(LinkError::InvalidEventType {
                handler: "packet".to_string(),
                event: event.kind(),
            });
        };

        match packet.cmd {
            CmdType::BytesMessage | CmdType::StringMessage => {
                let message = unmarshal_message(&packet)?;
                ctx.send_forward(Event::Accept(AcceptEvent {
                    remote,
                    opaque: packet.opaque,
                    message,
                }));
            }
            other => debug!(remote = %remote, cmd = ?other, "ignoring unsolicited packet"),
        }
        Ok(())
    }
}

pub struct AcceptHandler {
    listener: Arc<dyn MessageListener>,
    group_id: String,
}

impl AcceptHandler {
    pub fn new(listener: Arc<dyn MessageListener>, group_id: impl Into<String>) -> Self {
        Self {
            listener,
            group_id: group_id.into(),
        }
    }
}

impl Handler for AcceptHandler {
    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::Accept(_))
    }

    fn process(&self, ctx: &mut ForwardContext, event: Event) -> Result<()> {
        let Event::Accept(accept) = event else {
            return Err(LinkError::InvalidEventType {
                handler: "accept".to_string(),
                event: event.kind(),
            });
        };

        let status = self.listener.on_message(&accept.message);
        let ack = DeliverAck {
            message_id: accept.message.header.message_id.clone(),
            group_id: self.group_id.clone(),
            status,
        };
        let packet = Packet::response(accept.opaque, CmdType::DeliverAck, serde_json::to_vec(&ack)?);
        ctx.send_forward(Event::Remoting(RemotingEvent::to_host(accept.remote, packet)));
        Ok(())
    }
}

/// Feeds packets read by every session into the client pipeline.
pub struct InboundDispatcher {
    pipeline: Arc<Pipeline>,
    flow: Arc<FlowControl>,
}

impl InboundDispatcher {
    pub fn new(pipeline: Arc<Pipeline>, flow: Arc<FlowControl>) -> Self {
        Self { pipeline, flow }
    }
}

impl PacketDispatcher for InboundDispatcher {
    fn dispatch(&self, remote: &str, packet: Packet) {
        self.flow.dispatcher.incr(1);
        let event = Event::Packet(PacketEvent {
            remote: remote.to_string(),
            packet,
        });
        if let Err(e) = self.pipeline.fire(event) {
            warn!(remote, error = %e, "inbound packet dropped");
        }
    }
}
