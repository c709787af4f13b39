//! Handler chain
//!
//! Events travel through an ordered list of named handlers. Each handler
//! declares which event kinds it accepts; handlers that do not accept an
//! event are skipped. A handler passes work downstream by placing the next
//! event on its `ForwardContext`. The chain stops when a handler forwards
//! nothing or returns an error.

pub mod remoting;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::trace;

use crate::broker::DeliverEvent;
use crate::transport::{Message, Packet};
use crate::utils::Result;

pub use remoting::RemotingHandler;

/// A raw packet read from `remote`.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub remote: String,
    pub packet: Packet,
}

/// A decoded message handed to the application.
#[derive(Debug, Clone)]
pub struct AcceptEvent {
    pub remote: String,
    pub opaque: u32,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// Exact connection addresses.
    Hosts(Vec<String>),
    /// One live connection per group id.
    Groups(Vec<String>),
}

/// A packet ready to be written to remote connections.
#[derive(Debug, Clone)]
pub struct RemotingEvent {
    pub packet: Packet,
    pub targets: Targets,
}

impl RemotingEvent {
    pub fn to_host(host: impl Into<String>, packet: Packet) -> Self {
        Self {
            packet,
            targets: Targets::Hosts(vec![host.into()]),
        }
    }

    pub fn to_groups(groups: Vec<String>, packet: Packet) -> Self {
        Self {
            packet,
            targets: Targets::Groups(groups),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Packet(PacketEvent),
    Accept(AcceptEvent),
    Deliver(DeliverEvent),
    Remoting(RemotingEvent),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Packet(_) => "packet",
            Event::Accept(_) => "accept",
            Event::Deliver(_) => "deliver",
            Event::Remoting(_) => "remoting",
        }
    }
}

/// Collects the event a handler wants the rest of the chain to see.
#[derive(Debug, Default)]
pub struct ForwardContext {
    forwarded: Option<Event>,
}

impl ForwardContext {
    pub fn send_forward(&mut self, event: Event) {
        self.forwarded = Some(event);
    }

    pub fn take(&mut self) -> Option<Event> {
        self.forwarded.take()
    }
}

pub trait Handler: Send + Sync {
    fn accepts(&self, event: &Event) -> bool;

    fn process(&self, ctx: &mut ForwardContext, event: Event) -> Result<()>;
}

#[derive(Default)]
pub struct Pipeline {
    handlers: Vec<(String, Arc<dyn Handler>)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the end of the chain.
    pub fn register(&mut self, name: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        self.handlers.push((name.into(), Arc::new(handler)));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn fire(&self, event: Event) -> Result<()> {
        let mut current = event;
        for (name, handler) in &self.handlers {
            if !handler.accepts(&current) {
                continue;
            }
            trace!(handler = %name, event = current.kind(), "processing");
            let mut ctx = ForwardContext::default();
            handler.process(&mut ctx, current)?;
            match ctx.take() {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.names())
            .finish()
    }
}
