//! The `client` module holds the client side of the broker conversation.
//!
//! It covers the authenticated connection pool keyed by broker address and
//! subscriber group, the heartbeat that detects half-open connections, the
//! scheduler that recovers dead pooled connections, and the topic route
//! manager that keeps the publish routes in step with discovery.

pub mod connection;
pub mod credential;
pub mod handshake;
pub mod heartbeat;
pub mod inbound;
pub mod pool;
pub mod reconnect;
pub mod route;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::BrokerConnection;
pub use credential::GroupCredential;
pub use heartbeat::{HeartbeatHandler, HeartbeatMonitor};
pub use inbound::{AcceptHandler, InboundDispatcher, MessageListener, PacketHandler};
pub use pool::ConnectionPool;
pub use reconnect::{ReconnectScheduler, ReconnectTask};
pub use route::{RouteHandle, TopicRouteManager};
