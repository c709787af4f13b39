//! # Brokerlink
//!
//! `brokerlink` is the connection layer between message-queue clients and the
//! brokers that serve their topics. It keeps authenticated TCP connections to
//! brokers, recovers them when they die, tracks which brokers serve which
//! topic as discovery reports changes, and resolves which subscriber groups a
//! stored message still has to reach.
//!
//! ## Core Modules
//!
//! - `binding`: Subscriber bindings and the exchanger that matches them to messages.
//! - `broker`: Broker-side delivery stages that compute target groups.
//! - `client`: Connection pool, reconnection scheduler and topic route manager.
//! - `config`: Loads settings from files and the environment.
//! - `discovery`: The discovery contract and an in-process registry.
//! - `persistence`: Message records and their `sled`-backed store.
//! - `pipeline`: The handler chain events travel through.
//! - `stat`: Read, dispatch and write flow counters.
//! - `transport`: Packet framing, wire messages and TCP sessions.
//! - `utils`: Shared error type and logging setup.

pub mod binding;
pub mod broker;
pub mod client;
pub mod config;
pub mod discovery;
pub mod persistence;
pub mod pipeline;
pub mod stat;
pub mod transport;
pub mod utils;
