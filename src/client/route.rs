//! Topic routes
//!
//! `TopicRouteManager` keeps, for every topic the client cares about, the
//! list of brokers it may publish through. The list is rebuilt wholesale from
//! each discovery update and swapped in under the write lock; `send` picks one
//! entry at random under the read lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::binding::Binding;
use crate::client::connection::BrokerConnection;
use crate::client::credential::GroupCredential;
use crate::client::handshake::establish;
use crate::client::heartbeat::{HeartbeatHandler, HeartbeatMonitor};
use crate::client::inbound::{AcceptHandler, InboundDispatcher, MessageListener, PacketHandler};
use crate::client::pool::ConnectionPool;
use crate::client::reconnect::ReconnectScheduler;
use crate::config::Settings;
use crate::discovery::{Discovery, DiscoveryEvent, SERVER_ROOT, topic_of_server_path};
use crate::pipeline::{Event, Pipeline, RemotingEvent, RemotingHandler};
use crate::stat::FlowControl;
use crate::transport::{Connector, Message};
use crate::utils::{LinkError, Result};

/// One broker a topic can be published through.
#[derive(Clone)]
pub struct RouteHandle {
    address: String,
    pipeline: Arc<Pipeline>,
}

impl RouteHandle {
    fn new(address: &str, pipeline: Arc<Pipeline>) -> Self {
        Self {
            address: address.to_string(),
            pipeline,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn send(&self, message: &Message) -> Result<()> {
        let packet = message.to_packet()?;
        self.pipeline
            .fire(Event::Remoting(RemotingEvent::to_host(&self.address, packet)))
    }
}

impl std::fmt::Debug for RouteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteHandle")
            .field("address", &self.address)
            .finish()
    }
}

pub struct TopicRouteManager {
    credential: Arc<GroupCredential>,
    host_id: String,
    topics: RwLock<Vec<String>>,
    bindings: RwLock<Vec<Binding>>,
    routes: RwLock<HashMap<String, Arc<[RouteHandle]>>>,
    pool: Arc<ConnectionPool>,
    scheduler: Arc<ReconnectScheduler>,
    heartbeat: Arc<HeartbeatMonitor>,
    pipeline: Arc<Pipeline>,
    connector: Connector,
    discovery: Arc<dyn Discovery>,
    flow: Arc<FlowControl>,
    handshake_timeout: Duration,
    flow_interval: Duration,
    watch: Mutex<Option<JoinHandle<()>>>,
}

impl TopicRouteManager {
    /// Wires pool, scheduler and the client pipeline together. Must be called
    /// from within a tokio runtime.
    pub fn new(
        settings: &Settings,
        discovery: Arc<dyn Discovery>,
        listener: Arc<dyn MessageListener>,
    ) -> Arc<Self> {
        let client = &settings.client;
        let credential = Arc::new(GroupCredential::new(&client.group_id, &client.secret_key));
        let flow = FlowControl::new(format!("brokerlink-{}", client.group_id));
        let handshake_timeout = Duration::from_millis(settings.transport.handshake_timeout_ms);

        let scheduler = ReconnectScheduler::new(&settings.reconnect);
        let pool = ConnectionPool::new(scheduler.clone());

        let mut pipeline = Pipeline::new();
        pipeline
            .register("heartbeat", HeartbeatHandler::new())
            .register("packet", PacketHandler::new())
            .register("accept", AcceptHandler::new(listener, &client.group_id))
            .register("remoting", RemotingHandler::new(pool.clone()));
        let pipeline = Arc::new(pipeline);

        let dispatcher = Arc::new(InboundDispatcher::new(pipeline.clone(), flow.clone()));
        let connector = Connector::new(
            Duration::from_millis(settings.transport.dial_timeout_ms),
            dispatcher,
            flow.clone(),
        );
        scheduler.start(connector.clone(), handshake_timeout);
        let heartbeat = HeartbeatMonitor::new(
            pool.clone(),
            Duration::from_millis(settings.transport.heartbeat_interval_ms.max(1)),
            Duration::from_millis(settings.transport.heartbeat_timeout_ms),
        );

        Arc::new(Self {
            credential,
            host_id: client.host_id.clone(),
            topics: RwLock::new(Vec::new()),
            bindings: RwLock::new(Vec::new()),
            routes: RwLock::new(HashMap::new()),
            pool,
            scheduler,
            heartbeat,
            pipeline,
            connector,
            discovery,
            flow,
            handshake_timeout,
            flow_interval: Duration::from_secs(settings.flow.interval_secs.max(1)),
            watch: Mutex::new(None),
        })
    }

    /// Declares topics this client publishes to.
    pub fn set_publish_topics<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.write().extend(topics.into_iter().map(Into::into));
    }

    /// Declares subscriptions. Every binding is stamped with the local group.
    pub fn set_bindings(&self, bindings: Vec<Binding>) {
        let group_id = self.credential.group_id();
        let stamped = bindings.into_iter().map(|mut binding| {
            binding.group_id = group_id.to_string();
            binding
        });
        self.bindings.write().extend(stamped);
    }

    /// Publish topics and binding topics, duplicates removed, in declaration
    /// order.
    pub fn declared_topics(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let declared = self.topics.read().clone();
        let bound: Vec<String> = self.bindings.read().iter().map(|b| b.topic.clone()).collect();
        declared
            .into_iter()
            .chain(bound)
            .filter(|topic| seen.insert(topic.clone()))
            .collect()
    }

    /// Announces the client, builds the initial routes and starts watching
    /// discovery. Fails when no declared topic ends up with a broker.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let topics = self.declared_topics();
        *self.topics.write() = topics.clone();
        let mut events = self.discovery.subscribe();

        let group_id = self.credential.group_id();
        if let Err(e) = self
            .discovery
            .publish_topics(&topics, group_id, &self.host_id)
            .await
        {
            error!(group_id, error = %e, "failed to publish topics");
            return Err(e);
        }
        info!(group_id, ?topics, "topics published");

        for topic in &topics {
            let hosts = self.discovery.brokers_and_watch(topic).await?;
            info!(topic = %topic, ?hosts, "brokers fetched");
            self.on_brokers_changed(topic, hosts).await;
        }

        let routed = self.routes.read().values().any(|handles| !handles.is_empty());
        if !routed {
            error!(?topics, "no valid broker for any topic");
            return Err(LinkError::NoValidBroker { topics });
        }

        let bindings = self.bindings.read().clone();
        if !bindings.is_empty() {
            self.discovery.publish_bindings(group_id, &bindings).await?;
            info!(group_id, count = bindings.len(), "bindings published");
        }

        self.flow.start(self.flow_interval);
        self.heartbeat.start();

        let manager: Weak<Self> = Arc::downgrade(self);
        let watch = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.on_discovery_event(event).await;
            }
            debug!("discovery watch ended");
        });
        *self.watch.lock() = Some(watch);
        Ok(())
    }

    /// Rebuilds the route list of `topic` from the brokers discovery reports.
    ///
    /// Brokers not yet pooled are dialed concurrently; those that fail are
    /// left out. Brokers dropped from the list are evicted from the pool
    /// unless another topic still routes through them.
    pub async fn on_brokers_changed(&self, topic: &str, hosts: Vec<String>) {
        let mut pending: Vec<&str> = Vec::new();
        for host in &hosts {
            if !self.pool.is_authenticated(host) && !pending.contains(&host.as_str()) {
                pending.push(host);
            }
        }

        let dialed = join_all(pending.iter().map(|host| self.open_connection(host))).await;
        let mut failed = HashSet::new();
        for (host, result) in pending.iter().zip(dialed) {
            match result {
                Ok(connection) => self.pool.authenticate(self.credential.clone(), connection),
                Err(e) => {
                    warn!(topic, address = %host, error = %e, "broker unreachable");
                    failed.insert(*host);
                }
            }
        }

        let mut handles = Vec::with_capacity(hosts.len());
        for host in &hosts {
            if failed.contains(host.as_str()) {
                continue;
            }
            handles.push(RouteHandle::new(host, self.pipeline.clone()));
        }
        let handles: Arc<[RouteHandle]> = handles.into();

        let previous = self.routes.write().insert(topic.to_string(), handles.clone());
        info!(
            topic,
            routes = ?handles.iter().map(RouteHandle::address).collect::<Vec<_>>(),
            "routes updated"
        );

        let Some(previous) = previous else {
            return;
        };
        let stale: Vec<String> = {
            let routes = self.routes.read();
            let mut stale = Vec::new();
            for handle in previous.iter() {
                let address = handle.address();
                let still_routed = routes
                    .values()
                    .any(|handles| handles.iter().any(|h| h.address() == address));
                if !still_routed && !stale.iter().any(|s| s == address) {
                    stale.push(address.to_string());
                }
            }
            stale
        };
        if !stale.is_empty() {
            info!(topic, ?stale, "evicting brokers no longer routed");
            self.pool.evict(&stale);
        }
    }

    /// Reacts to a discovery watch notification.
    pub async fn on_discovery_event(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::NodeChanged { path, children } => {
                let Some(topic) = topic_of_server_path(&path) else {
                    if path.starts_with(SERVER_ROOT) {
                        warn!(path = %path, "malformed broker path");
                    } else {
                        debug!(path = %path, "ignoring node change");
                    }
                    return;
                };
                let declared = self.topics.read().iter().any(|t| t == topic);
                if !declared {
                    warn!(topic, "refusing broker change for undeclared topic");
                    return;
                }
                self.on_brokers_changed(topic, children).await;
            }
            DiscoveryEvent::DataChanged { path, .. } => {
                debug!(path = %path, "binding data changed");
            }
        }
    }

    /// Publishes `message` through one randomly chosen broker of `topic`.
    pub fn send(&self, topic: &str, message: &Message) -> Result<()> {
        let handle = {
            let routes = self.routes.read();
            match routes.get(topic).filter(|handles| !handles.is_empty()) {
                Some(handles) => handles[rand::rng().random_range(0..handles.len())].clone(),
                None => {
                    warn!(topic, "no route");
                    return Err(LinkError::NoRoute {
                        topic: topic.to_string(),
                    });
                }
            }
        };
        handle.send(message)
    }

    /// Broker addresses currently routing `topic`.
    pub fn routes(&self, topic: &str) -> Vec<String> {
        self.routes
            .read()
            .get(topic)
            .map(|handles| handles.iter().map(|h| h.address.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn flow(&self) -> &Arc<FlowControl> {
        &self.flow
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeat
    }

    /// Stops watching, sampling, heartbeats and reconnection, then closes
    /// discovery and every pooled connection.
    pub async fn destroy(&self) {
        let watch = self.watch.lock().take();
        if let Some(watch) = watch {
            watch.abort();
        }
        self.flow.stop();
        self.heartbeat.stop();
        self.scheduler.shutdown();
        self.discovery.close().await;
        self.pool.shutdown_all();
        info!(group_id = self.credential.group_id(), "route manager destroyed");
    }

    async fn open_connection(&self, host: &str) -> Result<Arc<BrokerConnection>> {
        let session = establish(&self.connector, host, &self.credential, self.handshake_timeout).await?;
        Ok(BrokerConnection::new(host, session))
    }
}
