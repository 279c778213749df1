use std::time::Duration;

use tokio::time::Instant;

use crate::{
    connection::{ChannelId, Connection, ConnectionState},
    connection_factory::ConnectionFactory,
    protocol::{EventSender, Request},
};

/// Used when a node name has no port, or one that does not parse.
pub const DEFAULT_PORT: u16 = 27017;

/// `PingInfo::last_sent_id` when no heartbeat is in flight.
pub const NO_PENDING_HEARTBEAT: i64 = -1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NodeRole {
    #[default]
    Unknown,
    Primary,
    Secondary,
    NotConnected,
}

impl NodeRole {
    /// Whether this role carries information. `Unknown` never overwrites a
    /// previously known role when nodes are upserted.
    pub fn is_known(self) -> bool {
        self != NodeRole::Unknown
    }

    pub fn is_queryable(self) -> bool {
        matches!(self, NodeRole::Primary | NodeRole::Secondary)
    }
}

/// Heartbeat bookkeeping. At most one heartbeat is in flight per node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingInfo {
    /// Last measured round trip. `Duration::MAX` once a heartbeat timed out.
    pub latency: Duration,
    pub last_sent_at: Option<Instant>,
    pub last_sent_id: i64,
}

impl PingInfo {
    /// How long a heartbeat may stay pending before the latency is stale.
    pub const TIMEOUT: Duration = Duration::from_secs(60);

    pub fn is_pending(&self) -> bool {
        self.last_sent_id != NO_PENDING_HEARTBEAT
    }

    fn is_timed_out(&self, now: Instant) -> bool {
        self.last_sent_at
            .map(|sent| now.saturating_duration_since(sent) > Self::TIMEOUT)
            .unwrap_or(false)
    }
}

impl Default for PingInfo {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            last_sent_at: None,
            last_sent_id: NO_PENDING_HEARTBEAT,
        }
    }
}

/// One replica set member and its connection pool.
#[derive(Clone, Debug)]
pub struct Node {
    /// `host:port`, the node's identity within a topology.
    pub name: String,
    pub connections: Vec<Connection>,
    pub role: NodeRole,
    pub member_id: Option<i32>,
    pub ping: PingInfo,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            connections: Vec::new(),
            role: NodeRole::Unknown,
            member_id: None,
            ping: PingInfo::default(),
        }
    }

    pub fn host(&self) -> &str {
        match self.name.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.name,
        }
    }

    pub fn port(&self) -> u16 {
        self.name
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_member_id(mut self, member_id: i32) -> Self {
        self.member_id = Some(member_id);
        self
    }

    /// Connections that can take a request right now.
    pub fn queryable(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.iter().filter(|c| c.usable())
    }

    pub fn is_queryable(&self) -> bool {
        self.role.is_queryable() && self.queryable().next().is_some()
    }

    pub fn connection(&self, id: ChannelId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    pub fn has_connection(&self, id: ChannelId) -> bool {
        self.connection(id).is_some()
    }

    /// Asks every connection that is neither usable nor already connecting
    /// to connect. The connection's own state decides; a channel that
    /// reports itself connected is skipped as well. Completion arrives later
    /// as a channel event.
    pub fn connect(mut self) -> Self {
        let host = self.host().to_string();
        let port = self.port();

        self.connections = self
            .connections
            .into_iter()
            .map(|connection| {
                if connection.usable()
                    || connection.state() == ConnectionState::Connecting
                    || connection.channel().is_connected()
                {
                    return connection;
                }
                match connection.channel().connect(&host, port) {
                    Ok(()) => connection.with_state(ConnectionState::Connecting),
                    Err(e) => {
                        tracing::warn!(
                            "Unable to request connect on {}. Caused by: {}",
                            connection.id(),
                            e
                        );
                        connection
                    }
                }
            })
            .collect();
        self
    }

    pub fn disconnect(&self) {
        for connection in self.connections.iter().filter(|c| c.channel().is_connected()) {
            if let Err(e) = connection.channel().disconnect() {
                tracing::warn!("Unable to disconnect {}. Caused by: {}", connection.id(), e);
            }
        }
    }

    pub fn close(&self) {
        for connection in self.connections.iter().filter(|c| c.channel().is_open()) {
            if let Err(e) = connection.channel().close() {
                tracing::warn!("Unable to close {}. Caused by: {}", connection.id(), e);
            }
        }
    }

    pub fn update_connection_by_id<F>(mut self, id: ChannelId, f: F) -> Self
    where
        F: FnOnce(Connection) -> Connection,
    {
        if let Some(index) = self.connections.iter().position(|c| c.id() == id) {
            let connection = self.connections.remove(index);
            self.connections.insert(index, f(connection));
        }
        self
    }

    /// Drops the connection from the pool. Only used once its channel closed.
    pub fn remove_connection(mut self, id: ChannelId) -> Self {
        self.connections.retain(|c| c.id() != id);
        self
    }

    /// Grows the pool to `target` connections. Never shrinks it.
    pub fn ensure_connections(
        mut self,
        factory: &dyn ConnectionFactory,
        receiver: &EventSender,
        target: usize,
    ) -> Self {
        let current = self.connections.len();
        if current >= target {
            return self;
        }

        let host = self.host().to_string();
        let port = self.port();
        tracing::debug!(
            "Growing pool of {} from {} to {} connections",
            self.name,
            current,
            target
        );
        self.connections
            .extend((current..target).map(|_| factory.create(&host, port, receiver.clone())));
        self
    }

    /// Sends heartbeat `id` on the first queryable connection.
    ///
    /// A new heartbeat is only recorded as pending when none is in flight, or
    /// when the one in flight has been pending longer than
    /// [`PingInfo::TIMEOUT`]; in that case the latency is also marked stale.
    pub fn send_heartbeat(mut self, id: i64) -> Self {
        let sent = self
            .queryable()
            .next()
            .map(|connection| connection.send(Request::Heartbeat { id }));

        match sent {
            None => {
                tracing::trace!("No queryable connection on {}, skipping heartbeat", self.name);
                return self;
            }
            Some(Err(e)) => {
                tracing::warn!("Heartbeat to {} failed. Caused by: {}", self.name, e);
                return self;
            }
            Some(Ok(())) => {}
        }

        let now = Instant::now();
        if !self.ping.is_pending() {
            self.ping.last_sent_at = Some(now);
            self.ping.last_sent_id = id;
        } else if self.ping.is_timed_out(now) {
            tracing::debug!(
                "Heartbeat {} to {} timed out, marking latency stale",
                self.ping.last_sent_id,
                self.name
            );
            self.ping = PingInfo {
                latency: Duration::MAX,
                last_sent_at: Some(now),
                last_sent_id: id,
            };
        }
        self
    }

    /// Records the round trip of the pending heartbeat. Replies for any other
    /// id are stale or duplicated and are ignored.
    pub fn heartbeat_received(mut self, id: i64) -> Self {
        if !self.ping.is_pending() || self.ping.last_sent_id != id {
            tracing::trace!("Ignoring heartbeat reply {} from {}", id, self.name);
            return self;
        }

        if let Some(sent) = self.ping.last_sent_at {
            self.ping.latency = Instant::now().saturating_duration_since(sent);
        }
        self.ping.last_sent_at = None;
        self.ping.last_sent_id = NO_PENDING_HEARTBEAT;
        self
    }
}
