use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::{
    channel::{Channel, ChannelError},
    connection::{ChannelId, Connection, ConnectionState},
    connection_factory::ConnectionFactory,
    node::{Node, NodeRole},
    protocol::{EventSender, Request},
};

#[derive(Debug, Default)]
pub struct Recorded {
    pub writes: Vec<Vec<Request>>,
    pub connects: Vec<(String, u16)>,
    pub disconnects: usize,
    pub closes: usize,
    pub connected: bool,
    pub closed: bool,
}

/// A channel that only records what was asked of it.
#[derive(Clone, Debug)]
pub struct RecordingChannel {
    id: ChannelId,
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            id: ChannelId::new(),
            inner: Arc::default(),
        }
    }

    pub fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap()
    }

    pub fn set_connected(&self, connected: bool) {
        self.recorded().connected = connected;
    }

    pub fn heartbeats(&self) -> Vec<i64> {
        self.recorded()
            .writes
            .iter()
            .flatten()
            .filter_map(|r| match r {
                Request::Heartbeat { id } => Some(*id),
                _ => None,
            })
            .collect()
    }
}

impl Channel for RecordingChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.recorded().connected
    }

    fn is_open(&self) -> bool {
        !self.recorded().closed
    }

    /// Connects at once. Whoever drives the test still has to deliver the
    /// `Connected` event.
    fn connect(&self, host: &str, port: u16) -> Result<(), ChannelError> {
        let mut recorded = self.recorded();
        recorded.connects.push((host.to_string(), port));
        recorded.connected = true;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), ChannelError> {
        let mut recorded = self.recorded();
        recorded.disconnects += 1;
        recorded.connected = false;
        Ok(())
    }

    fn close(&self) -> Result<(), ChannelError> {
        let mut recorded = self.recorded();
        recorded.closes += 1;
        recorded.connected = false;
        recorded.closed = true;
        Ok(())
    }

    fn write(&self, requests: Vec<Request>) -> Result<(), ChannelError> {
        self.recorded().writes.push(requests);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingFactory {
    created: Mutex<Vec<(String, u16, RecordingChannel)>>,
}

impl RecordingFactory {
    pub fn channels(&self) -> Vec<RecordingChannel> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, c)| c.clone())
            .collect()
    }

    pub fn channels_for(&self, host: &str, port: u16) -> Vec<RecordingChannel> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, p, _)| h == host && *p == port)
            .map(|(_, _, c)| c.clone())
            .collect()
    }
}

impl ConnectionFactory for RecordingFactory {
    fn create(&self, host: &str, port: u16, _receiver: EventSender) -> Connection {
        let channel = RecordingChannel::new();
        self.created
            .lock()
            .unwrap()
            .push((host.to_string(), port, channel.clone()));
        Connection::new(Box::new(channel))
    }
}

pub fn event_sender() -> EventSender {
    mpsc::channel(8).0
}

pub fn connection(state: ConnectionState) -> (Connection, RecordingChannel) {
    let channel = RecordingChannel::new();
    let connection = Connection::new(Box::new(channel.clone())).with_state(state);
    (connection, channel)
}

/// A node holding `usable` Usable connections.
pub fn node(name: &str, role: NodeRole, usable: usize) -> Node {
    let mut node = Node::new(name).with_role(role);
    node.connections = (0..usable)
        .map(|_| connection(ConnectionState::Usable).0)
        .collect();
    node
}
