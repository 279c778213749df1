use std::{fmt::Debug, sync::Arc};

use tracing::instrument;

use crate::{
    channel::TcpChannel,
    connection::Connection,
    protocol::EventSender,
    wire_codec::{JsonLinesCodec, WireCodec},
};

/// Creates unconnected [`Connection`]s for a node's pool.
///
/// Passed explicitly from the builder down to every pool sizing call.
pub trait ConnectionFactory: Debug + Send + Sync {
    /// The returned connection is `NotConnected`. Its channel reports every
    /// inbound event to `receiver`.
    fn create(&self, host: &str, port: u16, receiver: EventSender) -> Connection;
}

/// Builds [`TcpChannel`]s (TCP_NODELAY on) framed with the given codec.
#[derive(Clone, Debug)]
pub struct TcpConnectionFactory {
    codec: Arc<dyn WireCodec>,
}

impl TcpConnectionFactory {
    pub fn new(codec: Arc<dyn WireCodec>) -> Self {
        Self { codec }
    }
}

impl Default for TcpConnectionFactory {
    fn default() -> Self {
        Self::new(Arc::new(JsonLinesCodec))
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    #[instrument(level = "trace", skip(self, receiver))]
    fn create(&self, host: &str, port: u16, receiver: EventSender) -> Connection {
        let channel = TcpChannel::spawn(self.codec.clone(), receiver);
        Connection::new(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::connection::ConnectionState;

    #[tokio::test]
    async fn created_connections_are_unconnected_and_distinct() {
        let (tx, _rx) = mpsc::channel(8);
        let factory = TcpConnectionFactory::default();

        let first = factory.create("localhost", 27017, tx.clone());
        let second = factory.create("localhost", 27017, tx);

        assert_eq!(first.state(), ConnectionState::NotConnected);
        assert!(!first.channel().is_connected());
        assert!(first.channel().is_open());
        assert_ne!(first.id(), second.id());
    }
}
