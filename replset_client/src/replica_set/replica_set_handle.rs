use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::instrument;

use crate::{
    connection::ChannelId, connection_factory::ConnectionFactory, protocol::ChannelEvent,
    protocol::Request, read_preference::ReadPreference, run_replica_set_actor,
    topology::Topology, ReplicaSetActor, ReplicaSetBuilder, ReplicaSetConfiguration,
    ReplicaSetError, ReplicaSetMessage,
};

/**
This a handle to the actor that owns the replica set topology.

Only one ReplicaSetActor should exist per replica set, since each owns its own connection pools.
Cloning this handle is very cheap and will not instantiate a new actor in the background.
When the last handle goes out of scope and is dropped, the actor closes every connection and stops.

Readers that only need to look at the topology should use [`snapshot`](ReplicaSet::snapshot) or
[`changed`](ReplicaSet::changed). Neither goes through the actor.
*/
#[derive(Clone, Debug)]
pub struct ReplicaSet {
    sender: mpsc::Sender<ReplicaSetMessage>,
    topology: watch::Receiver<Arc<Topology>>,
}

impl ReplicaSet {
    pub fn builder() -> ReplicaSetBuilder {
        ReplicaSetBuilder::default()
    }

    // This is pub(crate) so only the builder can crank it out
    pub(crate) fn new(
        config: ReplicaSetConfiguration,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(8);
        let (mut actor, mut topology) = ReplicaSetActor::new(receiver, &config, factory);
        actor.initialize();
        // The initial snapshot counts as seen for `changed`
        let _ = topology.borrow_and_update();
        tokio::spawn(run_replica_set_actor(actor));

        Self { sender, topology }
    }

    /// The last published topology.
    pub fn snapshot(&self) -> Arc<Topology> {
        self.topology.borrow().clone()
    }

    /// Waits for the next published topology.
    pub async fn changed(&mut self) -> Result<Arc<Topology>, ReplicaSetError> {
        self.topology
            .changed()
            .await
            .map_err(|_| ReplicaSetError::ActorGone)?;
        Ok(self.snapshot())
    }

    /// The current topology, after every message sent before this one has
    /// been handled.
    #[instrument(level = "debug", name = "Actor Handle - Get Topology", skip(self))]
    pub async fn topology(&self) -> Result<Arc<Topology>, ReplicaSetError> {
        let (tx, rx) = oneshot::channel();
        self.request(ReplicaSetMessage::GetTopology { respond_to: tx }, rx)
            .await
    }

    /// Writes `request` to a connection of a member matching `preference`.
    ///
    /// Returns the channel the request went out on, or `None` when no member
    /// currently matches. The reply arrives on that channel's event stream.
    #[instrument(level = "debug", name = "Actor Handle - Send", skip(self, request))]
    pub async fn send(
        &self,
        preference: ReadPreference,
        request: Request,
    ) -> Result<Option<ChannelId>, ReplicaSetError> {
        let (tx, rx) = oneshot::channel();
        let message = ReplicaSetMessage::Send {
            preference,
            request,
            write_concern: None,
            respond_to: tx,
        };
        self.request(message, rx)
            .await?
            .map_err(ReplicaSetError::from)
    }

    /// Like [`send`](ReplicaSet::send), with `check` written right after
    /// `request` on the same connection.
    #[instrument(
        level = "debug",
        name = "Actor Handle - Send With Write Concern",
        skip(self, request, check)
    )]
    pub async fn send_with_write_concern(
        &self,
        preference: ReadPreference,
        request: Request,
        check: Request,
    ) -> Result<Option<ChannelId>, ReplicaSetError> {
        let (tx, rx) = oneshot::channel();
        let message = ReplicaSetMessage::Send {
            preference,
            request,
            write_concern: Some(check),
            respond_to: tx,
        };
        self.request(message, rx)
            .await?
            .map_err(ReplicaSetError::from)
    }

    /// Starts a heartbeat round now instead of waiting for the timer.
    pub async fn refresh(&self) -> Result<(), ReplicaSetError> {
        self.sender
            .send(ReplicaSetMessage::SendHeartbeats)
            .await
            .map_err(|_| ReplicaSetError::ActorGone)
    }

    /// Hands an event to the actor, ordered with every other message sent
    /// through this handle. Used by transports that report out of band.
    pub async fn notify(&self, event: ChannelEvent) -> Result<(), ReplicaSetError> {
        self.sender
            .send(ReplicaSetMessage::Event(event))
            .await
            .map_err(|_| ReplicaSetError::ActorGone)
    }

    /// Closes every connection and stops the actor. Other clones of this
    /// handle get [`ReplicaSetError::ActorGone`] afterwards.
    #[instrument(level = "debug", name = "Actor Handle - Shutdown", skip(self))]
    pub async fn shutdown(&self) -> Result<(), ReplicaSetError> {
        let (tx, rx) = oneshot::channel();
        self.request(ReplicaSetMessage::Shutdown { respond_to: tx }, rx)
            .await
    }

    async fn request<T>(
        &self,
        message: ReplicaSetMessage,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, ReplicaSetError> {
        tracing::trace!("Sending message to actor");
        self.sender
            .send(message)
            .await
            .map_err(|_| ReplicaSetError::ActorGone)?;

        tracing::trace!("Waiting for oneshot to return");
        rx.await.map_err(|_| ReplicaSetError::ActorGone)
    }
}
