use std::{mem, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior},
};
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::{
    channel::ChannelError,
    connection::{ChannelId, ConnectionState},
    connection_factory::ConnectionFactory,
    hello_response::HelloResponse,
    node::{Node, NodeRole},
    protocol::{ChannelEvent, EventSender, Reply, Request},
    read_preference::ReadPreference,
    targeted_view::TargetedView,
    topology::Topology,
    ReplicaSetConfiguration, ReplicaSetMessage,
};

/// Capacity of the queue channels report their events on.
const EVENT_QUEUE_SIZE: usize = 64;

/// Sole owner and writer of the topology. Every change goes through
/// [`transform`](ReplicaSetActor::transform) and is then published whole.
pub struct ReplicaSetActor {
    factory: Arc<dyn ConnectionFactory>,
    pool_size: usize,
    heartbeat_interval: Duration,
    receiver: mpsc::Receiver<ReplicaSetMessage>,
    /// Channels created by this actor report here.
    events: mpsc::Receiver<ChannelEvent>,
    event_sender: EventSender,
    topology: Topology,
    publisher: watch::Sender<Arc<Topology>>,
    /// Built on first use from `topology` and dropped whenever it changes.
    view: Option<TargetedView>,
    last_heartbeat_id: i64,
}

impl ReplicaSetActor {
    pub(crate) fn new(
        receiver: mpsc::Receiver<ReplicaSetMessage>,
        config: &ReplicaSetConfiguration,
        factory: Arc<dyn ConnectionFactory>,
    ) -> (Self, watch::Receiver<Arc<Topology>>) {
        let (event_sender, events) = mpsc::channel(EVENT_QUEUE_SIZE);
        let topology = Topology {
            name: config.replica_set_name.clone(),
            ..Topology::from_seeds(&config.seeds)
        };
        let (publisher, subscriber) = watch::channel(Arc::new(topology.clone()));

        let actor = Self {
            factory,
            pool_size: config.pool_size,
            heartbeat_interval: config.heartbeat_interval(),
            receiver,
            events,
            event_sender,
            topology,
            publisher,
            view: None,
            last_heartbeat_id: 0,
        };
        (actor, subscriber)
    }

    /// Sizes every seed's pool and starts connecting.
    #[instrument(level = "debug", skip(self))]
    pub(crate) fn initialize(&mut self) {
        tracing::debug!("Connecting to {} seed(s)", self.topology.nodes.len());
        self.sync_pools();
        self.publish();
    }

    /// Message handler for the ReplicaSetActor. Returns `false` once the actor
    /// should stop.
    #[instrument(
        level = "debug",
        name = "ReplicaSet Actor - Handle Message",
        skip(self),
        fields(correlation_id)
    )]
    fn handle_message(&mut self, msg: ReplicaSetMessage) -> bool {
        // Apply a correlation id to all child spans of this message handler
        Span::current().record("correlation_id", Uuid::new_v4().to_string());
        match msg {
            ReplicaSetMessage::Event(event) => self.handle_event(event),
            ReplicaSetMessage::GetTopology { respond_to } => {
                let _ = respond_to.send(self.publisher.borrow().clone());
            }
            ReplicaSetMessage::Send {
                preference,
                request,
                write_concern,
                respond_to,
            } => {
                let result = self.send(&preference, request, write_concern);
                let _ = respond_to.send(result);
            }
            ReplicaSetMessage::SendHeartbeats => self.send_heartbeats(),
            ReplicaSetMessage::Shutdown { respond_to } => {
                self.shutdown();
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    /// Folds one channel event into the topology and publishes the result.
    /// Events for channels no node owns any more are dropped.
    #[instrument(level = "debug", skip(self))]
    fn handle_event(&mut self, event: ChannelEvent) {
        let channel = event.channel();
        if self.topology.find_node_by_connection_id(channel).is_none() {
            tracing::debug!("Ignoring event for unknown channel {}", channel);
            return;
        }

        match event {
            ChannelEvent::Connected(id) => {
                let heartbeat_id = self.next_heartbeat_id();
                self.transform(|t| {
                    t.update_by_connection_id(id, |node| {
                        let node = node
                            .update_connection_by_id(id, |c| c.with_state(ConnectionState::Usable));
                        let node = if node.role == NodeRole::NotConnected {
                            node.with_role(NodeRole::Unknown)
                        } else {
                            node
                        };
                        node.send_heartbeat(heartbeat_id)
                    })
                });
            }
            ChannelEvent::Disconnected(id) => {
                self.transform(|t| {
                    t.update_by_connection_id(id, |node| {
                        mark_if_unreachable(node.update_connection_by_id(id, |c| {
                            c.with_state(ConnectionState::NotConnected)
                        }))
                    })
                });
            }
            ChannelEvent::Closed(id) => {
                self.transform(|t| {
                    t.update_by_connection_id(id, |node| {
                        mark_if_unreachable(node.remove_connection(id))
                    })
                });
            }
            ChannelEvent::Authenticated {
                channel,
                credential,
            } => {
                self.transform(|t| {
                    t.update_by_connection_id(channel, |node| {
                        node.update_connection_by_id(channel, |c| c.authenticate(credential))
                    })
                });
            }
            ChannelEvent::Reply {
                channel,
                reply: Reply::Heartbeat { id, hello },
            } => {
                self.transform(|t| {
                    t.update_by_connection_id(channel, |node| node.heartbeat_received(id))
                });
                if let Some(hello) = hello {
                    self.apply_hello(channel, &hello);
                }
            }
            ChannelEvent::Reply {
                channel,
                reply: Reply::Response { .. },
            } => {
                tracing::trace!("Reply on {} is left to the dispatcher", channel);
                return;
            }
        }
        self.publish();
    }

    /// Applies what a member said about itself and the set it belongs to.
    ///
    /// The replying member's role is always taken. A higher set version than
    /// the one known replaces the node list through a merge and heartbeats
    /// every member; anything else only adds members not seen yet.
    #[instrument(level = "debug", skip(self, hello))]
    fn apply_hello(&mut self, channel: ChannelId, hello: &HelloResponse) {
        let Some(name) = self
            .topology
            .find_node_by_connection_id(channel)
            .map(|n| n.name.clone())
        else {
            return;
        };

        if let (Some(expected), Some(reported)) = (&self.topology.name, &hello.set_name) {
            if expected != reported {
                tracing::warn!(
                    "{} belongs to set `{}`, expected `{}`. Ignoring its hello",
                    name,
                    reported,
                    expected
                );
                return;
            }
        }

        let role = hello.role();
        tracing::debug!("{} reports itself as {:?}", name, role);
        self.transform(|t| {
            let t = if role == NodeRole::Primary {
                t.demote_primaries_except(&name)
            } else {
                t
            };
            t.update_by_name(&name, |n| n.with_role(role))
        });

        let discovered = hello.to_topology();
        if discovered.nodes.is_empty() {
            return;
        }

        let reconfigured = match (discovered.version, self.topology.version) {
            (Some(seen), Some(known)) => seen > known,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if reconfigured {
            tracing::info!(
                "Set version moved from {:?} to {:?}, rediscovering members",
                self.topology.version,
                discovered.version
            );
            self.transform(|t| t.merge(discovered));
            self.send_heartbeats();
        } else {
            let Topology {
                name: set_name,
                nodes,
                ..
            } = discovered;
            self.transform(|mut t| {
                if t.name.is_none() {
                    t.name = set_name;
                }
                t.add_nodes(nodes)
            });
            self.sync_pools();
        }
    }

    /// Picks a node and connection for `preference` and writes to it.
    /// `Ok(None)` means no member currently satisfies `preference`.
    #[instrument(level = "debug", skip(self, request, write_concern))]
    fn send(
        &mut self,
        preference: &ReadPreference,
        request: Request,
        write_concern: Option<Request>,
    ) -> Result<Option<ChannelId>, ChannelError> {
        let topology = &self.topology;
        let view = self.view.get_or_insert_with(|| TargetedView::new(topology));

        let Some((node, connection)) = view.pick_node_and_connection(preference) else {
            tracing::debug!("No member satisfies {:?}", preference);
            return Ok(None);
        };
        tracing::trace!("Sending to {} on {}", node.name, connection.id());

        match write_concern {
            Some(check) => connection.send_with_write_concern(request, check)?,
            None => connection.send(request)?,
        }
        Ok(Some(connection.id()))
    }

    /// Refills pools, reconnects idle connections and sends every member a
    /// heartbeat, all sharing one id.
    #[instrument(level = "debug", skip(self))]
    fn send_heartbeats(&mut self) {
        let id = self.next_heartbeat_id();
        self.sync_pools();
        self.transform(|t| t.update_all(|n| n.send_heartbeat(id)));
        self.publish();
    }

    #[instrument(level = "debug", skip(self))]
    fn shutdown(&mut self) {
        let group = self.topology.make_connection_group();
        tracing::info!("Closing {} connection(s)", group.len());
        group.close_all();
    }

    fn sync_pools(&mut self) {
        let factory = self.factory.clone();
        let sender = self.event_sender.clone();
        let pool_size = self.pool_size;
        self.transform(|t| {
            t.ensure_connections(factory.as_ref(), &sender, pool_size)
                .update_all(Node::connect)
        });
    }

    fn transform<F>(&mut self, f: F)
    where
        F: FnOnce(Topology) -> Topology,
    {
        let topology = mem::take(&mut self.topology);
        self.topology = f(topology);
    }

    fn publish(&mut self) {
        self.view = None;
        self.publisher.send_replace(Arc::new(self.topology.clone()));
    }

    fn next_heartbeat_id(&mut self) -> i64 {
        self.last_heartbeat_id += 1;
        self.last_heartbeat_id
    }
}

/// A node left with no live or pending connection is not connected,
/// whatever it last reported.
fn mark_if_unreachable(node: Node) -> Node {
    let alive = node
        .connections
        .iter()
        .any(|c| c.state() != ConnectionState::NotConnected);
    if alive {
        node
    } else {
        node.with_role(NodeRole::NotConnected)
    }
}

#[instrument(level = "debug", name = "Running ReplicaSet Actor", skip(actor))]
pub async fn run_replica_set_actor(mut actor: ReplicaSetActor) {
    // Members get a heartbeat as soon as they connect, so the first round waits a
    // full interval.
    let mut heartbeat_timer = tokio::time::interval_at(
        Instant::now() + actor.heartbeat_interval,
        actor.heartbeat_interval,
    );
    heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = heartbeat_timer.tick() => {
                tracing::debug!("Sending heartbeats via timer.");
                actor.send_heartbeats();
            },
            opt_msg = actor.receiver.recv() => {
                let msg = match opt_msg {
                    Some(msg) => msg,
                    None => {
                        actor.shutdown();
                        break;
                    }
                };
                if !actor.handle_message(msg) {
                    break;
                }
            },
            Some(event) = actor.events.recv() => {
                actor.handle_event(event);
            }
        }
    }
    tracing::debug!("ReplicaSet actor stopped");
}
