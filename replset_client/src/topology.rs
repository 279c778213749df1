use crate::{
    channel::Channel,
    connection::{ChannelId, Connection},
    connection_factory::ConnectionFactory,
    node::{Node, NodeRole},
    protocol::{EventSender, Request},
};

/// One consistent snapshot of the replica set.
///
/// Every transform consumes the snapshot and returns the next one; node order
/// is kept except where noted.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    /// Replica set name. `None` means a standalone server.
    pub name: Option<String>,
    pub version: Option<i64>,
    pub nodes: Vec<Node>,
}

impl Topology {
    pub fn new(name: Option<String>, version: Option<i64>, nodes: Vec<Node>) -> Self {
        Self {
            name,
            version,
            nodes,
        }
    }

    /// Unknown-role nodes with empty pools, one per seed.
    pub fn from_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            nodes: seeds.into_iter().map(|s| Node::new(s.as_ref())).collect(),
            ..Default::default()
        }
    }

    pub fn connected(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes
            .iter()
            .filter(|n| n.role != NodeRole::NotConnected)
    }

    pub fn primary(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.role == NodeRole::Primary)
    }

    pub fn is_reachable(&self) -> bool {
        self.nodes.iter().any(Node::is_queryable)
    }

    pub fn is_replica_set(&self) -> bool {
        self.name.is_some()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn find_node_by_connection_id(&self, id: ChannelId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.has_connection(id))
    }

    pub fn find_by_connection_id(&self, id: ChannelId) -> Option<(&Node, &Connection)> {
        self.nodes
            .iter()
            .find_map(|n| n.connection(id).map(|c| (n, c)))
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.nodes.iter().flat_map(|n| n.connections.iter())
    }

    /// Every channel of every node, for bulk lifecycle operations.
    pub fn make_connection_group(&self) -> ConnectionGroup {
        ConnectionGroup {
            channels: self
                .connections()
                .map(|c| dyn_clone::clone_box(c.channel()))
                .collect(),
        }
    }

    pub fn update_by_member_id<F>(self, member_id: i32, f: F) -> Self
    where
        F: FnOnce(Node) -> Node,
    {
        self.update_first(|n| n.member_id == Some(member_id), f)
    }

    pub fn update_by_connection_id<F>(self, id: ChannelId, f: F) -> Self
    where
        F: FnOnce(Node) -> Node,
    {
        self.update_first(|n| n.has_connection(id), f)
    }

    pub fn update_by_name<F>(self, name: &str, f: F) -> Self
    where
        F: FnOnce(Node) -> Node,
    {
        self.update_first(|n| n.name == name, f)
    }

    pub fn update_all<F>(mut self, f: F) -> Self
    where
        F: FnMut(Node) -> Node,
    {
        self.nodes = self.nodes.into_iter().map(f).collect();
        self
    }

    fn update_first<P, F>(mut self, predicate: P, f: F) -> Self
    where
        P: Fn(&Node) -> bool,
        F: FnOnce(Node) -> Node,
    {
        if let Some(index) = self.nodes.iter().position(predicate) {
            let node = self.nodes.remove(index);
            self.nodes.insert(index, f(node));
        }
        self
    }

    /// Upserts `node` by name.
    ///
    /// A new name is inserted at the front. For a known name the existing
    /// connections stay and the role is replaced only if the incoming role is
    /// known, so a response without role information cannot erase one. An
    /// incoming Primary demotes any other Primary to Unknown.
    pub fn add_node(mut self, node: Node) -> Self {
        if node.role == NodeRole::Primary {
            self = self.demote_primaries_except(&node.name);
        }
        match self.nodes.iter_mut().find(|n| n.name == node.name) {
            Some(existing) => {
                if node.role.is_known() {
                    existing.role = node.role;
                }
            }
            None => self.nodes.insert(0, node),
        }
        self
    }

    pub fn add_nodes<I>(self, nodes: I) -> Self
    where
        I: IntoIterator<Item = Node>,
    {
        nodes.into_iter().fold(self, Topology::add_node)
    }

    /// Reconciles a freshly discovered topology with this one.
    ///
    /// Discovered nodes come first, in discovered order, with their discovered
    /// role and identity. A node already known by name keeps its connections,
    /// joined with any the discovered node carries, and its heartbeat state.
    /// A name only the discovered topology has starts with zero connections.
    /// Nodes missing from the discovered topology are kept at the end so none
    /// of their connections are lost; if the discovered topology names a
    /// Primary, a kept Primary is demoted to Unknown. Name and version are
    /// taken from `discovered`.
    pub fn merge(self, discovered: Topology) -> Self {
        let mut remaining = self.nodes;
        let primary = discovered
            .nodes
            .iter()
            .find(|n| n.role == NodeRole::Primary)
            .map(|n| n.name.clone());

        let mut nodes = discovered
            .nodes
            .into_iter()
            .map(|mut node| {
                let Some(index) = remaining.iter().position(|n| n.name == node.name) else {
                    if !node.connections.is_empty() {
                        tracing::debug!(
                            "Dropping {} connection(s) carried by newly discovered {}",
                            node.connections.len(),
                            node.name
                        );
                    }
                    return Node {
                        connections: Vec::new(),
                        ..node
                    };
                };
                let known = remaining.remove(index);
                let mut connections = known.connections;
                for connection in node.connections {
                    if !connections.iter().any(|c| c.id() == connection.id()) {
                        connections.push(connection);
                    }
                }
                node.connections = connections;
                node.ping = known.ping;
                node
            })
            .collect::<Vec<_>>();
        nodes.extend(remaining);

        let merged = Self {
            name: discovered.name,
            version: discovered.version,
            nodes,
        };
        match primary {
            Some(name) => merged.demote_primaries_except(&name),
            None => merged,
        }
    }

    /// Every Primary other than `name` becomes Unknown until it answers a
    /// heartbeat itself.
    pub fn demote_primaries_except(self, name: &str) -> Self {
        self.update_all(|n| {
            if n.role == NodeRole::Primary && n.name != name {
                tracing::debug!("Demoting stale primary {}", n.name);
                n.with_role(NodeRole::Unknown)
            } else {
                n
            }
        })
    }

    pub fn ensure_connections(
        self,
        factory: &dyn ConnectionFactory,
        receiver: &EventSender,
        target: usize,
    ) -> Self {
        self.update_all(|n| n.ensure_connections(factory, receiver, target))
    }
}

/// Channels gathered from a whole topology.
#[derive(Clone, Debug, Default)]
pub struct ConnectionGroup {
    channels: Vec<Box<dyn Channel>>,
}

impl ConnectionGroup {
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.iter().map(|c| c.id())
    }

    pub fn disconnect_all(&self) {
        for channel in self.channels.iter().filter(|c| c.is_connected()) {
            if let Err(e) = channel.disconnect() {
                tracing::warn!("Unable to disconnect {}. Caused by: {}", channel.id(), e);
            }
        }
    }

    pub fn close_all(&self) {
        for channel in self.channels.iter().filter(|c| c.is_open()) {
            if let Err(e) = channel.close() {
                tracing::warn!("Unable to close {}. Caused by: {}", channel.id(), e);
            }
        }
    }

    /// Writes `request` to every connected channel. Returns how many took it.
    pub fn broadcast(&self, request: &Request) -> usize {
        self.channels
            .iter()
            .filter(|c| c.is_connected())
            .filter(|c| match c.write(vec![request.clone()]) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Broadcast to {} failed. Caused by: {}", c.id(), e);
                    false
                }
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{
        connection::ConnectionState,
        test_support::{connection, event_sender, node, RecordingFactory},
    };

    fn ids(node: &Node) -> BTreeSet<ChannelId> {
        node.connections.iter().map(|c| c.id()).collect()
    }

    fn names(topology: &Topology) -> Vec<&str> {
        topology.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn from_seeds_builds_unknown_empty_nodes() {
        let topology = Topology::from_seeds(["a:1", "b:2"]);

        assert_eq!(names(&topology), vec!["a:1", "b:2"]);
        assert!(topology
            .nodes
            .iter()
            .all(|n| n.role == NodeRole::Unknown && n.connections.is_empty()));
        assert!(!topology.is_replica_set());
        assert!(!topology.is_reachable());
    }

    #[test]
    fn derived_queries() {
        let topology = Topology::new(
            Some("rs0".to_string()),
            Some(3),
            vec![
                node("a", NodeRole::NotConnected, 0),
                node("b", NodeRole::Secondary, 0),
                node("c", NodeRole::Primary, 1),
                node("d", NodeRole::Primary, 1),
            ],
        );

        assert!(topology.is_replica_set());
        assert_eq!(topology.primary().map(|n| n.name.as_str()), Some("c"));
        assert_eq!(
            topology.connected().map(|n| n.name.as_str()).collect::<Vec<_>>(),
            vec!["b", "c", "d"]
        );
        assert!(topology.is_reachable());
        assert_eq!(topology.connections().count(), 2);
    }

    #[test]
    fn finds_owner_of_a_connection() {
        let b = node("b", NodeRole::Secondary, 2);
        let target = b.connections[1].id();
        let topology = Topology::new(None, None, vec![node("a", NodeRole::Primary, 1), b]);

        assert_eq!(
            topology.find_node_by_connection_id(target).map(|n| n.name.as_str()),
            Some("b")
        );
        let (owner, found) = topology.find_by_connection_id(target).unwrap();
        assert_eq!(owner.name, "b");
        assert_eq!(found.id(), target);
        assert!(topology.find_by_connection_id(ChannelId::new()).is_none());
    }

    #[test]
    fn targeted_updates_leave_other_nodes_alone() {
        let b = node("b", NodeRole::Secondary, 1);
        let target = b.connections[0].id();
        let topology = Topology::new(
            None,
            None,
            vec![node("a", NodeRole::Secondary, 1).with_member_id(7), b],
        );

        let topology = topology
            .update_by_member_id(7, |n| n.with_role(NodeRole::Primary))
            .update_by_connection_id(target, |n| n.with_role(NodeRole::NotConnected))
            .update_by_member_id(99, |n| n.with_role(NodeRole::Unknown));

        assert_eq!(topology.nodes[0].role, NodeRole::Primary);
        assert_eq!(topology.nodes[1].role, NodeRole::NotConnected);
    }

    #[test]
    fn update_all_applies_to_every_node() {
        let topology = Topology::from_seeds(["a", "b"])
            .update_all(|n| n.with_role(NodeRole::Secondary));

        assert!(topology.nodes.iter().all(|n| n.role == NodeRole::Secondary));
    }

    #[test]
    fn add_node_prepends_new_names() {
        let topology = Topology::from_seeds(["a"]).add_node(Node::new("b"));

        assert_eq!(names(&topology), vec!["b", "a"]);
    }

    #[test]
    fn add_node_with_unknown_role_preserves_known_role_and_connections() {
        let existing = node("a", NodeRole::Secondary, 2);
        let before = ids(&existing);
        let topology = Topology::new(None, None, vec![existing]);

        let topology = topology.add_node(Node::new("a"));

        assert_eq!(topology.nodes.len(), 1);
        assert_eq!(topology.nodes[0].role, NodeRole::Secondary);
        assert_eq!(ids(&topology.nodes[0]), before);
    }

    #[test]
    fn add_node_with_known_role_replaces_role_only() {
        let existing = node("a", NodeRole::Secondary, 1);
        let before = ids(&existing);
        let topology = Topology::new(None, None, vec![existing]);

        let topology = topology.add_node(node("a", NodeRole::Primary, 3));

        assert_eq!(topology.nodes[0].role, NodeRole::Primary);
        assert_eq!(ids(&topology.nodes[0]), before);
    }

    #[test]
    fn add_nodes_folds_left_to_right() {
        let topology = Topology::from_seeds(["a"]).add_nodes(vec![
            Node::new("b"),
            Node::new("c").with_role(NodeRole::Secondary),
            Node::new("c"),
        ]);

        assert_eq!(names(&topology), vec!["c", "b", "a"]);
        assert_eq!(topology.nodes[0].role, NodeRole::Secondary);
    }

    #[test]
    fn merge_unions_connections_for_shared_names() {
        let (shared, _) = connection(ConnectionState::Usable);
        let (only_new, _) = connection(ConnectionState::NotConnected);
        let mut current_a = node("a", NodeRole::Secondary, 1);
        current_a.connections.push(shared.clone());
        let mut discovered_a = Node::new("a").with_role(NodeRole::Primary).with_member_id(0);
        discovered_a.connections = vec![shared, only_new];
        let expected = ids(&current_a)
            .union(&ids(&discovered_a))
            .copied()
            .collect::<BTreeSet<_>>();

        let current = Topology::new(None, None, vec![current_a]);
        let discovered = Topology::new(
            Some("rs0".to_string()),
            Some(2),
            vec![discovered_a, Node::new("b").with_role(NodeRole::Secondary)],
        );

        let merged = current.merge(discovered);

        assert_eq!(merged.name.as_deref(), Some("rs0"));
        assert_eq!(merged.version, Some(2));
        assert_eq!(names(&merged), vec!["a", "b"]);
        assert_eq!(merged.nodes[0].role, NodeRole::Primary);
        assert_eq!(merged.nodes[0].member_id, Some(0));
        assert_eq!(merged.nodes[0].connections.len(), 3);
        assert_eq!(ids(&merged.nodes[0]), expected);
        assert!(merged.nodes[1].connections.is_empty());
        assert_eq!(merged.nodes[1].role, NodeRole::Secondary);
    }

    #[test]
    fn merge_keeps_nodes_the_discovery_did_not_mention() {
        let current = Topology::new(
            None,
            None,
            vec![node("old", NodeRole::Secondary, 2), node("a", NodeRole::Primary, 1)],
        );
        let discovered = Topology::new(Some("rs0".to_string()), Some(1), vec![Node::new("a")]);

        let merged = current.merge(discovered);

        assert_eq!(names(&merged), vec!["a", "old"]);
        assert_eq!(merged.nodes[0].role, NodeRole::Unknown);
        assert_eq!(merged.nodes[0].connections.len(), 1);
        assert_eq!(merged.nodes[1].connections.len(), 2);
        assert_eq!(merged.connections().count(), 3);
    }

    #[test]
    fn add_node_keeps_a_single_primary() {
        let topology = Topology::new(
            None,
            None,
            vec![node("a", NodeRole::Primary, 1), node("b", NodeRole::Secondary, 1)],
        );

        let topology = topology.add_node(Node::new("b").with_role(NodeRole::Primary));
        assert_eq!(topology.primary().map(|n| n.name.as_str()), Some("b"));
        assert_eq!(topology.nodes[0].role, NodeRole::Unknown);

        let topology = topology.add_node(Node::new("c").with_role(NodeRole::Primary));
        let primaries = topology
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::Primary)
            .map(|n| n.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(primaries, vec!["c"]);
    }

    #[test]
    fn merge_gives_newly_discovered_names_no_connections() {
        let mut carried = Node::new("new:1").with_role(NodeRole::Secondary);
        carried.connections = vec![connection(ConnectionState::Usable).0];
        let current = Topology::new(None, None, vec![node("a:1", NodeRole::Primary, 1)]);
        let discovered = Topology::new(
            Some("rs0".to_string()),
            Some(1),
            vec![Node::new("a:1").with_role(NodeRole::Primary), carried],
        );

        let merged = current.merge(discovered);

        let new = merged.node("new:1").unwrap();
        assert!(new.connections.is_empty());
        assert_eq!(new.role, NodeRole::Secondary);
        assert_eq!(merged.node("a:1").unwrap().connections.len(), 1);
    }

    #[test]
    fn merge_demotes_a_kept_primary_when_discovery_names_another() {
        let current = Topology::new(
            None,
            None,
            vec![node("old", NodeRole::Primary, 1), node("a", NodeRole::Secondary, 1)],
        );
        let discovered = Topology::new(
            Some("rs0".to_string()),
            Some(2),
            vec![Node::new("a").with_role(NodeRole::Primary)],
        );

        let merged = current.merge(discovered);

        assert_eq!(names(&merged), vec!["a", "old"]);
        assert_eq!(merged.nodes[0].role, NodeRole::Primary);
        assert_eq!(merged.nodes[1].role, NodeRole::Unknown);
        assert_eq!(merged.nodes[1].connections.len(), 1);
    }

    #[test]
    fn ensure_connections_sizes_every_node() {
        let factory = RecordingFactory::default();
        let topology = Topology::new(
            None,
            None,
            vec![node("a:1", NodeRole::Primary, 1), Node::new("b:2")],
        );

        let topology = topology.ensure_connections(&factory, &event_sender(), 2);

        assert!(topology.nodes.iter().all(|n| n.connections.len() == 2));
        assert_eq!(factory.channels_for("a", 1).len(), 1);
        assert_eq!(factory.channels_for("b", 2).len(), 2);
    }

    #[test]
    fn connection_group_covers_every_channel() {
        let (live, live_channel) = connection(ConnectionState::Usable);
        live_channel.set_connected(true);
        let (idle, idle_channel) = connection(ConnectionState::NotConnected);
        let mut a = Node::new("a");
        a.connections = vec![live];
        let mut b = Node::new("b");
        b.connections = vec![idle];
        let topology = Topology::new(None, None, vec![a, b]);

        let group = topology.make_connection_group();

        assert_eq!(group.len(), 2);
        assert_eq!(group.broadcast(&Request::Heartbeat { id: 1 }), 1);
        group.disconnect_all();
        group.close_all();
        assert_eq!(live_channel.heartbeats(), vec![1]);
        assert_eq!(live_channel.recorded().disconnects, 1);
        assert_eq!(idle_channel.recorded().disconnects, 0);
        assert_eq!(live_channel.recorded().closes, 1);
        assert_eq!(idle_channel.recorded().closes, 1);
    }
}
