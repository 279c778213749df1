//! Read preference aware selection over one topology snapshot.
//!
//! Selection is two-level: a node is resolved first, then a connection is
//! picked from that node's own round robin. Each queryable node owns exactly
//! one connection selector, shared by every node-level selector that can
//! return it.
use crate::{
    connection::Connection,
    cyclic_selector::CyclicSelector,
    node::{Node, NodeRole},
    read_preference::ReadPreference,
    topology::Topology,
};

#[derive(Debug)]
pub struct QueryableNode {
    node: Node,
    connections: CyclicSelector<Connection>,
}

impl QueryableNode {
    fn new(node: &Node) -> Self {
        Self {
            connections: node.queryable().cloned().collect(),
            node: node.clone(),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn pick_connection(&mut self) -> Option<&Connection> {
        self.connections.pick()
    }
}

/// Node selectors hold indices into `nodes`.
#[derive(Debug)]
pub struct TargetedView {
    nodes: Vec<QueryableNode>,
    all: CyclicSelector<usize>,
    primary: CyclicSelector<usize>,
    secondaries: CyclicSelector<usize>,
    nearest: Option<usize>,
}

impl TargetedView {
    /// Keeps only queryable nodes. The nearest node is fixed here and not
    /// re-ranked while the view lives.
    pub fn new(topology: &Topology) -> Self {
        let nodes = topology
            .nodes
            .iter()
            .filter(|n| n.is_queryable())
            .map(QueryableNode::new)
            .collect::<Vec<_>>();

        let with_role = |role: NodeRole| {
            nodes
                .iter()
                .enumerate()
                .filter(move |(_, q)| q.node.role == role)
                .map(|(i, _)| i)
        };
        let primary = with_role(NodeRole::Primary).take(1).collect();
        let secondaries = with_role(NodeRole::Secondary).collect();
        let nearest = nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, q)| q.node.ping.latency)
            .map(|(i, _)| i);

        Self {
            all: (0..nodes.len()).collect(),
            nodes,
            primary,
            secondaries,
            nearest,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().map(QueryableNode::node)
    }

    pub fn primary(&self) -> Option<&Node> {
        self.primary.items().first().map(|&i| &self.nodes[i].node)
    }

    pub fn nearest(&self) -> Option<&Node> {
        self.nearest.map(|i| &self.nodes[i].node)
    }

    /// Resolves the node `preference` targets, advancing the node selector
    /// involved. Tag sets on `preference` are not evaluated.
    pub fn resolve_node(&mut self, preference: &ReadPreference) -> Option<&Node> {
        let index = self.resolve_index(preference)?;
        self.nodes.get(index).map(QueryableNode::node)
    }

    /// Resolves a node, then picks one of its connections.
    pub fn pick_node_and_connection(
        &mut self,
        preference: &ReadPreference,
    ) -> Option<(&Node, &Connection)> {
        let index = self.resolve_index(preference)?;
        let QueryableNode { node, connections } = self.nodes.get_mut(index)?;
        let connection = connections.pick()?;
        Some((&*node, connection))
    }

    /// Round robin over every queryable node, skipping those `predicate`
    /// rejects. Gives up after one full cycle.
    pub fn pick_node_matching<P>(&mut self, mut predicate: P) -> Option<&Node>
    where
        P: FnMut(&Node) -> bool,
    {
        let nodes = &self.nodes;
        let index = self
            .all
            .pick_matching(|&i| predicate(&nodes[i].node))
            .copied()?;
        self.nodes.get(index).map(QueryableNode::node)
    }

    fn resolve_index(&mut self, preference: &ReadPreference) -> Option<usize> {
        match preference {
            ReadPreference::Primary | ReadPreference::PrimaryPreferred(_) => {
                let primary = self.primary.pick().copied();
                if primary.is_none() && preference.allows_secondary() {
                    self.secondaries.pick().copied()
                } else {
                    primary
                }
            }
            ReadPreference::Secondary(_) => self.secondaries.pick().copied(),
            ReadPreference::SecondaryPreferred(_) => {
                if self.secondaries.is_empty() {
                    self.primary.pick().copied()
                } else {
                    self.secondaries.pick().copied()
                }
            }
            ReadPreference::Nearest(_) => self.nearest,
        }
    }
}
