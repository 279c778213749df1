use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use tokio::sync::oneshot;

use crate::{
    channel::ChannelError,
    connection::ChannelId,
    protocol::{ChannelEvent, Request},
    read_preference::ReadPreference,
    topology::Topology,
};

pub const DEFAULT_POOL_SIZE: usize = 1;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

#[derive(Debug)]
pub(crate) enum ReplicaSetMessage {
    /// Folds a channel event into the topology.
    Event(ChannelEvent),
    GetTopology {
        respond_to: oneshot::Sender<Arc<Topology>>,
    },
    /// Picks a connection for `preference` and writes `request` to it,
    /// followed by `write_concern` when given.
    Send {
        preference: ReadPreference,
        request: Request,
        write_concern: Option<Request>,
        respond_to: oneshot::Sender<Result<Option<ChannelId>, ChannelError>>,
    },
    SendHeartbeats,
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Validated settings the actor starts from.
///
/// Can be deserialized (camelCase keys) so embedders may keep it in their own
/// configuration files, then handed to
/// [`ReplicaSetBuilder::from_configuration`](crate::ReplicaSetBuilder::from_configuration).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetConfiguration {
    pub(crate) seeds: Vec<String>,
    #[serde(default)]
    pub(crate) replica_set_name: Option<String>,
    #[serde(default = "default_pool_size")]
    pub(crate) pool_size: usize,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub(crate) heartbeat_interval_ms: u64,
}

impl ReplicaSetConfiguration {
    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    pub fn replica_set_name(&self) -> Option<&str> {
        self.replica_set_name.as_deref()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}
