use std::{sync::Arc, time::Duration};

use tracing::instrument;

use crate::{
    connection_factory::{ConnectionFactory, TcpConnectionFactory},
    ReplicaSet, ReplicaSetConfiguration, ReplicaSetError, DEFAULT_HEARTBEAT_INTERVAL_MS,
    DEFAULT_POOL_SIZE,
};

#[derive(Debug)]
pub struct ReplicaSetBuilder {
    seeds: Vec<String>,
    replica_set_name: Option<String>,
    pool_size: usize,
    heartbeat_interval: Duration,
    connection_factory: Option<Arc<dyn ConnectionFactory>>,
}

impl ReplicaSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from settings loaded elsewhere. They are validated on
    /// [`build`](ReplicaSetBuilder::build) like any other.
    pub fn from_configuration(config: ReplicaSetConfiguration) -> Self {
        let heartbeat_interval = config.heartbeat_interval();
        Self {
            seeds: config.seeds,
            replica_set_name: config.replica_set_name,
            pool_size: config.pool_size,
            heartbeat_interval,
            connection_factory: None,
        }
    }

    /// Adds `host:port` seeds. A missing port means the default one.
    pub fn set_seeds<T>(mut self, seeds: &[T]) -> Self
    where
        T: AsRef<str>,
    {
        for s in seeds {
            self.seeds.push(s.as_ref().to_string());
        }
        self
    }

    /// Replies from members of any other set are ignored.
    pub fn set_replica_set_name(mut self, replica_set_name: &str) -> Self {
        self.replica_set_name = Some(replica_set_name.to_string());
        self
    }

    /// Connections kept open per member.
    pub fn set_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn set_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn set_connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        tracing::trace!("Using connection factory: {:?}", &factory);
        self.connection_factory = Some(factory);
        self
    }

    /// Validates the settings without starting anything.
    #[instrument(level = "debug", name = "Validate ReplicaSetBuilder", skip(self))]
    pub fn configuration(&self) -> Result<ReplicaSetConfiguration, ReplicaSetError> {
        let seeds = validate_seeds(self.seeds.as_slice());
        if seeds.is_empty() {
            tracing::error!(
                "No seeds were supplied and a replica set can't be discovered without at least one"
            );
            return Err(ReplicaSetError::MissingSeedsError);
        }

        if self.pool_size == 0 {
            return Err(ReplicaSetError::InvalidPoolSize(self.pool_size));
        }

        let heartbeat_interval_ms = u64::try_from(self.heartbeat_interval.as_millis())
            .map_err(|_| ReplicaSetError::InvalidHeartbeatInterval)?;
        if heartbeat_interval_ms == 0 {
            return Err(ReplicaSetError::InvalidHeartbeatInterval);
        }

        Ok(ReplicaSetConfiguration {
            seeds,
            replica_set_name: self.replica_set_name.clone(),
            pool_size: self.pool_size,
            heartbeat_interval_ms,
        })
    }

    /// Starts a new [`ReplicaSetActor`](crate::ReplicaSetActor) and returns a handle to it.
    ///
    /// Each call starts a new actor with its own connections, so the builder can act as a
    /// template. Must be called from within a tokio runtime.
    #[instrument(level = "debug", name = "Build ReplicaSetBuilder", skip(self))]
    pub fn build(&self) -> Result<ReplicaSet, ReplicaSetError> {
        let config = self.configuration()?;
        tracing::trace!("Initial Configuration: {:?}", &config);

        let factory = self
            .connection_factory
            .clone()
            .unwrap_or_else(|| Arc::new(TcpConnectionFactory::default()));

        Ok(ReplicaSet::new(config, factory))
    }
}

impl Default for ReplicaSetBuilder {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            replica_set_name: None,
            pool_size: DEFAULT_POOL_SIZE,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            connection_factory: None,
        }
    }
}

/// Trims seeds, drops blank ones and removes duplicates, keeping first-seen order.
#[instrument(level = "debug", name = "Validate Seeds")]
fn validate_seeds<T: std::fmt::Debug>(seeds: &[T]) -> Vec<String>
where
    T: AsRef<str>,
{
    let mut clean_seeds: Vec<String> = Vec::with_capacity(seeds.len());
    for seed in seeds.iter().map(|s| s.as_ref().trim()) {
        if seed.is_empty() || clean_seeds.iter().any(|s| s == seed) {
            continue;
        }
        clean_seeds.push(seed.to_string());
    }
    clean_seeds
}
