use crate::{channel::ChannelError, error_chain_fmt};

#[derive(thiserror::Error)]
pub enum ReplicaSetError {
    #[error("No seeds were supplied and a replica set can't be discovered without at least one")]
    MissingSeedsError,
    #[error("Pool size must be at least 1, got {0}")]
    InvalidPoolSize(usize),
    #[error("Heartbeat interval must be at least one millisecond and fit in u64 milliseconds")]
    InvalidHeartbeatInterval,
    #[error("ReplicaSetActor task has been killed")]
    ActorGone,
    #[error(transparent)]
    ChannelError(#[from] ChannelError),
}
impl std::fmt::Debug for ReplicaSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
