mod replica_set_actor;
mod replica_set_builder;
mod replica_set_error;
mod replica_set_handle;
mod replica_set_helpers;

pub use replica_set_actor::*;
pub use replica_set_builder::*;
pub use replica_set_error::*;
pub use replica_set_handle::*;
pub use replica_set_helpers::*;
