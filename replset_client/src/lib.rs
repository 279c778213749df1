/*!
replset_client is the replica set aware core of a database client driver.

It keeps a versioned view of every member of a replica set (role, health and
measured latency), owns a small pool of outbound connections per member, and
picks the connection an operation should go to according to a
[`ReadPreference`](read_preference::ReadPreference).

The topology is a plain immutable value. All mutation happens inside a single
actor task that folds connection events, heartbeat replies and discovery
responses into a new [`Topology`](topology::Topology) and publishes it. The
[`ReplicaSet`] handle talks to that actor and can be cloned freely.

Wire encoding, authentication and reply dispatch are left to collaborators;
this crate only defines the data it exchanges with them (see [`protocol`]).

# Example
```no_run
# tokio_test::block_on(async {
use replset_client::{protocol::Request, read_preference::ReadPreference, ReplicaSet};

let replica_set = ReplicaSet::builder()
    .set_seeds(&["db1.local:27017", "db2.local:27017"])
    .set_replica_set_name("rs0")
    .set_pool_size(2)
    .build()?;

let request = Request::Command {
    database: "admin".to_string(),
    document: serde_json::json!({ "ping": 1 }),
};
match replica_set.send(ReadPreference::primary_preferred(), request).await? {
    Some(channel) => println!("sent on {}", channel),
    None => println!("no member can take the request yet"),
}
# Ok::<(), replset_client::ReplicaSetError>(())
# });
```
*/

mod replica_set;

pub mod channel;
pub mod connection;
pub mod connection_factory;
pub mod cyclic_selector;
pub mod hello_response;
pub mod node;
pub mod protocol;
pub mod read_preference;
pub mod targeted_view;
pub mod topology;
pub mod wire_codec;

#[cfg(test)]
mod test_support;

pub use replica_set::*;

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}
