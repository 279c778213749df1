use std::{collections::BTreeSet, fmt};

use uuid::Uuid;

use crate::{
    channel::{Channel, ChannelError},
    protocol::Request,
};

/// Identity of a channel. Stable for the lifetime of the connection and the
/// key used to find it again when an inbound event arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof that a channel completed authentication for one user on one database.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Authenticated {
    pub database: String,
    pub user: String,
}

impl Authenticated {
    pub fn new(database: &str, user: &str) -> Self {
        Self {
            database: database.to_string(),
            user: user.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Usable,
}

/// One pooled channel to a single member.
#[derive(Clone, Debug)]
pub struct Connection {
    channel: Box<dyn Channel>,
    state: ConnectionState,
    authenticated: BTreeSet<Authenticated>,
}

impl Connection {
    pub fn new(channel: Box<dyn Channel>) -> Self {
        Self {
            channel,
            state: ConnectionState::NotConnected,
            authenticated: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn channel(&self) -> &(dyn Channel + 'static) {
        self.channel.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn usable(&self) -> bool {
        self.state == ConnectionState::Usable
    }

    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    pub fn authenticate(mut self, credential: Authenticated) -> Self {
        self.authenticated.insert(credential);
        self
    }

    pub fn authenticated(&self) -> impl Iterator<Item = &Authenticated> + '_ {
        self.authenticated.iter()
    }

    pub fn is_authenticated(&self, database: &str, user: &str) -> bool {
        self.authenticated
            .iter()
            .any(|a| a.database == database && a.user == user)
    }

    /// Enqueues one write. Nothing is awaited; the reply comes back through
    /// the dispatcher.
    pub fn send(&self, request: Request) -> Result<(), ChannelError> {
        self.channel.write(vec![request])
    }

    /// Enqueues `request` immediately followed by `check` as a single write,
    /// so the acknowledgement can never be seen before the request it follows.
    pub fn send_with_write_concern(
        &self,
        request: Request,
        check: Request,
    ) -> Result<(), ChannelError> {
        self.channel.write(vec![request, check])
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::{protocol::WriteConcern, test_support::RecordingChannel};

    fn command() -> Request {
        Request::Command {
            database: "app".to_string(),
            document: serde_json::json!({ "insert": "users" }),
        }
    }

    #[test]
    fn new_connection_is_not_connected_and_not_usable() {
        let connection = Connection::new(Box::new(RecordingChannel::new()));

        assert_eq!(connection.state(), ConnectionState::NotConnected);
        assert!(!connection.usable());
        assert!(!connection.with_state(ConnectionState::Connecting).usable());
    }

    #[test]
    fn usable_only_in_usable_state() {
        let connection =
            Connection::new(Box::new(RecordingChannel::new())).with_state(ConnectionState::Usable);

        assert!(connection.usable());
    }

    #[test]
    fn send_writes_requests_in_call_order() {
        let channel = RecordingChannel::new();
        let connection = Connection::new(Box::new(channel.clone()));

        assert_ok!(connection.send(Request::Heartbeat { id: 1 }));
        assert_ok!(connection.send(Request::Heartbeat { id: 2 }));

        assert_eq!(
            channel.recorded().writes,
            vec![
                vec![Request::Heartbeat { id: 1 }],
                vec![Request::Heartbeat { id: 2 }]
            ]
        );
    }

    #[test]
    fn write_concern_check_follows_its_request_in_one_write() {
        let channel = RecordingChannel::new();
        let connection = Connection::new(Box::new(channel.clone()));
        let check = Request::WriteConcernCheck {
            database: "app".to_string(),
            write_concern: WriteConcern::default(),
        };

        assert_ok!(connection.send_with_write_concern(command(), check.clone()));

        assert_eq!(channel.recorded().writes, vec![vec![command(), check]]);
    }

    #[test]
    fn authentication_marks_are_deduplicated() {
        let connection = Connection::new(Box::new(RecordingChannel::new()))
            .authenticate(Authenticated::new("admin", "root"))
            .authenticate(Authenticated::new("admin", "root"))
            .authenticate(Authenticated::new("app", "svc"));

        assert_eq!(connection.authenticated().count(), 2);
        assert!(connection.is_authenticated("app", "svc"));
        assert!(!connection.is_authenticated("app", "root"));
    }

    #[test]
    fn identity_survives_state_changes() {
        let connection = Connection::new(Box::new(RecordingChannel::new()));
        let id = connection.id();

        let connection = connection
            .with_state(ConnectionState::Usable)
            .authenticate(Authenticated::new("admin", "root"));

        assert_eq!(connection.id(), id);
    }
}
