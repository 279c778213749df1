use serde::{Deserialize, Serialize};

use crate::{
    node::{Node, NodeRole},
    topology::Topology,
};

/// The discovery part of a member's reply to a heartbeat.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelloResponse {
    pub set_name: Option<String>,
    pub set_version: Option<i64>,
    /// Electable members.
    pub hosts: Vec<String>,
    /// Members with priority 0.
    pub passives: Vec<String>,
    /// The primary as seen by the replying member.
    pub primary: Option<String>,
    /// The replying member's own name.
    pub me: Option<String>,
    #[serde(alias = "ismaster")]
    pub is_writable_primary: bool,
    pub secondary: bool,
}

impl HelloResponse {
    /// Role of the replying member.
    pub fn role(&self) -> NodeRole {
        if self.is_writable_primary {
            NodeRole::Primary
        } else if self.secondary {
            NodeRole::Secondary
        } else {
            NodeRole::Unknown
        }
    }

    /// The topology as the replying member describes it.
    ///
    /// Only the replying member and the announced primary get a role; every
    /// other member is `Unknown` until it answers a heartbeat itself.
    pub fn to_topology(&self) -> Topology {
        let nodes = self
            .hosts
            .iter()
            .chain(self.passives.iter())
            .map(|host| {
                let role = if self.me.as_ref() == Some(host) {
                    self.role()
                } else if self.primary.as_ref() == Some(host) {
                    NodeRole::Primary
                } else {
                    NodeRole::Unknown
                };
                Node::new(host).with_role(role)
            })
            .collect();

        Topology::new(self.set_name.clone(), self.set_version, nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_secondary_reply() {
        let body = r#"{
            "setName": "rs0",
            "setVersion": 4,
            "hosts": ["a:27017", "b:27017"],
            "passives": ["c:27017"],
            "primary": "a:27017",
            "me": "b:27017",
            "isWritablePrimary": false,
            "secondary": true,
            "maxWireVersion": 17
        }"#;

        let hello: HelloResponse = serde_json::from_str(body).unwrap();

        assert_eq!(hello.set_name.as_deref(), Some("rs0"));
        assert_eq!(hello.set_version, Some(4));
        assert_eq!(hello.role(), NodeRole::Secondary);
    }

    #[test]
    fn legacy_ismaster_flag_is_accepted() {
        let hello: HelloResponse = serde_json::from_str(r#"{"ismaster": true}"#).unwrap();

        assert_eq!(hello.role(), NodeRole::Primary);
        assert!(hello.hosts.is_empty());
    }

    #[test]
    fn standalone_reply_has_unknown_role_and_no_set() {
        let hello = HelloResponse::default();

        assert_eq!(hello.role(), NodeRole::Unknown);
        assert!(!hello.to_topology().is_replica_set());
    }

    #[test]
    fn topology_assigns_roles_to_me_and_primary_only() {
        let hello = HelloResponse {
            set_name: Some("rs0".to_string()),
            set_version: Some(4),
            hosts: vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()],
            passives: vec!["d:4".to_string()],
            primary: Some("a:1".to_string()),
            me: Some("b:2".to_string()),
            secondary: true,
            ..Default::default()
        };

        let topology = hello.to_topology();

        let roles = topology
            .nodes
            .iter()
            .map(|n| (n.name.as_str(), n.role))
            .collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec![
                ("a:1", NodeRole::Primary),
                ("b:2", NodeRole::Secondary),
                ("c:3", NodeRole::Unknown),
                ("d:4", NodeRole::Unknown),
            ]
        );
        assert_eq!(topology.name.as_deref(), Some("rs0"));
        assert_eq!(topology.version, Some(4));
        assert!(topology.connections().next().is_none());
    }
}
