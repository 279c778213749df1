use std::collections::BTreeMap;

/// Tags a member must carry to match. Accepted on every read preference but
/// not evaluated when nodes are selected.
pub type TagSet = BTreeMap<String, String>;

/// Which member role(s) an operation should be routed to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ReadPreference {
    /// Only the primary.
    #[default]
    Primary,
    /// The primary, falling back to a secondary.
    PrimaryPreferred(Vec<TagSet>),
    /// Only secondaries.
    Secondary(Vec<TagSet>),
    /// A secondary, falling back to the primary.
    SecondaryPreferred(Vec<TagSet>),
    /// The member with the lowest measured latency.
    Nearest(Vec<TagSet>),
}

impl ReadPreference {
    pub fn primary() -> Self {
        ReadPreference::Primary
    }

    pub fn primary_preferred() -> Self {
        ReadPreference::PrimaryPreferred(Vec::new())
    }

    pub fn secondary() -> Self {
        ReadPreference::Secondary(Vec::new())
    }

    pub fn secondary_preferred() -> Self {
        ReadPreference::SecondaryPreferred(Vec::new())
    }

    pub fn nearest() -> Self {
        ReadPreference::Nearest(Vec::new())
    }

    pub fn tag_sets(&self) -> &[TagSet] {
        match self {
            ReadPreference::Primary => &[],
            ReadPreference::PrimaryPreferred(tags)
            | ReadPreference::Secondary(tags)
            | ReadPreference::SecondaryPreferred(tags)
            | ReadPreference::Nearest(tags) => tags,
        }
    }

    /// Whether a secondary may serve this read.
    pub fn allows_secondary(&self) -> bool {
        !matches!(self, ReadPreference::Primary)
    }
}
