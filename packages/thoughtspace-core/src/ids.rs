#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque, collision-resistant node identifier assigned at creation time.
///
/// Two values are reserved and present in every replica: [`NodeId::root`] (the tree root)
/// and [`NodeId::tombstone`] (the sink for deleted subtrees).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId(pub String);

impl NodeId {
    pub const ROOT_STR: &'static str = "ROOT";
    pub const TOMBSTONE_STR: &'static str = "TOMBSTONE";

    /// Mint a fresh, collision-resistant node id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn root() -> Self {
        Self(Self::ROOT_STR.to_string())
    }

    pub fn tombstone() -> Self {
        Self(Self::TOMBSTONE_STR.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT_STR
    }

    pub fn is_tombstone(&self) -> bool {
        self.0 == Self::TOMBSTONE_STR
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Stable identifier of the client that originated an operation.
///
/// The reserved id `"server"` is used for corrective operations synthesized by the Relay
/// (see the deletion/restore policy).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClientId(pub String);

impl ClientId {
    pub const SERVER_STR: &'static str = "server";

    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn server() -> Self {
        Self(Self::SERVER_STR.to_string())
    }

    pub fn is_server(&self) -> bool {
        self.0 == Self::SERVER_STR
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
