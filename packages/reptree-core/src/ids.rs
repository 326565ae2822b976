use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lamport timestamp used for ordering operations.
pub type Lamport = u64;

/// Opaque identifier of an authoring replica (a process, device, or browser tab).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ReplicaId(pub String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ReplicaId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unique identifier for a vertex in the tree.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct VertexId(pub String);

impl VertexId {
    /// Reserved parentless vertex that deleted vertices are moved under.
    pub const TRASH_ID: &'static str = "t";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for a vertex created on this replica.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn trash() -> Self {
        Self(Self::TRASH_ID.to_string())
    }

    pub fn is_trash(&self) -> bool {
        self.0 == Self::TRASH_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VertexId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for VertexId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Globally unique identifier for an operation.
///
/// Ordering is `counter` first, then `replica` (byte-lexical), which gives every
/// replica the same total order over operations.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OperationId {
    pub counter: Lamport,
    pub replica: ReplicaId,
}

impl OperationId {
    pub fn new(replica: &ReplicaId, counter: Lamport) -> Self {
        Self {
            counter,
            replica: replica.clone(),
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.replica)
    }
}

impl FromStr for OperationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('@');
        let (Some(counter), Some(replica), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Format(format!("expected <counter>@<replica>, got {s:?}")));
        };
        if replica.is_empty() {
            return Err(Error::Format(format!("empty replica id in {s:?}")));
        }
        let counter = counter
            .parse::<Lamport>()
            .map_err(|e| Error::Format(format!("bad counter in {s:?}: {e}")))?;
        Ok(Self {
            counter,
            replica: ReplicaId::new(replica),
        })
    }
}

// Operation ids travel as their `counter@replica` string so hosts can use them as map keys.
#[cfg(feature = "serde")]
impl Serialize for OperationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for OperationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
