use std::fmt;

use crate::ids::{Lamport, OperationId, ReplicaId, VertexId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Value stored under a property key: a scalar or a homogeneous list of scalars.
///
/// On the wire every value carries its variant, e.g. `{"type": "numbers", "value": []}`,
/// so empty lists keep their element type. Non-finite numbers are written as the
/// strings `"NaN"`, `"Infinity"` and `"-Infinity"`.
///
/// Equality treats two NaNs as equal so replicas holding the same NaN compare equal.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "type", content = "value", rename_all = "snake_case")
)]
pub enum PropertyValue {
    String(String),
    Number(#[cfg_attr(feature = "serde", serde(with = "wire::number"))] f64),
    Boolean(bool),
    Strings(Vec<String>),
    Numbers(#[cfg_attr(feature = "serde", serde(with = "wire::numbers"))] Vec<f64>),
    Booleans(Vec<bool>),
}

fn same_number(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::String(a), PropertyValue::String(b)) => a == b,
            (PropertyValue::Number(a), PropertyValue::Number(b)) => same_number(*a, *b),
            (PropertyValue::Boolean(a), PropertyValue::Boolean(b)) => a == b,
            (PropertyValue::Strings(a), PropertyValue::Strings(b)) => a == b,
            (PropertyValue::Numbers(a), PropertyValue::Numbers(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_number(*x, *y))
            }
            (PropertyValue::Booleans(a), PropertyValue::Booleans(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(feature = "serde")]
mod wire {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    const NAN: &str = "NaN";
    const INFINITY: &str = "Infinity";
    const NEG_INFINITY: &str = "-Infinity";

    struct Wire(f64);

    impl Serialize for Wire {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let n = self.0;
            if n.is_finite() {
                serializer.serialize_f64(n)
            } else if n.is_nan() {
                serializer.serialize_str(NAN)
            } else if n > 0.0 {
                serializer.serialize_str(INFINITY)
            } else {
                serializer.serialize_str(NEG_INFINITY)
            }
        }
    }

    struct WireVisitor;

    impl<'de> Visitor<'de> for WireVisitor {
        type Value = Wire;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"NaN\", \"Infinity\", \"-Infinity\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Wire, E> {
            Ok(Wire(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Wire, E> {
            Ok(Wire(v as f64))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Wire, E> {
            Ok(Wire(v as f64))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Wire, E> {
            match v {
                NAN => Ok(Wire(f64::NAN)),
                INFINITY => Ok(Wire(f64::INFINITY)),
                NEG_INFINITY => Ok(Wire(f64::NEG_INFINITY)),
                _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
            }
        }
    }

    impl<'de> Deserialize<'de> for Wire {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(WireVisitor)
        }
    }

    pub(super) mod number {
        use super::*;

        pub fn serialize<S: Serializer>(n: &f64, serializer: S) -> Result<S::Ok, S::Error> {
            Wire(*n).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
            Wire::deserialize(deserializer).map(|w| w.0)
        }
    }

    pub(super) mod numbers {
        use super::*;

        pub fn serialize<S: Serializer>(v: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(v.iter().map(|n| Wire(*n)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<f64>, D::Error> {
            let wire = Vec::<Wire>::deserialize(deserializer)?;
            Ok(wire.into_iter().map(|w| w.0).collect())
        }
    }
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{s:?}"),
            PropertyValue::Number(n) => write!(f, "{n}"),
            PropertyValue::Boolean(b) => write!(f, "{b}"),
            PropertyValue::Strings(v) => write!(f, "{v:?}"),
            PropertyValue::Numbers(v) => write!(f, "{v:?}"),
            PropertyValue::Booleans(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Number(value as f64)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Number(value.into())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::Strings(value)
    }
}

impl From<Vec<f64>> for PropertyValue {
    fn from(value: Vec<f64>) -> Self {
        PropertyValue::Numbers(value)
    }
}

impl From<Vec<bool>> for PropertyValue {
    fn from(value: Vec<bool>) -> Self {
        PropertyValue::Booleans(value)
    }
}

/// Move `target` under `parent`. A move of a fresh id creates the vertex;
/// `parent = None` is only used for the parentless root and trash vertices.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MoveOp {
    pub id: OperationId,
    pub target: VertexId,
    pub parent: Option<VertexId>,
}

/// Write one property key on `target`.
///
/// Merge semantics are last-writer-wins per `(target, key)`, ordered by [`OperationId`].
///
/// - `value = Some(v)` sets the value
/// - `value = None` clears the key
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PropertyOp {
    pub id: OperationId,
    pub target: VertexId,
    pub key: String,
    pub value: Option<PropertyValue>,
}

/// The unit of replication.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Operation {
    Move(MoveOp),
    SetProperty(PropertyOp),
}

impl Operation {
    pub fn move_vertex(
        replica: &ReplicaId,
        counter: Lamport,
        target: impl Into<VertexId>,
        parent: Option<VertexId>,
    ) -> Self {
        Operation::Move(MoveOp {
            id: OperationId::new(replica, counter),
            target: target.into(),
            parent,
        })
    }

    pub fn set_property(
        replica: &ReplicaId,
        counter: Lamport,
        target: impl Into<VertexId>,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self::property(replica, counter, target, key, Some(value.into()))
    }

    pub fn clear_property(
        replica: &ReplicaId,
        counter: Lamport,
        target: impl Into<VertexId>,
        key: impl Into<String>,
    ) -> Self {
        Self::property(replica, counter, target, key, None)
    }

    pub fn property(
        replica: &ReplicaId,
        counter: Lamport,
        target: impl Into<VertexId>,
        key: impl Into<String>,
        value: Option<PropertyValue>,
    ) -> Self {
        Operation::SetProperty(PropertyOp {
            id: OperationId::new(replica, counter),
            target: target.into(),
            key: key.into(),
            value,
        })
    }

    pub fn id(&self) -> &OperationId {
        match self {
            Operation::Move(op) => &op.id,
            Operation::SetProperty(op) => &op.id,
        }
    }

    pub fn target(&self) -> &VertexId {
        match self {
            Operation::Move(op) => &op.target,
            Operation::SetProperty(op) => &op.target,
        }
    }
}

impl From<MoveOp> for Operation {
    fn from(op: MoveOp) -> Self {
        Operation::Move(op)
    }
}

impl From<PropertyOp> for Operation {
    fn from(op: PropertyOp) -> Self {
        Operation::SetProperty(op)
    }
}

impl fmt::Display for MoveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{} -> {}  {}", self.target, parent, self.id),
            None => write!(f, "{} -> (none)  {}", self.target, self.id),
        }
    }
}
