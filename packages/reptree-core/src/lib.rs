#![forbid(unsafe_code)]
//! Core of a replicated vertex tree: a move-operation CRDT for structure and
//! last-writer-wins registers for vertex properties.
//! Transport and persistence stay outside this crate; they exchange [`Operation`]s
//! through [`ReplicatedTree::drain_local_operations`] and [`ReplicatedTree::merge`].

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod ops;
mod state;
pub mod tree;
pub mod vertex;

pub use clock::{Clock, LamportClock};
pub use config::TreeConfig;
pub use error::{Error, Result};
pub use events::{SubscriptionId, VertexEvent};
pub use ids::{Lamport, OperationId, ReplicaId, VertexId};
pub use ops::{MoveOp, Operation, PropertyOp, PropertyValue};
pub use tree::{ReplicatedTree, NAME_KEY};
pub use vertex::{VertexMut, VertexRef};
