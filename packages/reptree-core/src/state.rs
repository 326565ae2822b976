use std::collections::HashMap;

use tracing::error;

use crate::events::{EventAccumulator, VertexEvent};
use crate::ids::{Lamport, VertexId};
use crate::ops::PropertyValue;

#[derive(Clone, Debug)]
struct TransientProperty {
    key: String,
    value: PropertyValue,
    /// Clock value when the shadow was set; durable writes with a larger counter drop it.
    stamp: Lamport,
}

/// Materialized state of one vertex.
#[derive(Clone, Debug)]
pub(crate) struct VertexState {
    pub(crate) id: VertexId,
    pub(crate) parent: Option<VertexId>,
    pub(crate) children: Vec<VertexId>,
    properties: Vec<(String, PropertyValue)>,
    transient: Vec<TransientProperty>,
}

impl VertexState {
    fn new(id: VertexId) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            properties: Vec::new(),
            transient: Vec::new(),
        }
    }

    /// Transient value if one is set, otherwise the durable value.
    pub(crate) fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.transient
            .iter()
            .find(|p| p.key == key)
            .map(|p| &p.value)
            .or_else(|| self.durable_property(key))
    }

    pub(crate) fn durable_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Transient values first, then durable values without a transient shadow.
    pub(crate) fn properties(&self) -> Vec<(&str, &PropertyValue)> {
        let mut out: Vec<(&str, &PropertyValue)> = self
            .transient
            .iter()
            .map(|p| (p.key.as_str(), &p.value))
            .collect();
        for (key, value) in &self.properties {
            if !self.transient.iter().any(|p| p.key == *key) {
                out.push((key.as_str(), value));
            }
        }
        out
    }

    pub(crate) fn durable_properties(&self) -> &[(String, PropertyValue)] {
        &self.properties
    }

    fn write_durable(&mut self, key: &str, value: Option<PropertyValue>) {
        let existing = self.properties.iter().position(|(k, _)| k == key);
        match (existing, value) {
            (Some(idx), Some(value)) => self.properties[idx].1 = value,
            (Some(idx), None) => {
                self.properties.remove(idx);
            }
            (None, Some(value)) => self.properties.push((key.to_string(), value)),
            (None, None) => {}
        }
    }

    fn write_transient(&mut self, key: &str, value: Option<PropertyValue>, stamp: Lamport) {
        let existing = self.transient.iter().position(|p| p.key == key);
        match (existing, value) {
            (Some(idx), Some(value)) => {
                self.transient[idx].value = value;
                self.transient[idx].stamp = stamp;
            }
            (Some(idx), None) => {
                self.transient.remove(idx);
            }
            (None, Some(value)) => self.transient.push(TransientProperty {
                key: key.to_string(),
                value,
                stamp,
            }),
            (None, None) => {}
        }
    }
}

/// Vertex arena keyed by id. Parent and child links are ids, never owning references.
/// Every mutation is reported to the event accumulator.
#[derive(Default)]
pub(crate) struct TreeState {
    vertices: HashMap<VertexId, VertexState>,
    pub(crate) events: EventAccumulator,
}

impl TreeState {
    pub(crate) fn get(&self, id: &VertexId) -> Option<&VertexState> {
        self.vertices.get(id)
    }

    pub(crate) fn contains(&self, id: &VertexId) -> bool {
        self.vertices.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.vertices.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &VertexState> {
        self.vertices.values()
    }

    pub(crate) fn parent_of(&self, id: &VertexId) -> Option<&VertexId> {
        self.vertices.get(id).and_then(|v| v.parent.as_ref())
    }

    pub(crate) fn child_ids(&self, id: &VertexId) -> &[VertexId] {
        self.vertices
            .get(id)
            .map(|v| v.children.as_slice())
            .unwrap_or(&[])
    }

    /// Attach `id` under `new_parent`, creating the vertex if it does not exist yet.
    pub(crate) fn move_vertex(&mut self, id: &VertexId, new_parent: Option<&VertexId>) {
        let prev_parent = match self.vertices.get(id) {
            Some(vertex) => {
                if vertex.parent.as_ref() == new_parent {
                    return;
                }
                vertex.parent.clone()
            }
            None => {
                self.vertices
                    .insert(id.clone(), VertexState::new(id.clone()));
                None
            }
        };

        if let Some(vertex) = self.vertices.get_mut(id) {
            vertex.parent = new_parent.cloned();
        }

        let mut old_siblings = None;
        if let Some(prev) = &prev_parent {
            match self.vertices.get_mut(prev) {
                Some(parent) => {
                    parent.children.retain(|c| c != id);
                    old_siblings = Some(parent.children.clone());
                }
                None => error!(vertex = %id, parent = %prev, "old parent vertex missing"),
            }
        }

        let mut new_siblings = None;
        if let Some(next) = new_parent {
            match self.vertices.get_mut(next) {
                Some(parent) => {
                    parent.children.push(id.clone());
                    new_siblings = Some(parent.children.clone());
                }
                None => error!(vertex = %id, parent = %next, "new parent vertex missing"),
            }
        }

        // Listeners observe the final shape, so events go out after all links are updated.
        self.events.push(VertexEvent::Move {
            vertex: id.clone(),
            old_parent: prev_parent.clone(),
            new_parent: new_parent.cloned(),
        });
        if let (Some(parent), Some(children)) = (new_parent, new_siblings) {
            self.events.push(VertexEvent::Children {
                vertex: parent.clone(),
                children,
            });
        }
        if let (Some(parent), Some(children)) = (prev_parent, old_siblings) {
            self.events.push(VertexEvent::Children {
                vertex: parent,
                children,
            });
        }
    }

    pub(crate) fn set_property(&mut self, id: &VertexId, key: &str, value: Option<PropertyValue>) {
        let Some(vertex) = self.vertices.get_mut(id) else {
            return;
        };
        vertex.write_durable(key, value);
        let effective = vertex.property(key).cloned();
        self.push_property_event(id, key, effective);
    }

    pub(crate) fn set_transient_property(
        &mut self,
        id: &VertexId,
        key: &str,
        value: Option<PropertyValue>,
        stamp: Lamport,
    ) {
        let Some(vertex) = self.vertices.get_mut(id) else {
            return;
        };
        vertex.write_transient(key, value, stamp);
        let effective = vertex.property(key).cloned();
        self.push_property_event(id, key, effective);
    }

    /// Drop the transient shadow on `key` if it was set before `counter`.
    pub(crate) fn expire_transient(&mut self, id: &VertexId, key: &str, counter: Lamport) {
        if let Some(vertex) = self.vertices.get_mut(id) {
            vertex
                .transient
                .retain(|p| !(p.key == key && counter > p.stamp));
        }
    }

    fn push_property_event(&mut self, id: &VertexId, key: &str, value: Option<PropertyValue>) {
        self.events.push(VertexEvent::Property {
            vertex: id.clone(),
            key: key.to_string(),
            value,
        });
    }
}
