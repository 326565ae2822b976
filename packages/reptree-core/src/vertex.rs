//! Typed, ergonomic access to one vertex of a [`ReplicatedTree`].
//!
//! [`VertexRef`] borrows the tree for reads; [`VertexMut`] borrows it mutably and
//! turns every write into an operation on the owning replica.

use crate::clock::{Clock, LamportClock};
use crate::events::{SubscriptionId, VertexEvent};
use crate::ids::VertexId;
use crate::ops::PropertyValue;
use crate::tree::{ReplicatedTree, NAME_KEY};

#[cfg(feature = "serde")]
use serde::{de::DeserializeOwned, Serialize};

pub struct VertexRef<'a, C: Clock = LamportClock> {
    tree: &'a ReplicatedTree<C>,
    id: VertexId,
}

impl<'a, C: Clock> Clone for VertexRef<'a, C> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree,
            id: self.id.clone(),
        }
    }
}

impl<'a, C: Clock> std::fmt::Debug for VertexRef<'a, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexRef").field("id", &self.id).finish()
    }
}

impl<'a, C: Clock> VertexRef<'a, C> {
    pub(crate) fn new(tree: &'a ReplicatedTree<C>, id: VertexId) -> Self {
        Self { tree, id }
    }

    pub fn id(&self) -> &VertexId {
        &self.id
    }

    pub fn name(&self) -> Option<&'a str> {
        self.property(NAME_KEY).and_then(PropertyValue::as_str)
    }

    pub fn parent_id(&self) -> Option<&'a VertexId> {
        self.tree.parent_id(&self.id)
    }

    pub fn parent(&self) -> Option<VertexRef<'a, C>> {
        self.tree.parent(&self.id)
    }

    pub fn child_ids(&self) -> &'a [VertexId] {
        self.tree.child_ids(&self.id)
    }

    pub fn children(&self) -> Vec<VertexRef<'a, C>> {
        self.tree.children(&self.id)
    }

    pub fn ancestors(&self) -> Vec<VertexRef<'a, C>> {
        self.tree.ancestors(&self.id)
    }

    pub fn is_deleted(&self) -> bool {
        self.tree.is_deleted(&self.id)
    }

    pub fn property(&self, key: &str) -> Option<&'a PropertyValue> {
        self.tree.property(&self.id, key)
    }

    pub fn properties(&self) -> Vec<(&'a str, &'a PropertyValue)> {
        self.tree.properties(&self.id)
    }

    /// First child matching `pred`, in child order.
    pub fn find_child(
        &self,
        mut pred: impl FnMut(&VertexRef<'a, C>) -> bool,
    ) -> Option<VertexRef<'a, C>> {
        self.children().into_iter().find(|child| pred(child))
    }

    pub fn filter_children(
        &self,
        mut pred: impl FnMut(&VertexRef<'a, C>) -> bool,
    ) -> Vec<VertexRef<'a, C>> {
        self.children()
            .into_iter()
            .filter(|child| pred(child))
            .collect()
    }

    /// Property table as a JSON object, transient values included.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .properties()
            .into_iter()
            .map(|(key, value)| (key.to_string(), json::to_json(value)))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Cast the property table to a typed record.
    #[cfg(feature = "serde")]
    pub fn to_typed<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.to_json())
    }

    #[cfg(feature = "serde")]
    pub fn children_as_typed<T: DeserializeOwned>(&self) -> serde_json::Result<Vec<T>> {
        self.children()
            .iter()
            .map(|child| child.to_typed::<T>())
            .collect()
    }
}

pub struct VertexMut<'a, C: Clock = LamportClock> {
    tree: &'a mut ReplicatedTree<C>,
    id: VertexId,
}

impl<'a, C: Clock> VertexMut<'a, C> {
    pub(crate) fn new(tree: &'a mut ReplicatedTree<C>, id: VertexId) -> Self {
        Self { tree, id }
    }

    pub fn id(&self) -> &VertexId {
        &self.id
    }

    /// Read view of the same vertex.
    pub fn read(&self) -> VertexRef<'_, C> {
        VertexRef::new(self.tree, self.id.clone())
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.tree.property(&self.id, key)
    }

    pub fn set_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> &mut Self {
        self.tree.set_property(&self.id, key, value);
        self
    }

    pub fn clear_property(&mut self, key: impl Into<String>) -> &mut Self {
        self.tree.clear_property(&self.id, key);
        self
    }

    pub fn set_properties<K, V>(&mut self, props: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        self.tree.set_properties(&self.id, props);
        self
    }

    pub fn set_transient_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> &mut Self {
        self.tree.set_transient_property(&self.id, key, value);
        self
    }

    pub fn clear_transient_property(&mut self, key: impl Into<String>) -> &mut Self {
        self.tree.clear_transient_property(&self.id, key);
        self
    }

    pub fn new_child(&mut self) -> VertexMut<'_, C> {
        let id = self.tree.new_vertex(&self.id);
        VertexMut::new(self.tree, id)
    }

    pub fn new_child_with<K, V>(
        &mut self,
        props: impl IntoIterator<Item = (K, V)>,
    ) -> VertexMut<'_, C>
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let id = self.tree.new_vertex_with(&self.id, props);
        VertexMut::new(self.tree, id)
    }

    pub fn new_named_child<K, V>(
        &mut self,
        name: &str,
        props: impl IntoIterator<Item = (K, V)>,
    ) -> VertexMut<'_, C>
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let id = self.tree.new_named_vertex(&self.id, name, props);
        VertexMut::new(self.tree, id)
    }

    /// Create a child whose initial properties are the fields of `record`.
    /// `null` fields are skipped; nested objects are rejected before anything is written.
    #[cfg(feature = "serde")]
    pub fn new_child_from<T: Serialize>(
        &mut self,
        record: &T,
    ) -> serde_json::Result<VertexMut<'_, C>> {
        let props = json::to_properties(record)?;
        Ok(self.new_child_with(props))
    }

    pub fn move_to(&mut self, parent: &VertexId) {
        self.tree.move_vertex(&self.id, parent);
    }

    pub fn delete(self) {
        self.tree.delete_vertex(&self.id);
    }

    pub fn observe(&mut self, listener: impl FnMut(&VertexEvent) + 'static) -> SubscriptionId {
        let id = self.id.clone();
        self.tree.subscribe(Some(&id), listener)
    }

    /// Listen only to changes of this vertex's child list.
    pub fn observe_children(
        &mut self,
        mut listener: impl FnMut(&[VertexId]) + 'static,
    ) -> SubscriptionId {
        self.observe(move |event| {
            if let VertexEvent::Children { children, .. } = event {
                listener(children);
            }
        })
    }
}

#[cfg(feature = "serde")]
mod json {
    use serde::Serialize;
    use serde_json::Value;

    use crate::ops::PropertyValue;

    // Integral numbers go out as JSON integers so they cast into integer fields.
    fn number(n: f64) -> Value {
        if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
            Value::from(n as i64)
        } else {
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
    }

    pub(super) fn to_json(value: &PropertyValue) -> Value {
        match value {
            PropertyValue::String(s) => Value::String(s.clone()),
            PropertyValue::Number(n) => number(*n),
            PropertyValue::Boolean(b) => Value::Bool(*b),
            PropertyValue::Strings(v) => v.iter().cloned().map(Value::String).collect(),
            PropertyValue::Numbers(v) => v.iter().copied().map(number).collect(),
            PropertyValue::Booleans(v) => v.iter().copied().map(Value::Bool).collect(),
        }
    }

    pub(super) fn to_properties<T: Serialize>(
        record: &T,
    ) -> serde_json::Result<Vec<(String, PropertyValue)>> {
        let Value::Object(map) = serde_json::to_value(record)? else {
            return Err(<serde_json::Error as serde::ser::Error>::custom(
                "vertex properties must serialize to an object",
            ));
        };
        let mut props = Vec::with_capacity(map.len());
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            props.push((key, from_json(value)?));
        }
        Ok(props)
    }

    // Plain JSON scalars and homogeneous arrays only; an empty array reads as `Strings`.
    fn from_json(value: Value) -> serde_json::Result<PropertyValue> {
        let unsupported = || {
            <serde_json::Error as serde::ser::Error>::custom(
                "property values must be scalars or homogeneous arrays of scalars",
            )
        };
        match value {
            Value::String(s) => Ok(PropertyValue::String(s)),
            Value::Number(n) => n.as_f64().map(PropertyValue::Number).ok_or_else(unsupported),
            Value::Bool(b) => Ok(PropertyValue::Boolean(b)),
            Value::Array(items) => match items.first() {
                None | Some(Value::String(_)) => items
                    .into_iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(s),
                        _ => Err(unsupported()),
                    })
                    .collect::<serde_json::Result<Vec<_>>>()
                    .map(PropertyValue::Strings),
                Some(Value::Number(_)) => items
                    .iter()
                    .map(|v| v.as_f64().ok_or_else(unsupported))
                    .collect::<serde_json::Result<Vec<_>>>()
                    .map(PropertyValue::Numbers),
                Some(Value::Bool(_)) => items
                    .iter()
                    .map(|v| v.as_bool().ok_or_else(unsupported))
                    .collect::<serde_json::Result<Vec<_>>>()
                    .map(PropertyValue::Booleans),
                Some(_) => Err(unsupported()),
            },
            Value::Null | Value::Object(_) => Err(unsupported()),
        }
    }
}
