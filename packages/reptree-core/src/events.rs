//! Change notification: an accumulator that coalesces per-vertex events between flushes,
//! and the listener registry the coalesced events are dispatched to.
//! Applied-operation observers bypass the accumulator and hear every op as it lands.

use std::collections::HashMap;

use crate::ids::VertexId;
use crate::ops::{Operation, PropertyValue};

/// A change to one vertex, as seen by subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum VertexEvent {
    Move {
        vertex: VertexId,
        old_parent: Option<VertexId>,
        new_parent: Option<VertexId>,
    },
    Property {
        vertex: VertexId,
        key: String,
        value: Option<PropertyValue>,
    },
    Children {
        vertex: VertexId,
        children: Vec<VertexId>,
    },
}

impl VertexEvent {
    pub fn vertex(&self) -> &VertexId {
        match self {
            VertexEvent::Move { vertex, .. }
            | VertexEvent::Property { vertex, .. }
            | VertexEvent::Children { vertex, .. } => vertex,
        }
    }
}

#[derive(Default)]
struct PendingVertexEvents {
    moved: Option<(Option<VertexId>, Option<VertexId>)>,
    children: Option<Vec<VertexId>>,
    properties: Vec<(String, Option<PropertyValue>)>,
}

/// Collects events between flushes. Each vertex keeps at most one move event
/// (first old parent, last new parent), one children event and one event per
/// property key (last value).
#[derive(Default)]
pub(crate) struct EventAccumulator {
    order: Vec<VertexId>,
    pending: HashMap<VertexId, PendingVertexEvents>,
}

impl EventAccumulator {
    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn push(&mut self, event: VertexEvent) {
        let vertex = event.vertex().clone();
        if !self.pending.contains_key(&vertex) {
            self.order.push(vertex.clone());
        }
        let slot = self.pending.entry(vertex).or_default();
        match event {
            VertexEvent::Move {
                old_parent,
                new_parent,
                ..
            } => {
                slot.moved = match slot.moved.take() {
                    Some((first_old, _)) => Some((first_old, new_parent)),
                    None => Some((old_parent, new_parent)),
                };
            }
            VertexEvent::Children { children, .. } => slot.children = Some(children),
            VertexEvent::Property { key, value, .. } => {
                match slot.properties.iter_mut().find(|(k, _)| *k == key) {
                    Some(existing) => existing.1 = value,
                    None => slot.properties.push((key, value)),
                }
            }
        }
    }

    /// Take everything accumulated so far, coalesced, in first-touched vertex order.
    pub(crate) fn drain(&mut self) -> Vec<VertexEvent> {
        let mut events = Vec::new();
        for vertex in self.order.drain(..) {
            let Some(slot) = self.pending.remove(&vertex) else {
                continue;
            };
            if let Some((old_parent, new_parent)) = slot.moved {
                events.push(VertexEvent::Move {
                    vertex: vertex.clone(),
                    old_parent,
                    new_parent,
                });
            }
            if let Some(children) = slot.children {
                events.push(VertexEvent::Children {
                    vertex: vertex.clone(),
                    children,
                });
            }
            for (key, value) in slot.properties {
                events.push(VertexEvent::Property {
                    vertex: vertex.clone(),
                    key,
                    value,
                });
            }
        }
        events
    }
}

pub type Listener = Box<dyn FnMut(&VertexEvent)>;

pub type AppliedListener = Box<dyn FnMut(&Operation)>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    scoped: HashMap<VertexId, Vec<(SubscriptionId, Listener)>>,
    global: Vec<(SubscriptionId, Listener)>,
    applied: Vec<(SubscriptionId, AppliedListener)>,
}

impl Listeners {
    pub(crate) fn subscribe(
        &mut self,
        vertex: Option<VertexId>,
        listener: Listener,
    ) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        match vertex {
            Some(vertex) => self.scoped.entry(vertex).or_default().push((id, listener)),
            None => self.global.push((id, listener)),
        }
        id
    }

    pub(crate) fn observe_applied(&mut self, listener: AppliedListener) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.applied.push((id, listener));
        id
    }

    pub(crate) fn has_applied_observers(&self) -> bool {
        !self.applied.is_empty()
    }

    pub(crate) fn report_applied(&mut self, op: &Operation) {
        for (_, listener) in self.applied.iter_mut() {
            listener(op);
        }
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        if let Some(pos) = self.global.iter().position(|(sid, _)| *sid == id) {
            self.global.remove(pos);
            return true;
        }
        if let Some(pos) = self.applied.iter().position(|(sid, _)| *sid == id) {
            self.applied.remove(pos);
            return true;
        }
        let mut emptied = None;
        let mut found = false;
        for (vertex, listeners) in self.scoped.iter_mut() {
            if let Some(pos) = listeners.iter().position(|(sid, _)| *sid == id) {
                listeners.remove(pos);
                found = true;
                if listeners.is_empty() {
                    emptied = Some(vertex.clone());
                }
                break;
            }
        }
        if let Some(vertex) = emptied {
            self.scoped.remove(&vertex);
        }
        found
    }

    pub(crate) fn dispatch(&mut self, events: &[VertexEvent]) {
        for event in events {
            if let Some(listeners) = self.scoped.get_mut(event.vertex()) {
                for (_, listener) in listeners.iter_mut() {
                    listener(event);
                }
            }
            for (_, listener) in self.global.iter_mut() {
                listener(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn prop(vertex: &str, key: &str, value: f64) -> VertexEvent {
        VertexEvent::Property {
            vertex: VertexId::from(vertex),
            key: key.to_string(),
            value: Some(PropertyValue::Number(value)),
        }
    }

    #[test]
    fn coalesces_by_identity() {
        let mut acc = EventAccumulator::default();
        acc.push(prop("a", "x", 1.0));
        acc.push(prop("b", "x", 1.0));
        acc.push(prop("a", "x", 2.0));
        acc.push(prop("a", "y", 3.0));
        acc.push(VertexEvent::Move {
            vertex: "a".into(),
            old_parent: Some("r".into()),
            new_parent: Some("p".into()),
        });
        acc.push(VertexEvent::Move {
            vertex: "a".into(),
            old_parent: Some("p".into()),
            new_parent: Some("q".into()),
        });

        let events = acc.drain();
        assert!(acc.is_empty());
        assert_eq!(
            events,
            vec![
                VertexEvent::Move {
                    vertex: "a".into(),
                    old_parent: Some("r".into()),
                    new_parent: Some("q".into()),
                },
                prop("a", "x", 2.0),
                prop("a", "y", 3.0),
                prop("b", "x", 1.0),
            ]
        );
    }

    #[test]
    fn scoped_listeners_run_before_global() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut listeners = Listeners::default();
        let s = seen.clone();
        listeners.subscribe(
            None,
            Box::new(move |e| s.borrow_mut().push(format!("global:{}", e.vertex()))),
        );
        let s = seen.clone();
        listeners.subscribe(
            Some("a".into()),
            Box::new(move |e| s.borrow_mut().push(format!("a:{}", e.vertex()))),
        );

        listeners.dispatch(&[prop("a", "k", 1.0), prop("b", "k", 1.0)]);
        assert_eq!(*seen.borrow(), vec!["a:a", "global:a", "global:b"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let count = Rc::new(RefCell::new(0));
        let mut listeners = Listeners::default();
        let c = count.clone();
        let id = listeners.subscribe(Some("a".into()), Box::new(move |_| *c.borrow_mut() += 1));

        listeners.dispatch(&[prop("a", "k", 1.0)]);
        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.dispatch(&[prop("a", "k", 2.0)]);
        assert_eq!(*count.borrow(), 1);
    }
}
