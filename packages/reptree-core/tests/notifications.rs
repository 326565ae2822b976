use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use reptree_core::{
    Operation, PropertyValue, ReplicaId, ReplicatedTree, TreeConfig, VertexEvent, VertexId,
};

type Seen = Rc<RefCell<Vec<VertexEvent>>>;

fn record(tree: &mut ReplicatedTree, vertex: Option<&VertexId>) -> Seen {
    let seen: Seen = Rc::default();
    let sink = seen.clone();
    tree.subscribe(vertex, move |event| sink.borrow_mut().push(event.clone()));
    seen
}

#[test]
fn repeated_writes_coalesce_to_last_value() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let v = tree.new_vertex(&root);
    tree.flush_events();
    let seen = record(&mut tree, Some(&v));

    for i in 0..100 {
        tree.set_property(&v, "n", i);
    }
    assert!(seen.borrow().is_empty());

    assert_eq!(tree.flush_events(), 1);
    assert_eq!(
        *seen.borrow(),
        vec![VertexEvent::Property {
            vertex: v.clone(),
            key: "n".into(),
            value: Some(PropertyValue::Number(99.0)),
        }]
    );
}

#[test]
fn move_reports_first_old_and_last_new_parent() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let p = tree.new_vertex(&root);
    let q = tree.new_vertex(&root);
    let x = tree.new_vertex(&root);
    tree.flush_events();
    let seen = record(&mut tree, Some(&x));

    tree.move_vertex(&x, &p);
    tree.move_vertex(&x, &q);
    tree.flush_events();

    assert_eq!(
        *seen.borrow(),
        vec![VertexEvent::Move {
            vertex: x.clone(),
            old_parent: Some(root.clone()),
            new_parent: Some(q.clone()),
        }]
    );
}

#[test]
fn parent_sees_final_child_list() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let seen = record(&mut tree, Some(&root));

    let a = tree.new_vertex(&root);
    let b = tree.new_vertex(&root);
    tree.flush_events();

    assert_eq!(
        *seen.borrow(),
        vec![VertexEvent::Children {
            vertex: root.clone(),
            children: vec![a, b],
        }]
    );
}

#[test]
fn remote_operations_notify_too() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let seen = record(&mut tree, None);

    let replica = ReplicaId::new("b");
    tree.merge(&[
        Operation::move_vertex(&replica, 10, "x", Some(root.clone())),
        Operation::set_property(&replica, 11, "x", "title", "remote"),
    ]);
    tree.flush_events();

    let seen = seen.borrow();
    assert!(seen.iter().any(|e| matches!(
        e,
        VertexEvent::Move { vertex, old_parent: None, .. } if vertex.as_str() == "x"
    )));
    assert!(seen.iter().any(|e| matches!(
        e,
        VertexEvent::Property { key, value: Some(_), .. } if key == "title"
    )));
}

#[test]
fn transient_writes_notify_with_effective_value() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let v = tree.new_vertex_with(&root, [("name", "saved")]);
    tree.flush_events();
    let seen = record(&mut tree, Some(&v));

    tree.set_transient_property(&v, "name", "typing");
    tree.flush_events();
    tree.clear_transient_property(&v, "name");
    tree.flush_events();

    let values: Vec<Option<PropertyValue>> = seen
        .borrow()
        .iter()
        .filter_map(|e| match e {
            VertexEvent::Property { value, .. } => Some(value.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(values, vec![Some("typing".into()), Some("saved".into())]);
}

#[test]
fn scoped_listeners_fire_before_global_ones() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let v = tree.new_vertex(&root);
    tree.flush_events();

    let order = Rc::new(RefCell::new(Vec::new()));
    let sink = order.clone();
    tree.subscribe(None, move |_| sink.borrow_mut().push("global"));
    let sink = order.clone();
    tree.subscribe(Some(&v), move |_| sink.borrow_mut().push("scoped"));

    tree.set_property(&v, "k", 1);
    tree.flush_events();

    assert_eq!(*order.borrow(), vec!["scoped", "global"]);
}

#[test]
fn unsubscribed_listener_is_silent() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let v = tree.new_vertex(&root);
    let count = Rc::new(RefCell::new(0));
    let sink = count.clone();
    let id = tree.subscribe(Some(&v), move |_| *sink.borrow_mut() += 1);

    assert!(tree.unsubscribe(id));
    tree.set_property(&v, "k", 1);
    tree.flush_events();

    assert_eq!(*count.borrow(), 0);
}

#[test]
fn poll_respects_notify_interval() {
    let config = TreeConfig {
        notify_interval_ms: 50,
        ..TreeConfig::default()
    };
    let mut tree = ReplicatedTree::with_config("a", config);
    let root = tree.root_id().clone();
    let v = tree.new_vertex(&root);
    let start = Instant::now();

    assert!(tree.poll_events(start) > 0);

    tree.set_property(&v, "k", 1);
    assert_eq!(tree.poll_events(start + Duration::from_millis(10)), 0);
    assert_eq!(tree.poll_events(start + Duration::from_millis(49)), 0);
    assert_eq!(tree.poll_events(start + Duration::from_millis(50)), 1);

    // nothing queued: the tick still counts as a flush
    assert_eq!(tree.poll_events(start + Duration::from_millis(120)), 0);
    tree.set_property(&v, "k", 2);
    assert_eq!(tree.poll_events(start + Duration::from_millis(130)), 0);
    assert_eq!(tree.poll_events(start + Duration::from_millis(170)), 1);
}

#[test]
fn applied_ops_are_reported_once_in_apply_order() {
    let s = ReplicaId::new("s");
    let a = ReplicaId::new("a");
    let mut tree =
        ReplicatedTree::from_operations("p", &[Operation::move_vertex(&s, 1, "root", None)])
            .unwrap();

    let applied = Rc::new(RefCell::new(Vec::new()));
    let sink = applied.clone();
    let id = tree.observe_applied(move |op| sink.borrow_mut().push(op.id().to_string()));

    let child = Operation::move_vertex(&a, 11, "child", Some(VertexId::from("parent")));
    let name = Operation::set_property(&a, 12, "child", "name", "leaf");
    tree.merge(&[child.clone(), name.clone()]);
    assert!(applied.borrow().is_empty());

    tree.merge(&[Operation::move_vertex(&a, 10, "parent", Some(VertexId::from("root")))]);
    assert_eq!(*applied.borrow(), vec!["10@a", "11@a", "12@a"]);

    tree.merge(&[child, name]);
    assert_eq!(applied.borrow().len(), 3);

    let root = tree.root_id().clone();
    tree.new_vertex(&root);
    assert_eq!(applied.borrow().len(), 4);
    assert!(applied.borrow()[3].ends_with("@p"));

    assert!(tree.unobserve_applied(id));
    tree.new_vertex(&root);
    assert_eq!(applied.borrow().len(), 4);
}
