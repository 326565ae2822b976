use reptree_core::{Operation, ReplicatedTree, VertexId};

#[test]
fn create_emits_one_move_per_vertex() {
    let mut tree = ReplicatedTree::new("a");
    tree.drain_local_operations();
    let root = tree.root_id().clone();

    let a = tree.new_vertex(&root);
    let b = tree.new_vertex(&a);

    let ops = tree.drain_local_operations();
    assert_eq!(ops.len(), 2);
    match &ops[1] {
        Operation::Move(op) => {
            assert_eq!(op.target, b);
            assert_eq!(op.parent.as_ref(), Some(&a));
        }
        other => panic!("expected a move, got {other:?}"),
    }
    assert!(ops[0].id() < ops[1].id());
}

#[test]
fn delete_moves_under_trash() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let parent = tree.new_vertex(&root);
    let child = tree.new_vertex(&parent);

    tree.delete_vertex(&parent);

    assert_eq!(tree.parent_id(&parent), Some(&VertexId::trash()));
    assert!(tree.is_deleted(&parent));
    assert!(tree.is_deleted(&child));
    assert!(!tree.is_deleted(&root));
    assert!(tree.child_ids(&root).is_empty());
    // the deleted subtree is still addressable
    assert_eq!(tree.parent_id(&child), Some(&parent));
    tree.validate_invariants().unwrap();
}

#[test]
fn deleted_vertex_can_be_restored() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let x = tree.new_vertex(&root);
    tree.set_property(&x, "title", "draft");

    tree.delete_vertex(&x);
    tree.move_vertex(&x, &root);

    assert!(!tree.is_deleted(&x));
    assert_eq!(tree.child_ids(&root), &[x.clone()]);
    assert_eq!(tree.property(&x, "title").and_then(|v| v.as_str()), Some("draft"));
}

#[test]
fn trash_cannot_be_moved_into_its_own_subtree() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let x = tree.new_vertex(&root);
    tree.delete_vertex(&x);

    tree.move_vertex(&VertexId::trash(), &x);

    assert_eq!(tree.parent_id(&VertexId::trash()), None);
    assert_eq!(tree.parent_id(&x), Some(&VertexId::trash()));
    tree.validate_invariants().unwrap();
}

#[test]
fn moving_to_current_parent_changes_nothing() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let a = tree.new_vertex(&root);
    let b = tree.new_vertex(&root);
    tree.flush_events();

    tree.move_vertex(&a, &root);

    assert_eq!(tree.child_ids(&root), &[a, b]);
    assert_eq!(tree.flush_events(), 0);
}

#[test]
fn ancestors_walk_to_the_root() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let a = tree.new_vertex(&root);
    let b = tree.new_vertex(&a);
    let c = tree.new_vertex(&b);

    let ids: Vec<VertexId> = tree.ancestors(&c).iter().map(|v| v.id().clone()).collect();
    assert_eq!(ids, vec![b.clone(), a.clone(), root.clone()]);
    assert!(tree.is_ancestor(&c, &root));
    assert!(!tree.is_ancestor(&a, &c));
    assert!(tree.ancestors(&root).is_empty());
}

#[test]
fn all_operations_cover_moves_and_properties() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let x = tree.new_vertex(&root);
    tree.set_property(&x, "k", 1);
    tree.set_property(&x, "k", 2);

    let ops = tree.all_operations();
    let moves = ops.iter().filter(|op| matches!(op, Operation::Move(_))).count();
    let props = ops
        .iter()
        .filter(|op| matches!(op, Operation::SetProperty(_)))
        .count();
    // root, trash, x
    assert_eq!(moves, 3);
    assert_eq!(props, 2);
}

#[test]
fn vertex_lookup_by_path() {
    let mut tree = ReplicatedTree::new("a");
    let root = tree.root_id().clone();
    let docs = tree.new_named_vertex(&root, "docs", [("kind", "folder")]);
    let notes = tree.new_named_vertex(&docs, "notes", [("kind", "file")]);

    assert_eq!(tree.vertex_by_path("docs/notes").map(|v| v.id().clone()), Some(notes));
    assert_eq!(tree.vertex_by_path("/docs/").map(|v| v.id().clone()), Some(docs));
    assert_eq!(tree.vertex_by_path("").map(|v| v.id().clone()), Some(root));
    assert!(tree.vertex_by_path("docs/missing").is_none());
}

#[test]
fn unknown_vertices_read_as_empty() {
    let tree = ReplicatedTree::new("a");
    let ghost = VertexId::from("ghost");

    assert!(!tree.contains(&ghost));
    assert!(tree.vertex(&ghost).is_none());
    assert!(tree.child_ids(&ghost).is_empty());
    assert!(tree.properties(&ghost).is_empty());
    assert_eq!(tree.parent_id(&ghost), None);
}
