//! Shared helpers for reptree convergence suites: permutations, replica sync,
//! and the random move/create fuzz driver.

use rand::Rng;
use reptree_core::{Operation, ReplicatedTree, VertexId};

/// All permutations of `items` (Heap's algorithm).
pub fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    fn heap_permute<T: Clone>(k: usize, items: &mut [T], res: &mut Vec<Vec<T>>) {
        if k <= 1 {
            res.push(items.to_vec());
            return;
        }
        heap_permute(k - 1, items, res);
        for i in 0..(k - 1) {
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
            heap_permute(k - 1, items, res);
        }
    }
    let mut res = Vec::new();
    heap_permute(items.len(), &mut items.to_vec(), &mut res);
    res
}

/// `count` replicas named `peer1..` sharing the first replica's root and trash.
pub fn replicas(count: usize) -> Vec<ReplicatedTree> {
    let mut first = ReplicatedTree::new("peer1");
    let seed = first.drain_local_operations();
    let mut trees = vec![first];
    for i in 1..count {
        let tree = ReplicatedTree::from_operations(format!("peer{}", i + 1), &seed)
            .expect("seed contains the root move");
        trees.push(tree);
    }
    trees
}

/// Ship every replica's local operations to every other replica.
pub fn sync_all(trees: &mut [ReplicatedTree]) {
    let batches: Vec<Vec<Operation>> = trees
        .iter_mut()
        .map(|tree| tree.drain_local_operations())
        .collect();
    for (from, ops) in batches.iter().enumerate() {
        for (to, tree) in trees.iter_mut().enumerate() {
            if from != to {
                tree.merge(ops);
            }
        }
    }
}

/// Structure, durable properties, and move logs are identical across all replicas.
pub fn all_converged(trees: &[ReplicatedTree]) -> bool {
    let Some(first) = trees.first() else {
        return true;
    };
    trees
        .iter()
        .all(|tree| first.compare_structure(tree) && first.compare_move_ops(tree))
}

/// Weights of the random actions performed by [`random_steps`].
#[derive(Clone, Copy, Debug)]
pub struct FuzzMix {
    pub create: f64,
    pub set_property: f64,
    /// Chance that a move targets a parent id that exists nowhere.
    pub missing_parent: f64,
}

impl Default for FuzzMix {
    fn default() -> Self {
        Self {
            create: 0.025,
            set_property: 0.0,
            missing_parent: 0.01,
        }
    }
}

fn random_vertex(tree: &ReplicatedTree, rng: &mut impl Rng) -> VertexId {
    let vertices = tree.all_vertices();
    vertices[rng.gen_range(0..vertices.len())].id().clone()
}

fn random_missing_id(rng: &mut impl Rng) -> VertexId {
    VertexId::new(format!("missing-{:06x}", rng.gen_range(0..0xff_ffffu32)))
}

/// Run `steps` random actions, each against a randomly chosen replica.
/// Moves pick any existing vertex as target and candidate parent, legal or not.
pub fn random_steps(trees: &mut [ReplicatedTree], steps: usize, mix: FuzzMix, rng: &mut impl Rng) {
    for _ in 0..steps {
        let idx = rng.gen_range(0..trees.len());
        let tree = &mut trees[idx];
        let roll: f64 = rng.gen();
        if roll < mix.create {
            let parent = random_vertex(tree, rng);
            tree.new_vertex(&parent);
        } else if roll < mix.create + mix.set_property {
            let target = random_vertex(tree, rng);
            let value = rng.gen_range(0..100i64);
            tree.set_property(&target, "test", value);
        } else {
            let target = random_vertex(tree, rng);
            let parent = if rng.gen::<f64>() < mix.missing_parent {
                random_missing_id(rng)
            } else {
                random_vertex(tree, rng)
            };
            tree.move_vertex(&target, &parent);
        }
    }
}
