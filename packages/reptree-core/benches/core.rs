use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use reptree_core::{Operation, ReplicatedTree, VertexId};

const CI_COUNTS: &[(u64, u64)] = &[(100, 5), (1_000, 1)];

const LOCAL_COUNTS: &[(u64, u64)] = &[(10, 1), (100, 3), (1_000, 1), (5_000, 1)];

#[derive(Clone, Copy)]
enum Workload {
    /// Create `count` vertices under the root, then move each under its predecessor.
    CreateMove,
    /// Deliver a `count`-vertex history to a fresh replica newest first, so every
    /// operation lands behind the whole log.
    ReverseMerge,
    /// Overwrite one property `count` times and flush once.
    PropertyBurst,
}

impl Workload {
    fn name(self) -> &'static str {
        match self {
            Workload::CreateMove => "create-move",
            Workload::ReverseMerge => "reverse-merge",
            Workload::PropertyBurst => "property-burst",
        }
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    implementation: &'static str,
    workload: String,
    timestamp: String,
    total_ops: u64,
    duration_ms: f64,
    ops_per_sec: f64,
    count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    iterations: Option<u64>,
}

fn create_move(count: u64) -> (u64, f64) {
    let mut tree = ReplicatedTree::new("bench");
    let root = tree.root_id().clone();

    let start = Instant::now();
    let ids: Vec<VertexId> = (0..count).map(|_| tree.new_vertex(&root)).collect();
    for pair in ids.windows(2) {
        tree.move_vertex(&pair[1], &pair[0]);
    }
    (count * 2, start.elapsed().as_secs_f64() * 1000.0)
}

fn reverse_merge(count: u64) -> (u64, f64) {
    let mut source = ReplicatedTree::new("source");
    let root = source.root_id().clone();
    let mut parent = root.clone();
    for i in 0..count {
        parent = if i % 4 == 0 { root.clone() } else { parent };
        parent = source.new_vertex(&parent);
    }
    let mut ops: Vec<Operation> = source.drain_local_operations();
    let (seed, rest) = ops.split_at_mut(2);
    rest.reverse();

    let mut replica = ReplicatedTree::from_operations("bench", seed).expect("seed has a root");
    let start = Instant::now();
    for op in rest.iter() {
        replica.merge(std::slice::from_ref(op));
    }
    (rest.len() as u64, start.elapsed().as_secs_f64() * 1000.0)
}

fn property_burst(count: u64) -> (u64, f64) {
    let mut tree = ReplicatedTree::new("bench");
    let root = tree.root_id().clone();
    let v = tree.new_vertex(&root);
    tree.subscribe(Some(&v), |_| {});

    let start = Instant::now();
    for i in 0..count {
        tree.set_property(&v, "n", i as f64);
    }
    tree.flush_events();
    (count, start.elapsed().as_secs_f64() * 1000.0)
}

fn run(workload: Workload, count: u64) -> (u64, f64) {
    match workload {
        Workload::CreateMove => create_move(count),
        Workload::ReverseMerge => reverse_merge(count),
        Workload::PropertyBurst => property_burst(count),
    }
}

fn main() {
    let ci = env::var("CI").map(|v| v == "true").unwrap_or(false);
    let mut counts: Vec<(u64, u64)> = if ci { CI_COUNTS } else { LOCAL_COUNTS }.to_vec();
    let mut out_dir = PathBuf::from("benchmarks/core");
    for arg in env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--counts=") {
            let parsed: Vec<(u64, u64)> = val
                .split(',')
                .filter_map(|s| s.trim().parse::<u64>().ok())
                .map(|c| (c, 1))
                .collect();
            if !parsed.is_empty() {
                counts = parsed;
            }
        } else if let Some(val) = arg.strip_prefix("--out-dir=") {
            out_dir = PathBuf::from(val);
        }
    }
    fs::create_dir_all(&out_dir).expect("create output dir");

    for workload in [
        Workload::CreateMove,
        Workload::ReverseMerge,
        Workload::PropertyBurst,
    ] {
        for &(count, iterations) in &counts {
            let runs: Vec<(u64, f64)> = (0..iterations).map(|_| run(workload, count)).collect();
            let total_ops = runs[0].0;
            let duration_ms = runs.iter().map(|r| r.1).sum::<f64>() / runs.len() as f64;

            let name = format!("{}-{}", workload.name(), count);
            let output = Output {
                implementation: "reptree-core",
                workload: name.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                total_ops,
                duration_ms,
                ops_per_sec: if duration_ms > 0.0 {
                    total_ops as f64 / duration_ms * 1000.0
                } else {
                    f64::INFINITY
                },
                count,
                iterations: (iterations > 1).then_some(iterations),
            };

            let json = serde_json::to_string_pretty(&output).expect("serialize");
            fs::write(out_dir.join(format!("{name}.json")), &json).expect("write output");
            println!("{json}");
        }
    }
}
