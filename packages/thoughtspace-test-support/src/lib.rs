#![forbid(unsafe_code)]
//! Scenario builders shared by `thoughtspace-core` and `thoughtspace-sqlite` conformance
//! suites, so both backends exercise the same literal trees from the worked end-to-end
//! scenarios without duplicating setup in every test.

use thoughtspace_core::{apply_batch, ids::ClientId, ids::NodeId, ops::Operation, EngineConfig};

/// Monotonic millisecond counter for minting distinct timestamps within a single scenario
/// without depending on the wall clock (tests must be deterministic).
pub struct ScenarioClock {
    next_millis: u64,
}

impl ScenarioClock {
    pub fn new() -> Self {
        Self { next_millis: 1 }
    }

    pub fn tick(&mut self, client: &str) -> thoughtspace_core::Timestamp {
        let millis = self.next_millis;
        self.next_millis += 1;
        thoughtspace_core::Timestamp::new(millis, 0, ClientId::from(client))
    }
}

impl Default for ScenarioClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Seed a store with a parent/child edge list, e.g. `[("A", "ROOT"), ("C", "A"), ("B", "ROOT")]`
/// to build `ROOT -> {A -> {C}, B}`. Each edge becomes one move operation, applied in the given
/// order with strictly increasing timestamps.
pub fn seed_tree<S: thoughtspace_core::LogStore>(
    store: &mut S,
    clock: &mut ScenarioClock,
    edges: &[(&str, &str)],
) {
    let ops = edges
        .iter()
        .map(|(node, parent)| {
            Operation::mv(
                clock.tick("seed"),
                NodeId::from(*node),
                ClientId::from("seed"),
                None,
                NodeId::from(*parent),
                None,
            )
        })
        .collect();
    apply_batch(store, ops, &EngineConfig::default()).expect("seed batch applies cleanly");
}

/// The sorted ids of every node whose materialized parent is `parent`.
pub fn children_of<S: thoughtspace_core::LogStore>(store: &S, parent: &str) -> Vec<String> {
    let parent = NodeId::from(parent);
    let mut children: Vec<String> = store
        .all_nodes()
        .expect("read nodes")
        .into_iter()
        .filter(|(_, p)| p.as_ref() == Some(&parent))
        .map(|(id, _)| id.as_str().to_string())
        .collect();
    children.sort();
    children
}

/// Assert that `parent`'s materialized children are exactly `expected` (order-independent).
pub fn assert_children<S: thoughtspace_core::LogStore>(store: &S, parent: &str, expected: &[&str]) {
    let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(children_of(store, parent), expected, "children of {parent}");
}
