use proptest::prelude::*;
use thoughtspace_core::{
    apply_batch, ids::ClientId, ids::NodeId, ops::Operation, timestamp::Timestamp, traits::LogStore,
    traits::MemoryLogStore, EngineConfig,
};

const NODE_POOL: [&str; 4] = ["a", "b", "c", "d"];
const PARENT_POOL: [&str; 6] = ["ROOT", "a", "b", "c", "d", "TOMBSTONE"];

fn arb_batch(max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(0usize..NODE_POOL.len() * PARENT_POOL.len(), 1..=max_len).prop_map(
        |picks| {
            picks
                .into_iter()
                .enumerate()
                .map(|(i, pick)| {
                    let node = NODE_POOL[pick % NODE_POOL.len()];
                    let parent = PARENT_POOL[(pick / NODE_POOL.len()) % PARENT_POOL.len()];
                    Operation::mv(
                        Timestamp::new(1000 + i as u64, 0, ClientId::from("prop")),
                        NodeId::from(node),
                        ClientId::from("prop"),
                        None,
                        NodeId::from(parent),
                        None,
                    )
                })
                .collect()
        },
    )
}

fn nodes_snapshot(batch: &[Operation]) -> Vec<(NodeId, Option<NodeId>)> {
    let mut store = MemoryLogStore::new();
    let config = EngineConfig::default();
    apply_batch(&mut store, batch.to_vec(), &config).unwrap();
    let mut nodes = store.all_nodes().unwrap();
    nodes.sort();
    nodes
}

proptest! {
    /// Applying the same batch twice is a no-op the second time (§8 idempotence law).
    #[test]
    fn applying_a_batch_twice_matches_applying_it_once(batch in arb_batch(6)) {
        let mut store = MemoryLogStore::new();
        let config = EngineConfig::default();
        apply_batch(&mut store, batch.clone(), &config).unwrap();
        let once = { let mut n = store.all_nodes().unwrap(); n.sort(); n };

        apply_batch(&mut store, batch, &config).unwrap();
        let twice = { let mut n = store.all_nodes().unwrap(); n.sort(); n };

        prop_assert_eq!(once, twice);
    }

    /// Final state depends only on the set of operations, not the order they were submitted in
    /// (§8 order-independence law): applying a batch and its reverse converge to the same tree.
    #[test]
    fn reversing_submission_order_converges_to_the_same_tree(batch in arb_batch(6)) {
        let forward = nodes_snapshot(&batch);
        let mut reversed = batch.clone();
        reversed.reverse();
        let backward = nodes_snapshot(&reversed);

        prop_assert_eq!(forward, backward);
    }

    /// Splitting a batch into two halves and applying them in either order converges to the
    /// same tree as applying the whole batch at once.
    #[test]
    fn split_batches_converge_regardless_of_application_order(batch in arb_batch(6)) {
        let whole = nodes_snapshot(&batch);
        let mid = batch.len() / 2;
        let (first_half, second_half) = batch.split_at(mid);

        let mut store_fs = MemoryLogStore::new();
        let config = EngineConfig::default();
        apply_batch(&mut store_fs, first_half.to_vec(), &config).unwrap();
        apply_batch(&mut store_fs, second_half.to_vec(), &config).unwrap();
        let mut first_then_second = store_fs.all_nodes().unwrap();
        first_then_second.sort();

        let mut store_sf = MemoryLogStore::new();
        apply_batch(&mut store_sf, second_half.to_vec(), &config).unwrap();
        apply_batch(&mut store_sf, first_half.to_vec(), &config).unwrap();
        let mut second_then_first = store_sf.all_nodes().unwrap();
        second_then_first.sort();

        prop_assert_eq!(&whole, &first_then_second);
        prop_assert_eq!(first_then_second, second_then_first);
    }
}
