use thoughtspace_core::{ids::ClientId, ids::NodeId, ops::Operation, Timestamp};
use thoughtspace_sqlite::SqliteLogStore;
use thoughtspace_test_support::{assert_children, seed_tree, ScenarioClock};

#[test]
fn simple_reparent_persists_across_a_fresh_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thoughtspace.sqlite3");
    let path = path.to_str().unwrap();

    {
        let mut store = SqliteLogStore::open(path).unwrap();
        let mut clock = ScenarioClock::new();
        seed_tree(
            &mut store,
            &mut clock,
            &[("A", "ROOT"), ("C", "A"), ("B", "ROOT")],
        );
        thoughtspace_core::apply_batch(
            &mut store,
            vec![Operation::mv(
                Timestamp::new(100, 0, ClientId::from("alice")),
                NodeId::from("C"),
                ClientId::from("alice"),
                Some(NodeId::from("A")),
                NodeId::from("B"),
                None,
            )],
            &thoughtspace_core::EngineConfig::default(),
        )
        .unwrap();
    }

    // Reopening the same file must see the persisted op_log and nodes table as-is.
    let reopened = SqliteLogStore::open(path).unwrap();
    assert_children(&reopened, "ROOT", &["A", "B"]);
    assert_children(&reopened, "B", &["C"]);
}

#[test]
fn out_of_order_insertion_replays_in_timestamp_order() {
    let mut store = SqliteLogStore::open_in_memory().unwrap();
    let mut clock = ScenarioClock::new();
    seed_tree(
        &mut store,
        &mut clock,
        &[("A", "ROOT"), ("C", "A"), ("B", "ROOT")],
    );

    thoughtspace_core::apply_batch(
        &mut store,
        vec![Operation::mv(
            Timestamp::new(105, 0, ClientId::from("alice")),
            NodeId::from("E"),
            ClientId::from("alice"),
            None,
            NodeId::from("B"),
            None,
        )],
        &thoughtspace_core::EngineConfig::default(),
    )
    .unwrap();
    thoughtspace_core::apply_batch(
        &mut store,
        vec![Operation::mv(
            Timestamp::new(103, 0, ClientId::from("alice")),
            NodeId::from("C"),
            ClientId::from("alice"),
            Some(NodeId::from("A")),
            NodeId::from("B"),
            None,
        )],
        &thoughtspace_core::EngineConfig::default(),
    )
    .unwrap();

    assert_children(&store, "B", &["C", "E"]);
}
