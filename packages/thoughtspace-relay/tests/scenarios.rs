use thoughtspace_core::{ClientId, NodeId, Operation, Timestamp};
use thoughtspace_relay::{RelayConfig, Room};
use thoughtspace_sqlite::SqliteLogStore;

fn room() -> Room {
    Room::new(SqliteLogStore::open_in_memory().unwrap(), RelayConfig::default())
}

fn mv(millis: u64, node: &str, client: &str, old: Option<&str>, new: &str) -> Operation {
    Operation::mv(
        Timestamp::new(millis, 0, ClientId::from(client)),
        NodeId::from(node),
        ClientId::from(client),
        old.map(NodeId::from),
        NodeId::from(new),
        None,
    )
}

#[test]
fn push_persists_and_snapshot_reflects_it() {
    let room = room();
    room.push(vec![mv(1, "a", "alice", None, "ROOT")]).unwrap();

    let (nodes, operations) = room.snapshot().unwrap();
    assert!(nodes
        .iter()
        .any(|(id, parent)| id.as_str() == "a" && parent.as_ref().map(NodeId::as_str) == Some("ROOT")));
    assert_eq!(operations.len(), 1);
    assert!(operations[0].sync_timestamp.is_some());
}

#[test]
fn pull_since_returns_only_operations_after_cursor() {
    let room = room();
    room.push(vec![mv(1, "a", "alice", None, "ROOT")]).unwrap();
    let first_chunk = room.pull_since(None).unwrap();
    assert_eq!(first_chunk.operations.len(), 1);
    let cursor = first_chunk.upper_limit;

    room.push(vec![mv(2, "b", "alice", None, "a")]).unwrap();
    let second_chunk = room.pull_since(Some(cursor)).unwrap();
    assert_eq!(second_chunk.operations.len(), 1);
    assert_eq!(second_chunk.operations[0].node_id, NodeId::from("b"));
}

#[test]
fn subtree_query_is_bounded_by_depth() {
    let room = room();
    room.push(vec![
        mv(1, "a", "alice", None, "ROOT"),
        mv(2, "b", "alice", None, "a"),
        mv(3, "c", "alice", None, "b"),
    ])
    .unwrap();

    let shallow = room.subtree(&NodeId::root(), 1).unwrap();
    let shallow_ids: Vec<_> = shallow.iter().map(|n| n.id.clone()).collect();
    assert!(shallow_ids.contains(&"ROOT".to_string()));
    assert!(shallow_ids.contains(&"a".to_string()));
    assert!(!shallow_ids.contains(&"c".to_string()));

    let deep = room.subtree(&NodeId::root(), 10).unwrap();
    let deep_ids: Vec<_> = deep.iter().map(|n| n.id.clone()).collect();
    assert!(deep_ids.contains(&"c".to_string()));
}

#[test]
fn delete_with_concurrent_add_is_restored_by_the_relay() {
    let room = room();
    room.push(vec![
        mv(1, "a", "alice", None, "ROOT"),
        mv(2, "b", "alice", None, "a"),
    ])
    .unwrap();

    // Alice deletes b; Bob, unaware, adds d under b in the same push round.
    room.push(vec![
        mv(3, "b", "alice", Some("a"), "TOMBSTONE"),
        mv(4, "d", "bob", None, "b"),
    ])
    .unwrap();

    let (nodes, _) = room.snapshot().unwrap();
    let parent_of = |id: &str| {
        nodes
            .iter()
            .find(|(node, _)| node.as_str() == id)
            .and_then(|(_, parent)| parent.clone())
    };
    assert_eq!(parent_of("b"), Some(NodeId::from("a")));
    assert_eq!(parent_of("d"), Some(NodeId::from("b")));
}

#[test]
fn roster_tracks_join_and_leave() {
    let room = room();
    room.join("alice");
    room.join("bob");
    assert_eq!(room.roster().len(), 2);
    room.leave("alice");
    assert_eq!(room.roster(), vec!["bob".to_string()]);
}
