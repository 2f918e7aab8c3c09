use std::collections::HashMap;

use crate::error::Result;
use crate::ids::{ClientId, NodeId};
use crate::ops::{Operation, OperationKind};
use crate::timestamp::{Clock, Timestamp};
use crate::traits::LogStore;

/// Tuning knobs for the replay and ancestor-walk algorithms. The only knob today bounds how
/// far a cycle check or liveness check is willing to walk up the tree before giving up.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Max number of parent hops an ancestor walk will take before it assumes a cycle (or an
    /// orphaned chain) and bails out defensively.
    pub max_ancestor_walk_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_ancestor_walk_depth: 100,
        }
    }
}

/// Apply a batch of operations: append each to the log, then replay the tail of the log from
/// the earliest newly-appended timestamp forward so `nodes` reflects the fold of the whole log
/// in timestamp order. Operations already present in the log (duplicates) are no-ops and do not
/// trigger a replay by themselves; if the batch is entirely duplicates, `nodes` is untouched.
///
/// Commutative and idempotent: `apply_batch(apply_batch(S, A), B)` and
/// `apply_batch(apply_batch(S, B), A)` converge to the same `nodes`, and applying the same
/// batch twice changes nothing the second time.
pub fn apply_batch<S: LogStore>(
    store: &mut S,
    batch: Vec<Operation>,
    config: &EngineConfig,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    store.transaction(|txn| {
        let mut newly_appended = Vec::new();
        for op in batch {
            if txn.append(op.clone())? {
                newly_appended.push(op);
            }
        }
        if newly_appended.is_empty() {
            return Ok(());
        }
        let t_min = newly_appended
            .iter()
            .map(|op| op.timestamp.clone())
            .min()
            .expect("non-empty");
        replay_from(txn, &t_min, config)
    })
}

/// Rebuild `nodes` from scratch by replaying the entire log in timestamp order. Used at
/// startup to verify (or repair) a materialized table against its log.
pub fn rebuild_nodes<S: LogStore>(store: &mut S, config: &EngineConfig) -> Result<()> {
    store.transaction(|txn| {
        txn.reset_nodes_to_seed()?;
        let all = txn.read_from(None)?;
        let t0 = match all.first() {
            Some(op) => op.timestamp.clone(),
            None => return Ok(()),
        };
        replay_from(txn, &t0, config)
    })
}

/// Undo every move at or after `t_min` back to each node's pre-batch parent, then redo them in
/// ascending timestamp order, skipping any move that would introduce a cycle. Rows with
/// [`OperationKind::Update`] carry no tree structure and are ignored here.
fn replay_from<S: LogStore>(store: &mut S, t_min: &Timestamp, config: &EngineConfig) -> Result<()> {
    let tail = store.read_from(Some(t_min))?;
    let moves: Vec<&Operation> = tail.iter().filter(|op| op.is_move()).collect();

    let mut earliest: HashMap<NodeId, &Operation> = HashMap::new();
    for op in &moves {
        earliest.entry(op.node_id.clone()).or_insert(op);
    }
    for (node, op) in &earliest {
        store.put_parent(node, op.old_parent_id().cloned())?;
    }

    for op in &moves {
        let new_parent = op
            .new_parent_id()
            .expect("filtered to move operations")
            .clone();
        if op.node_id == new_parent {
            continue;
        }
        if introduces_cycle(store, &op.node_id, &new_parent, config.max_ancestor_walk_depth)? {
            continue;
        }
        store.put_parent(&op.node_id, Some(new_parent))?;
    }
    Ok(())
}

/// Whether making `candidate_parent` the parent of `node` would create a cycle, i.e. whether
/// `node` already appears on `candidate_parent`'s ancestor chain. `ROOT` and `TOMBSTONE` are
/// sinks and can never be part of a cycle. Bounded by `max_depth`: a chain that doesn't resolve
/// to `ROOT` or `TOMBSTONE` within the bound is treated as cyclic defensively.
fn introduces_cycle<S: LogStore>(
    store: &S,
    node: &NodeId,
    candidate_parent: &NodeId,
    max_depth: usize,
) -> Result<bool> {
    if candidate_parent.is_root() || candidate_parent.is_tombstone() {
        return Ok(false);
    }
    let mut current = candidate_parent.clone();
    for _ in 0..max_depth {
        if &current == node {
            return Ok(true);
        }
        match store.get_parent(&current)? {
            None => return Ok(false),
            Some(parent) => {
                if parent.is_root() || parent.is_tombstone() {
                    return Ok(false);
                }
                current = parent;
            }
        }
    }
    Ok(true)
}

/// Whether `node` currently hangs off `ROOT` (as opposed to `TOMBSTONE`, an unresolved chain, or
/// an unknown node). Bounded the same way as [`introduces_cycle`].
pub fn is_live<S: LogStore>(store: &S, node: &NodeId, max_depth: usize) -> Result<bool> {
    if node.is_root() {
        return Ok(true);
    }
    if node.is_tombstone() {
        return Ok(false);
    }
    let mut current = node.clone();
    for _ in 0..max_depth {
        match store.get_parent(&current)? {
            None => return Ok(false),
            Some(parent) => {
                if parent.is_root() {
                    return Ok(true);
                }
                if parent.is_tombstone() {
                    return Ok(false);
                }
                current = parent;
            }
        }
    }
    Ok(false)
}

/// The move operation that currently governs `node`'s parent, i.e. the highest-timestamp move
/// on record for it. Moves are never skipped on redo except for cycle-avoidance, and a move into
/// `TOMBSTONE` never creates a cycle, so this is exactly the operation that last won the
/// last-writer-wins fold for `node`.
fn latest_move_for_node<S: LogStore>(store: &S, node: &NodeId) -> Result<Option<Operation>> {
    let all = store.read_from(None)?;
    Ok(all
        .into_iter()
        .filter(|op| op.is_move() && &op.node_id == node)
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp)))
}

/// The move that most recently tombstoned `node`, if `node`'s current parent is in fact
/// `TOMBSTONE`.
fn find_tombstoning_move<S: LogStore>(store: &S, node: &NodeId) -> Result<Option<Operation>> {
    let latest = latest_move_for_node(store, node)?;
    Ok(latest.filter(|op| op.new_parent_id() == Some(&NodeId::tombstone())))
}

/// Does some node currently live under `x` trace back, through moves made after `cutoff`, to
/// an ancestor chain that passes through `x`? Finds the first such descendant (by ascending
/// timestamp) whose governing move was made without knowledge that `x` had been deleted.
fn find_uninformed_descendant<S: LogStore>(
    store: &S,
    x: &NodeId,
    cutoff: Option<&Timestamp>,
    max_depth: usize,
) -> Result<Option<Operation>> {
    let candidates = store.read_from(cutoff)?;
    for op in candidates {
        if let Some(cutoff) = cutoff {
            if &op.timestamp <= cutoff {
                continue;
            }
        }
        if !op.is_move() {
            continue;
        }
        if &op.node_id == x {
            continue;
        }
        if is_descendant_of(store, &op.node_id, x, max_depth)? {
            return Ok(Some(op));
        }
    }
    Ok(None)
}

/// Whether `node`'s current ancestor chain passes through `ancestor` before reaching `ROOT` or
/// `TOMBSTONE`.
fn is_descendant_of<S: LogStore>(
    store: &S,
    node: &NodeId,
    ancestor: &NodeId,
    max_depth: usize,
) -> Result<bool> {
    let mut current = node.clone();
    for _ in 0..max_depth {
        if &current == ancestor {
            return Ok(true);
        }
        match store.get_parent(&current)? {
            None => return Ok(false),
            Some(parent) => {
                if parent.is_root() || parent.is_tombstone() {
                    return Ok(parent == *ancestor);
                }
                current = parent;
            }
        }
    }
    Ok(false)
}

/// Deletion/restore extension (run by the Relay only): when `op` tombstones a subtree, check
/// whether some descendant was concurrently reparented under it by a client that hadn't yet
/// learned of the deletion (its move predates the deleter's `last_sync_timestamp`). If so,
/// synthesize a corrective move restoring the deleted node to its pre-deletion parent, apply it
/// immediately, and — if that parent is itself tombstoned — repeat the check one level up the
/// original ancestor chain until an already-live ancestor is reached or the chain runs out.
pub fn apply_deletion_restore_policy<S: LogStore, C: Clock>(
    store: &mut S,
    op: &Operation,
    clock: &mut C,
    config: &EngineConfig,
) -> Result<Vec<Operation>> {
    let mut synthesized = Vec::new();

    let (old_parent_id, new_parent_id) = match &op.kind {
        OperationKind::Move {
            old_parent_id,
            new_parent_id,
        } => (old_parent_id.clone(), new_parent_id.clone()),
        OperationKind::Update { .. } => return Ok(synthesized),
    };
    if !new_parent_id.is_tombstone() {
        return Ok(synthesized);
    }

    let mut node = op.node_id.clone();
    let mut restore_to = old_parent_id.unwrap_or_else(NodeId::root);
    let mut cutoff = op.last_sync_timestamp.clone();

    loop {
        let culprit = find_uninformed_descendant(
            store,
            &node,
            cutoff.as_ref(),
            config.max_ancestor_walk_depth,
        )?;
        if culprit.is_none() {
            break;
        }

        let ts = clock.tick();
        let corrective = Operation::mv(
            ts.clone(),
            node.clone(),
            ClientId::server(),
            Some(NodeId::tombstone()),
            restore_to.clone(),
            None,
        )
        .with_sync_timestamp(ts);
        apply_batch(store, vec![corrective.clone()], config)?;
        synthesized.push(corrective);

        if is_live(store, &restore_to, config.max_ancestor_walk_depth)? {
            break;
        }
        match find_tombstoning_move(store, &restore_to)? {
            None => break,
            Some(tomb_op) => {
                let next_parent = match &tomb_op.kind {
                    OperationKind::Move { old_parent_id, .. } => old_parent_id.clone(),
                    OperationKind::Update { .. } => break,
                };
                node = restore_to;
                restore_to = next_parent.unwrap_or_else(NodeId::root);
                cutoff = tomb_op.last_sync_timestamp;
            }
        }
    }

    Ok(synthesized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::HybridClock;
    use crate::traits::MemoryLogStore;

    fn ts(millis: u64, logical: u32, client: &str) -> Timestamp {
        Timestamp::new(millis, logical, ClientId::from(client))
    }

    #[test]
    fn single_move_attaches_node_under_root() {
        let mut store = MemoryLogStore::new();
        let a = NodeId::from("a");
        let op = Operation::mv(
            ts(1, 0, "alice"),
            a.clone(),
            ClientId::from("alice"),
            None,
            NodeId::root(),
            None,
        );
        apply_batch(&mut store, vec![op], &EngineConfig::default()).unwrap();
        assert_eq!(store.get_parent(&a).unwrap(), Some(NodeId::root()));
    }

    #[test]
    fn later_timestamp_wins_regardless_of_application_order() {
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        let op1 = Operation::mv(
            ts(1, 0, "alice"),
            a.clone(),
            ClientId::from("alice"),
            None,
            NodeId::root(),
            None,
        );
        let op2 = Operation::mv(
            ts(2, 0, "bob"),
            a.clone(),
            ClientId::from("bob"),
            Some(NodeId::root()),
            b.clone(),
            None,
        );
        let op3 = Operation::mv(
            ts(1, 0, "carl"),
            b.clone(),
            ClientId::from("carl"),
            None,
            NodeId::root(),
            None,
        );

        let mut forward = MemoryLogStore::new();
        apply_batch(
            &mut forward,
            vec![op1.clone(), op2.clone(), op3.clone()],
            &EngineConfig::default(),
        )
        .unwrap();

        let mut reverse = MemoryLogStore::new();
        apply_batch(&mut reverse, vec![op3, op2, op1], &EngineConfig::default()).unwrap();

        assert_eq!(forward.get_parent(&a).unwrap(), Some(b.clone()));
        assert_eq!(reverse.get_parent(&a).unwrap(), Some(b));
    }

    #[test]
    fn cycle_inducing_move_is_skipped() {
        let mut store = MemoryLogStore::new();
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        let config = EngineConfig::default();

        apply_batch(
            &mut store,
            vec![
                Operation::mv(ts(1, 0, "alice"), a.clone(), ClientId::from("alice"), None, NodeId::root(), None),
                Operation::mv(ts(2, 0, "alice"), b.clone(), ClientId::from("alice"), None, a.clone(), None),
            ],
            &config,
        )
        .unwrap();

        // b is a's child; moving a under b would create a cycle and must be skipped.
        apply_batch(
            &mut store,
            vec![Operation::mv(
                ts(3, 0, "bob"),
                a.clone(),
                ClientId::from("bob"),
                Some(NodeId::root()),
                b.clone(),
                None,
            )],
            &config,
        )
        .unwrap();

        assert_eq!(store.get_parent(&a).unwrap(), Some(NodeId::root()));
        assert_eq!(store.get_parent(&b).unwrap(), Some(a));
    }

    #[test]
    fn duplicate_batch_is_a_no_op() {
        let mut store = MemoryLogStore::new();
        let a = NodeId::from("a");
        let op = Operation::mv(
            ts(1, 0, "alice"),
            a.clone(),
            ClientId::from("alice"),
            None,
            NodeId::root(),
            None,
        );
        let config = EngineConfig::default();
        apply_batch(&mut store, vec![op.clone()], &config).unwrap();
        apply_batch(&mut store, vec![op], &config).unwrap();
        assert_eq!(store.get_parent(&a).unwrap(), Some(NodeId::root()));
    }

    #[test]
    fn rebuild_reproduces_incremental_state() {
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        let config = EngineConfig::default();
        let ops = vec![
            Operation::mv(ts(1, 0, "alice"), a.clone(), ClientId::from("alice"), None, NodeId::root(), None),
            Operation::mv(ts(2, 0, "alice"), b.clone(), ClientId::from("alice"), None, a.clone(), None),
            Operation::mv(ts(3, 0, "bob"), a.clone(), ClientId::from("bob"), Some(NodeId::root()), b.clone(), None),
        ];

        let mut incremental = MemoryLogStore::new();
        for op in &ops {
            apply_batch(&mut incremental, vec![op.clone()], &config).unwrap();
        }

        let mut rebuilt = MemoryLogStore::new();
        apply_batch(&mut rebuilt, ops, &config).unwrap();
        rebuild_nodes(&mut rebuilt, &config).unwrap();

        assert_eq!(
            incremental.get_parent(&a).unwrap(),
            rebuilt.get_parent(&a).unwrap()
        );
        assert_eq!(
            incremental.get_parent(&b).unwrap(),
            rebuilt.get_parent(&b).unwrap()
        );
    }

    #[test]
    fn uninformed_add_under_deleted_subtree_is_restored() {
        let mut store = MemoryLogStore::new();
        let mut clock = HybridClock::new(ClientId::server());
        let config = EngineConfig::default();

        let folder = NodeId::from("folder");
        let child = NodeId::from("child");

        apply_batch(
            &mut store,
            vec![Operation::mv(
                ts(1, 0, "alice"),
                folder.clone(),
                ClientId::from("alice"),
                None,
                NodeId::root(),
                None,
            )],
            &config,
        )
        .unwrap();

        // Bob adds `child` under `folder` without having seen the delete below (his
        // last_sync_timestamp predates it).
        let add = Operation::mv(
            ts(3, 0, "bob"),
            child.clone(),
            ClientId::from("bob"),
            None,
            folder.clone(),
            Some(ts(1, 0, "alice")),
        );
        apply_batch(&mut store, vec![add], &config).unwrap();

        // Alice deletes `folder`, with a last_sync_timestamp that predates Bob's add.
        let delete = Operation::mv(
            ts(2, 0, "alice"),
            folder.clone(),
            ClientId::from("alice"),
            Some(NodeId::root()),
            NodeId::tombstone(),
            Some(ts(1, 0, "alice")),
        );
        apply_batch(&mut store, vec![delete.clone()], &config).unwrap();

        assert_eq!(store.get_parent(&folder).unwrap(), Some(NodeId::tombstone()));
        assert_eq!(store.get_parent(&child).unwrap(), Some(folder.clone()));

        let corrective =
            apply_deletion_restore_policy(&mut store, &delete, &mut clock, &config).unwrap();

        assert_eq!(corrective.len(), 1);
        assert_eq!(store.get_parent(&folder).unwrap(), Some(NodeId::root()));
        assert_eq!(store.get_parent(&child).unwrap(), Some(folder));
    }

    #[test]
    fn informed_delete_is_not_restored() {
        let mut store = MemoryLogStore::new();
        let mut clock = HybridClock::new(ClientId::server());
        let config = EngineConfig::default();

        let folder = NodeId::from("folder");
        let child = NodeId::from("child");

        apply_batch(
            &mut store,
            vec![
                Operation::mv(ts(1, 0, "alice"), folder.clone(), ClientId::from("alice"), None, NodeId::root(), None),
                Operation::mv(ts(2, 0, "alice"), child.clone(), ClientId::from("alice"), None, folder.clone(), None),
            ],
            &config,
        )
        .unwrap();

        // Delete happens after Bob's last_sync_timestamp, so there's no uninformed descendant.
        let delete = Operation::mv(
            ts(3, 0, "alice"),
            folder.clone(),
            ClientId::from("alice"),
            Some(NodeId::root()),
            NodeId::tombstone(),
            Some(ts(2, 0, "alice")),
        );
        apply_batch(&mut store, vec![delete.clone()], &config).unwrap();

        let corrective =
            apply_deletion_restore_policy(&mut store, &delete, &mut clock, &config).unwrap();

        assert!(corrective.is_empty());
        assert_eq!(store.get_parent(&folder).unwrap(), Some(NodeId::tombstone()));
    }
}
