use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, instrument, warn};

use thoughtspace_core::{
    ids::{ClientId, NodeId},
    ops::{Operation, OperationKind},
    timestamp::Timestamp,
    traits::LogStore,
    Error, Result,
};

/// rusqlite-backed Operation Log Store. Persists the four tables from the external-interfaces
/// layout: `nodes`, `op_log`, `payloads`, and `clients`, with the reserved `ROOT`/`TOMBSTONE`
/// rows always present.
pub struct SqliteLogStore {
    conn: Connection,
}

impl SqliteLogStore {
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory store");
        let conn = Connection::open_in_memory().map_err(to_storage_err)?;
        Self::from_connection(conn)
    }

    #[instrument]
    pub fn open(path: &str) -> Result<Self> {
        debug!("opening store");
        let conn = Connection::open(path).map_err(to_storage_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS nodes (
                    id TEXT PRIMARY KEY,
                    parent_id TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_nodes_parent_id ON nodes(parent_id);

                CREATE TABLE IF NOT EXISTS op_log (
                    timestamp TEXT PRIMARY KEY,
                    node_id TEXT NOT NULL,
                    old_parent_id TEXT,
                    new_parent_id TEXT,
                    content TEXT,
                    client_id TEXT NOT NULL,
                    sync_timestamp TEXT,
                    last_sync_timestamp TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_op_log_sync_timestamp ON op_log(sync_timestamp);
                CREATE INDEX IF NOT EXISTS idx_op_log_node_id ON op_log(node_id);

                CREATE TABLE IF NOT EXISTS payloads (
                    node_id TEXT PRIMARY KEY,
                    content TEXT,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS clients (
                    id TEXT PRIMARY KEY,
                    last_seen TEXT
                );

                INSERT OR IGNORE INTO nodes (id, parent_id) VALUES ('ROOT', NULL);
                INSERT OR IGNORE INTO nodes (id, parent_id) VALUES ('TOMBSTONE', NULL);",
            )
            .map_err(to_storage_err)?;
        Ok(())
    }
}

impl LogStore for SqliteLogStore {
    #[instrument(skip(self, op), fields(node = %op.node_id, client = %op.client_id))]
    fn append(&mut self, op: Operation) -> Result<bool> {
        let (old_parent_id, new_parent_id, content) = match &op.kind {
            OperationKind::Move {
                old_parent_id,
                new_parent_id,
            } => (
                old_parent_id.as_ref().map(NodeId::as_str),
                Some(new_parent_id.as_str()),
                None,
            ),
            OperationKind::Update { content } => (None, None, Some(content.as_str())),
        };

        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO op_log
                    (timestamp, node_id, old_parent_id, new_parent_id, content,
                     client_id, sync_timestamp, last_sync_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    op.timestamp.to_sortable_string(),
                    op.node_id.as_str(),
                    old_parent_id,
                    new_parent_id,
                    content,
                    op.client_id.as_str(),
                    op.sync_timestamp.as_ref().map(Timestamp::to_sortable_string),
                    op.last_sync_timestamp
                        .as_ref()
                        .map(Timestamp::to_sortable_string),
                ],
            )
            .map_err(to_storage_err)?;
        let appended = changed == 1;
        if !appended {
            debug!(timestamp = %op.timestamp, "append was a duplicate, ignored");
        }
        Ok(appended)
    }

    fn read_from(&self, from: Option<&Timestamp>) -> Result<Vec<Operation>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT timestamp, node_id, old_parent_id, new_parent_id, content,
                        client_id, sync_timestamp, last_sync_timestamp
                 FROM op_log
                 WHERE ?1 IS NULL OR timestamp >= ?1
                 ORDER BY timestamp ASC",
            )
            .map_err(to_storage_err)?;

        let from_key = from.map(Timestamp::to_sortable_string);
        let rows = stmt
            .query_map(params![from_key], row_to_operation)
            .map_err(to_storage_err)?;

        let mut ops = Vec::new();
        for row in rows {
            ops.push(row.map_err(to_storage_err)?);
        }
        Ok(ops)
    }

    fn read_since_sync(
        &self,
        cursor: Option<&Timestamp>,
        upper_bound: Option<&Timestamp>,
    ) -> Result<Vec<Operation>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT timestamp, node_id, old_parent_id, new_parent_id, content,
                        client_id, sync_timestamp, last_sync_timestamp
                 FROM op_log
                 WHERE sync_timestamp IS NOT NULL
                   AND (?1 IS NULL OR sync_timestamp > ?1)
                   AND (?2 IS NULL OR sync_timestamp <= ?2)
                 ORDER BY sync_timestamp ASC",
            )
            .map_err(to_storage_err)?;

        let cursor_key = cursor.map(Timestamp::to_sortable_string);
        let upper_key = upper_bound.map(Timestamp::to_sortable_string);
        let rows = stmt
            .query_map(params![cursor_key, upper_key], row_to_operation)
            .map_err(to_storage_err)?;

        let mut ops = Vec::new();
        for row in rows {
            ops.push(row.map_err(to_storage_err)?);
        }
        Ok(ops)
    }

    fn mark_synced(&mut self, timestamp: &Timestamp, sync_timestamp: Timestamp) -> Result<()> {
        self.conn
            .execute(
                "UPDATE op_log SET sync_timestamp = ?1 WHERE timestamp = ?2 AND sync_timestamp IS NULL",
                params![sync_timestamp.to_sortable_string(), timestamp.to_sortable_string()],
            )
            .map_err(to_storage_err)?;
        Ok(())
    }

    fn get_parent(&self, node: &NodeId) -> Result<Option<NodeId>> {
        let row: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT parent_id FROM nodes WHERE id = ?1",
                params![node.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map_err(to_storage_err)?;
        Ok(row.flatten().map(NodeId::from))
    }

    fn put_parent(&mut self, node: &NodeId, parent: Option<NodeId>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO nodes (id, parent_id) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET parent_id = excluded.parent_id",
                params![node.as_str(), parent.as_ref().map(NodeId::as_str)],
            )
            .map_err(to_storage_err)?;
        Ok(())
    }

    fn all_nodes(&self) -> Result<Vec<(NodeId, Option<NodeId>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, parent_id FROM nodes")
            .map_err(to_storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let parent_id: Option<String> = row.get(1)?;
                Ok((NodeId::from(id), parent_id.map(NodeId::from)))
            })
            .map_err(to_storage_err)?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row.map_err(to_storage_err)?);
        }
        Ok(nodes)
    }

    fn reset_nodes_to_seed(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                "DELETE FROM nodes;
                 INSERT INTO nodes (id, parent_id) VALUES ('ROOT', NULL);
                 INSERT INTO nodes (id, parent_id) VALUES ('TOMBSTONE', NULL);",
            )
            .map_err(to_storage_err)?;
        Ok(())
    }

    fn latest_timestamp(&self) -> Result<Option<Timestamp>> {
        let key: Option<String> = self
            .conn
            .query_row("SELECT MAX(timestamp) FROM op_log", [], |row| row.get(0))
            .map_err(to_storage_err)?;
        key.map(|k| {
            Timestamp::from_sortable_string(&k)
                .ok_or_else(|| Error::Storage(format!("unparsable timestamp in op_log: {k}")))
        })
        .transpose()
    }

    #[instrument(skip(self))]
    fn clear(&mut self) -> Result<()> {
        debug!("clearing op_log and resetting nodes to seed");
        self.conn
            .execute_batch("DELETE FROM op_log;")
            .map_err(to_storage_err)?;
        self.reset_nodes_to_seed()
    }

    #[instrument(skip(self, f))]
    fn transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.conn.execute_batch("BEGIN").map_err(to_storage_err)?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT").map_err(to_storage_err)?;
                Ok(value)
            }
            Err(err) => {
                warn!(%err, "transaction failed, rolling back");
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }
}

fn row_to_operation(row: &Row<'_>) -> rusqlite::Result<Operation> {
    let timestamp: String = row.get(0)?;
    let node_id: String = row.get(1)?;
    let old_parent_id: Option<String> = row.get(2)?;
    let new_parent_id: Option<String> = row.get(3)?;
    let content: Option<String> = row.get(4)?;
    let client_id: String = row.get(5)?;
    let sync_timestamp: Option<String> = row.get(6)?;
    let last_sync_timestamp: Option<String> = row.get(7)?;

    let parse_ts = |s: &str| {
        Timestamp::from_sortable_string(s).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(0, "timestamp".to_string(), rusqlite::types::Type::Text)
        })
    };

    let kind = match new_parent_id {
        Some(new_parent_id) => OperationKind::Move {
            old_parent_id: old_parent_id.map(NodeId::from),
            new_parent_id: NodeId::from(new_parent_id),
        },
        None => OperationKind::Update {
            content: content.unwrap_or_default(),
        },
    };

    Ok(Operation {
        timestamp: parse_ts(&timestamp)?,
        node_id: NodeId::from(node_id),
        client_id: ClientId::from(client_id),
        kind,
        sync_timestamp: sync_timestamp.map(|s| parse_ts(&s)).transpose()?,
        last_sync_timestamp: last_sync_timestamp.map(|s| parse_ts(&s)).transpose()?,
    })
}

fn to_storage_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}
