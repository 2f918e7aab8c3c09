use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use thoughtspace_core::{ClientId, NodeId, Operation, OperationKind, Timestamp};

/// Fixed 11-byte magic opening every hydration stream, ahead of the two 4-byte row-count
/// fields (node count, then operation count) that make up the rest of the 11+4+4 preamble.
pub const HYDRATION_MAGIC: &[u8; 11] = b"THOUGHTSPC\0";

#[derive(Debug, Error)]
pub enum HydrationError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad hydration magic")]
    BadMagic,
    #[error("unknown row discriminator byte {0:#x}")]
    UnknownDiscriminator(u8),
    #[error("unexpected column count {0} for {1} row")]
    UnexpectedColumnCount(i16, &'static str),
    #[error("non-UTF8 column payload")]
    InvalidUtf8,
    #[error("malformed timestamp column: {0}")]
    MalformedTimestamp(String),
}

type Result<T> = std::result::Result<T, HydrationError>;

/// One row of a hydration stream: either a `nodes` row or an `op_log` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HydrationRow {
    Node {
        id: NodeId,
        parent_id: Option<NodeId>,
    },
    Operation(Operation),
}

/// Writes a hydration stream: preamble, then a sequence of node/operation rows, terminated by
/// `int16 -1`. Callers are expected to write rows with bounded batches (honoring the Relay's
/// configured `hydration_row_batch`) so the consumer's backpressure has somewhere to take
/// effect between rows.
pub struct HydrationWriter<W: Write> {
    inner: W,
}

impl<W: Write> HydrationWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_preamble(&mut self, node_count: u32, operation_count: u32) -> Result<()> {
        self.inner.write_all(HYDRATION_MAGIC)?;
        self.inner.write_u32::<BigEndian>(node_count)?;
        self.inner.write_u32::<BigEndian>(operation_count)?;
        Ok(())
    }

    pub fn write_node(&mut self, id: &NodeId, parent_id: Option<&NodeId>) -> Result<()> {
        self.inner.write_all(b"n")?;
        write_columns(
            &mut self.inner,
            &[
                Some(id.as_str()),
                parent_id.map(NodeId::as_str),
            ],
        )
    }

    pub fn write_operation(&mut self, op: &Operation) -> Result<()> {
        self.inner.write_all(b"o")?;
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
        let timestamp = op.timestamp.to_sortable_string();
        let sync_timestamp = op.sync_timestamp.as_ref().map(Timestamp::to_sortable_string);
        let last_sync_timestamp = op
            .last_sync_timestamp
            .as_ref()
            .map(Timestamp::to_sortable_string);

        write_columns(
            &mut self.inner,
            &[
                Some(timestamp.as_str()),
                Some(op.node_id.as_str()),
                old_parent_id,
                new_parent_id,
                content,
                Some(op.client_id.as_str()),
                sync_timestamp.as_deref(),
                last_sync_timestamp.as_deref(),
            ],
        )
    }

    /// Write the `int16 -1` end-of-data marker. No further rows may be written afterward.
    pub fn finish(mut self) -> Result<W> {
        self.inner.write_i16::<BigEndian>(-1)?;
        Ok(self.inner)
    }
}

fn write_columns<W: Write>(w: &mut W, columns: &[Option<&str>]) -> Result<()> {
    w.write_i16::<BigEndian>(columns.len() as i16)?;
    for column in columns {
        match column {
            None => w.write_i32::<BigEndian>(-1)?,
            Some(value) => {
                let bytes = value.as_bytes();
                w.write_i32::<BigEndian>(bytes.len() as i32)?;
                w.write_all(bytes)?;
            }
        }
    }
    Ok(())
}

/// Reads a hydration stream written by [`HydrationWriter`].
pub struct HydrationReader<R: Read> {
    inner: R,
}

impl<R: Read> HydrationReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the preamble and return `(node_count, operation_count)`.
    pub fn read_preamble(&mut self) -> Result<(u32, u32)> {
        let mut magic = [0u8; 11];
        self.inner.read_exact(&mut magic)?;
        if &magic != HYDRATION_MAGIC {
            return Err(HydrationError::BadMagic);
        }
        let node_count = self.inner.read_u32::<BigEndian>()?;
        let operation_count = self.inner.read_u32::<BigEndian>()?;
        Ok((node_count, operation_count))
    }

    /// Read the next row, or `None` at the end-of-data marker.
    pub fn next_row(&mut self) -> Result<Option<HydrationRow>> {
        let mut discriminator = [0u8; 1];
        // Peek at the discriminator byte by reading it directly; the terminator is a bare
        // `int16 -1` with no discriminator, so we read two bytes first and check for that case.
        let first = match read_one_byte(&mut self.inner)? {
            Some(b) => b,
            None => return Ok(None),
        };
        discriminator[0] = first;

        match &discriminator {
            b"n" => {
                let columns = read_columns(&mut self.inner, 2, "node")?;
                let id = NodeId::from(require_utf8(&columns[0])?);
                let parent_id = columns[1].as_ref().map(|b| NodeId::from(require_utf8_ref(b))).transpose()?;
                Ok(Some(HydrationRow::Node { id, parent_id }))
            }
            b"o" => {
                let columns = read_columns(&mut self.inner, 8, "operation")?;
                let timestamp = parse_timestamp(&columns[0])?;
                let node_id = NodeId::from(require_utf8(&columns[1])?);
                let old_parent_id = columns[2].as_ref().map(|b| require_utf8_ref(b)).transpose()?.map(NodeId::from);
                let new_parent_id = columns[3].as_ref().map(|b| require_utf8_ref(b)).transpose()?.map(NodeId::from);
                let content = columns[4].as_ref().map(|b| require_utf8_ref(b)).transpose()?.map(str::to_string);
                let client_id = ClientId::from(require_utf8(&columns[5])?);
                let sync_timestamp = columns[6]
                    .as_ref()
                    .map(|b| parse_timestamp(&Some(b.clone())))
                    .transpose()?;
                let last_sync_timestamp = columns[7]
                    .as_ref()
                    .map(|b| parse_timestamp(&Some(b.clone())))
                    .transpose()?;

                let kind = match new_parent_id {
                    Some(new_parent_id) => OperationKind::Move {
                        old_parent_id,
                        new_parent_id,
                    },
                    None => OperationKind::Update {
                        content: content.unwrap_or_default(),
                    },
                };

                Ok(Some(HydrationRow::Operation(Operation {
                    timestamp,
                    node_id,
                    client_id,
                    kind,
                    sync_timestamp,
                    last_sync_timestamp,
                })))
            }
            other => Err(HydrationError::UnknownDiscriminator(other[0])),
        }
    }
}

/// Reads a single byte, distinguishing the two-byte `-1` terminator from a real discriminator.
/// Because the terminator is `int16 -1` (0xFF 0xFF) and no valid discriminator byte is 0xFF,
/// a leading 0xFF unambiguously signals end-of-data once its second byte is also 0xFF.
fn read_one_byte<R: Read>(r: &mut R) -> Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match r.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if buf[0] == 0xFF {
        let mut second = [0u8; 1];
        r.read_exact(&mut second)?;
        if second[0] == 0xFF {
            return Ok(None);
        }
        return Err(HydrationError::UnknownDiscriminator(buf[0]));
    }
    Ok(Some(buf[0]))
}

fn read_columns<R: Read>(r: &mut R, expected: i16, what: &'static str) -> Result<Vec<Option<Vec<u8>>>> {
    let ncols = r.read_i16::<BigEndian>()?;
    if ncols != expected {
        return Err(HydrationError::UnexpectedColumnCount(ncols, what));
    }
    let mut columns = Vec::with_capacity(ncols as usize);
    for _ in 0..ncols {
        let len = r.read_i32::<BigEndian>()?;
        if len < 0 {
            columns.push(None);
            continue;
        }
        let mut buf = vec![0u8; len as usize];
        r.read_exact(&mut buf)?;
        columns.push(Some(buf));
    }
    Ok(columns)
}

fn require_utf8(bytes: &Option<Vec<u8>>) -> Result<&str> {
    match bytes {
        Some(b) => require_utf8_ref(b),
        None => Err(HydrationError::InvalidUtf8),
    }
}

fn require_utf8_ref(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| HydrationError::InvalidUtf8)
}

fn parse_timestamp(bytes: &Option<Vec<u8>>) -> Result<Timestamp> {
    let s = require_utf8(bytes)?;
    Timestamp::from_sortable_string(s).ok_or_else(|| HydrationError::MalformedTimestamp(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nodes_and_operations() {
        let mut buf = Vec::new();
        {
            let mut writer = HydrationWriter::new(&mut buf);
            writer.write_preamble(2, 1).unwrap();
            writer.write_node(&NodeId::root(), None).unwrap();
            writer
                .write_node(&NodeId::from("a"), Some(&NodeId::root()))
                .unwrap();
            let op = Operation::mv(
                Timestamp::new(1, 0, ClientId::from("alice")),
                NodeId::from("a"),
                ClientId::from("alice"),
                None,
                NodeId::root(),
                None,
            );
            writer.write_operation(&op).unwrap();
        }
        buf.write_i16::<BigEndian>(-1).unwrap();

        let mut reader = HydrationReader::new(buf.as_slice());
        let (nodes, ops) = reader.read_preamble().unwrap();
        assert_eq!((nodes, ops), (2, 1));

        let mut rows = Vec::new();
        while let Some(row) = reader.next_row().unwrap() {
            rows.push(row);
        }
        assert_eq!(rows.len(), 3);
        assert!(matches!(&rows[0], HydrationRow::Node { id, parent_id } if id.is_root() && parent_id.is_none()));
        assert!(matches!(&rows[2], HydrationRow::Operation(_)));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = b"not-the-right-magic-at-all".to_vec();
        let mut reader = HydrationReader::new(buf.as_slice());
        assert!(matches!(reader.read_preamble(), Err(HydrationError::BadMagic)));
    }
}
