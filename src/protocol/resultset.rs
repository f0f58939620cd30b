//! Text protocol result sets
//!
//! A COM_QUERY response is either a single OK/ERR packet or:
//! column count, N column definitions, EOF, rows..., EOF.
//! `ResultSetBuilder` is fed packets one at a time and yields the
//! assembled `ResultSet` once the terminating packet arrives.

use std::collections::VecDeque;

use bytes::Bytes;

use super::handshake::{is_eof_packet, is_err_packet, is_ok_packet, ErrPacket};
use super::packet::{read_lenenc_bytes, read_lenenc_int, Packet};

/// A row of a text result set. `None` is SQL NULL.
pub type Row = Vec<Option<Bytes>>;

/// Fully buffered query result with a row cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: VecDeque<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }

    /// Build a result set from string cells, mostly useful in tests
    pub fn from_strs(columns: &[&str], rows: &[&[Option<&str>]]) -> Self {
        let rows = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.map(|s| Bytes::copy_from_slice(s.as_bytes())))
                    .collect()
            })
            .collect();
        Self::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows not yet consumed
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consume the next row
    pub fn next_row(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }
}

/// Errors while assembling a result set
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResultSetError {
    #[error("Error {}: {}", .0.error_code, .0.error_message)]
    Server(ErrPacket),
    #[error("Malformed result set: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ColumnCount,
    Columns,
    ColumnsEof,
    Rows,
    Done,
}

/// Incremental result set reader
#[derive(Debug)]
pub struct ResultSetBuilder {
    capabilities: u32,
    stage: Stage,
    column_count: usize,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl ResultSetBuilder {
    pub fn new(capabilities: u32) -> Self {
        Self {
            capabilities,
            stage: Stage::ColumnCount,
            column_count: 0,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Feed the next packet of the response.
    ///
    /// Returns `Ok(true)` once the result set is complete. An ERR packet
    /// at any stage fails the whole result.
    pub fn push(&mut self, packet: &Packet) -> Result<bool, ResultSetError> {
        let payload = &packet.payload;

        if is_err_packet(payload) {
            self.stage = Stage::Done;
            let err = ErrPacket::parse(payload, self.capabilities)
                .unwrap_or_else(|| ErrPacket::new(0, "HY000", "Unknown server error"));
            return Err(ResultSetError::Server(err));
        }

        match self.stage {
            Stage::ColumnCount => {
                if is_ok_packet(payload) {
                    // Statement without a result set
                    self.stage = Stage::Done;
                    return Ok(true);
                }
                let mut buf = &payload[..];
                let count = read_lenenc_int(&mut buf)
                    .ok_or_else(|| ResultSetError::Malformed("bad column count".into()))?;
                if count == 0 {
                    self.stage = Stage::Done;
                    return Ok(true);
                }
                self.column_count = count as usize;
                self.columns.reserve(self.column_count);
                self.stage = Stage::Columns;
            }
            Stage::Columns => {
                self.columns.push(parse_column_name(payload)?);
                if self.columns.len() == self.column_count {
                    self.stage = Stage::ColumnsEof;
                }
            }
            Stage::ColumnsEof => {
                if !is_eof_packet(payload) {
                    return Err(ResultSetError::Malformed(
                        "expected EOF after column definitions".into(),
                    ));
                }
                self.stage = Stage::Rows;
            }
            Stage::Rows => {
                if is_eof_packet(payload) {
                    self.stage = Stage::Done;
                    return Ok(true);
                }
                let row = parse_text_row(payload, self.column_count)?;
                self.rows.push(row);
            }
            Stage::Done => {
                return Err(ResultSetError::Malformed(
                    "packet after end of result set".into(),
                ));
            }
        }

        Ok(false)
    }

    /// Take the assembled result set
    pub fn finish(self) -> ResultSet {
        ResultSet::new(self.columns, self.rows)
    }
}

/// Extract the column alias from a Protocol::ColumnDefinition41 packet
fn parse_column_name(payload: &Bytes) -> Result<String, ResultSetError> {
    let mut buf = &payload[..];
    // catalog, schema, table, org_table, then name
    for _ in 0..4 {
        read_lenenc_bytes(&mut buf)
            .ok_or_else(|| ResultSetError::Malformed("truncated column definition".into()))?;
    }
    let name = read_lenenc_bytes(&mut buf)
        .ok_or_else(|| ResultSetError::Malformed("truncated column definition".into()))?;
    Ok(String::from_utf8_lossy(name).to_string())
}

fn parse_text_row(payload: &Bytes, column_count: usize) -> Result<Row, ResultSetError> {
    let mut row = Vec::with_capacity(column_count);
    let mut buf = &payload[..];

    while !buf.is_empty() {
        if buf[0] == 0xFB {
            row.push(None);
            buf = &buf[1..];
            continue;
        }
        let value = read_lenenc_bytes(&mut buf)
            .ok_or_else(|| ResultSetError::Malformed("truncated row".into()))?;
        row.push(Some(payload.slice_ref(value)));
    }

    if row.len() != column_count {
        return Err(ResultSetError::Malformed(format!(
            "row has {} values, expected {}",
            row.len(),
            column_count
        )));
    }

    Ok(row)
}
