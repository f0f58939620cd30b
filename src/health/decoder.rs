use std::collections::HashMap;

use crate::protocol::ResultSet;

use super::ProbeError;

/// One decoded row, column name to string value.
///
/// NULL cells are left out, so a missing key means "not a string".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRow {
    fields: HashMap<String, String>,
}

impl StatusRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// True if the column holds exactly `expected`
    pub fn is(&self, column: &str, expected: &str) -> bool {
        self.get(column) == Some(expected)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Consume the next row of `rs` and map it by column name.
///
/// Fails with `NoRecords` when the cursor is exhausted.
pub fn decode_row(rs: &mut ResultSet) -> Result<StatusRow, ProbeError> {
    let row = rs.next_row().ok_or(ProbeError::NoRecords)?;

    let fields = rs
        .columns()
        .iter()
        .zip(row)
        .filter_map(|(name, value)| {
            value.map(|bytes| (name.clone(), String::from_utf8_lossy(&bytes).into_owned()))
        })
        .collect();

    Ok(StatusRow { fields })
}
