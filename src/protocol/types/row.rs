//! Raw result rows.

use bytes::Bytes;

/// One row of raw column values.
///
/// The frame codec produces owned buffers; each cell is the undecoded wire
/// value (`None` for SQL NULL). Interpreting the bytes is the row consumer's
/// concern, not this crate's.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataRow {
    values: Vec<Option<Bytes>>,
}

impl DataRow {
    pub fn new(values: Vec<Option<Bytes>>) -> Self {
        Self { values }
    }

    /// Raw value of column `index`, or `None` for NULL / out of range.
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.values.get(index).and_then(|v| v.as_ref())
    }

    /// Whether column `index` is NULL.
    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(None))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Option<Bytes>] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Option<Bytes>> {
        self.values
    }
}

impl IntoIterator for DataRow {
    type Item = Option<Bytes>;
    type IntoIter = std::vec::IntoIter<Option<Bytes>>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
