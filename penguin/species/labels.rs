use indexmap::IndexMap;
use thiserror::Error;

use crate::schema::Species;

/// Errors raised by the label lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    /// The label is not part of the closed species enumeration.
    #[error("unknown species label `{0}`")]
    UnknownLabel(String),
    /// The label in a given training row is unknown.
    #[error("row {row}: unknown species label `{label}`")]
    UnknownLabelAt {
        /// Zero-based row in the label column.
        row: usize,
        /// Offending label.
        label: String,
    },
    /// The class index has no species.
    #[error("class index {0} out of range")]
    UnknownIndex(usize),
}

/// Explicit species name to class index table.
#[derive(Debug, Clone)]
pub struct LabelEncoder {
    table: IndexMap<&'static str, usize>,
}

impl Default for LabelEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelEncoder {
    /// Builds the `Adelie → 0, Chinstrap → 1, Gentoo → 2` table.
    #[must_use]
    pub fn new() -> Self {
        let table = Species::ALL
            .iter()
            .map(|species| (species.as_str(), species.index()))
            .collect();
        Self { table }
    }

    /// Number of classes in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Class names in index order.
    pub fn class_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table.keys().copied()
    }

    /// Looks up a label. Unknown labels fail, they never map to a default class.
    pub fn encode(&self, label: &str) -> Result<usize, LabelError> {
        self.table
            .get(label)
            .copied()
            .ok_or_else(|| LabelError::UnknownLabel(label.to_string()))
    }

    /// Maps a class index back to its label.
    pub fn decode(&self, index: usize) -> Result<&'static str, LabelError> {
        self.table
            .get_index(index)
            .map(|(name, _)| *name)
            .ok_or(LabelError::UnknownIndex(index))
    }

    /// Encodes a whole label column, reporting the first unknown row.
    pub fn encode_all<'a, I>(&self, labels: I) -> Result<Vec<usize>, LabelError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        labels
            .into_iter()
            .enumerate()
            .map(|(row, label)| {
                self.encode(label)
                    .map_err(|_| LabelError::UnknownLabelAt {
                        row,
                        label: label.to_string(),
                    })
            })
            .collect()
    }
}
