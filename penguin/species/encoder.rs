use std::collections::BTreeSet;

use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{FeatureRecord, Island, Sex, CATEGORICAL_FIELDS, NUMERIC_FIELDS};

/// Errors raised while encoding feature rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A categorical value has no column in the universe in use.
    #[error("row {row}: `{value}` is not a known {field} category")]
    UnknownCategory {
        /// Row of the offending record.
        row: usize,
        /// Categorical field.
        field: &'static str,
        /// Offending value.
        value: String,
    },
    /// A numeric value is NaN or infinite.
    #[error("row {row}: {field} is not a finite number")]
    NonFinite {
        /// Row of the offending record.
        row: usize,
        /// Numeric field.
        field: &'static str,
    },
    /// Column names and matrix width disagree.
    #[error("{names} column names for a matrix with {width} columns")]
    ShapeMismatch {
        /// Number of column names.
        names: usize,
        /// Number of matrix columns.
        width: usize,
    },
}

/// Where the set of one-hot columns comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniverseKind {
    /// Categories present in the records being encoded.
    #[default]
    Observed,
    /// The closed [`Island`] and [`Sex`] enumerations.
    Declared,
}

/// Known category values per categorical field.
///
/// Fields keep [`CATEGORICAL_FIELDS`] order and values are sorted ascending, so
/// two universes with the same values always produce the same columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryUniverse {
    kind: UniverseKind,
    fields: IndexMap<&'static str, Vec<String>>,
}

impl CategoryUniverse {
    /// Derives the universe from the distinct values found in `records`.
    pub fn observed<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a FeatureRecord>,
    {
        let mut seen: IndexMap<&'static str, BTreeSet<String>> = CATEGORICAL_FIELDS
            .iter()
            .map(|field| (*field, BTreeSet::new()))
            .collect();
        for record in records {
            for (field, value) in record.categorical() {
                if let Some(values) = seen.get_mut(field) {
                    if !values.contains(value) {
                        values.insert(value.to_string());
                    }
                }
            }
        }
        Self::from_sets(UniverseKind::Observed, seen)
    }

    /// The declared universe built from the closed enumerations.
    #[must_use]
    pub fn declared() -> Self {
        let mut fields: IndexMap<&'static str, Vec<String>> = IndexMap::new();
        fields.insert(
            CATEGORICAL_FIELDS[0],
            Island::ALL.iter().map(|island| island.as_str().to_string()).collect(),
        );
        fields.insert(
            CATEGORICAL_FIELDS[1],
            Sex::ALL.iter().map(|sex| sex.as_str().to_string()).collect(),
        );
        Self::from_sets(UniverseKind::Declared, fields)
    }

    /// Builds the universe of the requested kind.
    pub fn for_kind<'a, I>(kind: UniverseKind, records: I) -> Self
    where
        I: IntoIterator<Item = &'a FeatureRecord>,
    {
        match kind {
            UniverseKind::Observed => Self::observed(records),
            UniverseKind::Declared => Self::declared(),
        }
    }

    fn from_sets<S>(kind: UniverseKind, sets: IndexMap<&'static str, S>) -> Self
    where
        S: IntoIterator<Item = String>,
    {
        let fields = sets
            .into_iter()
            .map(|(field, values)| {
                let sorted: BTreeSet<String> = values.into_iter().collect();
                (field, sorted.into_iter().collect())
            })
            .collect();
        Self { kind, fields }
    }

    /// Kind of the universe.
    #[must_use]
    pub const fn kind(&self) -> UniverseKind {
        self.kind
    }

    /// Sorted values of a categorical field.
    #[must_use]
    pub fn values(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether `value` is a known category of `field`.
    #[must_use]
    pub fn contains(&self, field: &str, value: &str) -> bool {
        self.values(field).iter().any(|known| known == value)
    }

    /// Column names produced by this universe: numeric passthrough columns
    /// first, then one `field_value` column per category.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        let mut columns: Vec<String> = NUMERIC_FIELDS.iter().map(ToString::to_string).collect();
        for (field, values) in &self.fields {
            columns.extend(values.iter().map(|value| format!("{field}_{value}")));
        }
        columns
    }
}

/// Numeric matrix with one named column per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl EncodedMatrix {
    /// Pairs column names with a matrix of the same width.
    pub fn from_parts(columns: Vec<String>, values: Array2<f64>) -> Result<Self, EncodeError> {
        if columns.len() != values.ncols() {
            return Err(EncodeError::ShapeMismatch {
                names: columns.len(),
                width: values.ncols(),
            });
        }
        Ok(Self { columns, values })
    }

    /// Column names in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Matrix view.
    #[must_use]
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// Number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    /// Number of columns.
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    /// Row view, if the row exists.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.n_rows()).then(|| self.values.row(index))
    }

    /// Position of a named column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Array2<f64>) {
        (self.columns, self.values)
    }
}

/// A single encoded row together with its column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedRow {
    /// Column names, identical to the matrix the row came from.
    pub columns: Vec<String>,
    /// Encoded values.
    pub values: Array1<f64>,
}

/// One-hot encoder for categorical fields with numeric passthrough.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    universe: CategoryUniverse,
}

impl FeatureEncoder {
    /// Creates an encoder over a fixed universe.
    #[must_use]
    pub const fn new(universe: CategoryUniverse) -> Self {
        Self { universe }
    }

    /// Encoder whose universe is observed from the very records it will encode.
    pub fn observing<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a FeatureRecord>,
    {
        Self::new(CategoryUniverse::observed(records))
    }

    /// Universe in use.
    #[must_use]
    pub const fn universe(&self) -> &CategoryUniverse {
        &self.universe
    }

    /// Encodes `records` into a matrix, one row per record in input order.
    pub fn encode(&self, records: &[FeatureRecord]) -> Result<EncodedMatrix, EncodeError> {
        let columns = self.universe.column_names();
        let mut values = Array2::<f64>::zeros((records.len(), columns.len()));
        let numeric_width = NUMERIC_FIELDS.len();

        for (row, record) in records.iter().enumerate() {
            for (col, (field, value)) in record.numeric().into_iter().enumerate() {
                if !value.is_finite() {
                    return Err(EncodeError::NonFinite { row, field });
                }
                values[[row, col]] = value;
            }

            let mut offset = numeric_width;
            for (field, known) in &self.universe.fields {
                let value = record.category(field).unwrap_or_default();
                match known.iter().position(|candidate| candidate == value) {
                    Some(position) => values[[row, offset + position]] = 1.0,
                    None => {
                        return Err(EncodeError::UnknownCategory {
                            row,
                            field: *field,
                            value: value.to_string(),
                        })
                    }
                }
                offset += known.len();
            }
        }

        EncodedMatrix::from_parts(columns, values)
    }
}
