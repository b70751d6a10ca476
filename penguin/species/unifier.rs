use ndarray::{s, Axis};
use thiserror::Error;

use crate::{
    encoder::{EncodeError, EncodedMatrix, EncodedRow},
    schema::FeatureRecord,
};

/// Errors raised while splitting a unified matrix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnifyError {
    /// There is no query row to split off.
    #[error("cannot split an empty matrix into query and training rows")]
    Empty,
    /// Rebuilding the training matrix failed.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Places the query first, followed by every training record in its original
/// order, so that one encoding pass sees every category of both.
#[must_use]
pub fn unify(query: &FeatureRecord, training: &[FeatureRecord]) -> Vec<FeatureRecord> {
    let mut combined = Vec::with_capacity(training.len() + 1);
    combined.push(query.clone());
    combined.extend_from_slice(training);
    combined
}

/// Splits a matrix encoded from [`unify`] output into row 0 (the query) and
/// rows `1..` (the training set). Both halves keep the same columns.
pub fn split_query(matrix: EncodedMatrix) -> Result<(EncodedRow, EncodedMatrix), UnifyError> {
    if matrix.n_rows() == 0 {
        return Err(UnifyError::Empty);
    }
    let (columns, values) = matrix.into_parts();
    let query = EncodedRow {
        columns: columns.clone(),
        values: values.index_axis(Axis(0), 0).to_owned(),
    };
    let training = EncodedMatrix::from_parts(columns, values.slice(s![1.., ..]).to_owned())?;
    Ok((query, training))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::FeatureEncoder;

    fn record(island: &str, sex: &str, bill: f64) -> FeatureRecord {
        FeatureRecord {
            island: island.into(),
            bill_length_mm: bill,
            bill_depth_mm: 17.0,
            flipper_length_mm: 200.0,
            body_mass_g: 4000.0,
            sex: sex.into(),
        }
    }

    #[test]
    fn query_comes_first_then_training_in_order() {
        let a = record("Biscoe", "male", 1.0);
        let b = record("Dream", "female", 2.0);
        let c = record("Torgersen", "male", 3.0);
        let q = record("Dream", "male", 9.0);
        let combined = unify(&q, &[a.clone(), b.clone(), c.clone()]);
        assert_eq!(combined, vec![q, a, b, c]);
    }

    #[test]
    fn split_returns_query_row_and_training_rows_in_position() {
        let training = vec![
            record("Biscoe", "male", 1.0),
            record("Dream", "female", 2.0),
            record("Torgersen", "male", 3.0),
        ];
        let query = record("Dream", "male", 9.0);
        let combined = unify(&query, &training);
        let encoder = FeatureEncoder::observing(&combined);
        let unified = encoder.encode(&combined).unwrap();
        let (row, matrix) = split_query(unified).unwrap();

        let query_alone = encoder.encode(std::slice::from_ref(&query)).unwrap();
        assert_eq!(row.values, query_alone.row(0).unwrap());
        assert_eq!(matrix.n_rows(), 3);
        for (idx, expected) in training.iter().enumerate() {
            let alone = encoder.encode(std::slice::from_ref(expected)).unwrap();
            assert_eq!(matrix.row(idx).unwrap(), alone.row(0).unwrap());
        }
    }

    #[test]
    fn query_row_columns_match_training_columns() {
        let training = vec![record("Biscoe", "female", 45.0), record("Dream", "female", 39.0)];
        let query = record("Torgersen", "male", 40.0);
        let combined = unify(&query, &training);
        let unified = FeatureEncoder::observing(&combined).encode(&combined).unwrap();
        let (row, matrix) = split_query(unified).unwrap();
        assert_eq!(row.columns, matrix.columns());
        assert_eq!(row.values.len(), matrix.n_cols());
        assert!(matrix.column_index("island_Torgersen").is_some());
        assert!(matrix.column_index("sex_male").is_some());
    }

    #[test]
    fn empty_matrix_cannot_be_split() {
        let none: Vec<FeatureRecord> = Vec::new();
        let empty = FeatureEncoder::observing(&none).encode(&none).unwrap();
        assert_eq!(split_query(empty).unwrap_err(), UnifyError::Empty);
    }
}
