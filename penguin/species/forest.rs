//! Classifier seam and the random forest behind it.
//!
//! The forest itself is aprender's `RandomForestClassifier`: bootstrap-sampled
//! Gini trees whose votes become class probabilities. This module owns input
//! checks, the f64 to f32 conversion aprender expects, and widening the vote
//! vector to the full class count.

use aprender::{primitives::Matrix, tree::RandomForestClassifier};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while training or querying a classifier.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    /// Feature rows and labels disagree in length.
    #[error("{rows} feature rows but {labels} labels")]
    DimensionMismatch {
        /// Number of feature rows.
        rows: usize,
        /// Number of labels.
        labels: usize,
    },
    /// No training rows were provided.
    #[error("cannot train on an empty training set")]
    EmptyTrainingSet,
    /// A feature is NaN or infinite.
    #[error("feature at row {row}, column {column} is not finite")]
    NonFinite {
        /// Row index.
        row: usize,
        /// Column index.
        column: usize,
    },
    /// A label is not a valid class index.
    #[error("row {row}: label {label} outside 0..{n_classes}")]
    LabelOutOfRange {
        /// Row index.
        row: usize,
        /// Offending label.
        label: usize,
        /// Number of classes.
        n_classes: usize,
    },
    /// A query row has the wrong width.
    #[error("model expects {expected} features, row has {actual}")]
    FeatureCountMismatch {
        /// Width seen at training time.
        expected: usize,
        /// Width of the query row.
        actual: usize,
    },
    /// Hyperparameters are unusable.
    #[error("invalid classifier parameters: {0}")]
    InvalidParams(String),
    /// The underlying learner refused the data.
    #[error("random forest backend: {0}")]
    Backend(String),
}

/// Something that can be fit from scratch on an encoded matrix.
pub trait Classifier {
    /// Model produced by training.
    type Model: TrainedClassifier;

    /// Fits a new model. Nothing is carried over between calls.
    fn train(
        &self,
        features: ArrayView2<'_, f64>,
        labels: &[usize],
    ) -> Result<Self::Model, ClassifierError>;
}

/// A fitted model able to score encoded rows.
pub trait TrainedClassifier {
    /// Number of classes in every distribution.
    fn n_classes(&self) -> usize;

    /// Row width the model was trained on.
    fn n_features(&self) -> usize;

    /// Probability per class, non-negative and summing to one.
    fn predict_proba(&self, row: ArrayView1<'_, f64>) -> Result<Array1<f64>, ClassifierError>;

    /// Most likely class. Ties resolve to the lowest class index.
    fn predict(&self, row: ArrayView1<'_, f64>) -> Result<usize, ClassifierError> {
        let proba = self.predict_proba(row)?;
        let mut best = 0;
        for (class, p) in proba.iter().enumerate() {
            if *p > proba[best] {
                best = class;
            }
        }
        Ok(best)
    }
}

/// Random-forest hyperparameters. Doubles as the [`Classifier`] that trains them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    n_classes: usize,
    n_trees: usize,
    max_depth: Option<usize>,
    seed: Option<u64>,
}

impl ForestParams {
    /// 100 fully grown, unseeded trees.
    #[must_use]
    pub const fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            n_trees: 100,
            max_depth: None,
            seed: None,
        }
    }

    /// Sets the number of trees.
    #[must_use]
    pub const fn with_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = n_trees;
        self
    }

    /// Caps tree depth (root has depth 0).
    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Seeds bootstrap sampling. Unseeded forests differ run to run.
    #[must_use]
    pub const fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Number of trees.
    #[must_use]
    pub const fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Depth cap, if any.
    #[must_use]
    pub const fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Seed, if any.
    #[must_use]
    pub const fn seed(&self) -> Option<u64> {
        self.seed
    }

    fn validate(&self) -> Result<(), ClassifierError> {
        if self.n_classes == 0 {
            return Err(ClassifierError::InvalidParams("n_classes must be positive".into()));
        }
        if self.n_trees == 0 {
            return Err(ClassifierError::InvalidParams("n_trees must be positive".into()));
        }
        if self.max_depth == Some(0) {
            return Err(ClassifierError::InvalidParams(
                "max_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn learner(&self) -> RandomForestClassifier {
        let mut learner = RandomForestClassifier::new(self.n_trees);
        if let Some(depth) = self.max_depth {
            learner = learner.with_max_depth(depth);
        }
        if let Some(seed) = self.seed {
            learner = learner.with_random_state(seed);
        }
        learner
    }
}

impl Classifier for ForestParams {
    type Model = RandomForest;

    fn train(
        &self,
        features: ArrayView2<'_, f64>,
        labels: &[usize],
    ) -> Result<RandomForest, ClassifierError> {
        self.validate()?;
        let (n_rows, n_features) = features.dim();
        if n_rows != labels.len() {
            return Err(ClassifierError::DimensionMismatch {
                rows: n_rows,
                labels: labels.len(),
            });
        }
        if n_rows == 0 {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        if let Some(((row, column), _)) = features.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ClassifierError::NonFinite { row, column });
        }
        if let Some((row, label)) = labels
            .iter()
            .enumerate()
            .find(|(_, label)| **label >= self.n_classes)
        {
            return Err(ClassifierError::LabelOutOfRange {
                row,
                label: *label,
                n_classes: self.n_classes,
            });
        }

        let mut inner = self.learner();
        inner
            .fit(&to_matrix(features)?, labels)
            .map_err(|err| ClassifierError::Backend(err.to_string()))?;
        Ok(RandomForest {
            inner,
            n_trees: self.n_trees,
            n_classes: self.n_classes,
            n_features,
        })
    }
}

// aprender works in f32, row-major.
fn to_matrix(rows: ArrayView2<'_, f64>) -> Result<Matrix<f32>, ClassifierError> {
    let (n_rows, n_cols) = rows.dim();
    let data = rows.iter().map(|value| *value as f32).collect();
    Matrix::from_vec(n_rows, n_cols, data).map_err(|err| ClassifierError::Backend(err.into()))
}

/// Fitted random forest.
#[derive(Debug, Clone)]
pub struct RandomForest {
    inner: RandomForestClassifier,
    n_trees: usize,
    n_classes: usize,
    n_features: usize,
}

impl RandomForest {
    /// Number of fitted trees.
    #[must_use]
    pub const fn n_trees(&self) -> usize {
        self.n_trees
    }
}

impl TrainedClassifier for RandomForest {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, row: ArrayView1<'_, f64>) -> Result<Array1<f64>, ClassifierError> {
        if row.len() != self.n_features {
            return Err(ClassifierError::FeatureCountMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        if let Some(column) = row.iter().position(|value| !value.is_finite()) {
            return Err(ClassifierError::NonFinite { row: 0, column });
        }
        let votes = self.inner.predict_proba(&to_matrix(row.insert_axis(Axis(0)))?);
        // Vote columns stop at the highest label seen in training.
        let width = votes.shape().1.min(self.n_classes);
        let mut proba = Array1::<f64>::zeros(self.n_classes);
        for (class, slot) in proba.iter_mut().enumerate().take(width) {
            *slot = f64::from(votes.get(0, class));
        }
        let total = proba.sum();
        if total > 0.0 {
            proba.mapv_inplace(|p| p / total);
        }
        Ok(proba)
    }
}
