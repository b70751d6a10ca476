//! One interaction cycle: unify the query with the training rows, encode,
//! split, train a fresh classifier and score the query.
//!
//! [`SpeciesPipeline::run`] depends only on its arguments. Nothing learned in
//! one cycle survives into the next.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::{EncodingSettings, PipelineConfig, UnseenCategoryPolicy},
    dataset::{DatasetError, DatasetSnapshot, SnapshotCache},
    encoder::{CategoryUniverse, EncodeError, EncodedMatrix, EncodedRow, FeatureEncoder},
    forest::{Classifier, ClassifierError, ForestParams, TrainedClassifier},
    labels::{LabelEncoder, LabelError},
    presenter::ProbabilityTable,
    schema::{FeatureRecord, Species},
    telemetry::PipelineTelemetry,
    unifier::{split_query, unify, UnifyError},
};

/// Any failure that aborts a cycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The dataset could not be loaded.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// Encoding rejected a record.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// A training label is not a known species.
    #[error(transparent)]
    Label(#[from] LabelError),
    /// The unified matrix could not be split.
    #[error(transparent)]
    Unify(#[from] UnifyError),
    /// Training or scoring failed.
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    /// The query uses a category none of the training rows carry.
    #[error("query {field} `{value}` does not occur in the training data")]
    UnseenCategory {
        /// Categorical field.
        field: &'static str,
        /// Query value.
        value: String,
    },
}

/// Everything the cycle builds before training.
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Query record as entered.
    pub query: FeatureRecord,
    /// Query followed by every training record.
    pub combined: Vec<FeatureRecord>,
    /// Category universe used for the one-hot columns.
    pub universe: CategoryUniverse,
    /// Encoded query row.
    pub query_row: EncodedRow,
    /// Encoded training matrix, same columns as `query_row`.
    pub training: EncodedMatrix,
    /// Encoded training labels, aligned with `training` rows.
    pub labels: Vec<usize>,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    /// Cycle identifier, also stamped on the cycle's log records.
    pub cycle_id: Uuid,
    /// Winning species.
    pub predicted: Species,
    /// Class index of the winner.
    pub class_index: usize,
    /// Probability per class in `Adelie, Chinstrap, Gentoo` order.
    pub probabilities: Vec<f64>,
}

impl PredictionResult {
    /// Display table for the probabilities.
    #[must_use]
    pub fn table(&self) -> ProbabilityTable {
        ProbabilityTable::new(&self.probabilities)
    }
}

/// Pipeline wiring a classifier to the encoding rules.
#[derive(Debug, Clone)]
pub struct SpeciesPipeline<C = ForestParams> {
    classifier: C,
    encoding: EncodingSettings,
    labels: LabelEncoder,
    telemetry: PipelineTelemetry,
}

impl SpeciesPipeline<ForestParams> {
    /// Random-forest pipeline configured from `config`.
    #[must_use]
    pub fn from_config(config: &PipelineConfig, telemetry: PipelineTelemetry) -> Self {
        Self::new(config.forest_params(), config.encoding, telemetry)
    }
}

impl<C: Classifier> SpeciesPipeline<C> {
    /// Creates a pipeline around `classifier`.
    #[must_use]
    pub fn new(classifier: C, encoding: EncodingSettings, telemetry: PipelineTelemetry) -> Self {
        Self {
            classifier,
            encoding,
            labels: LabelEncoder::new(),
            telemetry,
        }
    }

    /// Encoding settings in effect.
    #[must_use]
    pub const fn encoding(&self) -> EncodingSettings {
        self.encoding
    }

    /// Returns the snapshot held by `cache`, loading it on first use.
    pub fn load(&self, cache: &SnapshotCache) -> Result<Arc<DatasetSnapshot>, PipelineError> {
        match cache.snapshot() {
            Ok(snapshot) => {
                self.emit(
                    LogLevel::Info,
                    "dataset.loaded",
                    json!({
                        "origin": snapshot.origin(),
                        "rows": snapshot.len(),
                        "loaded_at": snapshot.loaded_at(),
                    }),
                );
                Ok(snapshot)
            }
            Err(err) => {
                self.emit(
                    LogLevel::Error,
                    "dataset.failed",
                    json!({ "error": err.to_string() }),
                );
                Err(err.into())
            }
        }
    }

    /// Unifies, encodes and splits without training.
    pub fn prepare(
        &self,
        snapshot: &DatasetSnapshot,
        query: &FeatureRecord,
    ) -> Result<PreparedData, PipelineError> {
        if self.encoding.unseen_category == UnseenCategoryPolicy::Reject {
            check_seen(snapshot.features(), query)?;
        }
        let combined = unify(query, snapshot.features());
        let universe = CategoryUniverse::for_kind(self.encoding.universe, &combined);
        let encoder = FeatureEncoder::new(universe.clone());
        let (query_row, training) = split_query(encoder.encode(&combined)?)?;
        let labels = self.labels.encode_all(snapshot.labels())?;
        Ok(PreparedData {
            query: query.clone(),
            combined,
            universe,
            query_row,
            training,
            labels,
        })
    }

    /// Runs a full cycle and returns the prediction.
    pub fn run(
        &self,
        snapshot: &DatasetSnapshot,
        query: &FeatureRecord,
    ) -> Result<PredictionResult, PipelineError> {
        let cycle_id = Uuid::new_v4();
        self.emit(
            LogLevel::Info,
            "cycle.start",
            json!({
                "cycle_id": cycle_id,
                "origin": snapshot.origin(),
                "rows": snapshot.len(),
                "query": query,
            }),
        );
        match self.cycle(cycle_id, snapshot, query) {
            Ok(result) => {
                self.emit(
                    LogLevel::Info,
                    "cycle.completed",
                    json!({
                        "cycle_id": cycle_id,
                        "predicted": result.predicted,
                        "probabilities": result.probabilities,
                    }),
                );
                Ok(result)
            }
            Err(err) => {
                self.emit(
                    LogLevel::Error,
                    "cycle.failed",
                    json!({ "cycle_id": cycle_id, "error": err.to_string() }),
                );
                Err(err)
            }
        }
    }

    fn cycle(
        &self,
        cycle_id: Uuid,
        snapshot: &DatasetSnapshot,
        query: &FeatureRecord,
    ) -> Result<PredictionResult, PipelineError> {
        let prepared = self.prepare(snapshot, query)?;
        self.emit(
            LogLevel::Debug,
            "cycle.encoded",
            json!({
                "cycle_id": cycle_id,
                "columns": prepared.training.columns(),
                "training_rows": prepared.training.n_rows(),
            }),
        );

        let model = self
            .classifier
            .train(prepared.training.values(), &prepared.labels)?;
        self.emit(
            LogLevel::Debug,
            "cycle.trained",
            json!({ "cycle_id": cycle_id, "n_features": model.n_features() }),
        );

        let row = prepared.query_row.values.view();
        let class_index = model.predict(row)?;
        let probabilities = model.predict_proba(row)?.to_vec();
        let predicted =
            Species::from_index(class_index).ok_or(LabelError::UnknownIndex(class_index))?;
        Ok(PredictionResult {
            cycle_id,
            predicted,
            class_index,
            probabilities,
        })
    }

    fn emit(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Err(err) = self.telemetry.log(level, message, metadata) {
            tracing::warn!(error = %err, event = message, "telemetry write failed");
        }
    }
}

fn check_seen(training: &[FeatureRecord], query: &FeatureRecord) -> Result<(), PipelineError> {
    for (field, value) in query.categorical() {
        let seen = training
            .iter()
            .any(|record| record.category(field) == Some(value));
        if !seen {
            return Err(PipelineError::UnseenCategory {
                field,
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::{CsvFileSource, DatasetSnapshot, SnapshotCache},
        encoder::UniverseKind,
        input::{QueryInput, SLIDERS},
        schema::PenguinRecord,
    };
    use shared_logging::MemoryLogSink;

    fn penguin(species: &str, island: &str, sex: &str, bill: f64, mass: f64) -> PenguinRecord {
        PenguinRecord {
            species: species.into(),
            island: island.into(),
            bill_length_mm: bill,
            bill_depth_mm: 18.0,
            flipper_length_mm: 190.0 + bill,
            body_mass_g: mass,
            sex: sex.into(),
        }
    }

    fn three_species() -> DatasetSnapshot {
        DatasetSnapshot::from_records(
            "memory",
            vec![
                penguin("Adelie", "Torgersen", "male", 39.1, 3750.0),
                penguin("Chinstrap", "Dream", "female", 49.5, 3400.0),
                penguin("Gentoo", "Biscoe", "male", 47.6, 5600.0),
            ],
        )
        .unwrap()
    }

    fn sample_snapshot() -> DatasetSnapshot {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/dataset/penguins_sample.csv");
        DatasetSnapshot::load(&CsvFileSource::new(path)).unwrap()
    }

    fn pipeline(seed: u64, encoding: EncodingSettings) -> SpeciesPipeline {
        SpeciesPipeline::new(
            ForestParams::new(Species::COUNT)
                .with_trees(100)
                .with_seed(Some(seed)),
            encoding,
            PipelineTelemetry::disabled("species.pipeline"),
        )
    }

    fn assert_distribution(result: &PredictionResult) {
        assert_eq!(result.probabilities.len(), 3);
        assert!(result
            .probabilities
            .iter()
            .all(|p| (0.0..=1.0).contains(p)));
        let total: f64 = result.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn query_equal_to_a_training_row_predicts_its_species() {
        let snapshot = three_species();
        let query = snapshot.features()[1].clone();
        let result = pipeline(7, EncodingSettings::default())
            .run(&snapshot, &query)
            .unwrap();
        assert_distribution(&result);
        assert_eq!(result.predicted, Species::Chinstrap);
        assert_eq!(result.class_index, 1);
        let best = result
            .probabilities
            .iter()
            .copied()
            .fold(f64::MIN, f64::max);
        assert!((result.probabilities[1] - best).abs() < f64::EPSILON);
    }

    #[test]
    fn minimum_slider_query_yields_a_distribution() {
        let snapshot = sample_snapshot();
        let mut input = QueryInput::default();
        for slider in &SLIDERS {
            input.set_measurement(slider, slider.min);
        }
        let query = input.to_feature_record();
        let pipeline = pipeline(11, EncodingSettings::default());
        let prepared = pipeline.prepare(&snapshot, &query).unwrap();
        assert_eq!(prepared.query_row.columns, prepared.training.columns());
        assert_eq!(prepared.training.n_rows(), snapshot.len());
        assert_eq!(prepared.labels.len(), snapshot.len());
        assert_eq!(prepared.combined[0], query);

        let result = pipeline.run(&snapshot, &query).unwrap();
        assert_distribution(&result);
        assert_eq!(result.table().entries().len(), 3);
    }

    #[test]
    fn unseen_query_category_is_rejected_by_default() {
        let snapshot = DatasetSnapshot::from_records(
            "memory",
            vec![
                penguin("Adelie", "Torgersen", "male", 39.1, 3750.0),
                penguin("Gentoo", "Biscoe", "female", 47.6, 5600.0),
            ],
        )
        .unwrap();
        let mut input = QueryInput::default();
        input.set("island", "Dream").unwrap();
        let err = pipeline(1, EncodingSettings::default())
            .run(&snapshot, &input.to_feature_record())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnseenCategory { field: "island", ref value } if value == "Dream"
        ));
    }

    #[test]
    fn allow_policy_keeps_the_unseen_column() {
        let snapshot = DatasetSnapshot::from_records(
            "memory",
            vec![
                penguin("Adelie", "Torgersen", "male", 39.1, 3750.0),
                penguin("Gentoo", "Biscoe", "female", 47.6, 5600.0),
            ],
        )
        .unwrap();
        let mut input = QueryInput::default();
        input.set("island", "Dream").unwrap();
        let query = input.to_feature_record();
        let pipeline = pipeline(
            3,
            EncodingSettings {
                universe: UniverseKind::Observed,
                unseen_category: UnseenCategoryPolicy::Allow,
            },
        );
        let prepared = pipeline.prepare(&snapshot, &query).unwrap();
        let dream = prepared.training.column_index("island_Dream").unwrap();
        assert!(prepared.query_row.values[dream] > 0.5);
        assert!(prepared
            .training
            .values()
            .column(dream)
            .iter()
            .all(|v| v.abs() < f64::EPSILON));
        assert_distribution(&pipeline.run(&snapshot, &query).unwrap());
    }

    #[test]
    fn declared_universe_rejects_foreign_categories() {
        let snapshot = three_species();
        let mut query = snapshot.features()[0].clone();
        query.island = "Atlantis".into();
        let pipeline = pipeline(
            5,
            EncodingSettings {
                universe: UniverseKind::Declared,
                unseen_category: UnseenCategoryPolicy::Allow,
            },
        );
        assert!(matches!(
            pipeline.run(&snapshot, &query),
            Err(PipelineError::Encode(EncodeError::UnknownCategory { row: 0, .. }))
        ));
    }

    #[test]
    fn unknown_training_label_fails_the_cycle() {
        let snapshot = DatasetSnapshot::from_records(
            "memory",
            vec![
                penguin("Adelie", "Torgersen", "male", 39.1, 3750.0),
                penguin("Emperor", "Torgersen", "female", 60.0, 9000.0),
            ],
        )
        .unwrap();
        let query = snapshot.features()[0].clone();
        let err = pipeline(2, EncodingSettings::default())
            .run(&snapshot, &query)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            LabelError::UnknownLabelAt {
                row: 1,
                label: "Emperor".into()
            }
            .to_string()
        );
    }

    #[test]
    fn preparation_is_deterministic() {
        let snapshot = sample_snapshot();
        let query = QueryInput::default().to_feature_record();
        let pipeline = pipeline(9, EncodingSettings::default());
        let first = pipeline.prepare(&snapshot, &query).unwrap();
        let second = pipeline.prepare(&snapshot, &query).unwrap();
        assert_eq!(first.training, second.training);
        assert_eq!(first.query_row, second.query_row);
        assert_eq!(first.labels, second.labels);
    }

    #[test]
    fn cycles_are_logged_with_a_shared_id() {
        let sink = Arc::new(MemoryLogSink::new());
        let telemetry = PipelineTelemetry::builder("species.pipeline")
            .sink(sink.clone())
            .min_level(LogLevel::Debug)
            .build()
            .unwrap();
        let pipeline = SpeciesPipeline::new(
            ForestParams::new(Species::COUNT)
                .with_trees(10)
                .with_seed(Some(4)),
            EncodingSettings::default(),
            telemetry,
        );
        let snapshot = three_species();
        let result = pipeline
            .run(&snapshot, &snapshot.features()[2])
            .unwrap();
        assert_eq!(
            sink.messages(),
            vec!["cycle.start", "cycle.encoded", "cycle.trained", "cycle.completed"]
        );
        let id = result.cycle_id.to_string();
        assert!(sink
            .snapshot()
            .iter()
            .all(|record| record.metadata["cycle_id"] == id.as_str()));

        let mut query = snapshot.features()[0].clone();
        query.sex = "unknown".into();
        assert!(pipeline.run(&snapshot, &query).is_err());
        assert_eq!(sink.messages().last().map(String::as_str), Some("cycle.failed"));
    }

    #[test]
    fn loading_goes_through_the_cache_and_is_logged() {
        let sink = Arc::new(MemoryLogSink::new());
        let telemetry = PipelineTelemetry::builder("species.pipeline")
            .sink(sink.clone())
            .build()
            .unwrap();
        let pipeline = SpeciesPipeline::new(
            ForestParams::new(Species::COUNT),
            EncodingSettings::default(),
            telemetry,
        );
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/dataset/penguins_sample.csv");
        let cache = SnapshotCache::new(Box::new(CsvFileSource::new(path)));
        let first = pipeline.load(&cache).unwrap();
        let second = pipeline.load(&cache).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(sink.messages(), vec!["dataset.loaded", "dataset.loaded"]);

        let dir = tempfile::tempdir().unwrap();
        let missing = SnapshotCache::new(Box::new(CsvFileSource::new(dir.path().join("gone.csv"))));
        assert!(matches!(
            pipeline.load(&missing),
            Err(PipelineError::Dataset(DatasetError::Io { .. }))
        ));
        assert_eq!(sink.messages().last().map(String::as_str), Some("dataset.failed"));
    }
}
