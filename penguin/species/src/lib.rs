#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]

//! Penguin species classification: dataset loading, one-hot encoding,
//! random-forest training and per-cycle inference.

/// Column names, categorical enumerations and record types.
#[path = "../schema.rs"]
pub mod schema;

/// CSV dataset sources and the cached snapshot.
#[path = "../dataset.rs"]
pub mod dataset;

/// One-hot feature encoding.
#[path = "../encoder.rs"]
pub mod encoder;

/// Species label table.
#[path = "../labels.rs"]
pub mod labels;

/// Query/training unification and splitting.
#[path = "../unifier.rs"]
pub mod unifier;

/// Classifier traits and the random forest.
#[path = "../forest.rs"]
pub mod forest;

/// User input controls.
#[path = "../input.rs"]
pub mod input;

/// Probability table rendering.
#[path = "../presenter.rs"]
pub mod presenter;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Structured logging for pipeline cycles.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// The per-cycle pipeline.
#[path = "../pipeline.rs"]
pub mod pipeline;

pub use config::{PipelineConfig, UnseenCategoryPolicy};
pub use dataset::{source_for, DatasetSnapshot, DatasetSource, SnapshotCache};
pub use encoder::{CategoryUniverse, EncodedMatrix, FeatureEncoder, UniverseKind};
pub use forest::{Classifier, ForestParams, RandomForest, TrainedClassifier};
pub use input::QueryInput;
pub use labels::LabelEncoder;
pub use pipeline::{PipelineError, PredictionResult, PreparedData, SpeciesPipeline};
pub use presenter::ProbabilityTable;
pub use schema::{FeatureRecord, Island, PenguinRecord, Sex, Species};
pub use telemetry::PipelineTelemetry;
