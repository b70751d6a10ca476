use std::{
    fmt, fs,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::schema::{FeatureRecord, PenguinRecord, REQUIRED_COLUMNS};

/// Public copy of the cleaned Palmer penguins dataset.
pub const DEFAULT_DATASET_URL: &str =
    "https://raw.githubusercontent.com/dataprofessor/data/refs/heads/master/penguins_cleaned.csv";

/// Errors raised while loading the dataset. All of them are fatal.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Header row lacks schema columns.
    #[error("dataset is missing required columns: {}", missing.join(", "))]
    MissingColumns {
        /// Names of the absent columns.
        missing: Vec<String>,
    },
    /// A data row could not be parsed.
    #[error("row {row}: {message}")]
    Row {
        /// One-based data row (the header is row 0).
        row: usize,
        /// Parser message.
        message: String,
    },
    /// The source yielded no rows.
    #[error("dataset {0} contains no rows")]
    Empty(String),
    /// Reading a local file failed.
    #[error("reading {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Reading the CSV structure failed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Fetching a remote dataset failed.
    #[error("fetching {url}: {message}")]
    Http {
        /// Requested URL.
        url: String,
        /// Transport or status message.
        message: String,
    },
}

/// Supplier of raw dataset rows.
pub trait DatasetSource: Send + Sync + fmt::Debug {
    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;

    /// Reads every row. Schema violations abort the load.
    fn load(&self) -> Result<Vec<PenguinRecord>, DatasetError>;
}

/// Parses CSV with a header row into records, checking the schema first.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<PenguinRecord>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|header| header == **column))
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(DatasetError::MissingColumns { missing });
    }

    reader
        .deserialize::<PenguinRecord>()
        .enumerate()
        .map(|(idx, row)| {
            row.map_err(|err| DatasetError::Row {
                row: idx + 1,
                message: err.to_string(),
            })
        })
        .collect()
}

/// CSV file on the local filesystem.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    /// Creates a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetSource for CsvFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Vec<PenguinRecord>, DatasetError> {
        let file = fs::File::open(&self.path).map_err(|source| DatasetError::Io {
            path: self.path.clone(),
            source,
        })?;
        read_csv(file)
    }
}

/// CSV served over HTTP(S), fetched on a private runtime.
#[derive(Debug, Clone)]
pub struct HttpCsvSource {
    url: String,
}

impl HttpCsvSource {
    /// Creates a source fetching `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn http_error(&self, err: impl fmt::Display) -> DatasetError {
        DatasetError::Http {
            url: self.url.clone(),
            message: err.to_string(),
        }
    }
}

impl DatasetSource for HttpCsvSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn load(&self) -> Result<Vec<PenguinRecord>, DatasetError> {
        let runtime = tokio::runtime::Runtime::new().map_err(|err| self.http_error(err))?;
        let body = runtime
            .block_on(fetch_bytes(&self.url))
            .map_err(|err| self.http_error(err))?;
        tracing::debug!(url = %self.url, bytes = body.len(), "dataset fetched");
        read_csv(body.as_slice())
    }
}

async fn fetch_bytes(url: &str) -> reqwest::Result<Vec<u8>> {
    let response = reqwest::get(url).await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

/// Picks the source matching a location string: `http://` and `https://`
/// locations are fetched, anything else is read from disk.
#[must_use]
pub fn source_for(location: &str) -> Box<dyn DatasetSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpCsvSource::new(location))
    } else {
        Box::new(CsvFileSource::new(location))
    }
}

/// Per-species aggregate used by the data summary view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeciesSummary {
    /// Species label.
    pub species: String,
    /// Number of rows.
    pub count: usize,
    /// Mean bill length in millimetres.
    pub mean_bill_length_mm: f64,
    /// Mean body mass in grams.
    pub mean_body_mass_g: f64,
}

/// Loaded dataset, read-only after construction.
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    origin: String,
    loaded_at: DateTime<Utc>,
    records: Vec<PenguinRecord>,
    features: Vec<FeatureRecord>,
}

impl DatasetSnapshot {
    /// Wraps loaded rows. An empty dataset is rejected.
    pub fn from_records(
        origin: impl Into<String>,
        records: Vec<PenguinRecord>,
    ) -> Result<Self, DatasetError> {
        let origin = origin.into();
        if records.is_empty() {
            return Err(DatasetError::Empty(origin));
        }
        let features = records.iter().map(PenguinRecord::features).collect();
        Ok(Self {
            origin,
            loaded_at: Utc::now(),
            records,
            features,
        })
    }

    /// Loads every row from `source`.
    pub fn load(source: &dyn DatasetSource) -> Result<Self, DatasetError> {
        Self::from_records(source.describe(), source.load()?)
    }

    /// Where the rows came from.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// When the rows were loaded.
    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Raw rows.
    #[must_use]
    pub fn records(&self) -> &[PenguinRecord] {
        &self.records
    }

    /// Feature rows (`X`), aligned with [`Self::labels`].
    #[must_use]
    pub fn features(&self) -> &[FeatureRecord] {
        &self.features
    }

    /// Label column (`y`).
    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.records.iter().map(|record| record.species.as_str())
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false: empty snapshots cannot be built.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count and mean bill length / body mass per species, in order of first
    /// appearance.
    #[must_use]
    pub fn species_summary(&self) -> Vec<SpeciesSummary> {
        let mut totals: IndexMap<&str, (usize, f64, f64)> = IndexMap::new();
        for record in &self.records {
            let entry = totals.entry(record.species.as_str()).or_insert((0, 0.0, 0.0));
            entry.0 += 1;
            entry.1 += record.bill_length_mm;
            entry.2 += record.body_mass_g;
        }
        totals
            .into_iter()
            .map(|(species, (count, bill, mass))| SpeciesSummary {
                species: species.to_string(),
                count,
                mean_bill_length_mm: bill / count as f64,
                mean_body_mass_g: mass / count as f64,
            })
            .collect()
    }
}

/// Loads a source once and hands out the same snapshot afterwards.
#[derive(Debug)]
pub struct SnapshotCache {
    source: Box<dyn DatasetSource>,
    cached: Mutex<Option<Arc<DatasetSnapshot>>>,
}

impl SnapshotCache {
    /// Wraps a source without loading it.
    #[must_use]
    pub fn new(source: Box<dyn DatasetSource>) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached snapshot, loading it on first use.
    pub fn snapshot(&self) -> Result<Arc<DatasetSnapshot>, DatasetError> {
        let mut cached = self.cached.lock();
        if let Some(snapshot) = cached.as_ref() {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(DatasetSnapshot::load(self.source.as_ref())?);
        tracing::debug!(origin = snapshot.origin(), rows = snapshot.len(), "dataset cached");
        *cached = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Drops the cached snapshot so the next call reloads it.
    pub fn invalidate(&self) {
        self.cached.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const HEADER: &str = "species,island,bill_length_mm,bill_depth_mm,flipper_length_mm,body_mass_g,sex";

    fn sample_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("dataset/penguins_sample.csv")
    }

    #[test]
    fn reads_bundled_sample() {
        let snapshot = DatasetSnapshot::load(&CsvFileSource::new(sample_path())).unwrap();
        assert!(snapshot.len() >= 30);
        let summary = snapshot.species_summary();
        let names: Vec<_> = summary.iter().map(|s| s.species.as_str()).collect();
        assert_eq!(names, vec!["Adelie", "Chinstrap", "Gentoo"]);
        let gentoo = &summary[2];
        assert!(gentoo.mean_body_mass_g > summary[0].mean_body_mass_g);
    }

    #[test]
    fn columns_may_come_in_any_order() {
        let csv = "sex,body_mass_g,flipper_length_mm,bill_depth_mm,bill_length_mm,island,species\n\
                   female,3800,186,17.4,39.5,Torgersen,Adelie\n";
        let records = read_csv(csv.as_bytes()).unwrap();
        assert_eq!(records[0].island, "Torgersen");
        assert!((records[0].body_mass_g - 3800.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_columns_are_fatal() {
        let csv = "species,island,bill_length_mm,bill_depth_mm,flipper_length_mm\nAdelie,Dream,1,2,3\n";
        match read_csv(csv.as_bytes()).unwrap_err() {
            DatasetError::MissingColumns { missing } => {
                assert_eq!(missing, vec!["body_mass_g", "sex"]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn unparsable_numbers_name_the_row() {
        let csv = format!("{HEADER}\nAdelie,Dream,39.5,17.8,188,3300,female\nAdelie,Dream,n/a,18.1,178,3900,male\n");
        match read_csv(csv.as_bytes()).unwrap_err() {
            DatasetError::Row { row, .. } => assert_eq!(row, 2),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, format!("{HEADER}\n")).unwrap();
        let err = DatasetSnapshot::load(&CsvFileSource::new(&path)).unwrap_err();
        assert!(matches!(err, DatasetError::Empty(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = CsvFileSource::new("/nonexistent/penguins.csv").load().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/penguins.csv"));
    }

    #[test]
    fn locations_pick_matching_source() {
        assert!(source_for(DEFAULT_DATASET_URL).describe().starts_with("https://"));
        assert_eq!(source_for("data/penguins.csv").describe(), "data/penguins.csv");
    }

    #[derive(Debug)]
    struct CountingSource {
        loads: Arc<AtomicUsize>,
    }

    impl DatasetSource for CountingSource {
        fn describe(&self) -> String {
            "counting".into()
        }

        fn load(&self) -> Result<Vec<PenguinRecord>, DatasetError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            read_csv(format!("{HEADER}\nGentoo,Biscoe,46.1,13.2,211,4500,female\n").as_bytes())
        }
    }

    #[test]
    fn cache_loads_once_until_invalidated() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = SnapshotCache::new(Box::new(CountingSource {
            loads: Arc::clone(&loads),
        }));
        let first = cache.snapshot().unwrap();
        let second = cache.snapshot().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        cache.invalidate();
        cache.snapshot().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }
}
