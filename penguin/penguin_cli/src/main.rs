mod session;

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use penguin_species::{
    presenter::render, source_for, DatasetSnapshot, PipelineConfig, PipelineTelemetry,
    QueryInput, SnapshotCache, SpeciesPipeline,
};
use serde::Serialize;

use crate::session::{apply_changes, log_clamps, Session};

const DEFAULT_CONFIG: &str = "penguin.toml";

#[derive(Parser, Debug)]
#[command(name = "penguin", version, about = "Penguin species classifier")]
struct Cli {
    /// TOML config file. `./penguin.toml` is used when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Dataset CSV path or http(s) URL.
    #[arg(long, global = true)]
    dataset: Option<String>,
    /// Seed for the forest; unseeded runs vary.
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Number of trees.
    #[arg(long, global = true)]
    trees: Option<usize>,
    /// JSON-lines log file.
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Shows the raw rows, the feature matrix X and the label column y.
    Data {
        /// Rows to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Appends per-species counts and means.
        #[arg(long)]
        summary: bool,
    },
    /// Shows the query, the combined rows and their encoding without training.
    Prepare {
        #[command(flatten)]
        query: QueryArgs,
        /// Rows to display.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Trains a fresh forest and predicts the query species.
    Predict {
        #[command(flatten)]
        query: QueryArgs,
        /// Prints the result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Line-oriented session; each change retrains and predicts.
    Interactive {
        #[command(flatten)]
        query: QueryArgs,
    },
}

#[derive(Args, Debug, Default)]
struct QueryArgs {
    /// Torgersen, Biscoe or Dream.
    #[arg(long)]
    island: Option<String>,
    /// male or female.
    #[arg(long)]
    sex: Option<String>,
    #[arg(long)]
    bill_length_mm: Option<f64>,
    #[arg(long)]
    bill_depth_mm: Option<f64>,
    #[arg(long)]
    flipper_length_mm: Option<f64>,
    #[arg(long)]
    body_mass_g: Option<f64>,
}

impl QueryArgs {
    fn changes(&self) -> Vec<(&'static str, String)> {
        let mut changes = Vec::new();
        if let Some(island) = &self.island {
            changes.push(("island", island.clone()));
        }
        if let Some(sex) = &self.sex {
            changes.push(("sex", sex.clone()));
        }
        let numeric = [
            ("bill_length_mm", self.bill_length_mm),
            ("bill_depth_mm", self.bill_depth_mm),
            ("flipper_length_mm", self.flipper_length_mm),
            ("body_mass_g", self.body_mass_g),
        ];
        for (field, value) in numeric {
            if let Some(value) = value {
                changes.push((field, value.to_string()));
            }
        }
        changes
    }

    fn to_input(&self, telemetry: &PipelineTelemetry) -> Result<QueryInput> {
        let changes = self.changes();
        let (input, clamped) = apply_changes(&QueryInput::default(), &changes)?;
        log_clamps(&clamped, telemetry)?;
        for (change, _) in &clamped {
            eprintln!("note: {} clamped to {}", change.field, change.value);
        }
        Ok(input)
    }
}

#[derive(Serialize)]
struct EncodedLabel<'a> {
    species: &'a str,
    class_index: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let telemetry = build_telemetry(&config)?;
    let cache = SnapshotCache::new(source_for(&config.dataset.source));
    let pipeline = SpeciesPipeline::from_config(&config, telemetry.clone());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Data { limit, summary } => {
            let snapshot = pipeline.load(&cache).context("loading dataset")?;
            show_data(&snapshot, limit, summary, &mut out)
        }
        Commands::Prepare { query, limit } => {
            let input = query.to_input(&telemetry)?;
            let snapshot = pipeline.load(&cache).context("loading dataset")?;
            let prepared = pipeline
                .prepare(&snapshot, &input.to_feature_record())
                .context("preparing data")?;
            show_prepared(&prepared, limit, &mut out)
        }
        Commands::Predict { query, json } => {
            let input = query.to_input(&telemetry)?;
            let snapshot = pipeline.load(&cache).context("loading dataset")?;
            let result = pipeline
                .run(&snapshot, &input.to_feature_record())
                .context("prediction cycle failed")?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?;
            } else {
                write!(out, "{}", render(&result.table(), result.predicted))?;
            }
            Ok(())
        }
        Commands::Interactive { query } => {
            let input = query.to_input(&telemetry)?;
            let snapshot = pipeline.load(&cache).context("loading dataset")?;
            let mut session = Session::new(&pipeline, snapshot, input, telemetry.clone());
            session.run(io::stdin().lock(), &mut out)
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => PipelineConfig::load(DEFAULT_CONFIG)
            .with_context(|| format!("loading config {DEFAULT_CONFIG}"))?,
        None => PipelineConfig::default(),
    };
    if let Some(dataset) = &cli.dataset {
        config.dataset.source.clone_from(dataset);
    }
    if let Some(trees) = cli.trees {
        config.forest.n_trees = trees;
    }
    if cli.seed.is_some() {
        config.forest.seed = cli.seed;
    }
    if let Some(log) = &cli.log {
        config.logging.path = Some(log.clone());
    }
    config.validate()?;
    Ok(config)
}

fn build_telemetry(config: &PipelineConfig) -> Result<PipelineTelemetry> {
    let mut builder = PipelineTelemetry::builder("penguin.cli").min_level(config.log_level());
    if let Some(path) = &config.logging.path {
        builder = builder.log_path(path);
    }
    builder.build().context("opening log file")
}

fn write_csv<'a, T, I, W>(out: &mut W, rows: I) -> Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
    W: Write,
{
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn show_data<W: Write>(
    snapshot: &DatasetSnapshot,
    limit: usize,
    summary: bool,
    out: &mut W,
) -> Result<()> {
    writeln!(
        out,
        "Raw data: {} rows from {} (loaded {})",
        snapshot.len(),
        snapshot.origin(),
        snapshot.loaded_at().to_rfc3339()
    )?;
    write_csv(out, snapshot.records().iter().take(limit))?;
    writeln!(out, "\nX")?;
    write_csv(out, snapshot.features().iter().take(limit))?;
    writeln!(out, "\ny")?;
    for label in snapshot.labels().take(limit) {
        writeln!(out, "{label}")?;
    }
    if summary {
        writeln!(out, "\nSpecies summary")?;
        write_csv(out, &snapshot.species_summary())?;
    }
    Ok(())
}

fn show_prepared<W: Write>(
    prepared: &penguin_species::PreparedData,
    limit: usize,
    out: &mut W,
) -> Result<()> {
    writeln!(out, "Input penguin")?;
    write_csv(out, [&prepared.query])?;
    writeln!(out, "\nCombined penguin data (first {limit} rows)")?;
    write_csv(out, prepared.combined.iter().take(limit))?;
    writeln!(out, "\nEncoded X (input penguin)")?;
    for (column, value) in prepared
        .query_row
        .columns
        .iter()
        .zip(prepared.query_row.values.iter())
    {
        writeln!(out, "{column} = {value}")?;
    }
    writeln!(out, "\nEncoded y (first {limit} rows)")?;
    let names = penguin_species::LabelEncoder::new();
    let labels = prepared
        .labels
        .iter()
        .take(limit)
        .map(|index| {
            Ok(EncodedLabel {
                species: names.decode(*index)?,
                class_index: *index,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    write_csv(out, &labels)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use penguin_species::{dataset::CsvFileSource, ForestParams, Species};
    use tempfile::tempdir;

    fn sample_path() -> String {
        concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../species/dataset/penguins_sample.csv"
        )
        .to_string()
    }

    #[test]
    fn flags_override_the_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("penguin.toml");
        fs::write(&path, "[forest]\nn_trees = 30\nseed = 1\n").unwrap();
        let cli = Cli::try_parse_from([
            "penguin",
            "predict",
            "--config",
            path.to_str().unwrap(),
            "--seed",
            "9",
            "--dataset",
            "local.csv",
            "--island",
            "Dream",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.forest.n_trees, 30);
        assert_eq!(config.forest.seed, Some(9));
        assert_eq!(config.dataset.source, "local.csv");
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let cli = Cli::try_parse_from(["penguin", "data", "--trees", "0"]).unwrap();
        assert!(resolve_config(&cli).is_err());
    }

    #[test]
    fn query_flags_clamp_like_sliders() {
        let args = QueryArgs {
            island: Some("Biscoe".into()),
            body_mass_g: Some(100.0),
            ..QueryArgs::default()
        };
        let input = args
            .to_input(&PipelineTelemetry::disabled("penguin.cli"))
            .unwrap();
        assert!((input.body_mass_g - 2700.0).abs() < f64::EPSILON);

        let bad = QueryArgs {
            sex: Some("unknown".into()),
            ..QueryArgs::default()
        };
        assert!(bad
            .to_input(&PipelineTelemetry::disabled("penguin.cli"))
            .is_err());
    }

    #[test]
    fn data_view_prints_x_and_y() {
        let snapshot = DatasetSnapshot::load(&CsvFileSource::new(sample_path())).unwrap();
        let mut out = Vec::new();
        show_data(&snapshot, 3, true, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("species,island,bill_length_mm"));
        assert!(text.contains("\nX\nisland,bill_length_mm"));
        assert!(text.contains("Species summary"));
    }

    #[test]
    fn prepare_view_lists_encoded_columns() {
        let snapshot = DatasetSnapshot::load(&CsvFileSource::new(sample_path())).unwrap();
        let pipeline = SpeciesPipeline::new(
            ForestParams::new(Species::COUNT),
            penguin_species::config::EncodingSettings::default(),
            PipelineTelemetry::disabled("penguin.cli"),
        );
        let prepared = pipeline
            .prepare(&snapshot, &QueryInput::default().to_feature_record())
            .unwrap();
        let mut out = Vec::new();
        show_prepared(&prepared, 2, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("island_Torgersen = 1"));
        assert!(text.contains("sex_male = 1"));
        assert!(text.contains("species,class_index"));
    }
}
