use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};

/// Builder for pipeline telemetry handles.
pub struct PipelineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    sinks: Vec<Arc<dyn LogSink>>,
    min_level: LogLevel,
}

impl PipelineTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            sinks: Vec::new(),
            min_level: LogLevel::Info,
        }
    }

    /// Appends records to a JSON-lines file.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Adds an extra sink, such as an in-memory one.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Drops records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Builds the telemetry handle, opening the log file if one was set.
    pub fn build(self) -> Result<PipelineTelemetry> {
        let mut sinks = self.sinks;
        if let Some(path) = self.log_path {
            sinks.push(Arc::new(JsonLogger::new(path)?));
        }
        Ok(PipelineTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sinks,
                min_level: self.min_level,
            }),
        })
    }
}

/// Telemetry handle shared by the pipeline and its front ends.
#[derive(Clone)]
pub struct PipelineTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("module", &self.inner.module)
            .field("sinks", &self.inner.sinks.len())
            .field("min_level", &self.inner.min_level)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    sinks: Vec<Arc<dyn LogSink>>,
    min_level: LogLevel,
}

impl PipelineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(module)
    }

    /// Handle that only forwards to `tracing`.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                sinks: Vec::new(),
                min_level: LogLevel::Error,
            }),
        }
    }

    /// Module name stamped on every record.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Logs structured metadata to every sink and mirrors the message to
    /// `tracing`.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        let module = self.inner.module.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(module, %metadata, "{message}"),
            LogLevel::Info => tracing::info!(module, %metadata, "{message}"),
            LogLevel::Warn => tracing::warn!(module, %metadata, "{message}"),
            LogLevel::Error => tracing::error!(module, %metadata, "{message}"),
        }
        if !level.passes(self.inner.min_level) || self.inner.sinks.is_empty() {
            return Ok(());
        }
        let record = LogRecord::new(module, level, message).with_metadata(metadata);
        for sink in &self.inner.sinks {
            sink.write(&record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_logging::MemoryLogSink;
    use tempfile::tempdir;

    #[test]
    fn forwards_to_memory_sink_above_threshold() {
        let sink = Arc::new(MemoryLogSink::new());
        let telemetry = PipelineTelemetry::builder("species.pipeline")
            .sink(sink.clone())
            .min_level(LogLevel::Info)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Debug, "cycle.encoded", json!({"rows": 3}))
            .unwrap();
        telemetry
            .log(LogLevel::Info, "cycle.completed", json!({"predicted": "Adelie"}))
            .unwrap();
        let records = sink.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].module, "species.pipeline");
        assert_eq!(records[0].metadata["predicted"], "Adelie");
    }

    #[test]
    fn writes_json_lines_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/penguin.jsonl");
        let telemetry = PipelineTelemetry::builder("species.cli")
            .log_path(&path)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Warn, "dataset.reload", json!({"origin": "x.csv"}))
            .unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let line: Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["message"], "dataset.reload");
        assert_eq!(line["metadata"]["origin"], "x.csv");
    }

    #[test]
    fn disabled_handle_accepts_everything() {
        let telemetry = PipelineTelemetry::disabled("species");
        assert!(telemetry.log(LogLevel::Error, "boom", Value::Null).is_ok());
        assert_eq!(telemetry.module(), "species");
    }
}
