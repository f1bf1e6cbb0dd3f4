//! Layered configuration: pipeline settings from file + `TSROLLUP__*` environment, and
//! report definitions (datasources, calculations, exports) from TOML.

use crate::descriptor::{AggregationFunction, BinaryOp, Operand, ResultDescriptor, DEFAULT_STEP, DEFAULT_XFF};
use crate::error::TsError;
use crate::ingest::IngestConfig;
use crate::processor::QueryOptions;
use crate::query::QueryDefaults;
use crate::telemetry::PipelineEventListener;
use crate::time::Duration;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Environment prefix; nested keys use `__`, e.g. `TSROLLUP__NAN_ON_COUNTER_WRAP=true`.
pub const ENV_PREFIX: &str = "TSROLLUP";

/// Process-wide pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Report counter decreases as NaN instead of correcting them as wraparounds.
    pub nan_on_counter_wrap: bool,
    /// Span queried when a request has no start.
    pub default_span: Duration,
    /// Default resolution is the span divided by this, rounded to a step multiple.
    pub resolution_divisor: u64,
    pub ingest_threads: usize,
    pub ingest_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let ingest = IngestConfig::default();
        let query = QueryDefaults::default();
        Self {
            nan_on_counter_wrap: false,
            default_span: query.span,
            resolution_divisor: query.target_rows,
            ingest_threads: ingest.max_threads,
            ingest_queue_capacity: ingest.queue_capacity,
        }
    }
}

impl PipelineConfig {
    /// Loads defaults, then `path` (TOML, when given), then `TSROLLUP__*` variables.
    ///
    /// # Errors
    /// [`TsError::Config`] when the file is missing or any source fails to parse or validate.
    pub fn load(path: Option<&Path>) -> Result<Self, TsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(TsError::config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .ignore_empty(true),
        );

        let merged = builder.build().map_err(|e| TsError::config(e.to_string()))?;
        let config: PipelineConfig = merged
            .try_deserialize()
            .map_err(|e| TsError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TsError> {
        if self.default_span.is_zero() {
            return Err(TsError::config("default_span must be greater than zero"));
        }
        if self.resolution_divisor == 0 {
            return Err(TsError::config("resolution_divisor must be greater than zero"));
        }
        if self.ingest_threads == 0 || self.ingest_queue_capacity == 0 {
            return Err(TsError::config(
                "ingest_threads and ingest_queue_capacity must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn query_options(&self, listener: Arc<dyn PipelineEventListener>) -> QueryOptions {
        QueryOptions {
            nan_on_counter_wrap: self.nan_on_counter_wrap,
            listener,
        }
    }

    pub fn query_defaults(&self) -> QueryDefaults {
        QueryDefaults {
            span: self.default_span,
            target_rows: self.resolution_divisor,
        }
    }

    pub fn ingest_config(&self, listener: Arc<dyn PipelineEventListener>) -> IngestConfig {
        IngestConfig {
            max_threads: self.ingest_threads,
            queue_capacity: self.ingest_queue_capacity,
            event_listener: listener,
        }
    }
}

// --- Report definitions --- //

/// A datasource entry of a report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub label: String,
    pub source: String,
    /// Defaults to twice the report step.
    #[serde(default)]
    pub heartbeat: Option<Duration>,
    pub function: AggregationFunction,
    #[serde(default)]
    pub xff: Option<f64>,
}

/// A calculation operand as written in TOML: a label or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperandConfig {
    Constant(f64),
    Label(String),
}

impl From<OperandConfig> for Operand {
    fn from(o: OperandConfig) -> Self {
        match o {
            OperandConfig::Constant(v) => Operand::Constant(v),
            OperandConfig::Label(s) => Operand::from(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationConfig {
    pub label: String,
    pub op: BinaryOp,
    pub left: OperandConfig,
    pub right: OperandConfig,
}

/// Report definition file.
///
/// ```toml
/// step = "5m"
/// exports = ["bits-in"]
///
/// [[datasources]]
/// label = "octets-in"
/// source = "ifInOctets"
/// function = "average"
///
/// [[calculations]]
/// label = "bits-in"
/// op = "multiply"
/// left = "octets-in"
/// right = 8
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_step")]
    pub step: Duration,
    #[serde(default)]
    pub datasources: Vec<DatasourceConfig>,
    #[serde(default)]
    pub calculations: Vec<CalculationConfig>,
    #[serde(default)]
    pub exports: Vec<String>,
}

fn default_step() -> Duration {
    DEFAULT_STEP
}

impl ReportConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, TsError> {
        toml::from_str(s).map_err(|e| TsError::config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, TsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Builds and validates the descriptor.
    pub fn into_descriptor(self) -> Result<ResultDescriptor, TsError> {
        let step = self.step;
        let mut builder = ResultDescriptor::builder(step);
        for ds in self.datasources {
            builder = builder.datasource_with(
                ds.label,
                ds.source,
                ds.heartbeat.unwrap_or_else(|| step.times(2)),
                ds.xff.unwrap_or(DEFAULT_XFF),
                ds.function,
            );
        }
        for calc in self.calculations {
            builder = builder.calculate_op(calc.label, calc.op, calc.left, calc.right);
        }
        builder.export(self.exports).build()
    }
}
