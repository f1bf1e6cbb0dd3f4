use crate::error::TsError;
use crate::time::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Default fraction of unknown primary points an AVERAGE window may contain.
pub const DEFAULT_XFF: f64 = 0.5;

/// Default step: five minutes.
pub const DEFAULT_STEP: Duration = Duration::seconds(300);

/// Consolidation applied when rolling primary points up to the query resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationFunction {
    #[serde(alias = "AVERAGE")]
    Average,
    #[serde(alias = "MIN")]
    Min,
    #[serde(alias = "MAX")]
    Max,
}

/// Pointwise function of two values used by calculations.
pub type BinaryFunction = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Named binary functions, for configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Min,
    Max,
}

impl BinaryOp {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            // f64::min/max would hide a NaN operand; an unknown input keeps the result unknown.
            BinaryOp::Min if a.is_nan() || b.is_nan() => f64::NAN,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max if a.is_nan() || b.is_nan() => f64::NAN,
            BinaryOp::Max => a.max(b),
        }
    }

    pub fn into_function(self) -> BinaryFunction {
        Arc::new(move |a, b| self.apply(a, b))
    }
}

/// A calculation input: another label in the same row, or a constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Label(String),
    Constant(f64),
}

impl From<&str> for Operand {
    /// Plain decimal literals (`8`, `-2.5`, `.5`) become constants, anything else a label
    /// reference. Spellings such as `inf`, `nan` or `1e3` stay labels.
    fn from(s: &str) -> Self {
        match decimal_literal(s.trim()) {
            Some(v) => Operand::Constant(v),
            None => Operand::Label(s.to_string()),
        }
    }
}

fn decimal_literal(s: &str) -> Option<f64> {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (int, frac) = digits.split_once('.').unwrap_or((digits, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if int.len() + frac.len() == 0 || !all_digits(int) || !all_digits(frac) {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

impl From<String> for Operand {
    fn from(s: String) -> Self {
        Operand::from(s.as_str())
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Constant(v)
    }
}

/// A source metric as it enters the pipeline, and how it is consolidated.
#[derive(Debug, Clone, PartialEq)]
pub struct Datasource {
    pub label: String,
    pub source: String,
    pub heartbeat: Duration,
    pub xff: f64,
    pub function: AggregationFunction,
}

/// A derived series: `label = function(left, right)`.
#[derive(Clone)]
pub struct Calculation {
    pub label: String,
    pub function: BinaryFunction,
    pub left: Operand,
    pub right: Operand,
}

impl fmt::Debug for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calculation")
            .field("label", &self.label)
            .field("left", &self.left)
            .field("right", &self.right)
            .finish_non_exhaustive()
    }
}

/// Immutable configuration of a measurement query.
///
/// Built and validated by [`ResultDescriptorBuilder`]; share it as `Arc<ResultDescriptor>`.
#[derive(Debug, Clone)]
pub struct ResultDescriptor {
    step: Duration,
    datasources: Vec<Datasource>,
    calculations: Vec<Calculation>,
    exports: Vec<String>,
}

impl ResultDescriptor {
    pub fn builder(step: Duration) -> ResultDescriptorBuilder {
        ResultDescriptorBuilder::new(step)
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Datasources in insertion order.
    pub fn datasources(&self) -> &[Datasource] {
        &self.datasources
    }

    pub fn datasource(&self, label: &str) -> Option<&Datasource> {
        self.datasources.iter().find(|d| d.label == label)
    }

    /// Calculations in insertion order.
    pub fn calculations(&self) -> &[Calculation] {
        &self.calculations
    }

    /// Export labels in output order.
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    /// Distinct source metric names, in first-use order.
    pub fn source_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.datasources
            .iter()
            .map(|d| d.source.as_str())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    /// Heartbeat of the first datasource reading `source`.
    pub fn heartbeat_for(&self, source: &str) -> Option<Duration> {
        self.datasources
            .iter()
            .find(|d| d.source == source)
            .map(|d| d.heartbeat)
    }

    /// Largest heartbeat of any datasource; the step when there are none.
    pub fn max_heartbeat(&self) -> Duration {
        self.datasources
            .iter()
            .map(|d| d.heartbeat)
            .max()
            .unwrap_or(self.step)
    }

    /// Every datasource and calculation label.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.datasources
            .iter()
            .map(|d| d.label.as_str())
            .chain(self.calculations.iter().map(|c| c.label.as_str()))
    }
}

/// Accumulates descriptor settings; all checks happen in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ResultDescriptorBuilder {
    step: Duration,
    datasources: Vec<Datasource>,
    calculations: Vec<Calculation>,
    exports: Vec<String>,
}

impl Default for ResultDescriptorBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_STEP)
    }
}

impl ResultDescriptorBuilder {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            datasources: Vec::new(),
            calculations: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Adds a datasource with heartbeat `2 × step` and the default xff.
    pub fn datasource(
        self,
        label: impl Into<String>,
        source: impl Into<String>,
        function: AggregationFunction,
    ) -> Self {
        let heartbeat = self.step.times(2);
        self.datasource_with(label, source, heartbeat, DEFAULT_XFF, function)
    }

    pub fn datasource_with(
        mut self,
        label: impl Into<String>,
        source: impl Into<String>,
        heartbeat: Duration,
        xff: f64,
        function: AggregationFunction,
    ) -> Self {
        self.datasources.push(Datasource {
            label: label.into(),
            source: source.into(),
            heartbeat,
            xff,
            function,
        });
        self
    }

    /// Adds `label = function(left, right)`. Operands may name earlier calculations.
    pub fn calculate<F>(
        mut self,
        label: impl Into<String>,
        function: F,
        left: impl Into<Operand>,
        right: impl Into<Operand>,
    ) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.calculations.push(Calculation {
            label: label.into(),
            function: Arc::new(function),
            left: left.into(),
            right: right.into(),
        });
        self
    }

    pub fn calculate_op(
        self,
        label: impl Into<String>,
        op: BinaryOp,
        left: impl Into<Operand>,
        right: impl Into<Operand>,
    ) -> Self {
        self.calculate(label, move |a, b| op.apply(a, b), left, right)
    }

    pub fn export<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exports.extend(labels.into_iter().map(Into::into));
        self
    }

    /// Validates and freezes the configuration.
    ///
    /// # Errors
    /// [`TsError::Config`] when the step is zero, a label is empty or repeated, a heartbeat
    /// is shorter than the step, an xff lies outside `[0, 1]`, two datasources read the same
    /// source with different heartbeats, a calculation operand names an unknown or later
    /// label, or an export names an unknown label.
    pub fn build(self) -> Result<ResultDescriptor, TsError> {
        if self.step.is_zero() {
            return Err(TsError::config("step must be greater than zero"));
        }

        let mut labels: HashSet<&str> = HashSet::new();
        for ds in &self.datasources {
            if ds.label.is_empty() || ds.source.is_empty() {
                return Err(TsError::config("datasource label and source must be non-empty"));
            }
            if !labels.insert(ds.label.as_str()) {
                return Err(TsError::config(format!("duplicate label: {}", ds.label)));
            }
            if ds.heartbeat < self.step {
                return Err(TsError::config(format!(
                    "heartbeat {} of {} is shorter than step {}",
                    ds.heartbeat, ds.label, self.step
                )));
            }
            if !(0.0..=1.0).contains(&ds.xff) {
                return Err(TsError::config(format!(
                    "xff {} of {} must be within [0, 1]",
                    ds.xff, ds.label
                )));
            }
            if let Some(other) = self
                .datasources
                .iter()
                .find(|o| o.source == ds.source && o.heartbeat != ds.heartbeat)
            {
                return Err(TsError::config(format!(
                    "datasources {} and {} read {} with different heartbeats",
                    ds.label, other.label, ds.source
                )));
            }
        }

        for calc in &self.calculations {
            if calc.label.is_empty() {
                return Err(TsError::config("calculation label must be non-empty"));
            }
            for operand in [&calc.left, &calc.right] {
                if let Operand::Label(name) = operand {
                    if !labels.contains(name.as_str()) {
                        return Err(TsError::config(format!(
                            "calculation {} references unknown label {}",
                            calc.label, name
                        )));
                    }
                }
            }
            if !labels.insert(calc.label.as_str()) {
                return Err(TsError::config(format!("duplicate label: {}", calc.label)));
            }
        }

        let mut exported = HashSet::new();
        for export in &self.exports {
            if !labels.contains(export.as_str()) {
                return Err(TsError::config(format!("export of unknown label {}", export)));
            }
            if !exported.insert(export.as_str()) {
                return Err(TsError::config(format!("label {} exported twice", export)));
            }
        }

        Ok(ResultDescriptor {
            step: self.step,
            datasources: self.datasources,
            calculations: self.calculations,
            exports: self.exports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let d = ResultDescriptor::builder(Duration::seconds(300))
            .datasource("in", "ifInOctets", AggregationFunction::Average)
            .export(["in"])
            .build()
            .unwrap();
        let ds = d.datasource("in").unwrap();
        assert_eq!(ds.heartbeat, Duration::seconds(600));
        assert_eq!(ds.xff, DEFAULT_XFF);
        assert_eq!(d.source_names(), vec!["ifInOctets"]);
        assert_eq!(ResultDescriptorBuilder::default().build().unwrap().step(), DEFAULT_STEP);
    }

    #[test]
    fn test_calculation_may_reference_earlier_calculation() {
        let d = ResultDescriptor::builder(Duration::seconds(300))
            .datasource("a", "m", AggregationFunction::Average)
            .calculate_op("double", BinaryOp::Add, "a", "a")
            .calculate_op("tenfold", BinaryOp::Multiply, "double", "10")
            .export(["tenfold"])
            .build()
            .unwrap();
        assert_eq!(d.calculations().len(), 2);
        assert_eq!(d.calculations()[1].right, Operand::Constant(10.0));
        let labels: Vec<_> = d.labels().collect();
        assert_eq!(labels, vec!["a", "double", "tenfold"]);
    }

    #[test]
    fn test_only_finite_decimal_literals_are_constants() {
        assert_eq!(Operand::from("8"), Operand::Constant(8.0));
        assert_eq!(Operand::from(" -2.5 "), Operand::Constant(-2.5));
        assert_eq!(Operand::from(".5"), Operand::Constant(0.5));
        for label in ["inf", "nan", "infinity", "-Infinity", "1e3", ".", "-", "", "9".repeat(400).as_str()] {
            assert_eq!(Operand::from(label), Operand::Label(label.to_string()), "{:?}", label);
        }

        let d = ResultDescriptor::builder(Duration::seconds(300))
            .datasource("inf", "m", AggregationFunction::Average)
            .datasource("1e3", "n", AggregationFunction::Average)
            .calculate_op("sum", BinaryOp::Add, "inf", "1e3")
            .export(["sum"])
            .build()
            .unwrap();
        assert_eq!(d.calculations()[0].left, Operand::Label("inf".into()));
        assert_eq!(d.calculations()[0].right, Operand::Label("1e3".into()));
    }

    #[test]
    fn test_forward_reference_rejected() {
        let err = ResultDescriptor::builder(Duration::seconds(300))
            .datasource("a", "m", AggregationFunction::Average)
            .calculate_op("x", BinaryOp::Add, "a", "y")
            .calculate_op("y", BinaryOp::Add, "a", "a")
            .build()
            .unwrap_err();
        assert!(matches!(err, TsError::Config(_)));
    }

    #[test]
    fn test_invalid_configurations() {
        let step = Duration::seconds(300);
        let cases = vec![
            ResultDescriptor::builder(Duration::seconds(0)),
            ResultDescriptor::builder(step)
                .datasource("a", "m", AggregationFunction::Average)
                .datasource("a", "n", AggregationFunction::Max),
            ResultDescriptor::builder(step).datasource_with(
                "a",
                "m",
                Duration::seconds(299),
                0.5,
                AggregationFunction::Average,
            ),
            ResultDescriptor::builder(step).datasource_with(
                "a",
                "m",
                step,
                1.5,
                AggregationFunction::Average,
            ),
            ResultDescriptor::builder(step)
                .datasource("a", "m", AggregationFunction::Average)
                .datasource_with("b", "m", step, 0.5, AggregationFunction::Max),
            ResultDescriptor::builder(step)
                .datasource("a", "m", AggregationFunction::Average)
                .export(["b"]),
            ResultDescriptor::builder(step)
                .datasource("a", "m", AggregationFunction::Average)
                .export(["a", "a"]),
            ResultDescriptor::builder(step)
                .datasource("a", "m", AggregationFunction::Average)
                .calculate_op("a", BinaryOp::Add, "a", "1"),
        ];
        for (i, builder) in cases.into_iter().enumerate() {
            assert!(builder.build().is_err(), "case {} should be rejected", i);
        }
    }

    #[test]
    fn test_shared_source_with_same_heartbeat_is_allowed() {
        let d = ResultDescriptor::builder(Duration::seconds(300))
            .datasource("avg", "m", AggregationFunction::Average)
            .datasource("max", "m", AggregationFunction::Max)
            .build()
            .unwrap();
        assert_eq!(d.source_names(), vec!["m"]);
        assert_eq!(d.max_heartbeat(), Duration::seconds(600));
    }

    #[test]
    fn test_binary_ops() {
        assert_eq!(BinaryOp::Subtract.apply(5.0, 2.0), 3.0);
        assert!(BinaryOp::Divide.apply(1.0, 0.0).is_infinite());
        assert!(BinaryOp::Max.apply(f64::NAN, 1.0).is_nan());
        assert_eq!(BinaryOp::Min.into_function()(2.0, 1.0), 1.0);
    }

    #[test]
    fn test_aggregation_function_serde_names() {
        let f: AggregationFunction = serde_json::from_str("\"AVERAGE\"").unwrap();
        assert_eq!(f, AggregationFunction::Average);
        let f: AggregationFunction = serde_json::from_str("\"max\"").unwrap();
        assert_eq!(f, AggregationFunction::Max);
    }
}
