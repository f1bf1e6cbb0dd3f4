use crate::error::TsError;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Attribute map attached to samples and measurements.
pub type AttributeMap = HashMap<String, String>;

/// Kind of a metric. The discriminant is the persisted type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum MetricType {
    Counter = 1,
    Absolute = 2,
    Derive = 3,
    Gauge = 4,
}

impl MetricType {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self, TsError> {
        match code {
            1 => Ok(MetricType::Counter),
            2 => Ok(MetricType::Absolute),
            3 => Ok(MetricType::Derive),
            4 => Ok(MetricType::Gauge),
            other => Err(TsError::Decode(format!("unknown metric type code {}", other))),
        }
    }

    /// COUNTER, ABSOLUTE and DERIVE are turned into rates before resampling.
    #[inline]
    pub fn is_counter_family(self) -> bool {
        !matches!(self, MetricType::Gauge)
    }
}

/// A raw sample value tagged with its metric type.
///
/// JSON form: `{"type": "counter", "value": 12}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ValueType {
    Counter(u64),
    Absolute(u64),
    Derive(u64),
    Gauge(f64),
}

impl ValueType {
    pub fn metric_type(&self) -> MetricType {
        match self {
            ValueType::Counter(_) => MetricType::Counter,
            ValueType::Absolute(_) => MetricType::Absolute,
            ValueType::Derive(_) => MetricType::Derive,
            ValueType::Gauge(_) => MetricType::Gauge,
        }
    }

    /// Numeric value as a double. Counters above 2^53 lose precision.
    pub fn as_f64(&self) -> f64 {
        match *self {
            ValueType::Counter(v) | ValueType::Absolute(v) | ValueType::Derive(v) => v as f64,
            ValueType::Gauge(v) => v,
        }
    }

    /// The 64 bits that are persisted: the integer for counters, IEEE-754 bits for gauges.
    pub fn to_bits(&self) -> u64 {
        match *self {
            ValueType::Counter(v) | ValueType::Absolute(v) | ValueType::Derive(v) => v,
            ValueType::Gauge(v) => v.to_bits(),
        }
    }

    pub fn from_bits(metric_type: MetricType, bits: u64) -> Self {
        match metric_type {
            MetricType::Counter => ValueType::Counter(bits),
            MetricType::Absolute => ValueType::Absolute(bits),
            MetricType::Derive => ValueType::Derive(bits),
            MetricType::Gauge => ValueType::Gauge(f64::from_bits(bits)),
        }
    }
}

/// Identifier of the entity a series belongs to. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Resource(Arc<str>);

impl Resource {
    pub fn new(id: impl AsRef<str>) -> Self {
        Resource(Arc::from(id.as_ref()))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Resource {
    fn from(s: &str) -> Self {
        Resource::new(s)
    }
}

impl From<String> for Resource {
    fn from(s: String) -> Self {
        Resource(Arc::from(s))
    }
}

impl From<Resource> for String {
    fn from(r: Resource) -> Self {
        r.0.to_string()
    }
}

/// Common accessors of the items carried by a [`Row`].
pub trait Element {
    fn name(&self) -> &str;
    fn timestamp(&self) -> Timestamp;
    fn resource(&self) -> &Resource;
    fn attributes(&self) -> Option<&AttributeMap>;
}

/// A raw observation of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub resource: Resource,
    pub name: String,
    #[serde(flatten)]
    pub value: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<AttributeMap>,
}

impl Sample {
    pub fn new(
        timestamp: Timestamp,
        resource: Resource,
        name: impl Into<String>,
        value: ValueType,
    ) -> Self {
        Self {
            timestamp,
            resource,
            name: name.into(),
            value,
            attributes: None,
        }
    }

    pub fn with_attributes(mut self, attributes: AttributeMap) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn metric_type(&self) -> MetricType {
        self.value.metric_type()
    }
}

impl Element for Sample {
    fn name(&self) -> &str {
        &self.name
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
    fn resource(&self) -> &Resource {
        &self.resource
    }
    fn attributes(&self) -> Option<&AttributeMap> {
        self.attributes.as_ref()
    }
}

/// A derived, regularly spaced value. `NaN` means unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: Timestamp,
    pub resource: Resource,
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<AttributeMap>,
}

impl Measurement {
    pub fn new(timestamp: Timestamp, resource: Resource, name: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp,
            resource,
            name: name.into(),
            value,
            attributes: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Option<AttributeMap>) -> Self {
        self.attributes = attributes;
        self
    }
}

impl Element for Measurement {
    fn name(&self) -> &str {
        &self.name
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
    fn resource(&self) -> &Resource {
        &self.resource
    }
    fn attributes(&self) -> Option<&AttributeMap> {
        self.attributes.as_ref()
    }
}

// --- Row --- //

/// All elements of one resource at one timestamp, keyed by unique name.
///
/// Elements keep their insertion order; adding an element whose name is already present
/// replaces it in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row<T> {
    timestamp: Timestamp,
    resource: Resource,
    elements: Vec<T>,
}

impl<T: Element> Row<T> {
    pub fn new(timestamp: Timestamp, resource: Resource) -> Self {
        Self {
            timestamp,
            resource,
            elements: Vec::new(),
        }
    }

    pub fn with_capacity(timestamp: Timestamp, resource: Resource, capacity: usize) -> Self {
        Self {
            timestamp,
            resource,
            elements: Vec::with_capacity(capacity),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn add_element(&mut self, element: T) {
        match self.elements.iter_mut().find(|e| e.name() == element.name()) {
            Some(slot) => *slot = element,
            None => self.elements.push(element),
        }
    }

    pub fn element(&self, name: &str) -> Option<&T> {
        self.elements.iter().find(|e| e.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.element(name).is_some()
    }

    pub fn elements(&self) -> &[T] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<T> {
        self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

// --- Results --- //

/// Rows ordered by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Results<T> {
    rows: BTreeMap<Timestamp, Row<T>>,
}

impl<T> Default for Results<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<T: Element> Results<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row, replacing any row already held for the same timestamp.
    pub fn add_row(&mut self, row: Row<T>) {
        self.rows.insert(row.timestamp(), row);
    }

    /// Adds an element to the row at its timestamp, creating the row if needed.
    pub fn add_element(&mut self, element: T) {
        let ts = element.timestamp();
        self.rows
            .entry(ts)
            .or_insert_with(|| Row::new(ts, element.resource().clone()))
            .add_element(element);
    }

    pub fn row(&self, timestamp: Timestamp) -> Option<&Row<T>> {
        self.rows.get(&timestamp)
    }

    pub fn rows(&self) -> btree_map::Values<'_, Timestamp, Row<T>> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Row<T>> {
        self.rows.into_values().collect()
    }
}

impl<T: Element> FromIterator<Row<T>> for Results<T> {
    fn from_iter<I: IntoIterator<Item = Row<T>>>(iter: I) -> Self {
        let mut results = Results::new();
        for row in iter {
            results.add_row(row);
        }
        results
    }
}
