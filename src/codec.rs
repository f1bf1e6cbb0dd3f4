//! Persisted sample representation: a 9-byte tagged value and a bincode sample record.

use crate::error::TsError;
use crate::time::Timestamp;
use crate::types::{AttributeMap, MetricType, Resource, Sample, ValueType};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Encoded value length: one type-code byte followed by eight big-endian value bytes.
pub const VALUE_LEN: usize = 9;

/// Encodes a value as `[type code, 8 bytes big-endian]`.
///
/// Counter-family values store the unsigned integer, gauges store their IEEE-754 bits, so
/// both round-trip exactly.
pub fn encode_value(value: &ValueType) -> [u8; VALUE_LEN] {
    let mut out = [0u8; VALUE_LEN];
    out[0] = value.metric_type().code();
    out[1..].copy_from_slice(&value.to_bits().to_be_bytes());
    out
}

/// Inverse of [`encode_value`].
///
/// # Errors
/// [`TsError::Decode`] for a wrong length or an unknown type code.
pub fn decode_value(bytes: &[u8]) -> Result<ValueType, TsError> {
    if bytes.len() != VALUE_LEN {
        return Err(TsError::Decode(format!(
            "value must be {} bytes, got {}",
            VALUE_LEN,
            bytes.len()
        )));
    }
    let metric_type = MetricType::from_code(bytes[0])?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[1..]);
    Ok(ValueType::from_bits(metric_type, u64::from_be_bytes(raw)))
}

/// On-disk/in-store form of a sample. The resource is the storage partition key and is
/// not repeated per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub timestamp_ms: i64,
    pub name: String,
    pub value: [u8; VALUE_LEN],
    pub attributes: Option<BTreeMap<String, String>>,
}

impl SampleRecord {
    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            timestamp_ms: sample.timestamp.as_millis(),
            name: sample.name.clone(),
            value: encode_value(&sample.value),
            attributes: sample
                .attributes
                .as_ref()
                .map(|a| a.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        }
    }

    pub fn into_sample(self, resource: Resource) -> Result<Sample, TsError> {
        let value = decode_value(&self.value)?;
        Ok(Sample {
            timestamp: Timestamp::from_epoch_millis(self.timestamp_ms),
            resource,
            name: self.name,
            value,
            attributes: self
                .attributes
                .map(|a| a.into_iter().collect::<AttributeMap>()),
        })
    }
}

pub fn encode_sample(sample: &Sample) -> Result<Vec<u8>, TsError> {
    Ok(bincode::serialize(&SampleRecord::from_sample(sample))?)
}

pub fn decode_sample(bytes: &[u8], resource: Resource) -> Result<Sample, TsError> {
    let record: SampleRecord =
        bincode::deserialize(bytes).map_err(|e| TsError::Decode(e.to_string()))?;
    record.into_sample(resource)
}
