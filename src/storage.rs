use crate::codec::{decode_sample, encode_sample};
use crate::error::TsError;
use crate::ingest::SampleProcessorService;
use crate::time::Timestamp;
use crate::types::{Resource, Row, Sample};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Read side of a sample store: ordered rows of one resource's samples.
pub trait SampleReader: Send + Sync {
    type Rows: Iterator<Item = Result<Row<Sample>, TsError>>;

    /// Returns rows with `start <= timestamp <= end`, strictly increasing by timestamp.
    fn read(&self, resource: &Resource, start: Timestamp, end: Timestamp)
        -> Result<Self::Rows, TsError>;
}

// Encoded samples of one timestamp, one entry per metric name.
type EncodedRow = Vec<(String, Vec<u8>)>;

/// In-memory sample store holding codec-encoded samples per resource.
///
/// Uses RwLock for concurrent reads during queries and exclusive access during inserts.
/// Accepted batches are handed to the attached [`SampleProcessorService`], if any.
#[derive(Debug, Default)]
pub struct InMemorySampleStore {
    series: RwLock<HashMap<Resource, BTreeMap<i64, EncodedRow>>>,
    processors: Option<Arc<SampleProcessorService>>,
}

impl InMemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processors(service: Arc<SampleProcessorService>) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            processors: Some(service),
        }
    }

    /// Stores a batch of samples. A sample with the same resource, timestamp and name as a
    /// stored one replaces it.
    ///
    /// # Errors
    /// Encoding failures, a poisoned lock, or a stopped processor service.
    pub fn insert(&self, samples: Vec<Sample>) -> Result<(), TsError> {
        if samples.is_empty() {
            return Ok(());
        }
        {
            let mut series = self.series.write()?;
            for sample in &samples {
                let encoded = encode_sample(sample)?;
                let row = series
                    .entry(sample.resource.clone())
                    .or_default()
                    .entry(sample.timestamp.as_millis())
                    .or_default();
                match row.iter_mut().find(|(name, _)| *name == sample.name) {
                    Some(slot) => slot.1 = encoded,
                    None => row.push((sample.name.clone(), encoded)),
                }
            }
        }
        if let Some(service) = &self.processors {
            service.submit(samples)?;
        }
        Ok(())
    }

    /// Number of stored samples across all resources.
    pub fn sample_count(&self) -> Result<usize, TsError> {
        let series = self.series.read()?;
        Ok(series
            .values()
            .flat_map(|rows| rows.values())
            .map(Vec::len)
            .sum())
    }
}

impl SampleReader for InMemorySampleStore {
    type Rows = StoredRows;

    fn read(
        &self,
        resource: &Resource,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<StoredRows, TsError> {
        if start > end {
            return Err(TsError::InvalidTimeRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        let series = self.series.read()?;
        let rows = match series.get(resource) {
            Some(rows) => rows
                .range(start.as_millis()..=end.as_millis())
                .map(|(ts, row)| (*ts, row.clone()))
                .collect(),
            None => Vec::new(),
        };
        Ok(StoredRows {
            resource: resource.clone(),
            rows: rows.into_iter(),
        })
    }
}

/// Snapshot of stored rows, decoded as they are pulled.
#[derive(Debug)]
pub struct StoredRows {
    resource: Resource,
    rows: std::vec::IntoIter<(i64, EncodedRow)>,
}

impl Iterator for StoredRows {
    type Item = Result<Row<Sample>, TsError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (ts, encoded) = self.rows.next()?;
        let mut row = Row::with_capacity(
            Timestamp::from_epoch_millis(ts),
            self.resource.clone(),
            encoded.len(),
        );
        for (_, bytes) in encoded {
            match decode_sample(&bytes, self.resource.clone()) {
                Ok(sample) => row.add_element(sample),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}
