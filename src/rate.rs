use crate::error::TsError;
use crate::telemetry::{pipeline_metrics, PipelineEvent, PipelineEventListener};
use crate::types::{Row, Sample, ValueType};
use std::collections::HashMap;
use std::sync::Arc;

const WRAP_32: u128 = 1 << 32;

/// Converts counter-family samples into per-second rates.
///
/// For each requested metric present in a row, COUNTER, ABSOLUTE and DERIVE samples are
/// replaced by a GAUGE sample holding the rate since that metric's previous sample. GAUGE
/// samples pass through unchanged. The first occurrence of a metric has no predecessor and
/// yields NaN. Metrics absent from a row produce no element.
#[derive(Debug)]
pub struct Rate<I> {
    input: I,
    metrics: Vec<String>,
    previous: HashMap<String, Sample>,
    nan_on_counter_wrap: bool,
    listener: Arc<dyn PipelineEventListener>,
    done: bool,
}

impl<I> Rate<I>
where
    I: Iterator<Item = Result<Row<Sample>, TsError>>,
{
    pub fn new<S: Into<String>>(
        input: I,
        metrics: impl IntoIterator<Item = S>,
        nan_on_counter_wrap: bool,
        listener: Arc<dyn PipelineEventListener>,
    ) -> Self {
        Self {
            input,
            metrics: metrics.into_iter().map(Into::into).collect(),
            previous: HashMap::new(),
            nan_on_counter_wrap,
            listener,
            done: false,
        }
    }

    fn rate_row(&mut self, row: Row<Sample>) -> Row<Sample> {
        let mut out = Row::with_capacity(row.timestamp(), row.resource().clone(), self.metrics.len());
        for i in 0..self.metrics.len() {
            if let Some(sample) = row.element(&self.metrics[i]) {
                let rated = self.rate_sample(sample);
                out.add_element(rated);
            }
        }
        out
    }

    fn rate_sample(&mut self, sample: &Sample) -> Sample {
        if !sample.metric_type().is_counter_family() {
            return sample.clone();
        }

        let rate = match self.previous.insert(sample.name.clone(), sample.clone()) {
            None => f64::NAN,
            Some(prev) => {
                let elapsed = sample.timestamp.seconds_since(&prev.timestamp);
                match self.delta(&prev, sample) {
                    Some(delta) if elapsed > 0.0 => delta / elapsed,
                    _ => f64::NAN,
                }
            }
        };

        Sample {
            timestamp: sample.timestamp,
            resource: sample.resource.clone(),
            name: sample.name.clone(),
            value: ValueType::Gauge(rate),
            attributes: sample.attributes.clone(),
        }
    }

    // `None` means the delta is unknown.
    fn delta(&self, prev: &Sample, cur: &Sample) -> Option<f64> {
        let (p, c) = (prev.value.to_bits(), cur.value.to_bits());
        match cur.value {
            ValueType::Derive(_) => Some((c as i128 - p as i128) as f64),
            ValueType::Counter(_) | ValueType::Absolute(_) => {
                if c >= p {
                    return Some((c - p) as f64);
                }
                self.listener.on_event(PipelineEvent::CounterWrapped {
                    resource: cur.resource.to_string(),
                    metric: cur.name.clone(),
                    timestamp: cur.timestamp,
                    previous: p,
                    current: c,
                });
                pipeline_metrics::record_counter_wrap();
                if self.nan_on_counter_wrap {
                    None
                } else {
                    Some(counter_wrap_delta(p, c))
                }
            }
            ValueType::Gauge(_) => None,
        }
    }
}

/// Distance from `prev` to `cur` across a single wraparound.
///
/// A 32-bit wrap is assumed when `prev` lies within 2^32 of `cur`, otherwise a 64-bit wrap.
pub fn counter_wrap_delta(prev: u64, cur: u64) -> f64 {
    let widened = cur as u128 + WRAP_32;
    if prev as u128 > widened {
        cur.wrapping_sub(prev) as f64
    } else {
        (widened - prev as u128) as f64
    }
}

impl<I> Iterator for Rate<I>
where
    I: Iterator<Item = Result<Row<Sample>, TsError>>,
{
    type Item = Result<Row<Sample>, TsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.input.next() {
            None => {
                self.done = true;
                None
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            Some(Ok(row)) => Some(Ok(self.rate_row(row))),
        }
    }
}
