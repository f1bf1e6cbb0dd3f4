use crate::descriptor::{AggregationFunction, Datasource, ResultDescriptor};
use crate::error::TsError;
use crate::interval::IntervalGenerator;
use crate::time::{Duration, Timestamp};
use crate::types::{AttributeMap, Measurement, Resource, Row};

// Running per-datasource state for the current window.
#[derive(Debug, Clone)]
struct Accumulator {
    count: u64,
    valid: u64,
    sum: f64,
    min: f64,
    max: f64,
    attributes: Option<AttributeMap>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            count: 0,
            valid: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            attributes: None,
        }
    }

    fn add(&mut self, m: Option<&Measurement>) {
        self.count += 1;
        let Some(m) = m else {
            return;
        };
        if !m.value.is_nan() {
            self.valid += 1;
            self.sum += m.value;
            self.min = self.min.min(m.value);
            self.max = self.max.max(m.value);
        }
        if let Some(attrs) = &m.attributes {
            self.attributes
                .get_or_insert_with(AttributeMap::new)
                .extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    fn value(&self, ds: &Datasource, intervals_per: u64) -> f64 {
        if self.valid == 0 {
            return f64::NAN;
        }
        match ds.function {
            AggregationFunction::Average => {
                let expected = self.count.max(intervals_per);
                let unknown = expected - self.valid;
                if unknown > 0 && unknown as f64 / expected as f64 >= ds.xff {
                    f64::NAN
                } else {
                    self.sum / self.valid as f64
                }
            }
            AggregationFunction::Min => self.min,
            AggregationFunction::Max => self.max,
        }
    }
}

/// Rolls a fixed-step measurement stream up to a coarser resolution.
///
/// Output rows are stamped with the upper bound of their window `(upper - resolution, upper]`.
/// For every datasource the value is read from the element named after its source metric
/// and written under the datasource label.
#[derive(Debug)]
pub struct Aggregation<I> {
    input: I,
    resource: Resource,
    resolution: Duration,
    intervals_per: u64,
    boundaries: IntervalGenerator,
    datasources: Vec<Datasource>,
    pending: Option<Row<Measurement>>,
    input_done: bool,
    done: bool,
}

impl<I> Aggregation<I>
where
    I: Iterator<Item = Result<Row<Measurement>, TsError>>,
{
    /// # Errors
    /// [`TsError::Config`] when `resolution` is not a multiple of the descriptor step.
    pub fn new(
        resource: Resource,
        start: Timestamp,
        end: Timestamp,
        descriptor: &ResultDescriptor,
        resolution: Duration,
        input: I,
    ) -> Result<Self, TsError> {
        let step = descriptor.step();
        if !resolution.is_multiple_of(step) {
            return Err(TsError::config(format!(
                "resolution {} must be a multiple of step {}",
                resolution, step
            )));
        }
        Ok(Self {
            input,
            resource,
            resolution,
            intervals_per: resolution.divide_by(step),
            boundaries: IntervalGenerator::forward(start, end, resolution)?,
            datasources: descriptor.datasources().to_vec(),
            pending: None,
            input_done: false,
            done: false,
        })
    }
}

impl<I> Iterator for Aggregation<I>
where
    I: Iterator<Item = Result<Row<Measurement>, TsError>>,
{
    type Item = Result<Row<Measurement>, TsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(upper) = self.boundaries.next() else {
            self.done = true;
            return None;
        };
        let lower = upper.minus(self.resolution);

        let mut accumulators = vec![Accumulator::new(); self.datasources.len()];
        loop {
            if self.pending.is_none() && !self.input_done {
                match self.input.next() {
                    None => self.input_done = true,
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(row)) => self.pending = Some(row),
                }
            }
            let Some(row) = self.pending.take() else {
                break;
            };
            let ts = row.timestamp();
            if ts <= lower {
                // Leading rows that precede the first window.
                continue;
            }
            if ts > upper {
                self.pending = Some(row);
                break;
            }
            for (ds, acc) in self.datasources.iter().zip(accumulators.iter_mut()) {
                acc.add(row.element(&ds.source));
            }
        }

        let mut out = Row::with_capacity(upper, self.resource.clone(), self.datasources.len());
        for (ds, acc) in self.datasources.iter().zip(accumulators) {
            out.add_element(
                Measurement::new(
                    upper,
                    self.resource.clone(),
                    ds.label.clone(),
                    acc.value(ds, self.intervals_per),
                )
                .with_attributes(acc.attributes),
            );
        }
        Some(Ok(out))
    }
}
