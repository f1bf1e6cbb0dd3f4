//! Query pipeline wiring: Rate → PrimaryData → Aggregation → Compute → Export.

use crate::aggregation::Aggregation;
use crate::compute::Compute;
use crate::descriptor::ResultDescriptor;
use crate::error::TsError;
use crate::export::Export;
use crate::primary::PrimaryData;
use crate::rate::Rate;
use crate::telemetry::{noop_event_listener, pipeline_metrics, PipelineEvent, PipelineEventListener};
use crate::time::{Duration, Timestamp};
use crate::types::{Measurement, Resource, Results, Row, Sample};
use std::sync::Arc;
use std::time::Instant;

/// Per-query options threaded through the pipeline.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Report a counter decrease as NaN instead of correcting it as a wraparound.
    pub nan_on_counter_wrap: bool,
    pub listener: Arc<dyn PipelineEventListener>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            nan_on_counter_wrap: false,
            listener: noop_event_listener(),
        }
    }
}

/// The full stage chain over an input of sample rows.
pub type Pipeline<I> = Export<Compute<Aggregation<PrimaryData<Rate<I>>>>>;

/// Runs one measurement query for one resource over `[start, end]`.
#[derive(Debug, Clone)]
pub struct ResultProcessor {
    resource: Resource,
    start: Timestamp,
    end: Timestamp,
    descriptor: Arc<ResultDescriptor>,
    resolution: Duration,
    options: QueryOptions,
}

impl ResultProcessor {
    /// # Errors
    /// [`TsError::InvalidTimeRange`] when `start` is after `end`, [`TsError::Config`] when
    /// `resolution` is not a multiple of the descriptor step.
    pub fn new(
        resource: Resource,
        start: Timestamp,
        end: Timestamp,
        descriptor: impl Into<Arc<ResultDescriptor>>,
        resolution: Duration,
        options: QueryOptions,
    ) -> Result<Self, TsError> {
        if start > end {
            return Err(TsError::InvalidTimeRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        let descriptor = descriptor.into();
        if !resolution.is_multiple_of(descriptor.step()) {
            return Err(TsError::config(format!(
                "resolution {} must be a multiple of step {}",
                resolution,
                descriptor.step()
            )));
        }
        Ok(Self {
            resource,
            start,
            end,
            descriptor,
            resolution,
            options,
        })
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn descriptor(&self) -> &Arc<ResultDescriptor> {
        &self.descriptor
    }

    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// First instant whose samples can influence the result: the lower bound of the first
    /// aggregation window.
    pub fn history_start(&self) -> Timestamp {
        self.start
            .step_floor(self.resolution)
            .minus(self.resolution)
    }

    /// Earliest sample a reader should return: one heartbeat before the first window, so
    /// the first primary interval and the first rate both have a predecessor.
    pub fn sample_start(&self) -> Timestamp {
        self.history_start().minus(self.descriptor.max_heartbeat())
    }

    /// Latest sample a reader should return. Samples up to one heartbeat past the last
    /// window still shape its final primary interval.
    pub fn sample_end(&self) -> Timestamp {
        self.end
            .step_ceiling(self.resolution)
            .plus(self.descriptor.max_heartbeat())
    }

    /// Builds the lazy stage chain over `samples`.
    ///
    /// `samples` must hold every stored row in [`sample_start`](Self::sample_start)`..=`
    /// [`sample_end`](Self::sample_end); a metric without samples up to `sample_end` is
    /// treated as stale, not as ending.
    pub fn stream<I>(&self, samples: I) -> Result<ResultStream<I::IntoIter>, TsError>
    where
        I: IntoIterator<Item = Result<Row<Sample>, TsError>>,
    {
        let d = &*self.descriptor;
        let step = d.step();

        let rate = Rate::new(
            samples.into_iter(),
            d.source_names(),
            self.options.nan_on_counter_wrap,
            self.options.listener.clone(),
        );
        // Primary points start one step into the first aggregation window so that window
        // is fully populated.
        let primary = PrimaryData::new(
            self.resource.clone(),
            self.history_start().plus(step),
            self.end.step_ceiling(self.resolution),
            d,
            rate,
            self.options.listener.clone(),
        )?
        .covering(self.sample_end());
        let aggregation = Aggregation::new(
            self.resource.clone(),
            self.start,
            self.end,
            d,
            self.resolution,
            primary,
        )?;
        let compute = Compute::new(d, aggregation);
        let export = Export::new(d, compute);

        Ok(ResultStream {
            inner: export,
            resource: self.resource.clone(),
            listener: self.options.listener.clone(),
            started: Instant::now(),
            rows: 0,
            finished: false,
        })
    }

    /// Runs the query to completion. Any stage error fails the whole query.
    pub fn process<I>(&self, samples: I) -> Result<Results<Measurement>, TsError>
    where
        I: IntoIterator<Item = Result<Row<Sample>, TsError>>,
    {
        self.stream(samples)?.collect()
    }
}

/// Result rows of one query, produced on demand.
///
/// Reports completion or failure to the query's listener and to the metrics facade once.
#[derive(Debug)]
pub struct ResultStream<I> {
    inner: Pipeline<I>,
    resource: Resource,
    listener: Arc<dyn PipelineEventListener>,
    started: Instant,
    rows: u64,
    finished: bool,
}

impl<I> Iterator for ResultStream<I>
where
    I: Iterator<Item = Result<Row<Sample>, TsError>>,
{
    type Item = Result<Row<Measurement>, TsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.next() {
            Some(Ok(row)) => {
                self.rows += 1;
                Some(Ok(row))
            }
            Some(Err(e)) => {
                self.finished = true;
                pipeline_metrics::record_query_failure();
                self.listener.on_event(PipelineEvent::QueryFailed {
                    resource: self.resource.to_string(),
                    error: e.to_string(),
                });
                Some(Err(e))
            }
            None => {
                self.finished = true;
                let duration = self.started.elapsed();
                pipeline_metrics::record_query(duration);
                pipeline_metrics::record_rows_emitted(self.rows);
                self.listener.on_event(PipelineEvent::QueryCompleted {
                    resource: self.resource.to_string(),
                    rows: self.rows,
                    duration,
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::AggregationFunction;
    use crate::types::ValueType;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Capture(Mutex<Vec<PipelineEvent>>);

    impl PipelineEventListener for Capture {
        fn on_event(&self, event: PipelineEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn res() -> Resource {
        Resource::new("localhost")
    }

    fn alternating_samples() -> Vec<Result<Row<Sample>, TsError>> {
        (0..=24)
            .map(|i: i64| {
                let ts = Timestamp::from_epoch_seconds(900_000_000 + i * 300);
                // 1 for 900000000..=900001800, then blocks of six alternating 3 and 1.
                let v = if i == 0 || ((i - 1) / 6) % 2 == 0 { 1.0 } else { 3.0 };
                let mut row = Row::new(ts, res());
                row.add_element(Sample::new(ts, res(), "m0", ValueType::Gauge(v)));
                Ok(row)
            })
            .collect()
    }

    fn descriptor() -> ResultDescriptor {
        ResultDescriptor::builder(Duration::seconds(300))
            .datasource_with(
                "m0-avg",
                "m0",
                Duration::seconds(600),
                0.5,
                AggregationFunction::Average,
            )
            .export(["m0-avg"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_alternating_blocks_average_to_two() {
        let processor = ResultProcessor::new(
            res(),
            Timestamp::from_epoch_seconds(900_003_600),
            Timestamp::from_epoch_seconds(900_007_200),
            descriptor(),
            Duration::minutes(60),
            QueryOptions::default(),
        )
        .unwrap();
        let results = processor.process(alternating_samples()).unwrap();
        let rows: Vec<_> = results.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp(), Timestamp::from_epoch_seconds(900_003_600));
        assert_eq!(rows[1].timestamp(), Timestamp::from_epoch_seconds(900_007_200));
        for row in rows {
            assert_eq!(row.len(), 1);
            assert!((row.element("m0-avg").unwrap().value - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(matches!(
            ResultProcessor::new(
                res(),
                Timestamp::from_epoch_seconds(10),
                Timestamp::from_epoch_seconds(0),
                descriptor(),
                Duration::minutes(60),
                QueryOptions::default(),
            ),
            Err(TsError::InvalidTimeRange { .. })
        ));
        assert!(matches!(
            ResultProcessor::new(
                res(),
                Timestamp::from_epoch_seconds(0),
                Timestamp::from_epoch_seconds(10),
                descriptor(),
                Duration::seconds(400),
                QueryOptions::default(),
            ),
            Err(TsError::Config(_))
        ));
    }

    #[test]
    fn test_failure_yields_no_partial_results() {
        let mut samples = alternating_samples();
        samples.insert(10, Err(TsError::Storage("connection reset".into())));
        let capture = Arc::new(Capture::default());
        let processor = ResultProcessor::new(
            res(),
            Timestamp::from_epoch_seconds(900_003_600),
            Timestamp::from_epoch_seconds(900_007_200),
            descriptor(),
            Duration::minutes(60),
            QueryOptions {
                nan_on_counter_wrap: false,
                listener: capture.clone(),
            },
        )
        .unwrap();
        assert!(matches!(
            processor.process(samples),
            Err(TsError::Storage(_))
        ));
        let events = capture.0.lock().unwrap();
        assert!(matches!(events.last(), Some(PipelineEvent::QueryFailed { .. })));
    }

    #[test]
    fn test_completion_event_reports_row_count() {
        let capture = Arc::new(Capture::default());
        let processor = ResultProcessor::new(
            res(),
            Timestamp::from_epoch_seconds(900_003_600),
            Timestamp::from_epoch_seconds(900_007_200),
            descriptor(),
            Duration::minutes(60),
            QueryOptions {
                nan_on_counter_wrap: false,
                listener: capture.clone(),
            },
        )
        .unwrap();
        let stream = processor.stream(alternating_samples()).unwrap();
        assert_eq!(stream.count(), 2);
        let events = capture.0.lock().unwrap();
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::QueryCompleted { rows: 2, .. })
        ));
    }
}
