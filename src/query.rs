use crate::descriptor::ResultDescriptor;
use crate::error::TsError;
use crate::processor::{QueryOptions, ResultProcessor};
use crate::storage::SampleReader;
use crate::time::{Duration, Timestamp};
use crate::types::{Measurement, Resource, Results};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Defaults applied when a query leaves its range or resolution open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    /// Span queried back from `end` when no start is given.
    pub span: Duration,
    /// Approximate number of rows targeted when no resolution is given.
    pub target_rows: u64,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            span: Duration::seconds(86_400),
            target_rows: 10,
        }
    }
}

/// Fills in an open query range: `end` defaults to now, `start` to `end - span`.
///
/// # Errors
/// [`TsError::InvalidTimeRange`] when the resolved start lies after the end.
pub fn resolve_range(
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    defaults: &QueryDefaults,
) -> Result<(Timestamp, Timestamp), TsError> {
    let end = end.unwrap_or_else(Timestamp::now);
    let start = start.unwrap_or_else(|| end.minus(defaults.span));
    if start > end {
        return Err(TsError::InvalidTimeRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok((start, end))
}

/// The multiple of `step` closest to `(end - start) / target_rows`, never less than one step.
pub fn default_resolution(start: Timestamp, end: Timestamp, step: Duration, target_rows: u64) -> Duration {
    let step_nanos = step.as_nanos();
    if step_nanos == 0 {
        return step;
    }
    let span = (end.as_nanos() - start.as_nanos()).max(0);
    let raw = span / target_rows.max(1) as i128;
    let multiple = ((raw + step_nanos / 2) / step_nanos).max(1);
    step.times(multiple.min(u64::MAX as i128) as u64)
}

/// Reads one resource's samples and runs the measurement pipeline over them.
///
/// Open range ends and resolution are resolved with [`QueryDefaults::default`].
pub fn select<R: SampleReader>(
    reader: &R,
    resource: &Resource,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    descriptor: impl Into<Arc<ResultDescriptor>>,
    resolution: Option<Duration>,
    options: QueryOptions,
) -> Result<Results<Measurement>, TsError> {
    select_with_defaults(
        reader,
        resource,
        start,
        end,
        descriptor,
        resolution,
        options,
        &QueryDefaults::default(),
    )
}

#[allow(clippy::too_many_arguments)]
pub fn select_with_defaults<R: SampleReader>(
    reader: &R,
    resource: &Resource,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    descriptor: impl Into<Arc<ResultDescriptor>>,
    resolution: Option<Duration>,
    options: QueryOptions,
    defaults: &QueryDefaults,
) -> Result<Results<Measurement>, TsError> {
    let descriptor = descriptor.into();
    let (start, end) = resolve_range(start, end, defaults)?;
    let resolution = resolution
        .unwrap_or_else(|| default_resolution(start, end, descriptor.step(), defaults.target_rows));

    let processor = ResultProcessor::new(resource.clone(), start, end, descriptor, resolution, options)?;
    let rows = reader.read(resource, processor.sample_start(), processor.sample_end())?;
    processor.process(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_range_defaults_to_last_day() {
        let end = Timestamp::from_epoch_seconds(1_000_000);
        let (start, resolved_end) = resolve_range(None, Some(end), &QueryDefaults::default()).unwrap();
        assert_eq!(resolved_end, end);
        assert_eq!(start, Timestamp::from_epoch_seconds(1_000_000 - 86_400));

        let (_, now_end) = resolve_range(None, None, &QueryDefaults::default()).unwrap();
        assert!(now_end >= end);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let result = resolve_range(
            Some(Timestamp::from_epoch_seconds(10)),
            Some(Timestamp::from_epoch_seconds(5)),
            &QueryDefaults::default(),
        );
        assert!(matches!(result, Err(TsError::InvalidTimeRange { .. })));
    }

    #[test]
    fn test_default_resolution_rounds_to_step_multiple() {
        let step = Duration::seconds(300);
        let day = (Timestamp::from_epoch_seconds(0), Timestamp::from_epoch_seconds(86_400));
        // 8640s per row is closest to 29 steps (8700s).
        assert_eq!(default_resolution(day.0, day.1, step, 10), Duration::seconds(8_700));
        // A tiny span still gets one full step.
        assert_eq!(
            default_resolution(day.0, Timestamp::from_epoch_seconds(60), step, 10),
            step
        );
        assert!(default_resolution(day.0, day.1, step, 10).is_multiple_of(step));
    }
}
