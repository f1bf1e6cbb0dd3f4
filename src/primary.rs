//! Resampling of irregular samples onto fixed step boundaries.

use crate::descriptor::ResultDescriptor;
use crate::error::TsError;
use crate::interval::IntervalGenerator;
use crate::telemetry::{PipelineEvent, PipelineEventListener};
use crate::time::{Duration, Timestamp};
use crate::types::{AttributeMap, Measurement, Resource, Row, Sample};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug)]
struct SourceState {
    name: String,
    heartbeat: Duration,
    /// Last sample of this source at or before the previous interval ceiling.
    prev: Option<Timestamp>,
}

/// Produces one row of time-weighted averages per step.
///
/// Each output row at ceiling `c` covers `(c - step, c]`. The span between two consecutive
/// samples of a metric, `(prev, cur]`, carries `cur`'s value; the part of it that overlaps
/// the interval is counted as known when the whole gap `cur - prev` is shorter than the
/// heartbeat and as unknown otherwise. The row value is `Σ value × known time / Σ known time`
/// when less than half of the accounted time is unknown, and NaN otherwise.
///
/// Input is consumed in lock-step with the output. Only rows up to `c + max heartbeat` are
/// buffered: a metric with no sample inside that window cannot have a later sample within
/// its heartbeat, so the rest of its interval is unknown. Once input is exhausted the same
/// holds when the input is known to cover at least `prev + heartbeat`
/// (see [`covering`](Self::covering)); otherwise nothing more is accounted.
#[derive(Debug)]
pub struct PrimaryData<I> {
    input: I,
    resource: Resource,
    intervals: IntervalGenerator,
    step: Duration,
    lookahead: Duration,
    sources: Vec<SourceState>,
    window: VecDeque<Row<Sample>>,
    last_input: Option<Timestamp>,
    covered_until: Option<Timestamp>,
    input_done: bool,
    done: bool,
    listener: Arc<dyn PipelineEventListener>,
}

impl<I> PrimaryData<I>
where
    I: Iterator<Item = Result<Row<Sample>, TsError>>,
{
    pub fn new(
        resource: Resource,
        start: Timestamp,
        end: Timestamp,
        descriptor: &ResultDescriptor,
        input: I,
        listener: Arc<dyn PipelineEventListener>,
    ) -> Result<Self, TsError> {
        let step = descriptor.step();
        let sources = descriptor
            .source_names()
            .into_iter()
            .map(|name| SourceState {
                name: name.to_string(),
                heartbeat: descriptor.heartbeat_for(name).unwrap_or(step),
                prev: None,
            })
            .collect();

        Ok(Self {
            input,
            resource,
            intervals: IntervalGenerator::forward(start, end, step)?,
            step,
            lookahead: descriptor.max_heartbeat(),
            sources,
            window: VecDeque::new(),
            last_input: None,
            covered_until: None,
            input_done: false,
            done: false,
            listener,
        })
    }

    /// Declares that the input holds every sample up to `until`, e.g. the upper bound of
    /// the storage read. Absence of a sample before `until` is then treated as missing data
    /// rather than as the end of the series.
    pub fn covering(mut self, until: Timestamp) -> Self {
        self.covered_until = Some(until);
        self
    }

    /// Buffers input rows until one lies beyond `ceiling + lookahead` or input ends.
    fn fill(&mut self, ceiling: Timestamp) -> Result<(), TsError> {
        let horizon = ceiling.plus(self.lookahead);
        while !self.input_done {
            if let Some(back) = self.window.back() {
                if back.timestamp() > horizon {
                    break;
                }
            }
            match self.input.next() {
                None => self.input_done = true,
                Some(Err(e)) => return Err(e),
                Some(Ok(row)) => {
                    let ts = row.timestamp();
                    if let Some(previous) = self.last_input {
                        if ts <= previous {
                            self.listener.on_event(PipelineEvent::UnorderedInput {
                                resource: self.resource.to_string(),
                                previous,
                                current: ts,
                            });
                            return Err(TsError::UnorderedInput {
                                previous: previous.to_string(),
                                current: ts.to_string(),
                            });
                        }
                    }
                    self.last_input = Some(ts);
                    self.window.push_back(row);
                }
            }
        }
        Ok(())
    }

    fn accumulate(&mut self, idx: usize, floor: Timestamp, ceiling: Timestamp) -> Measurement {
        let src = &self.sources[idx];
        let heartbeat = src.heartbeat.as_nanos();
        let (f, c) = (floor.as_nanos(), ceiling.as_nanos());

        let mut prev = src.prev.map(|t| t.as_nanos());
        let mut next_prev = src.prev;
        let (mut known, mut unknown) = (0i128, 0i128);
        let mut weighted = 0.0f64;
        let mut attributes = AttributeMap::new();
        let mut covered = false;

        for row in &self.window {
            let Some(sample) = row.element(&src.name) else {
                continue;
            };
            let t = sample.timestamp.as_nanos();
            if t <= c {
                next_prev = Some(sample.timestamp);
            }
            let p = match prev {
                Some(p) if t > f => p,
                _ => {
                    prev = Some(t);
                    continue;
                }
            };
            if p >= c {
                covered = true;
                break;
            }

            let overlap = t.min(c) - p.max(f);
            let value = sample.value.as_f64();
            if t - p < heartbeat && !value.is_nan() {
                known += overlap;
                weighted += value * overlap as f64;
            } else {
                unknown += overlap;
            }
            if let Some(attrs) = &sample.attributes {
                attributes.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
            }

            prev = Some(t);
            if t >= c {
                covered = true;
                break;
            }
        }

        if !covered {
            let covered_until = self.covered_until.map(|t| t.as_nanos());
            if let Some(p) = prev.filter(|p| *p < c) {
                let stale = !self.input_done || covered_until.is_some_and(|u| u >= p + heartbeat);
                if stale {
                    unknown += c - p.max(f);
                }
            }
        }

        let total = (known + unknown) as f64;
        let value = if known > 0 && (unknown as f64) < total / 2.0 {
            weighted / known as f64
        } else {
            f64::NAN
        };

        let name = src.name.clone();
        self.sources[idx].prev = next_prev;
        Measurement::new(ceiling, self.resource.clone(), name, value)
            .with_attributes(Some(attributes))
    }
}

impl<I> Iterator for PrimaryData<I>
where
    I: Iterator<Item = Result<Row<Sample>, TsError>>,
{
    type Item = Result<Row<Measurement>, TsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(ceiling) = self.intervals.next() else {
            self.done = true;
            return None;
        };
        if let Err(e) = self.fill(ceiling) {
            self.done = true;
            return Some(Err(e));
        }

        let floor = ceiling.minus(self.step);
        let mut row = Row::with_capacity(ceiling, self.resource.clone(), self.sources.len());
        for idx in 0..self.sources.len() {
            row.add_element(self.accumulate(idx, floor, ceiling));
        }

        while self
            .window
            .front()
            .is_some_and(|front| front.timestamp() <= ceiling)
        {
            self.window.pop_front();
        }

        Some(Ok(row))
    }
}
