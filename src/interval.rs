use crate::error::TsError;
use crate::time::{Duration, Timestamp};
use std::iter::FusedIterator;

/// Generates the step-aligned timestamps that cover `[start, end]`.
///
/// The first timestamp is `start.step_floor(step)`, the last is `end.step_ceiling(step)`,
/// both inclusive. With `reversed` the same set is produced in descending order.
#[derive(Debug, Clone)]
pub struct IntervalGenerator {
    step: Duration,
    front: Timestamp,
    back: Timestamp,
    reversed: bool,
    done: bool,
}

impl IntervalGenerator {
    /// # Errors
    /// Returns [`TsError::Config`] for a zero step.
    pub fn new(
        start: Timestamp,
        end: Timestamp,
        step: Duration,
        reversed: bool,
    ) -> Result<Self, TsError> {
        if step.is_zero() {
            return Err(TsError::config("interval step must be greater than zero"));
        }
        let front = start.step_floor(step);
        let back = end.step_ceiling(step);
        Ok(Self {
            step,
            front,
            back,
            reversed,
            done: front > back,
        })
    }

    pub fn forward(start: Timestamp, end: Timestamp, step: Duration) -> Result<Self, TsError> {
        Self::new(start, end, step, false)
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    fn remaining(&self) -> usize {
        if self.done {
            return 0;
        }
        let span = self.back.as_nanos() - self.front.as_nanos();
        (span / self.step.as_nanos() + 1) as usize
    }
}

impl Iterator for IntervalGenerator {
    type Item = Timestamp;

    fn next(&mut self) -> Option<Timestamp> {
        if self.done {
            return None;
        }
        let out = if self.reversed { self.back } else { self.front };
        if self.front == self.back {
            self.done = true;
        } else if self.reversed {
            self.back = self.back.minus(self.step);
        } else {
            self.front = self.front.plus(self.step);
        }
        Some(out)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for IntervalGenerator {}

impl FusedIterator for IntervalGenerator {}
