//! Unit-aware instants and spans.
//!
//! A [`Timestamp`] or [`Duration`] carries its own [`TimeUnit`]. Values in different units
//! compare equal when they denote the same instant or span (`1000ms == 1s`), and arithmetic
//! between mixed units is carried out in the finer of the two so no remainder is lost.

use crate::error::TsError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Granularity of a [`Timestamp`] or [`Duration`] count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Number of nanoseconds in one unit.
    #[inline]
    pub const fn nanos(self) -> i128 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 3_600 * 1_000_000_000,
            TimeUnit::Days => 86_400 * 1_000_000_000,
        }
    }

    /// The finer (smaller) of two units.
    #[inline]
    pub fn finest(self, other: TimeUnit) -> TimeUnit {
        if self <= other {
            self
        } else {
            other
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
        }
    }
}

// Expresses `nanos` as a count of `unit`, rounding toward negative infinity and
// saturating at the i64 range.
#[inline]
fn count_in(nanos: i128, unit: TimeUnit) -> i64 {
    let c = nanos.div_euclid(unit.nanos());
    c.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

// --- Timestamp --- //

/// An instant, counted in `unit` since the Unix epoch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub struct Timestamp {
    count: i64,
    unit: TimeUnit,
}

impl Timestamp {
    pub const fn new(count: i64, unit: TimeUnit) -> Self {
        Self { count, unit }
    }

    pub const fn from_epoch_seconds(secs: i64) -> Self {
        Self::new(secs, TimeUnit::Seconds)
    }

    pub const fn from_epoch_millis(millis: i64) -> Self {
        Self::new(millis, TimeUnit::Milliseconds)
    }

    /// Current wall-clock time at millisecond granularity.
    pub fn now() -> Self {
        let millis = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as i64,
            Err(e) => -(e.duration().as_millis() as i64),
        };
        Self::from_epoch_millis(millis)
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    #[inline]
    pub fn as_nanos(&self) -> i128 {
        self.count as i128 * self.unit.nanos()
    }

    /// Epoch seconds, rounded down.
    pub fn as_seconds(&self) -> i64 {
        count_in(self.as_nanos(), TimeUnit::Seconds)
    }

    /// Epoch milliseconds, rounded down.
    pub fn as_millis(&self) -> i64 {
        count_in(self.as_nanos(), TimeUnit::Milliseconds)
    }

    /// Re-expresses this instant in `unit`, rounding down when `unit` is coarser.
    pub fn convert(&self, unit: TimeUnit) -> Timestamp {
        Timestamp::new(count_in(self.as_nanos(), unit), unit)
    }

    pub fn plus(&self, d: Duration) -> Timestamp {
        let unit = self.unit.finest(d.unit);
        Timestamp::new(count_in(self.as_nanos() + d.as_nanos(), unit), unit)
    }

    pub fn minus(&self, d: Duration) -> Timestamp {
        let unit = self.unit.finest(d.unit);
        Timestamp::new(count_in(self.as_nanos() - d.as_nanos(), unit), unit)
    }

    /// Span from `earlier` to `self`.
    ///
    /// # Errors
    /// Returns [`TsError::InvalidTimeRange`] when `earlier` is after `self`.
    pub fn duration_since(&self, earlier: &Timestamp) -> Result<Duration, TsError> {
        let diff = self.as_nanos() - earlier.as_nanos();
        if diff < 0 {
            return Err(TsError::InvalidTimeRange {
                start: earlier.to_string(),
                end: self.to_string(),
            });
        }
        let unit = self.unit.finest(earlier.unit);
        Ok(Duration::new(
            (diff / unit.nanos()).min(u64::MAX as i128) as u64,
            unit,
        ))
    }

    /// Signed distance from `other` to `self` in fractional seconds.
    #[inline]
    pub fn seconds_since(&self, other: &Timestamp) -> f64 {
        (self.as_nanos() - other.as_nanos()) as f64 / 1e9
    }

    /// Largest multiple of `step` (relative to the epoch) that is not after `self`.
    ///
    /// Computed in the finer of the two units. A zero step returns `self` unchanged.
    pub fn step_floor(&self, step: Duration) -> Timestamp {
        let unit = self.unit.finest(step.unit);
        let s = step.as_nanos();
        if s == 0 {
            return *self;
        }
        let n = self.as_nanos();
        Timestamp::new(count_in(n - n.rem_euclid(s), unit), unit)
    }

    /// Smallest multiple of `step` that is not before `self`.
    pub fn step_ceiling(&self, step: Duration) -> Timestamp {
        let floor = self.step_floor(step);
        if floor == *self {
            floor
        } else {
            floor.plus(step)
        }
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.as_nanos() == other.as_nanos()
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_nanos().cmp(&other.as_nanos())
    }
}

impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_nanos().hash(state);
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Timestamp::from_epoch_millis(millis)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.as_millis()
    }
}

// --- Duration --- //

/// A non-negative span of time.
///
/// Serialized as its display form (`"5m"`); deserializes from an integer number of seconds
/// or any string accepted by [`Duration::from_str`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "DurationRepr", into = "String")]
pub struct Duration {
    count: u64,
    unit: TimeUnit,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Seconds(u64),
    Text(String),
}

impl TryFrom<DurationRepr> for Duration {
    type Error = TsError;

    fn try_from(repr: DurationRepr) -> Result<Self, Self::Error> {
        match repr {
            DurationRepr::Seconds(s) => Ok(Duration::seconds(s)),
            DurationRepr::Text(s) => s.parse(),
        }
    }
}

impl From<Duration> for String {
    fn from(d: Duration) -> Self {
        d.to_string()
    }
}

impl Duration {
    pub const fn new(count: u64, unit: TimeUnit) -> Self {
        Self { count, unit }
    }

    pub const fn millis(count: u64) -> Self {
        Self::new(count, TimeUnit::Milliseconds)
    }

    pub const fn seconds(count: u64) -> Self {
        Self::new(count, TimeUnit::Seconds)
    }

    pub const fn minutes(count: u64) -> Self {
        Self::new(count, TimeUnit::Minutes)
    }

    pub const fn hours(count: u64) -> Self {
        Self::new(count, TimeUnit::Hours)
    }

    pub const fn days(count: u64) -> Self {
        Self::new(count, TimeUnit::Days)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    #[inline]
    pub fn as_nanos(&self) -> i128 {
        self.count as i128 * self.unit.nanos()
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.as_nanos() as f64 / 1e9
    }

    pub fn as_millis(&self) -> u64 {
        (self.as_nanos() / TimeUnit::Milliseconds.nanos()).min(u64::MAX as i128) as u64
    }

    pub fn as_std(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.as_nanos().min(u64::MAX as i128) as u64)
    }

    pub fn is_zero(&self) -> bool {
        self.count == 0
    }

    pub fn times(&self, n: u64) -> Duration {
        Duration::new(self.count.saturating_mul(n), self.unit)
    }

    pub fn plus(&self, other: Duration) -> Duration {
        let unit = self.unit.finest(other.unit);
        let nanos = self.as_nanos() + other.as_nanos();
        Duration::new((nanos / unit.nanos()).min(u64::MAX as i128) as u64, unit)
    }

    /// Whole number of times `divisor` fits into `self`; zero for a zero divisor.
    pub fn divide_by(&self, divisor: Duration) -> u64 {
        let d = divisor.as_nanos();
        if d == 0 {
            return 0;
        }
        (self.as_nanos() / d).min(u64::MAX as i128) as u64
    }

    /// `true` when `self` is a non-zero integer multiple (one included) of `other`.
    pub fn is_multiple_of(&self, other: Duration) -> bool {
        let o = other.as_nanos();
        let s = self.as_nanos();
        o != 0 && s != 0 && s % o == 0
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.as_nanos() == other.as_nanos()
    }
}

impl Eq for Duration {}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Duration {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_nanos().cmp(&other.as_nanos())
    }
}

impl Hash for Duration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_nanos().hash(state);
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for Duration {
    type Err = TsError;

    /// Parses `"300"` (seconds) or a sequence of `<digits><unit>` parts such as `"1h30m"`,
    /// `"2w"` or `"250ms"`. Units: `w d h m s ms us ns`. The result is expressed in the
    /// finest unit that appears.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(TsError::config("empty duration"));
        }
        if let Ok(secs) = input.parse::<u64>() {
            return Ok(Duration::seconds(secs));
        }

        let bad = || TsError::config(format!("invalid duration: {:?}", s));
        let bytes = input.as_bytes();
        let mut pos = 0;
        let mut total: i128 = 0;
        let mut finest = TimeUnit::Days;

        while pos < bytes.len() {
            let digits_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            if digits_start == pos {
                return Err(bad());
            }
            let n: u64 = input[digits_start..pos].parse().map_err(|_| bad())?;

            let unit_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
                pos += 1;
            }
            let (unit, factor) = match &input[unit_start..pos] {
                "w" => (TimeUnit::Days, 7),
                "d" => (TimeUnit::Days, 1),
                "h" => (TimeUnit::Hours, 1),
                "m" => (TimeUnit::Minutes, 1),
                "s" => (TimeUnit::Seconds, 1),
                "ms" => (TimeUnit::Milliseconds, 1),
                "us" => (TimeUnit::Microseconds, 1),
                "ns" => (TimeUnit::Nanoseconds, 1),
                _ => return Err(bad()),
            };
            finest = finest.finest(unit);
            total += n as i128 * factor * unit.nanos();
        }

        let count = total / finest.nanos();
        if count > u64::MAX as i128 {
            return Err(bad());
        }
        Ok(Duration::new(count as u64, finest))
    }
}
