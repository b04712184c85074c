use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};
use std::time::Duration;

/// Recorded message time, a count of nanoseconds since the epoch of the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct RosTime(pub i64);

impl RosTime {
    pub const MIN: RosTime = RosTime(i64::MIN);
    pub const MAX: RosTime = RosTime(i64::MAX);

    #[inline]
    pub fn from_nanos(nanos: i64) -> Self {
        RosTime(nanos)
    }

    #[inline]
    pub fn as_nanos(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }
}

impl From<i64> for RosTime {
    fn from(nanos: i64) -> Self {
        RosTime(nanos)
    }
}

impl From<RosTime> for i64 {
    fn from(time: RosTime) -> Self {
        time.0
    }
}

/// bridge the API with standard Durations, saturating past i64::MAX nanoseconds.
impl From<Duration> for RosTime {
    fn from(duration: Duration) -> Self {
        RosTime(i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl Sub for RosTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        RosTime(self.0.saturating_sub(rhs.0))
    }
}

impl Add for RosTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        RosTime(self.0.saturating_add(rhs.0))
    }
}

impl Display for RosTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let nanos = self.0.unsigned_abs();
        let sign = if self.0 < 0 { "-" } else { "" };
        if nanos >= 86_400_000_000_000 {
            write!(f, "{sign}{:.3} d", nanos as f64 / 86_400_000_000_000.0)
        } else if nanos >= 3_600_000_000_000 {
            write!(f, "{sign}{:.3} h", nanos as f64 / 3_600_000_000_000.0)
        } else if nanos >= 60_000_000_000 {
            write!(f, "{sign}{:.3} m", nanos as f64 / 60_000_000_000.0)
        } else if nanos >= 1_000_000_000 {
            write!(f, "{sign}{:.3} s", nanos as f64 / 1_000_000_000.0)
        } else if nanos >= 1_000_000 {
            write!(f, "{sign}{:.3} ms", nanos as f64 / 1_000_000.0)
        } else if nanos >= 1_000 {
            write!(f, "{sign}{:.3} µs", nanos as f64 / 1_000.0)
        } else {
            write!(f, "{sign}{nanos} ns")
        }
    }
}
