//! Simulated time is kept in integer nanoseconds.

pub type SimTime = u64;

pub const NANOS_PER_MICRO: SimTime = 1_000;
pub const NANOS_PER_MILLI: SimTime = 1_000_000;
pub const NANOS_PER_SEC: SimTime = 1_000_000_000;

pub const fn micros(us: u64) -> SimTime {
    us * NANOS_PER_MICRO
}

pub const fn millis(ms: u64) -> SimTime {
    ms * NANOS_PER_MILLI
}

/// Convert a non-negative number of seconds, rounding to the nearest nanosecond.
pub fn from_secs_f64(secs: f64) -> SimTime {
    (secs.max(0.0) * NANOS_PER_SEC as f64).round() as SimTime
}

pub fn from_millis_f64(ms: f64) -> SimTime {
    (ms.max(0.0) * NANOS_PER_MILLI as f64).round() as SimTime
}

pub fn as_secs_f64(time: SimTime) -> f64 {
    time as f64 / NANOS_PER_SEC as f64
}
