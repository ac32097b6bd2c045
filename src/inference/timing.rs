// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Wall-clock timing for the generation call

use std::fmt;
use std::time::{Duration, Instant};

/// Elapsed wall-clock time of a measured call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Elapsed(Duration);

impl Elapsed {
    pub fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    /// Whole minutes
    pub fn minutes(&self) -> u64 {
        self.0.as_secs() / 60
    }

    /// Whole seconds past the last full minute
    pub fn seconds(&self) -> u64 {
        self.0.as_secs() % 60
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m {}s", self.minutes(), self.seconds())
    }
}

/// Run `f` and measure it with a monotonic clock
///
/// Measures only, never cancels.
pub fn timed<T>(f: impl FnOnce() -> T) -> (T, Elapsed) {
    let start = Instant::now();
    let value = f();
    (value, Elapsed(start.elapsed()))
}
