//! Tick sources.
//!
//! All scheduling and timestamp math runs on an abstract monotonic tick
//! counter so tests can drive time by hand.

use parking_lot::RwLock;
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// A monotonic tick counter at a fixed declared rate.
pub trait TimeProvider: Send + Sync + Debug {
    fn now_ticks(&self) -> u64;
    fn ticks_per_second(&self) -> u32;

    fn uptime_seconds(&self) -> u32 {
        (self.now_ticks() / self.ticks_per_second() as u64) as u32
    }

    fn ticks_from_duration(&self, d: Duration) -> u64 {
        (d.as_secs_f64() * self.ticks_per_second() as f64) as u64
    }
}

/// Wall-clock backed provider at RTC rate (32768 ticks/s).
#[derive(Debug)]
pub struct SystemTimeProvider {
    base: Instant,
}

impl SystemTimeProvider {
    pub const TICK_RATE: u32 = 32_768;

    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }
}

impl Default for SystemTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for SystemTimeProvider {
    fn now_ticks(&self) -> u64 {
        let elapsed = self.base.elapsed();
        elapsed.as_secs() * Self::TICK_RATE as u64
            + (elapsed.subsec_nanos() as u64 * Self::TICK_RATE as u64) / 1_000_000_000
    }

    fn ticks_per_second(&self) -> u32 {
        Self::TICK_RATE
    }
}

/// A hand-driven provider for deterministic simulations.
#[derive(Debug)]
pub struct ManualTimeProvider {
    ticks: RwLock<u64>,
    rate: u32,
}

impl ManualTimeProvider {
    pub fn new(rate: u32) -> Self {
        Self {
            ticks: RwLock::new(0),
            rate,
        }
    }

    pub fn set_ticks(&self, ticks: u64) {
        *self.ticks.write() = ticks;
    }

    pub fn advance(&self, d: Duration) {
        let delta = (d.as_secs_f64() * self.rate as f64) as u64;
        *self.ticks.write() += delta;
    }

    pub fn advance_seconds(&self, seconds: u32) {
        *self.ticks.write() += seconds as u64 * self.rate as u64;
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_ticks(&self) -> u64 {
        *self.ticks.read()
    }

    fn ticks_per_second(&self) -> u32 {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_provider_advances() {
        let tp = ManualTimeProvider::new(1000);
        assert_eq!(tp.now_ticks(), 0);
        tp.advance(Duration::from_millis(1500));
        assert_eq!(tp.now_ticks(), 1500);
        assert_eq!(tp.uptime_seconds(), 1);
        tp.advance_seconds(10);
        assert_eq!(tp.uptime_seconds(), 11);
    }

    #[test]
    fn system_provider_is_monotonic() {
        let tp = SystemTimeProvider::new();
        let a = tp.now_ticks();
        let b = tp.now_ticks();
        assert!(b >= a);
    }
}
