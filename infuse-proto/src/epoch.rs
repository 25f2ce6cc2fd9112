//! Fixed-point epoch time.
//!
//! Infuse stamps all telemetry with 32.16 fixed-point seconds since
//! 2020-01-01T00:00:00Z: 32 bits of whole seconds, 16 bits of 1/65536 s
//! subseconds. A device with no reference stamps everything with zero and
//! keeps producing.

use crate::constants::GPS_EPOCH_UNIX_OFFSET;

/// Subsecond resolution of [`EpochTime`].
pub const SUBSECONDS_PER_SECOND: u32 = 65_536;

/// 32.16 fixed-point seconds since 2020-01-01T00:00:00Z.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct EpochTime(u64);

impl EpochTime {
    pub const ZERO: EpochTime = EpochTime(0);

    /// Constructs from a raw 32.16 fixed-point value. The upper 16 bits of
    /// the input are discarded.
    pub fn from_raw(raw: u64) -> Self {
        EpochTime(raw & 0x0000_ffff_ffff_ffff)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_seconds(seconds: u32) -> Self {
        EpochTime((seconds as u64) << 16)
    }

    pub fn from_parts(seconds: u32, subseconds: u16) -> Self {
        EpochTime(((seconds as u64) << 16) | subseconds as u64)
    }

    /// Whole seconds since the 2020 epoch.
    pub fn seconds(self) -> u32 {
        (self.0 >> 16) as u32
    }

    /// Fractional component in 1/65536 s units.
    pub fn subseconds(self) -> u16 {
        self.0 as u16
    }

    pub fn from_unix(unix_seconds: u64) -> Self {
        EpochTime::from_seconds(unix_seconds.saturating_sub(GPS_EPOCH_UNIX_OFFSET) as u32)
    }

    pub fn to_unix(self) -> u64 {
        self.seconds() as u64 + GPS_EPOCH_UNIX_OFFSET
    }

    /// Advances by a tick delta measured at `ticks_per_second`.
    pub fn add_ticks(self, ticks: u64, ticks_per_second: u32) -> Self {
        let sub = ticks * SUBSECONDS_PER_SECOND as u64 / ticks_per_second as u64;
        EpochTime::from_raw(self.0.saturating_add(sub))
    }

    /// Tick count at `ticks_per_second` between `earlier` and `self`.
    /// Saturates at zero when `earlier` is in the future.
    pub fn ticks_since(self, earlier: EpochTime, ticks_per_second: u32) -> u64 {
        let delta = self.0.saturating_sub(earlier.0);
        delta * ticks_per_second as u64 / SUBSECONDS_PER_SECOND as u64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for EpochTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:05}", self.seconds(), self.subseconds())
    }
}

/// Where the current epoch reference came from, ordered by trust.
///
/// `Recovered` marks a reference restored from retention at boot; it is
/// subordinate and never displaces a live reading.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum TimeSource {
    #[default]
    None,
    Recovered,
    External,
    Ntp,
    Gnss,
}

impl TimeSource {
    /// Whether a reference from `self` may replace one from `current`.
    pub fn may_replace(self, current: TimeSource) -> bool {
        match self {
            // A retention restore only fills a void.
            TimeSource::Recovered => current == TimeSource::None,
            _ => true,
        }
    }
}

/// Anything that can stamp outbound telemetry with the current epoch.
///
/// The packet layer takes this as a trait object so it never depends on the
/// scheduling crate that owns the real clock.
pub trait EpochSource: Send + Sync {
    fn epoch_now(&self) -> EpochTime;
    fn epoch_source(&self) -> TimeSource;
}

/// A constant epoch source for tests and tools.
#[derive(Debug, Clone, Copy)]
pub struct FixedEpoch(pub EpochTime);

impl EpochSource for FixedEpoch {
    fn epoch_now(&self) -> EpochTime {
        self.0
    }

    fn epoch_source(&self) -> TimeSource {
        if self.0.is_zero() {
            TimeSource::None
        } else {
            TimeSource::External
        }
    }
}
