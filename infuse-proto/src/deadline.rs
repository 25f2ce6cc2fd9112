//! Blocking deadlines.
//!
//! Every blocking primitive in the stack takes one of these three shapes;
//! `Forever` is reserved for top-level daemon loops.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Fail immediately if the resource is not available.
    NoWait,
    /// Wait without bound.
    Forever,
    /// Wait up to the given duration.
    After(Duration),
}

impl Deadline {
    pub fn from_millis(ms: u64) -> Self {
        Deadline::After(Duration::from_millis(ms))
    }

    pub fn from_secs(secs: u64) -> Self {
        Deadline::After(Duration::from_secs(secs))
    }

    /// The bounded wait, if any. `NoWait` maps to a zero duration.
    pub fn timeout(self) -> Option<Duration> {
        match self {
            Deadline::NoWait => Some(Duration::ZERO),
            Deadline::Forever => None,
            Deadline::After(d) => Some(d),
        }
    }

    pub fn is_no_wait(self) -> bool {
        self == Deadline::NoWait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_mapping() {
        assert_eq!(Deadline::NoWait.timeout(), Some(Duration::ZERO));
        assert_eq!(Deadline::Forever.timeout(), None);
        assert_eq!(
            Deadline::from_millis(250).timeout(),
            Some(Duration::from_millis(250))
        );
    }
}
