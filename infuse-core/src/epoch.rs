//! The process-wide epoch clock.
//!
//! One reference instant `{local_tick, epoch}` plus a trust tag converts
//! the monotonic tick counter to epoch time. Skew is fixed at 1.0; keeping
//! the reference fresh is the correctness guarantee. Updates go through
//! [`EpochClock::set_reference`] only, and every accepted update fans out
//! to registered listeners.

use infuse_proto::{EpochSource, EpochTime, TimeProvider, TimeSource};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A synchronization instant pairing a local tick with the epoch time it
/// occurred at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeReference {
    pub source: TimeSource,
    pub local_tick: u64,
    pub epoch: EpochTime,
}

/// Handle for deregistering an epoch listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochListenerHandle(u32);

type Listener = Box<dyn Fn(TimeSource, EpochTime, EpochTime) + Send>;

pub struct EpochClock {
    provider: Arc<dyn TimeProvider>,
    reference: Mutex<Option<TimeReference>>,
    listeners: Mutex<Vec<(EpochListenerHandle, Listener)>>,
    next_handle: AtomicU32,
}

impl EpochClock {
    pub fn new(provider: Arc<dyn TimeProvider>) -> Self {
        EpochClock {
            provider,
            reference: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            next_handle: AtomicU32::new(0),
        }
    }

    pub fn reference(&self) -> Option<TimeReference> {
        *self.reference.lock()
    }

    pub fn source(&self) -> TimeSource {
        self.reference
            .lock()
            .map(|r| r.source)
            .unwrap_or(TimeSource::None)
    }

    /// Installs a new reference. Subordinate sources (`Recovered`) only
    /// fill a void and never displace a live reading; everything else
    /// replaces freely, so a fresh lower-trust reading still refreshes the
    /// clock.
    ///
    /// Returns whether the reference was accepted.
    pub fn set_reference(&self, source: TimeSource, local_tick: u64, epoch: EpochTime) -> bool {
        let old_now = self.now();
        {
            let mut reference = self.reference.lock();
            let current = reference.map(|r| r.source).unwrap_or(TimeSource::None);
            if !source.may_replace(current) {
                tracing::debug!(?source, ?current, "epoch reference rejected");
                return false;
            }
            *reference = Some(TimeReference {
                source,
                local_tick,
                epoch,
            });
        }
        let new_now = self.now();
        tracing::info!(?source, %new_now, "epoch reference updated");
        for (_, listener) in self.listeners.lock().iter() {
            listener(source, old_now, new_now);
        }
        true
    }

    /// Current epoch time; zero until a reference exists.
    pub fn now(&self) -> EpochTime {
        self.from_ticks(self.provider.now_ticks())
    }

    /// Epoch time of an arbitrary local tick.
    pub fn from_ticks(&self, ticks: u64) -> EpochTime {
        let Some(reference) = *self.reference.lock() else {
            return EpochTime::ZERO;
        };
        let rate = self.provider.ticks_per_second();
        if ticks >= reference.local_tick {
            reference.epoch.add_ticks(ticks - reference.local_tick, rate)
        } else {
            let back = (reference.local_tick - ticks)
                * infuse_proto::epoch::SUBSECONDS_PER_SECOND as u64
                / rate as u64;
            EpochTime::from_raw(reference.epoch.raw().saturating_sub(back))
        }
    }

    /// Local tick at which `epoch` occurs; `None` until a reference exists.
    pub fn ticks_from(&self, epoch: EpochTime) -> Option<u64> {
        let reference = (*self.reference.lock())?;
        let rate = self.provider.ticks_per_second();
        if epoch >= reference.epoch {
            Some(reference.local_tick + epoch.ticks_since(reference.epoch, rate))
        } else {
            Some(
                reference
                    .local_tick
                    .saturating_sub(reference.epoch.ticks_since(epoch, rate)),
            )
        }
    }

    pub fn register_listener(
        &self,
        listener: Box<dyn Fn(TimeSource, EpochTime, EpochTime) + Send>,
    ) -> EpochListenerHandle {
        let handle = EpochListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((handle, listener));
        handle
    }

    /// Required on shutdown in hosted builds; harmless to skip in firmware.
    pub fn deregister_listener(&self, handle: EpochListenerHandle) {
        self.listeners.lock().retain(|(h, _)| *h != handle);
    }
}

impl EpochSource for EpochClock {
    fn epoch_now(&self) -> EpochTime {
        self.now()
    }

    fn epoch_source(&self) -> TimeSource {
        self.source()
    }
}
