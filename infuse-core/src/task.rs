//! Task bodies and cooperative termination.
//!
//! A task body is a plain function over a [`TaskCtx`]. The runner asks a
//! task to stop by raising its terminate signal; bodies must poll or wait
//! on the signal at every natural yield point and return promptly. There
//! is no forced termination; a body that never yields is the watchdog's
//! problem.

use crate::adapter::TdfEmitter;
use crate::schedule::{Schedule, TaskArgs};
use infuse_proto::{EpochTime, TdfId};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Single-shot stop request, cleared by the runner before each start.
#[derive(Clone, Default)]
pub struct TerminateSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl TerminateSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let (lock, cv) = &*self.inner;
        *lock.lock() = true;
        cv.notify_all();
    }

    pub fn clear(&self) {
        *self.inner.0.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps up to `duration`, waking early on termination. Returns true
    /// if termination was requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (lock, cv) = &*self.inner;
        let mut terminated = lock.lock();
        if *terminated {
            return true;
        }
        let deadline = std::time::Instant::now() + duration;
        while !*terminated {
            if cv.wait_until(&mut terminated, deadline).timed_out() {
                break;
            }
        }
        *terminated
    }
}

/// Everything a task body gets for one run: its schedule row, its stop
/// signal, and the routed logger adapter.
pub struct TaskCtx {
    pub(crate) schedule: Arc<Schedule>,
    pub(crate) slot: usize,
    pub(crate) signal: TerminateSignal,
    pub(crate) emitter: TdfEmitter,
}

impl TaskCtx {
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Index of the schedule row this run belongs to; the reverse lookup
    /// from task context to table entry.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn args(&self) -> &TaskArgs {
        &self.schedule.args
    }

    pub fn should_terminate(&self) -> bool {
        self.signal.is_set()
    }

    /// Cooperative sleep: returns true when the runner wants the task gone.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.signal.sleep(duration)
    }

    /// Logs `payload` under `tdf_id` to every sink of this schedule whose
    /// mask selects `tdf_bit` (task-local numbering).
    pub fn log_tdf(&self, tdf_bit: u32, tdf_id: TdfId, time: EpochTime, payload: &[u8]) {
        self.emitter
            .log(&self.schedule.sinks, tdf_bit, tdf_id, time, payload);
    }

    /// Array form of [`TaskCtx::log_tdf`]; `period` in 1/65536 s units.
    #[allow(clippy::too_many_arguments)]
    pub fn log_tdf_array(
        &self,
        tdf_bit: u32,
        tdf_id: TdfId,
        elem_len: usize,
        count: u8,
        first: EpochTime,
        period: u32,
        payload: &[u8],
    ) {
        self.emitter.log_array(
            &self.schedule.sinks,
            tdf_bit,
            tdf_id,
            elem_len,
            count,
            first,
            period,
            payload,
        );
    }
}

/// A registered task body.
pub type TaskFn = Arc<dyn Fn(&TaskCtx) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn sleep_wakes_early_on_signal() {
        let signal = TerminateSignal::new();
        let waker = signal.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            waker.signal();
        });

        let start = Instant::now();
        let terminated = signal.sleep(Duration::from_secs(10));
        assert!(terminated);
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn sleep_times_out_without_signal() {
        let signal = TerminateSignal::new();
        assert!(!signal.sleep(Duration::from_millis(10)));
    }

    #[test]
    fn clear_resets_the_shot() {
        let signal = TerminateSignal::new();
        signal.signal();
        assert!(signal.is_set());
        signal.clear();
        assert!(!signal.is_set());
    }
}
