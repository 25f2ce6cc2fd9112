//! # Infuse Core
//!
//! The scheduling half of the Infuse telemetry stack: the per-second task
//! runner over a static schedule table, the epoch clock every subsystem
//! stamps time from, the task-to-logger emission adapter, and the
//! multi-channel soft watchdog.
//!
//! The lower layers are re-exported so an integrator depends on one crate:
//! [`infuse_epacket`] for transport framing, [`infuse_tdf`] for the data
//! logger.
//!
//! There is no linker magic here: schedules, task bodies, and logger
//! backends are plain values assembled by the integrator and passed to the
//! constructors.

pub mod adapter;
pub mod config;
pub mod epoch;
pub mod error;
pub mod kv;
pub mod reboot;
pub mod runner;
pub mod schedule;
pub mod task;
pub mod watchdog;

pub use adapter::TdfEmitter;
pub use config::{AeadAlgorithm, InfuseConfig, TickSource, WatchdogSettings};
pub use epoch::{EpochClock, TimeReference};
pub use error::{CoreError, Result};
pub use kv::KvStore;
pub use reboot::{RebootReason, RebootRecord};
pub use runner::{TaskRunner, TickContext};
pub use schedule::{
    ExecutorKind, Periodicity, Schedule, ScheduleSnapshot, TaskArgs, TaskId, TdfSink, Validity,
};
pub use task::{TaskCtx, TaskFn, TerminateSignal};
pub use watchdog::{HardwareWatchdog, SoftWatchdog, ThreadHardwareWatchdog, WatchdogConfig};

pub use infuse_epacket as epacket;
pub use infuse_proto as proto;
pub use infuse_tdf as tdf;
