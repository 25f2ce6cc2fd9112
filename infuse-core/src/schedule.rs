//! Schedule table rows and their mutable execution state.
//!
//! Rows are read-only at runtime. The old firmware collected them from
//! linker sections; here the integrator builds a `Vec<Schedule>` and hands
//! it to [`crate::TaskRunner::new`].

use infuse_proto::EpochTime;
use infuse_tdf::LoggersMask;
use smallvec::SmallVec;

/// Names a task body. Two schedule rows may share a task id; at most one
/// of them runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u16);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Evaluation context for one runner tick.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext {
    pub uptime_s: u32,
    pub epoch: EpochTime,
    pub battery_pct: u8,
    /// Application state bits for `StateSet` validity.
    pub app_state: u32,
}

/// When a schedule row is allowed to run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Always,
    AfterBootSeconds(u32),
    /// All bits in the mask are set in the application state word.
    StateSet(u32),
    BatteryAbove(u8),
    AllOf(Vec<Validity>),
    AnyOf(Vec<Validity>),
}

impl Validity {
    pub fn evaluate(&self, ctx: &EvalContext) -> bool {
        match self {
            Validity::Always => true,
            Validity::AfterBootSeconds(s) => ctx.uptime_s >= *s,
            Validity::StateSet(mask) => ctx.app_state & mask == *mask,
            Validity::BatteryAbove(pct) => ctx.battery_pct > *pct,
            Validity::AllOf(parts) => parts.iter().all(|v| v.evaluate(ctx)),
            Validity::AnyOf(parts) => parts.iter().any(|v| v.evaluate(ctx)),
        }
    }
}

/// When an otherwise-valid row becomes eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Periodicity {
    /// Eligible when `uptime - last_run >= period`.
    Fixed { period_s: u32 },
    /// Eligible when `uptime - last_finish >= lockout` and not running.
    Lockout { lockout_s: u32 },
    /// Eligible when an event was signalled since the last start.
    OnEvent,
}

/// Where the task body executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorKind {
    /// The shared low-priority work queue.
    #[default]
    Workqueue,
    /// A dedicated thread pre-created at init, for long-blocking bodies.
    DedicatedThread,
}

/// One logger routing entry: which sinks receive which of the task's TDFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdfSink {
    pub loggers: LoggersMask,
    /// Bit-per-TDF selection, task-local numbering.
    pub tdf_mask: u32,
}

/// Per-task argument payloads, keyed by task id in the old firmware's
/// union; a tagged variant here.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskArgs {
    None,
    Imu {
        rate_hz: u16,
        range_g: u8,
        fifo_watermark: u8,
    },
    Gnss {
        fix_timeout_s: u16,
        pdop_max_dm: u16,
        any_fix: bool,
    },
    Environmental {
        oversampling: u8,
    },
    Battery,
    Custom(u64),
}

/// One immutable schedule table row.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub task_id: TaskId,
    pub validity: Validity,
    pub periodicity: Periodicity,
    /// Seconds a run may take before the runner signals termination.
    pub timeout_s: Option<u32>,
    pub sinks: SmallVec<[TdfSink; 2]>,
    pub args: TaskArgs,
    pub executor: ExecutorKind,
}

impl Schedule {
    /// A minimal fixed-period row; builder-style setters refine it.
    pub fn fixed(task_id: TaskId, period_s: u32) -> Self {
        Schedule {
            task_id,
            validity: Validity::Always,
            periodicity: Periodicity::Fixed { period_s },
            timeout_s: None,
            sinks: SmallVec::new(),
            args: TaskArgs::None,
            executor: ExecutorKind::Workqueue,
        }
    }

    pub fn with_validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_timeout(mut self, timeout_s: u32) -> Self {
        self.timeout_s = Some(timeout_s);
        self
    }

    pub fn with_sink(mut self, loggers: LoggersMask, tdf_mask: u32) -> Self {
        self.sinks.push(TdfSink { loggers, tdf_mask });
        self
    }

    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.args = args;
        self
    }

    pub fn on_thread(mut self) -> Self {
        self.executor = ExecutorKind::DedicatedThread;
        self
    }
}

/// Mutable per-row state, owned by the runner.
#[derive(Debug, Default)]
pub(crate) struct ScheduleState {
    pub last_run_uptime: Option<u32>,
    pub last_finish_uptime: Option<u32>,
    /// `Some` while a run is in flight.
    pub started_uptime: Option<u32>,
    pub reschedule_counter: u32,
    pub event_pending: bool,
}

/// Read-only view of a row's execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSnapshot {
    pub last_run_uptime: Option<u32>,
    pub last_finish_uptime: Option<u32>,
    pub started_uptime: Option<u32>,
    pub reschedule_counter: u32,
    pub running: bool,
}
