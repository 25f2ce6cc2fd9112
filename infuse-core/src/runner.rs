//! The task runner.
//!
//! One tick per second walks the schedule table, terminates rows whose
//! validity lapsed or whose run exceeded its timeout, and starts eligible
//! rows under two constraints: a row never overlaps itself, and two rows
//! sharing a task id never run concurrently. Bodies execute on the shared
//! workqueue thread or on a per-row dedicated thread created at init.
//!
//! The tick itself never blocks and never learns whether a task succeeded;
//! retry is whatever the periodicity says.

use crate::adapter::TdfEmitter;
use crate::epoch::EpochClock;
use crate::error::{CoreError, Result};
use crate::schedule::{Periodicity, Schedule, ScheduleSnapshot, ScheduleState, TaskId};
use crate::task::{TaskCtx, TaskFn, TerminateSignal};
use crossbeam::channel::{unbounded, Receiver, Sender};
use infuse_proto::TimeProvider;
use infuse_tdf::TdfLoggerSet;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub use crate::schedule::EvalContext as TickContext;

enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

struct Slot {
    schedule: Arc<Schedule>,
    state: Mutex<ScheduleState>,
    signal: TerminateSignal,
    /// Present for `DedicatedThread` rows.
    dedicated_tx: Option<Sender<Job>>,
}

struct RunnerShared {
    slots: Vec<Slot>,
    registry: HashMap<TaskId, TaskFn>,
    emitter: TdfEmitter,
    workqueue_tx: Sender<Job>,
    /// Task ids with a run in flight, across all rows.
    busy: Mutex<HashSet<TaskId>>,
    /// Uptime of the latest tick, read by completion stamps.
    uptime: AtomicU32,
    app_state: AtomicU32,
}

pub struct TaskRunner {
    shared: Arc<RunnerShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    auto_stop: Arc<AtomicBool>,
    auto_running: AtomicBool,
}

fn executor_loop(rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Run(f) => f(),
            Job::Shutdown => break,
        }
    }
}

impl RunnerShared {
    fn tick(self: &Arc<Self>, ctx: &TickContext) {
        self.uptime.store(ctx.uptime_s, Ordering::Relaxed);

        for (slot_idx, slot) in self.slots.iter().enumerate() {
            let schedule = &slot.schedule;
            let mut state = slot.state.lock();
            let running = state.started_uptime.is_some();

            if !schedule.validity.evaluate(ctx) {
                if running && !slot.signal.is_set() {
                    tracing::debug!(
                        task = %schedule.task_id,
                        slot = slot_idx,
                        "validity lost, requesting termination"
                    );
                    slot.signal.signal();
                }
                continue;
            }

            if running {
                if let (Some(timeout), Some(started)) = (schedule.timeout_s, state.started_uptime)
                {
                    if ctx.uptime_s.saturating_sub(started) >= timeout && !slot.signal.is_set() {
                        tracing::debug!(
                            task = %schedule.task_id,
                            slot = slot_idx,
                            timeout,
                            "run exceeded timeout, requesting termination"
                        );
                        slot.signal.signal();
                    }
                }
                continue;
            }

            let eligible = match schedule.periodicity {
                Periodicity::Fixed { period_s } => state
                    .last_run_uptime
                    .is_none_or(|last| ctx.uptime_s.saturating_sub(last) >= period_s),
                Periodicity::Lockout { lockout_s } => state
                    .last_finish_uptime
                    .is_none_or(|last| ctx.uptime_s.saturating_sub(last) >= lockout_s),
                Periodicity::OnEvent => state.event_pending,
            };
            if !eligible {
                continue;
            }

            {
                let mut busy = self.busy.lock();
                if busy.contains(&schedule.task_id) {
                    continue;
                }
                busy.insert(schedule.task_id);
            }

            slot.signal.clear();
            state.started_uptime = Some(ctx.uptime_s);
            state.last_run_uptime = Some(ctx.uptime_s);
            state.reschedule_counter += 1;
            state.event_pending = false;
            drop(state);

            tracing::debug!(task = %schedule.task_id, slot = slot_idx, "task starting");
            self.dispatch(slot_idx);
        }
    }

    fn dispatch(self: &Arc<Self>, slot_idx: usize) {
        let slot = &self.slots[slot_idx];
        let tx = slot
            .dedicated_tx
            .clone()
            .unwrap_or_else(|| self.workqueue_tx.clone());

        let shared = self.clone();
        let job = Box::new(move || {
            let slot = &shared.slots[slot_idx];
            let task_fn = shared.registry[&slot.schedule.task_id].clone();
            let ctx = TaskCtx {
                schedule: slot.schedule.clone(),
                slot: slot_idx,
                signal: slot.signal.clone(),
                emitter: shared.emitter.clone(),
            };
            task_fn(&ctx);

            let finish_uptime = shared.uptime.load(Ordering::Relaxed);
            let mut state = slot.state.lock();
            state.started_uptime = None;
            state.last_finish_uptime = Some(finish_uptime);
            drop(state);
            shared.busy.lock().remove(&slot.schedule.task_id);
            tracing::debug!(task = %slot.schedule.task_id, slot = slot_idx, "task finished");
        });
        // Receivers live as long as the runner; a send only fails during
        // shutdown, where dropping the job is exactly right.
        let _ = tx.send(Job::Run(job));
    }
}

impl TaskRunner {
    /// Builds the runner over an immutable schedule table. Every task id
    /// referenced by a row must have a registered body.
    pub fn new(
        schedules: Vec<Schedule>,
        registry: HashMap<TaskId, TaskFn>,
        loggers: Arc<TdfLoggerSet>,
    ) -> Result<Self> {
        for schedule in &schedules {
            if !registry.contains_key(&schedule.task_id) {
                return Err(CoreError::UnknownTask(schedule.task_id.0));
            }
        }

        let mut threads = Vec::new();
        let (workqueue_tx, workqueue_rx) = unbounded();
        threads.push(
            std::thread::Builder::new()
                .name("task-workqueue".into())
                .spawn(move || executor_loop(workqueue_rx))
                .expect("spawning workqueue"),
        );

        let slots = schedules
            .into_iter()
            .map(|schedule| {
                let dedicated_tx = match schedule.executor {
                    crate::schedule::ExecutorKind::Workqueue => None,
                    crate::schedule::ExecutorKind::DedicatedThread => {
                        let (tx, rx) = unbounded();
                        threads.push(
                            std::thread::Builder::new()
                                .name(format!("task-{}", schedule.task_id))
                                .spawn(move || executor_loop(rx))
                                .expect("spawning dedicated task thread"),
                        );
                        Some(tx)
                    }
                };
                Slot {
                    schedule: Arc::new(schedule),
                    state: Mutex::new(ScheduleState::default()),
                    signal: TerminateSignal::new(),
                    dedicated_tx,
                }
            })
            .collect();

        Ok(TaskRunner {
            shared: Arc::new(RunnerShared {
                slots,
                registry,
                emitter: TdfEmitter::new(loggers),
                workqueue_tx,
                busy: Mutex::new(HashSet::new()),
                uptime: AtomicU32::new(0),
                app_state: AtomicU32::new(0),
            }),
            threads: Mutex::new(threads),
            auto_stop: Arc::new(AtomicBool::new(false)),
            auto_running: AtomicBool::new(false),
        })
    }

    pub fn slot_count(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn schedule(&self, slot: usize) -> &Schedule {
        &self.shared.slots[slot].schedule
    }

    pub fn snapshot(&self, slot: usize) -> ScheduleSnapshot {
        let state = self.shared.slots[slot].state.lock();
        ScheduleSnapshot {
            last_run_uptime: state.last_run_uptime,
            last_finish_uptime: state.last_finish_uptime,
            started_uptime: state.started_uptime,
            reschedule_counter: state.reschedule_counter,
            running: state.started_uptime.is_some(),
        }
    }

    /// Marks `OnEvent` rows of `task_id` eligible for their next tick.
    pub fn signal_event(&self, task_id: TaskId) {
        for slot in &self.shared.slots {
            if slot.schedule.task_id == task_id
                && slot.schedule.periodicity == Periodicity::OnEvent
            {
                slot.state.lock().event_pending = true;
            }
        }
    }

    /// Asks a running row to stop at its next yield point.
    pub fn request_terminate(&self, slot: usize) {
        self.shared.slots[slot].signal.signal();
    }

    pub fn set_app_state_bits(&self, bits: u32) {
        self.shared.app_state.fetch_or(bits, Ordering::Relaxed);
    }

    pub fn clear_app_state_bits(&self, bits: u32) {
        self.shared.app_state.fetch_and(!bits, Ordering::Relaxed);
    }

    pub fn app_state(&self) -> u32 {
        self.shared.app_state.load(Ordering::Relaxed)
    }

    /// One scheduling pass. Called about once per second, externally or by
    /// [`TaskRunner::start_auto_iterate`].
    pub fn tick(&self, ctx: &TickContext) {
        self.shared.tick(ctx);
    }

    /// Spawns the internal one-second tick driver. The external-tick and
    /// auto-iterate modes are mutually exclusive.
    pub fn start_auto_iterate(
        &self,
        provider: Arc<dyn TimeProvider>,
        epoch: Arc<EpochClock>,
        battery_pct: Box<dyn Fn() -> u8 + Send>,
    ) -> Result<()> {
        if self.auto_running.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyIterating);
        }
        let shared = self.shared.clone();
        let stop = self.auto_stop.clone();
        let handle = std::thread::Builder::new()
            .name("task-runner".into())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let ctx = TickContext {
                        uptime_s: provider.uptime_seconds(),
                        epoch: epoch.now(),
                        battery_pct: battery_pct(),
                        app_state: shared.app_state.load(Ordering::Relaxed),
                    };
                    shared.tick(&ctx);
                    std::thread::sleep(Duration::from_secs(1));
                }
            })
            .expect("spawning runner tick thread");
        self.threads.lock().push(handle);
        Ok(())
    }

    /// Stops the tick driver, asks every running task to terminate, and
    /// joins the executor threads.
    pub fn shutdown(&self) {
        self.auto_stop.store(true, Ordering::SeqCst);
        for slot in &self.shared.slots {
            slot.signal.signal();
            if let Some(tx) = &slot.dedicated_tx {
                let _ = tx.send(Job::Shutdown);
            }
        }
        let _ = self.shared.workqueue_tx.send(Job::Shutdown);
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
