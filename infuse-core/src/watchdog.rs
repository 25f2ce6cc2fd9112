//! Multi-channel soft watchdog over one hardware channel.
//!
//! Each independent thread installs a channel before `start` and must feed
//! it within the returned period. A periodic [`SoftWatchdog::service`] scan
//! feeds the hardware only while every channel is fresh; a channel starved
//! past its warning threshold gets the warning callback exactly once, with
//! the registered thread name, so a post-mortem can be captured before the
//! hardware resets the CPU.

use crate::error::{CoreError, Result};
use infuse_proto::TimeProvider;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The single underlying hardware channel.
pub trait HardwareWatchdog: Send {
    fn start(&mut self, timeout: Duration);
    fn feed(&mut self);
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    pub hardware_timeout: Duration,
    /// Extra slack past the feed period before the warning fires.
    pub warning_margin: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            hardware_timeout: Duration::from_secs(10),
            warning_margin: Duration::from_secs(2),
        }
    }
}

struct Channel {
    last_fed_tick: u64,
    thread: Option<String>,
    warned: bool,
}

struct WdState {
    channels: Vec<Channel>,
    started: bool,
}

type WarningHandler = Box<dyn Fn(usize, Option<&str>) + Send>;

pub struct SoftWatchdog {
    provider: Arc<dyn TimeProvider>,
    config: WatchdogConfig,
    state: Mutex<WdState>,
    hw: Mutex<Box<dyn HardwareWatchdog>>,
    warning: Mutex<Option<WarningHandler>>,
}

impl SoftWatchdog {
    pub fn new(
        provider: Arc<dyn TimeProvider>,
        hw: Box<dyn HardwareWatchdog>,
        config: WatchdogConfig,
    ) -> Self {
        SoftWatchdog {
            provider,
            config,
            state: Mutex::new(WdState {
                channels: Vec::new(),
                started: false,
            }),
            hw: Mutex::new(hw),
            warning: Mutex::new(None),
        }
    }

    /// Channels feed at half the hardware timeout.
    pub fn feed_period(&self) -> Duration {
        self.config.hardware_timeout / 2
    }

    fn feed_period_ticks(&self) -> u64 {
        self.provider.ticks_from_duration(self.feed_period())
    }

    fn warning_ticks(&self) -> u64 {
        self.feed_period_ticks() + self.provider.ticks_from_duration(self.config.warning_margin)
    }

    /// Allocates a channel. Must happen before [`SoftWatchdog::start`].
    pub fn install(&self) -> Result<(usize, Duration)> {
        let mut state = self.state.lock();
        if state.started {
            return Err(CoreError::WatchdogStarted);
        }
        let id = state.channels.len();
        state.channels.push(Channel {
            last_fed_tick: self.provider.now_ticks(),
            thread: None,
            warned: false,
        });
        Ok((id, self.feed_period()))
    }

    /// Names the thread that owes this channel's feed, for the post-mortem.
    pub fn register_thread(&self, channel: usize, name: impl Into<String>) {
        if let Some(chan) = self.state.lock().channels.get_mut(channel) {
            chan.thread = Some(name.into());
        }
    }

    pub fn set_warning_handler(&self, handler: WarningHandler) {
        *self.warning.lock() = Some(handler);
    }

    /// Locks the installation list and starts the hardware timer.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.started {
            return Err(CoreError::WatchdogStarted);
        }
        state.started = true;
        let now = self.provider.now_ticks();
        for chan in &mut state.channels {
            chan.last_fed_tick = now;
        }
        drop(state);
        self.hw.lock().start(self.config.hardware_timeout);
        tracing::info!(
            timeout = ?self.config.hardware_timeout,
            feed_period = ?self.feed_period(),
            "watchdog started"
        );
        Ok(())
    }

    pub fn feed(&self, channel: usize) {
        let now = self.provider.now_ticks();
        if let Some(chan) = self.state.lock().channels.get_mut(channel) {
            chan.last_fed_tick = now;
            chan.warned = false;
        }
    }

    pub fn feed_all(&self) {
        let now = self.provider.now_ticks();
        for chan in &mut self.state.lock().channels {
            chan.last_fed_tick = now;
            chan.warned = false;
        }
    }

    /// One scan: feeds the hardware only while every channel is fresh, and
    /// raises the warning callback for channels starved past the margin.
    /// Run this at least twice per feed period.
    pub fn service(&self) {
        let now = self.provider.now_ticks();
        let period = self.feed_period_ticks();
        let warning_at = self.warning_ticks();

        let mut starved = Vec::new();
        let all_fresh = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            let mut all_fresh = true;
            for (id, chan) in state.channels.iter_mut().enumerate() {
                let age = now.saturating_sub(chan.last_fed_tick);
                if age > period {
                    all_fresh = false;
                    if age > warning_at && !chan.warned {
                        chan.warned = true;
                        starved.push((id, chan.thread.clone()));
                    }
                }
            }
            all_fresh
        };

        if all_fresh {
            self.hw.lock().feed();
        }

        if !starved.is_empty() {
            let warning = self.warning.lock();
            for (id, thread) in starved {
                tracing::warn!(channel = id, thread = ?thread, "watchdog channel starved");
                if let Some(handler) = warning.as_ref() {
                    handler(id, thread.as_deref());
                }
            }
        }
    }

    /// Registered thread name of a channel, if any.
    pub fn thread_name(&self, channel: usize) -> Option<String> {
        self.state
            .lock()
            .channels
            .get(channel)
            .and_then(|c| c.thread.clone())
    }
}

/// Hosted stand-in for the hardware channel: a monitor thread that invokes
/// the fatal handler when the deadline lapses without a feed.
pub struct ThreadHardwareWatchdog {
    deadline: Arc<Mutex<Option<Instant>>>,
    timeout: Duration,
    stop: Arc<AtomicBool>,
    fatal: Option<Box<dyn FnOnce() + Send>>,
}

impl ThreadHardwareWatchdog {
    pub fn new(fatal: Box<dyn FnOnce() + Send>) -> Self {
        ThreadHardwareWatchdog {
            deadline: Arc::new(Mutex::new(None)),
            timeout: Duration::ZERO,
            stop: Arc::new(AtomicBool::new(false)),
            fatal: Some(fatal),
        }
    }
}

impl HardwareWatchdog for ThreadHardwareWatchdog {
    fn start(&mut self, timeout: Duration) {
        self.timeout = timeout;
        *self.deadline.lock() = Some(Instant::now() + timeout);

        let deadline = self.deadline.clone();
        let stop = self.stop.clone();
        let fatal = self.fatal.take();
        std::thread::Builder::new()
            .name("hw-watchdog".into())
            .spawn(move || {
                let mut fatal = fatal;
                loop {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    let expired = deadline.lock().is_some_and(|d| Instant::now() >= d);
                    if expired {
                        tracing::error!("hardware watchdog expired");
                        if let Some(f) = fatal.take() {
                            f();
                        }
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            })
            .expect("spawning hw watchdog thread");
    }

    fn feed(&mut self) {
        *self.deadline.lock() = Some(Instant::now() + self.timeout);
    }
}

impl Drop for ThreadHardwareWatchdog {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
