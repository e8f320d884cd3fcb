//! Hardware timer abstraction and a thread-backed implementation
//!
//! The model follows a general purpose timer group: a counter counting up at
//! `base_clock / divider`, an alarm value, and an interrupt raised when the
//! counter reaches the alarm. The alarm fires once; the interrupt handler has to
//! clear the interrupt and re-enable the alarm for the timer to keep firing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::TimerError;

/// APB clock feeding the timer groups
pub const DEFAULT_BASE_CLOCK_HZ: u64 = 80_000_000;
/// Slowest divider the hardware supports
pub const DEFAULT_DIVIDER: u32 = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub divider: u32,
    /// Counter value raising the alarm
    pub alarm_ticks: u64,
    /// Reset the counter to zero on alarm
    pub auto_reload: bool,
}

impl TimerConfig {
    /// Alarm configuration firing every `interval`.
    pub fn for_interval(interval: Duration, base_clock_hz: u64, divider: u32) -> Self {
        let scale = base_clock_hz / divider.max(1) as u64;
        let alarm_ticks = (interval.as_millis() as u64 * scale / 1000).max(1);
        Self {
            divider,
            alarm_ticks,
            auto_reload: true,
        }
    }

    /// Wall time between two alarms.
    pub fn period(&self, base_clock_hz: u64) -> Duration {
        let nanos = self.alarm_ticks as u128 * self.divider as u128 * 1_000_000_000
            / base_clock_hz.max(1) as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    pub fn validate(&self) -> Result<(), TimerError> {
        if !(2..=65_536).contains(&self.divider) {
            return Err(TimerError::InvalidDivider(self.divider));
        }
        Ok(())
    }
}

/// Interrupt state visible to the handler.
#[derive(Debug, Default)]
pub struct IsrContext {
    interrupt_pending: bool,
    alarm_armed: bool,
}

impl IsrContext {
    /// Context of an alarm that just fired.
    pub fn fired() -> Self {
        Self {
            interrupt_pending: true,
            alarm_armed: false,
        }
    }

    pub fn clear_interrupt(&mut self) {
        self.interrupt_pending = false;
    }

    pub fn rearm_alarm(&mut self) {
        self.alarm_armed = true;
    }

    pub fn interrupt_pending(&self) -> bool {
        self.interrupt_pending
    }

    pub fn alarm_armed(&self) -> bool {
        self.alarm_armed
    }
}

/// Interrupt handler. Runs in interrupt context: no blocking, no I/O, no allocation.
pub type Isr = Box<dyn FnMut(&mut IsrContext) + Send + 'static>;

pub trait HardwareTimer: Send {
    fn configure(&mut self, config: TimerConfig) -> Result<(), TimerError>;

    /// Install the alarm handler, replacing any previous one.
    fn register_isr(&mut self, isr: Isr);

    /// Reset the counter and start counting.
    fn start(&mut self) -> Result<(), TimerError>;

    /// Pause the counter and disable the interrupt. The handler is dropped and
    /// has to be registered again before the next start.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

struct Running {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Timer emulated by a dedicated thread standing in for the interrupt context.
pub struct SoftTimer {
    base_clock_hz: u64,
    config: Option<TimerConfig>,
    isr: Option<Isr>,
    running: Option<Running>,
}

impl SoftTimer {
    pub fn new(base_clock_hz: u64) -> Self {
        Self {
            base_clock_hz,
            config: None,
            isr: None,
            running: None,
        }
    }
}

impl Default for SoftTimer {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_CLOCK_HZ)
    }
}

fn run_alarm_loop(period: Duration, auto_reload: bool, stop: Arc<AtomicBool>, mut isr: Isr) {
    let mut deadline = Instant::now() + period;
    let mut armed = true;

    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if !armed || now < deadline {
            let wait = if armed { deadline - now } else { period };
            thread::park_timeout(wait);
            continue;
        }

        let mut ctx = IsrContext::fired();
        isr(&mut ctx);
        armed = ctx.alarm_armed();

        // Without auto reload the counter runs past the alarm and wraps eventually
        deadline = if auto_reload {
            deadline + period
        } else {
            deadline + period * 1024
        };
        // Do not try to catch up on alarms missed while descheduled
        if deadline < Instant::now() {
            deadline = Instant::now() + period;
        }
    }
}

impl HardwareTimer for SoftTimer {
    fn configure(&mut self, config: TimerConfig) -> Result<(), TimerError> {
        config.validate()?;
        if self.running.is_some() {
            return Err(TimerError::AlreadyRunning);
        }
        self.config = Some(config);
        Ok(())
    }

    fn register_isr(&mut self, isr: Isr) {
        self.isr = Some(isr);
    }

    fn start(&mut self) -> Result<(), TimerError> {
        if self.running.is_some() {
            return Err(TimerError::AlreadyRunning);
        }
        let config = self.config.ok_or(TimerError::NotConfigured)?;
        let isr = self.isr.take().ok_or(TimerError::NoIsr)?;
        let period = config.period(self.base_clock_hz);
        let stop = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name("lapse-timer".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || run_alarm_loop(period, config.auto_reload, stop, isr)
            })
            .map_err(TimerError::Spawn)?;

        debug!("Soft timer started, period {:?}", period);
        self.running = Some(Running { stop, handle });
        Ok(())
    }

    fn stop(&mut self) {
        self.isr = None;
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::Release);
            running.handle.thread().unpark();
            if running.handle.join().is_err() {
                warn!("Timer interrupt handler panicked");
            }
            debug!("Soft timer stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for SoftTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
