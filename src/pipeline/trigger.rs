//! Periodic capture trigger on top of a [`HardwareTimer`]

use std::time::Duration;

use tracing::info;

use super::signal::TickNotifier;
use super::timer::{HardwareTimer, TimerConfig};
use crate::error::TimerError;
use crate::TimerSettings;

pub struct PeriodicTrigger {
    timer: Box<dyn HardwareTimer>,
    settings: TimerSettings,
}

impl PeriodicTrigger {
    pub fn new(timer: Box<dyn HardwareTimer>, settings: TimerSettings) -> Self {
        Self { timer, settings }
    }

    /// Fire `notifier` every `interval` until [`stop`](Self::stop).
    pub fn start(&mut self, interval: Duration, notifier: TickNotifier) -> Result<(), TimerError> {
        let config =
            TimerConfig::for_interval(interval, self.settings.base_clock_hz, self.settings.divider);
        self.timer.configure(config)?;
        self.timer.register_isr(Box::new(move |ctx| {
            ctx.clear_interrupt();
            ctx.rearm_alarm();
            notifier.notify();
        }));
        self.timer.start()?;
        info!(
            "Capture trigger armed: every {:?} ({} timer ticks)",
            interval, config.alarm_ticks
        );
        Ok(())
    }

    /// Stop firing. Drops the notifier held by the interrupt handler.
    pub fn stop(&mut self) {
        if self.timer.is_running() {
            info!("Capture trigger stopped");
        }
        self.timer.stop();
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_running()
    }
}
