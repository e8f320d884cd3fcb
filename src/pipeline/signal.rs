//! Coalescing wake signal from the timer interrupt to the acquisition stage
//!
//! A channel of capacity one: a tick raised while another is still pending is
//! absorbed, so a burst of alarms produces a single wake.

use std::time::Duration;

use flume::{RecvTimeoutError, TrySendError};

/// Interrupt side. Never blocks.
#[derive(Clone)]
pub struct TickNotifier {
    tx: flume::Sender<()>,
}

/// Task side.
pub struct TickListener {
    rx: flume::Receiver<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickWait {
    /// At least one tick arrived since the last wake
    Tick,
    TimedOut,
    /// Every notifier is gone
    Closed,
}

pub fn tick_channel() -> (TickNotifier, TickListener) {
    let (tx, rx) = flume::bounded(1);
    (TickNotifier { tx }, TickListener { rx })
}

impl TickNotifier {
    /// Mark a tick as pending. Returns `false` if the tick was merged into one
    /// that is already pending or nobody is listening.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => false,
        }
    }
}

impl TickListener {
    pub fn wait(&self, timeout: Duration) -> TickWait {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => TickWait::Tick,
            Err(RecvTimeoutError::Timeout) => TickWait::TimedOut,
            Err(RecvTimeoutError::Disconnected) => TickWait::Closed,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursts_collapse_to_one_wake() {
        let (notifier, listener) = tick_channel();
        assert!(notifier.notify());
        assert!(!notifier.notify());
        assert!(!notifier.notify());

        assert_eq!(listener.wait(Duration::from_millis(10)), TickWait::Tick);
        assert_eq!(listener.wait(Duration::from_millis(10)), TickWait::TimedOut);
    }

    #[test]
    fn dropping_notifiers_closes_listener() {
        let (notifier, listener) = tick_channel();
        let isr_copy = notifier.clone();
        drop(notifier);
        assert!(isr_copy.notify());
        drop(isr_copy);

        // The pending tick is still delivered before the close
        assert_eq!(listener.wait(Duration::from_millis(10)), TickWait::Tick);
        assert_eq!(listener.wait(Duration::from_secs(5)), TickWait::Closed);
    }
}
