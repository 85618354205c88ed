//! 64-bit system time on top of a 32-bit cycle counter.
//!
//! The counter hardware exposes a free-running 32-bit count and a comparator
//! that raises an interrupt when the count reaches it. A comparator value of
//! `1` marks the rollover interrupt; the timer keeps the high word in
//! software and bumps it each time that interrupt is serviced.
//!
//! The timer is touched from both interrupt and task context, so it lives in
//! an [`IrqLock`](crate::IrqLock):
//!
//! ```
//! use pcm_pipeline::{CycleCounter, IrqLock, Timer64};
//!
//! #[derive(Default)]
//! struct Counter { count: u32, compare: u32, pending: bool }
//!
//! impl CycleCounter for Counter {
//!     fn count(&self) -> u32 { self.count }
//!     fn compare(&self) -> u32 { self.compare }
//!     fn set_compare(&mut self, value: u32) { self.compare = value; }
//!     fn irq_pending(&self) -> bool { self.pending }
//!     fn clear_irq(&mut self) { self.pending = false; }
//! }
//!
//! let timer = IrqLock::new(Timer64::new(Counter::default()));
//! assert_eq!(timer.with(|t| t.system_time()), 0);
//! ```

use crate::ComponentError;

/// Comparator value reserved for the rollover interrupt.
pub const ROLLOVER_COMPARE: u32 = 1;

/// 32-bit cycle counter with one comparator.
pub trait CycleCounter: Send {
    /// Current low 32 bits of time.
    fn count(&self) -> u32;

    /// Current comparator value.
    fn compare(&self) -> u32;

    /// Programs the comparator.
    fn set_compare(&mut self, value: u32);

    /// Returns true while the comparator interrupt is raised and unserviced.
    fn irq_pending(&self) -> bool;

    /// Acknowledges the comparator interrupt.
    fn clear_irq(&mut self);
}

/// Callback run when a programmed timeout expires.
pub type TimerHandler = Box<dyn FnMut() + Send>;

/// Software-extended 64-bit timer.
pub struct Timer64<C> {
    counter: C,
    hitime: u32,
    hitimeout: u32,
    lowtimeout: u32,
    handler: Option<TimerHandler>,
}

impl<C: CycleCounter> Timer64<C> {
    /// Creates a timer at high word 0 with no handler.
    pub fn new(counter: C) -> Self {
        Self {
            counter,
            hitime: 0,
            hitimeout: 0,
            lowtimeout: 0,
            handler: None,
        }
    }

    /// Installs the timeout handler and restarts the high word at 0.
    pub fn register(&mut self, handler: TimerHandler) {
        self.handler = Some(handler);
        self.hitime = 0;
        self.hitimeout = 0;
    }

    /// Software high word.
    pub fn high_word(&self) -> u32 {
        self.hitime
    }

    /// The counter hardware.
    pub fn counter(&self) -> &C {
        &self.counter
    }

    /// Mutable access to the counter hardware.
    pub fn counter_mut(&mut self) -> &mut C {
        &mut self.counter
    }

    /// Comparator interrupt service routine.
    ///
    /// A rollover bumps the high word; any other comparator match runs the
    /// handler. The comparator is then set to the low timeout when the
    /// pending timeout falls in the current high period, else to the
    /// rollover marker.
    pub fn on_interrupt(&mut self) {
        if self.counter.compare() == ROLLOVER_COMPARE {
            self.hitime = self.hitime.wrapping_add(1);
            self.counter.clear_irq();
            tracing::trace!(high = self.hitime, "timer rollover");
        } else if let Some(handler) = self.handler.as_mut() {
            handler();
        }

        let next = if self.hitimeout == self.hitime {
            self.lowtimeout
        } else {
            ROLLOVER_COMPARE
        };
        self.counter.set_compare(next);
    }

    /// Current 64-bit time.
    ///
    /// A rollover interrupt that is raised but not yet serviced counts as
    /// already applied.
    pub fn system_time(&self) -> u64 {
        let low = self.counter.count();
        let high = if self.counter.irq_pending() && self.counter.compare() == ROLLOVER_COMPARE {
            self.hitime.wrapping_add(1)
        } else {
            self.hitime
        };
        (u64::from(high) << 32) | u64::from(low)
    }

    /// Programs a timeout at absolute time `ticks`.
    ///
    /// A low word of `1` would collide with the rollover marker and is moved
    /// to `2`. Returns the time actually programmed.
    pub fn set(&mut self, ticks: u64) -> Result<u64, ComponentError> {
        let ticks = if ticks & 0xffff_ffff == u64::from(ROLLOVER_COMPARE) {
            ticks + 1
        } else {
            ticks
        };
        let hitimeout = (ticks >> 32) as u32;

        if hitimeout < self.hitime {
            tracing::error!(ticks, high = self.hitime, "timeout in the past");
            return Err(ComponentError::invalid_argument(format!(
                "timeout {ticks:#x} is before high word {}",
                self.hitime
            )));
        }

        self.hitimeout = hitimeout;
        self.lowtimeout = ticks as u32;
        self.counter.set_compare(self.lowtimeout);
        Ok(ticks)
    }
}

impl<C> std::fmt::Debug for Timer64<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer64")
            .field("hitime", &self.hitime)
            .field("hitimeout", &self.hitimeout)
            .field("lowtimeout", &self.lowtimeout)
            .field("handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IrqLock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct MockCounter {
        count: u32,
        compare: u32,
        pending: bool,
    }

    impl CycleCounter for MockCounter {
        fn count(&self) -> u32 {
            self.count
        }

        fn compare(&self) -> u32 {
            self.compare
        }

        fn set_compare(&mut self, value: u32) {
            self.compare = value;
        }

        fn irq_pending(&self) -> bool {
            self.pending
        }

        fn clear_irq(&mut self) {
            self.pending = false;
        }
    }

    fn counted_timer() -> (Timer64<MockCounter>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer64::new(MockCounter::default());
        let counter = Arc::clone(&hits);
        timer.register(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (timer, hits)
    }

    #[test]
    fn test_rollover_bumps_high_word() {
        let (mut timer, hits) = counted_timer();
        timer.counter_mut().set_compare(ROLLOVER_COMPARE);
        timer.counter_mut().pending = true;

        timer.on_interrupt();

        assert_eq!(timer.high_word(), 1);
        assert!(!timer.counter().pending);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        // no timeout in this period: keep watching for the next rollover
        assert_eq!(timer.counter().compare(), ROLLOVER_COMPARE);
    }

    #[test]
    fn test_timeout_runs_handler() {
        let (mut timer, hits) = counted_timer();
        timer.set(500).unwrap();
        assert_eq!(timer.counter().compare(), 500);

        timer.on_interrupt();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(timer.high_word(), 0);
    }

    #[test]
    fn test_timeout_in_later_period_waits_for_rollover() {
        let (mut timer, hits) = counted_timer();
        timer.set((1 << 32) | 40).unwrap();
        timer.counter_mut().set_compare(ROLLOVER_COMPARE);

        timer.on_interrupt();
        assert_eq!(timer.high_word(), 1);
        assert_eq!(timer.counter().compare(), 40);

        timer.on_interrupt();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_system_time_counts_pending_rollover() {
        let mut timer = Timer64::new(MockCounter::default());
        timer.counter_mut().count = 7;
        assert_eq!(timer.system_time(), 7);

        timer.counter_mut().set_compare(ROLLOVER_COMPARE);
        timer.counter_mut().pending = true;
        assert_eq!(timer.system_time(), (1 << 32) | 7);

        timer.on_interrupt();
        assert_eq!(timer.system_time(), (1 << 32) | 7);
    }

    #[test]
    fn test_set_moves_off_rollover_marker() {
        let mut timer = Timer64::new(MockCounter::default());
        assert_eq!(timer.set(1).unwrap(), 2);
        assert_eq!(timer.counter().compare(), 2);
    }

    #[test]
    fn test_set_rejects_past_period() {
        let mut timer = Timer64::new(MockCounter::default());
        timer.counter_mut().set_compare(ROLLOVER_COMPARE);
        timer.on_interrupt();
        timer.counter_mut().set_compare(ROLLOVER_COMPARE);
        timer.on_interrupt();
        assert_eq!(timer.high_word(), 2);

        assert!(matches!(
            timer.set((1 << 32) | 100),
            Err(ComponentError::InvalidArgument { .. })
        ));
        assert!(timer.set((2 << 32) | 100).is_ok());
    }

    #[test]
    fn test_timer_behind_irq_lock() {
        let timer = Arc::new(IrqLock::new(Timer64::new(MockCounter::default())));
        let isr = Arc::clone(&timer);

        std::thread::spawn(move || {
            isr.with(|t| {
                t.counter_mut().set_compare(ROLLOVER_COMPARE);
                t.on_interrupt();
            });
        })
        .join()
        .unwrap();

        assert_eq!(timer.with(|t| t.high_word()), 1);
    }
}
