// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Software timers: one-shot and periodic callbacks driven by the tick.
//!
//! Timers are caller-owned `static`s registered with a small global
//! registry; the dispatcher services the registry once per tick. Callbacks
//! run in interrupt context with interrupts masked: they must be brief,
//! must not block, and must not allocate. Posting a semaphore or using a
//! queue's `try_send` is fine, since those never block.
//!
//! Expiry comparisons are signed differences over the 32-bit tick counter,
//! so wrap-around is harmless. A periodic timer reloads relative to its
//! *deadline* (`expire += period`), not the tick it happened to fire on, so
//! periods don't drift when a tick is served late.

use core::cell::UnsafeCell;

use crate::arch::InterruptGuard;
use crate::cell::KCell;
use crate::config::SWTIMER_MAX;
use crate::dispatch;

/// Timer callback. The argument is the opaque word given to [`SwTimer::init`].
pub type TimerFn = fn(usize);

#[derive(Copy, Clone)]
pub enum Mode {
    OneShot,
    Periodic,
}

struct TimerState {
    callback: Option<TimerFn>,
    arg: usize,
    period: u32,
    expire: u32,
    mode: Mode,
    active: bool,
}

/// A software timer. Declare one as a `static`, `init` it with a callback,
/// then `start`/`stop` it freely.
pub struct SwTimer {
    state: UnsafeCell<TimerState>,
}

// Safety: the inner state is only touched under an interrupt guard on a
// single core.
unsafe impl Sync for SwTimer {}

impl SwTimer {
    pub const fn new() -> Self {
        Self {
            state: UnsafeCell::new(TimerState {
                callback: None,
                arg: 0,
                period: 0,
                expire: 0,
                mode: Mode::OneShot,
                active: false,
            }),
        }
    }

    /// Stamps the callback and argument. The timer stays inactive until
    /// started.
    pub fn init(&self, callback: TimerFn, arg: usize) {
        let _guard = InterruptGuard::acquire();
        // Safety: guard held, single core.
        let state = unsafe { &mut *self.state.get() };
        state.callback = Some(callback);
        state.arg = arg;
        state.active = false;
    }

    fn with<R>(&self, f: impl FnOnce(&mut TimerState) -> R) -> R {
        // Safety: all callers hold an interrupt guard.
        f(unsafe { &mut *self.state.get() })
    }
}

impl Default for SwTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// The registry: up to `SWTIMER_MAX` live timers, identified by address.
pub(crate) struct TimerRegistry {
    slots: [Option<&'static SwTimer>; SWTIMER_MAX],
}

impl TimerRegistry {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [None; SWTIMER_MAX],
        }
    }

    /// Arms `timer` to fire `ticks` from `now`, registering it if it isn't
    /// already present. Restarting an armed timer just moves its deadline.
    pub(crate) fn start(
        &mut self,
        timer: &'static SwTimer,
        now: u32,
        ticks: u32,
        mode: Mode,
    ) {
        timer.with(|s| {
            s.period = ticks;
            s.expire = now.wrapping_add(ticks);
            s.mode = mode;
            s.active = true;
        });
        if self.position(timer).is_none() {
            match self.slots.iter_mut().find(|s| s.is_none()) {
                Some(slot) => *slot = Some(timer),
                None => {
                    // Registry full. Same policy as the semaphore queue:
                    // log and carry on; the timer simply won't fire.
                    timer.with(|s| s.active = false);
                    klog!("swtimer: registry full");
                }
            }
        }
    }

    /// Disarms `timer` and removes it from the registry.
    pub(crate) fn stop(&mut self, timer: &'static SwTimer) {
        timer.with(|s| s.active = false);
        if let Some(i) = self.position(timer) {
            self.slots[i] = None;
        }
    }

    /// One slot's due callback, if the timer in it has expired by `now`.
    /// Periodic timers are rescheduled, one-shots removed, *before* the
    /// callback runs, so a callback may restart its own timer.
    pub(crate) fn take_expired(
        &mut self,
        index: usize,
        now: u32,
    ) -> Option<(TimerFn, usize)> {
        let timer = self.slots[index]?;
        timer.with(|s| {
            if !s.active || (now.wrapping_sub(s.expire) as i32) < 0 {
                return None;
            }
            match s.mode {
                Mode::Periodic => s.expire = s.expire.wrapping_add(s.period),
                Mode::OneShot => s.active = false,
            }
            s.callback.map(|cb| (cb, s.arg))
        })
        .or_else(|| {
            // A one-shot that already fired lingers in its slot until this
            // sweep notices it; reclaim the slot now.
            if !timer.with(|s| s.active) {
                self.slots[index] = None;
            }
            None
        })
    }

    pub(crate) fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.map_or(false, |t| t.with(|st| st.active)))
            .count()
    }

    fn position(&self, timer: &'static SwTimer) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.map_or(false, |t| core::ptr::eq(t, timer)))
    }
}

static REGISTRY: KCell<TimerRegistry> = KCell::new(TimerRegistry::new());

/// Arms `timer` to fire in `ticks` ticks, one-shot or periodic.
pub fn start(timer: &'static SwTimer, ticks: u32, mode: Mode) {
    let _guard = InterruptGuard::acquire();
    let now = dispatch::tick_count();
    REGISTRY.borrow_mut().start(timer, now, ticks, mode);
}

/// Disarms `timer`. Harmless if it was never started.
pub fn stop(timer: &'static SwTimer) {
    let _guard = InterruptGuard::acquire();
    REGISTRY.borrow_mut().stop(timer);
}

/// Number of armed timers, for diagnostics.
pub fn active_count() -> usize {
    let _guard = InterruptGuard::acquire();
    REGISTRY.borrow_mut().active_count()
}

/// Runs every expired timer's callback. Called from the dispatcher once per
/// tick, with interrupts masked. The registry borrow is dropped around each
/// callback so callbacks may start or stop timers (including their own).
pub(crate) fn service(now: u32) {
    for i in 0..SWTIMER_MAX {
        let due = REGISTRY.borrow_mut().take_expired(i, now);
        if let Some((callback, arg)) = due {
            callback(arg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FIRED: AtomicUsize = AtomicUsize::new(0);

    fn count_up(_: usize) {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    fn nop(_: usize) {}

    fn leaked_timer(cb: TimerFn, arg: usize) -> &'static SwTimer {
        let t: &'static SwTimer = Box::leak(Box::new(SwTimer::new()));
        t.init(cb, arg);
        t
    }

    /// Drives one tick's worth of servicing against a local registry.
    fn service_local(reg: &mut TimerRegistry, now: u32) -> usize {
        let mut fired = 0;
        for i in 0..SWTIMER_MAX {
            if let Some((cb, arg)) = reg.take_expired(i, now) {
                cb(arg);
                fired += 1;
            }
        }
        fired
    }

    #[test]
    fn oneshot_fires_once_and_unregisters() {
        let mut reg = TimerRegistry::new();
        let t = leaked_timer(nop, 0);
        reg.start(t, 100, 5, Mode::OneShot);
        assert_eq!(reg.active_count(), 1);

        assert_eq!(service_local(&mut reg, 104), 0);
        assert_eq!(service_local(&mut reg, 105), 1);
        assert_eq!(reg.active_count(), 0);
        // Fires exactly once; later ticks see nothing.
        assert_eq!(service_local(&mut reg, 200), 0);
        // And its slot was reclaimed.
        assert!(reg.position(t).is_none());
    }

    #[test]
    fn periodic_fires_every_period() {
        let mut reg = TimerRegistry::new();
        let t = leaked_timer(count_up, 0);
        FIRED.store(0, Ordering::Relaxed);
        reg.start(t, 0, 50, Mode::Periodic);

        let mut fired = 0;
        for now in 1..=500u32 {
            fired += service_local(&mut reg, now);
        }
        // Ticks 50, 100, ..., 500.
        assert_eq!(fired, 10);
        assert_eq!(FIRED.load(Ordering::Relaxed), 10);
        assert_eq!(reg.active_count(), 1);
    }

    #[test]
    fn periodic_reload_is_deadline_relative() {
        let mut reg = TimerRegistry::new();
        let t = leaked_timer(nop, 0);
        reg.start(t, 0, 10, Mode::Periodic);

        // Serve the tick late: deadline was 10, we show up at 14. The next
        // deadline must be 20, not 24.
        assert_eq!(service_local(&mut reg, 14), 1);
        assert_eq!(service_local(&mut reg, 19), 0);
        assert_eq!(service_local(&mut reg, 20), 1);
    }

    #[test]
    fn stop_prevents_firing() {
        let mut reg = TimerRegistry::new();
        let t = leaked_timer(nop, 0);
        reg.start(t, 0, 5, Mode::Periodic);
        reg.stop(t);
        assert_eq!(reg.active_count(), 0);
        assert_eq!(service_local(&mut reg, 100), 0);
    }

    #[test]
    fn restart_moves_deadline() {
        let mut reg = TimerRegistry::new();
        let t = leaked_timer(nop, 0);
        reg.start(t, 0, 5, Mode::OneShot);
        reg.start(t, 0, 50, Mode::OneShot);
        // Only one registration despite two starts.
        assert_eq!(reg.active_count(), 1);
        assert_eq!(service_local(&mut reg, 5), 0);
        assert_eq!(service_local(&mut reg, 50), 1);
    }

    #[test]
    fn expiry_survives_tick_wrap() {
        let mut reg = TimerRegistry::new();
        let t = leaked_timer(nop, 0);
        // Armed just before wrap; deadline lands past zero.
        reg.start(t, u32::MAX - 2, 5, Mode::OneShot);
        assert_eq!(service_local(&mut reg, u32::MAX), 0);
        assert_eq!(service_local(&mut reg, 2), 1);
    }

    #[test]
    fn registry_overflow_logs_and_declines() {
        let mut reg = TimerRegistry::new();
        for _ in 0..SWTIMER_MAX {
            reg.start(leaked_timer(nop, 0), 0, 5, Mode::Periodic);
        }
        let extra = leaked_timer(nop, 0);
        reg.start(extra, 0, 5, Mode::Periodic);
        assert_eq!(reg.active_count(), SWTIMER_MAX);
        assert!(reg.position(extra).is_none());
    }
}
