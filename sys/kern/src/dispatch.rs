// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The interrupt dispatcher: one entry point for everything.
//!
//! The context-switch assembly calls [`exception_entry`] on the ISR stack
//! with interrupts masked, for every level-1 interrupt *and* every CPU
//! exception. The dispatcher demultiplexes:
//!
//! - **Tick**: acknowledge the timer, advance kernel time, charge the
//!   interrupted task, wake due sleepers, run expired software timers, and
//!   reschedule.
//! - **Software interrupt**: some task asked to yield; reschedule.
//! - **Peripheral** (serial receive): call the registered hook. Hooks run
//!   in interrupt context and must be short and non-blocking.
//! - **Non-interrupt exception** (illegal instruction, load/store error):
//!   return without action, resuming the faulting task. Marking the task
//!   Dead and rescheduling instead would be a one-line change in
//!   `exception_entry`; resuming matches the current policy of treating
//!   these as spurious.
//!
//! Within a single entry, sleeper wake-up happens before scheduling, so a
//! task whose wake tick arrives this tick is eligible for selection
//! immediately.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::arch::{self, IntSource};
use crate::startup::with_task_table;
use crate::swtimer;

/// Kernel time: ticks since `enable_interrupts`, wrapping at 2^32. Written
/// only by the dispatcher; read freely by tasks. All longer-than-a-tick
/// arithmetic on this value must use signed differences.
static TICK_COUNT: AtomicU32 = AtomicU32::new(0);

/// Registered serial-receive hook, stored as a bare word so reading it
/// never needs a lock. Zero means none.
static SERIAL_HOOK: AtomicUsize = AtomicUsize::new(0);

/// Reads the current tick count. Monotone (mod 2^32); no guard needed.
pub fn tick_count() -> u32 {
    TICK_COUNT.load(Ordering::Relaxed)
}

/// Registers `hook` to be called on serial-receive interrupts. The serial
/// driver owns the FIFO; the kernel only routes the interrupt.
pub fn set_serial_hook(hook: fn()) {
    SERIAL_HOOK.store(hook as usize, Ordering::Relaxed);
}

fn serial_hook() -> Option<fn()> {
    let raw = SERIAL_HOOK.load(Ordering::Relaxed);
    if raw == 0 {
        None
    } else {
        // Safety: the only non-zero value ever stored is a fn() cast.
        Some(unsafe { core::mem::transmute::<usize, fn()>(raw) })
    }
}

/// The Rust half of the exception path. Called by the assembly entry after
/// the context frame is saved, on the ISR stack, interrupts masked.
#[no_mangle]
pub extern "C" fn exception_entry() {
    if !arch::exception_is_interrupt() {
        // CPU exception in the current task: resume it (see module docs).
        return;
    }

    let pending = arch::pending_interrupts();
    let mut reschedule = false;

    if pending.contains(IntSource::TICK) {
        arch::ack_tick();
        let now = advance_tick();
        with_task_table(|t| {
            t.charge_current();
            t.wake_sleepers(now);
        });
        swtimer::service(now);
        reschedule = true;
    }

    if pending.contains(IntSource::SOFT) {
        reschedule = true;
    }

    if pending.contains(IntSource::SERIAL) {
        if let Some(hook) = serial_hook() {
            hook();
        }
    }

    if reschedule {
        with_task_table(|t| {
            t.schedule();
        });
    }

    // Drop the edge/software pending bits we just handled; level-triggered
    // peripheral sources clear at their device.
    arch::clear_pending(pending & (IntSource::TICK | IntSource::SOFT));
}

/// Bumps kernel time. Plain load/store rather than read-modify-write: the
/// dispatcher is the only writer and runs with interrupts masked.
fn advance_tick() -> u32 {
    let now = TICK_COUNT.load(Ordering::Relaxed).wrapping_add(1);
    TICK_COUNT.store(now, Ordering::Relaxed);
    now
}

#[cfg(test)]
mod tests {
    use super::*;

    // The full exception path needs the global table and so can't run
    // multi-threaded under the test harness; the pieces are covered by the
    // task/sem/swtimer tests. What we verify here is the plumbing that has
    // no global state.

    #[test]
    fn serial_hook_roundtrip() {
        fn hook() {}
        set_serial_hook(hook);
        let got = serial_hook().unwrap();
        assert_eq!(got as usize, hook as usize);
    }

    #[test]
    fn tick_advances_by_one() {
        let before = advance_tick();
        let after = advance_tick();
        assert_eq!(after, before.wrapping_add(1));
    }
}
