// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side stand-in for the real port, so that the portable parts of the
//! kernel -- scheduler, semaphores, queues, timers, dispatch logic -- can be
//! compiled and tested with `cargo test` on a development machine.
//!
//! Interrupt masking is modeled as a per-thread nesting depth, and the
//! pending-interrupt word is a per-thread cell that tests can poke. Nothing
//! here can actually switch contexts; tests drive the table-level functions
//! directly instead.

use core::cell::Cell;
use core::ptr::NonNull;

use super::IntSource;
use crate::task::Task;

std::thread_local! {
    static GUARD_DEPTH: Cell<u32> = const { Cell::new(0) };
    static PENDING: Cell<u32> = const { Cell::new(0) };
    static TICK_ACKED: Cell<bool> = const { Cell::new(false) };
    static CURRENT: Cell<Option<NonNull<Task>>> = const { Cell::new(None) };
}

/// Scoped "interrupt disable": on the host this only tracks nesting depth,
/// which is still enough for tests to assert that guards are balanced.
pub struct InterruptGuard {
    _private: (),
}

impl InterruptGuard {
    pub fn acquire() -> Self {
        GUARD_DEPTH.with(|d| d.set(d.get() + 1));
        Self { _private: () }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        GUARD_DEPTH.with(|d| {
            assert!(d.get() > 0, "unbalanced interrupt guard release");
            d.set(d.get() - 1);
        });
    }
}

/// Current guard nesting depth; test-visible.
pub fn guard_depth() -> u32 {
    GUARD_DEPTH.with(|d| d.get())
}

pub fn memory_barrier() {}

pub fn instruction_barrier() {}

/// Records the current task pointer, mirroring the real port's global.
///
/// # Safety
///
/// Same aliasing contract as the real port; on the host nothing reads the
/// pointer back except tests.
pub unsafe fn set_current_task(task: &mut Task) {
    CURRENT.with(|c| c.set(Some(NonNull::from(task))));
}

/// Raises the software interrupt bit in the fake pending word.
pub fn pend_soft_interrupt() {
    PENDING.with(|p| p.set(p.get() | IntSource::SOFT.bits()));
}

pub fn exception_is_interrupt() -> bool {
    true
}

pub fn pending_interrupts() -> IntSource {
    IntSource::from_bits_truncate(PENDING.with(|p| p.get()))
}

pub fn ack_tick() {
    TICK_ACKED.with(|t| t.set(true));
}

pub fn clear_pending(sources: IntSource) {
    PENDING.with(|p| p.set(p.get() & !sources.bits()));
}

pub fn enable_interrupt_sources(_sources: IntSource) {}

pub fn start_tick_timer() {}

/// Test hook: make `sources` pending, as if the hardware latched them.
pub fn set_pending(sources: IntSource) {
    PENDING.with(|p| p.set(p.get() | sources.bits()));
}

/// Test hook: was the tick acknowledged since the last call?
pub fn take_tick_acked() -> bool {
    TICK_ACKED.with(|t| t.replace(false))
}

/// The idle body never actually runs on the host.
pub extern "C" fn idle_task() -> ! {
    panic!("idle task entered on host");
}

pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}

pub fn entry_trampoline_addr() -> usize {
    host_trampoline as usize
}

extern "C" fn host_trampoline() {}

/// # Safety
///
/// Never actually starts anything on the host.
pub unsafe fn start_first_task() -> ! {
    panic!("entering task context is not supported on the host");
}
