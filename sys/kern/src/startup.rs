// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup and the global task table.
//!
//! The table and the stack slabs are statics; everything reaches the table
//! through [`with_task_table`], which enforces exclusive access with a
//! borrow flag. Callers in task context must hold an interrupt guard around
//! the call so the dispatcher can't interleave; the dispatcher itself runs
//! with interrupts masked by construction.

use crate::arch::{self, IntSource};
use crate::cell::KCell;
use crate::task::{Stacks, TaskTable};

static TASK_TABLE: KCell<TaskTable> = KCell::new(TaskTable::new());

struct StackSlabs(core::cell::UnsafeCell<Stacks>);

// Safety: borrowed exactly once, at init.
unsafe impl Sync for StackSlabs {}

static STACKS: StackSlabs =
    StackSlabs(core::cell::UnsafeCell::new(Stacks::new()));

/// Runs `body` with exclusive access to the task table.
///
/// # Panics
///
/// On reentrant use. Reentry can only happen if a task-context caller
/// forgot its interrupt guard and the dispatcher arrived while the table
/// was borrowed -- a bug worth dying loudly for.
pub(crate) fn with_task_table<R>(body: impl FnOnce(&mut TaskTable) -> R) -> R {
    let mut table = TASK_TABLE.borrow_mut();
    body(&mut table)
}

/// Builds the idle task in slot 0 and hands every slot its stack slab.
/// Call once, after [`crate::mem::init`], before creating tasks.
pub fn init_scheduler() {
    let _guard = arch::InterruptGuard::acquire();
    with_task_table(|t| {
        // Safety: STACKS is a static, borrowed only here, and outlives the
        // kernel.
        unsafe {
            t.attach_stacks(&mut *STACKS.0.get());
        }
        t.spawn_idle(arch::idle_task as usize);
    });
    klog!("sched: idle task ready");
}

/// Unmasks the interrupt sources the kernel owns and starts the tick
/// timer. Preemption begins with the first tick after [`start`].
pub fn enable_interrupts() {
    arch::enable_interrupt_sources(
        IntSource::TICK | IntSource::SOFT | IntSource::SERIAL,
    );
    arch::start_tick_timer();
    klog!("sched: tick source armed");
}

/// Hands the CPU to the scheduler: picks the first task (idle, unless the
/// boot path created something better), loads its context, and
/// returns-from-exception into it. Interrupts unmask as that task begins.
/// Never returns.
///
/// # Safety
///
/// Call exactly once, from the boot path, after `init_scheduler` and
/// `enable_interrupts`.
pub unsafe fn start() -> ! {
    // schedule() records the chosen task in the arch's current-task
    // pointer, which is all the restore path needs.
    with_task_table(|t| {
        t.schedule();
    });
    unsafe { arch::start_first_task() }
}
