// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for the Xtensa LX106 core.
//!
//! # Interrupt model
//!
//! Every level-1 interrupt and exception funnels through a single entry
//! point, `_exception_entry`, reached from the hardware vector. The entry
//! saves the full context frame onto the *interrupted task's* stack, records
//! the resulting stack pointer at offset 0 of the current TCB, pivots onto a
//! dedicated ISR stack, and calls the Rust dispatcher with interrupts still
//! masked (PS.EXCM is set for the whole visit). On return it reloads the
//! saved stack pointer from whichever task is current -- which may be a
//! different task if the dispatcher ran the scheduler -- pops the frame, and
//! issues `rfe`, which clears the exception-mask bit and jumps to the saved
//! PC in one step.
//!
//! Unlike larger cores there is no cheap "partial save" path: the LX106 has
//! no automatic register stacking at all, so every entry pays for the full
//! 80-byte frame. At 100 Hz that cost is noise.
//!
//! # Tick timer
//!
//! FRC1 is programmed for auto-reload edge interrupts at `TICK_HZ`. The
//! counter is small and only counts down, so the kernel's notion of time is
//! the 32-bit software tick counter maintained by the dispatcher, not the
//! hardware count.

use core::arch::{asm, global_asm};
use core::ptr::NonNull;

use super::frame::CONTEXT_FRAME_SIZE;
use super::IntSource;
use crate::config::{ISR_STACK_SIZE, TICK_HZ};
use crate::task::Task;

/// CPU clock, fixed by the part.
const CPU_FREQ_HZ: u32 = 80_000_000;
/// FRC1 prescaler selected below (divide by 16).
const FRC1_PRESCALER: u32 = 16;
/// FRC1 reload value for one tick period.
const FRC1_LOAD_VAL: u32 = CPU_FREQ_HZ / FRC1_PRESCALER / TICK_HZ;

// FRC1 register block.
const FRC1_LOAD: *mut u32 = 0x6000_0600 as *mut u32;
const FRC1_CTRL: *mut u32 = 0x6000_0608 as *mut u32;
const FRC1_INT_CLR: *mut u32 = 0x6000_060C as *mut u32;

const FRC1_CTRL_INT_EDGE: u32 = 0 << 0;
const FRC1_CTRL_DIV16: u32 = 1 << 2;
const FRC1_CTRL_AUTOLOAD: u32 = 1 << 6;
const FRC1_CTRL_EN: u32 = 1 << 7;

/// DPORT edge-interrupt enable; bit 1 routes FRC1.
const DPORT_EDGE_INT_ENABLE: *mut u32 = 0x3FF0_0004 as *mut u32;
const DPORT_EDGE_INT_TIMER1: u32 = 1 << 1;

/// EXCCAUSE value for a level-1 interrupt (as opposed to a fault).
const EXCCAUSE_LEVEL1_INTERRUPT: u32 = 4;

/// The current task pointer. The context switch assembly dereferences this
/// to find the saved stack pointer (TCB offset 0), so it must stay a plain
/// word-sized global with this exact name.
#[no_mangle]
static mut CURRENT_TASK_PTR: Option<NonNull<Task>> = None;

/// The stack all ISRs run on. Not owned by any task. The assembly
/// references the symbol directly to compute its top.
#[no_mangle]
#[used]
static mut ISR_STACK: IsrStack = IsrStack([0; ISR_STACK_SIZE]);

#[repr(C, align(16))]
struct IsrStack([u8; ISR_STACK_SIZE]);

/// Scoped level-1 interrupt disable.
///
/// Acquiring raises INTLEVEL to 15 and remembers the previous PS; dropping
/// restores it. Guards nest: releasing an inner guard leaves the outer one's
/// masking in effect, because the inner guard restores the already-masked
/// PS it observed. A memory barrier is issued before the restore so stores
/// made under the guard are published first.
///
/// Safe to use from any context, including the dispatcher (where it is a
/// cheap no-op in effect, since interrupts are already masked).
pub struct InterruptGuard {
    prev_ps: u32,
}

impl InterruptGuard {
    #[inline(always)]
    pub fn acquire() -> Self {
        let prev_ps: u32;
        // Safety: masking interrupts has no memory-safety implications.
        unsafe {
            asm!("rsil {0}, 15", out(reg) prev_ps, options(nostack));
        }
        Self { prev_ps }
    }
}

impl Drop for InterruptGuard {
    #[inline(always)]
    fn drop(&mut self) {
        memory_barrier();
        // Safety: restoring the PS we saved cannot unmask anything that
        // wasn't unmasked when the guard was acquired.
        unsafe {
            asm!(
                "wsr {0}, ps",
                "isync",
                in(reg) self.prev_ps,
                options(nostack),
            );
        }
    }
}

/// Orders memory accesses before subsequent ones; used to publish stores
/// before releasing an interrupt guard.
#[inline(always)]
pub fn memory_barrier() {
    // Safety: barriers are side-effect-free.
    unsafe {
        asm!("memw", options(nostack));
    }
}

/// Synchronizes with instruction fetch after writing registers that affect
/// it (VECBASE, PS, cache control).
#[inline(always)]
pub fn instruction_barrier() {
    // Safety: barriers are side-effect-free.
    unsafe {
        asm!("isync", options(nostack));
    }
}

/// Records `task` as the current task for the context switch assembly.
///
/// # Safety
///
/// This records a pointer that aliases `task`. Only the exception
/// entry/exit sequences may read it, and only while the kernel guarantees
/// the task table outlives them -- which the static table does.
pub unsafe fn set_current_task(task: &mut Task) {
    CURRENT_TASK_PTR = Some(NonNull::from(task));
}

/// Requests a reschedule by raising the software interrupt. Idempotent:
/// setting an already-pending bit is a no-op, and the task simply resumes
/// when next chosen.
#[inline]
pub fn pend_soft_interrupt() {
    let bit: u32 = IntSource::SOFT.bits();
    // Safety: setting a software interrupt bit is always sound; at worst it
    // causes a spurious dispatch.
    unsafe {
        asm!("wsr {0}, intset", "isync", in(reg) bit, options(nostack));
    }
}

/// Distinguishes "a level-1 interrupt is pending" from a genuine CPU
/// exception (illegal instruction, load/store error, ...).
pub fn exception_is_interrupt() -> bool {
    let cause: u32;
    // Safety: reading EXCCAUSE is side-effect-free.
    unsafe {
        asm!("rsr {0}, exccause", out(reg) cause, options(nostack));
    }
    cause == EXCCAUSE_LEVEL1_INTERRUPT
}

/// Reads the pending-interrupt word, filtered to the sources we manage.
pub fn pending_interrupts() -> IntSource {
    let raw: u32;
    // Safety: reading INTERRUPT is side-effect-free.
    unsafe {
        asm!("rsr {0}, interrupt", out(reg) raw, options(nostack));
    }
    IntSource::from_bits_truncate(raw)
}

/// Acknowledges the FRC1 interrupt at the peripheral.
pub fn ack_tick() {
    // Safety: FRC1_INT_CLR is a write-1-to-clear register.
    unsafe {
        FRC1_INT_CLR.write_volatile(1);
    }
}

/// Clears edge/software pending bits after they have been handled.
pub fn clear_pending(sources: IntSource) {
    let bits = sources.bits();
    // Safety: clearing pending bits we have already serviced.
    unsafe {
        asm!("wsr {0}, intclear", "isync", in(reg) bits, options(nostack));
    }
}

/// Writes the level-1 interrupt enable mask. Called once at init with the
/// tick, soft, and serial bits; the platform owner may OR in more.
pub fn enable_interrupt_sources(sources: IntSource) {
    let bits = sources.bits();
    // Safety: read-modify-write of INTENABLE under the caller's init-time
    // single-threaded contract.
    unsafe {
        asm!(
            "rsr {tmp}, intenable",
            "or {tmp}, {tmp}, {bits}",
            "wsr {tmp}, intenable",
            "isync",
            tmp = out(reg) _,
            bits = in(reg) bits,
            options(nostack),
        );
    }
}

/// Programs FRC1 for auto-reload edge interrupts at `TICK_HZ` and enables
/// it. The interrupt must also be unmasked via `enable_interrupt_sources`.
pub fn start_tick_timer() {
    // Safety: FRC1 is owned by the kernel; nothing else programs it.
    unsafe {
        FRC1_CTRL.write_volatile(0);
        FRC1_LOAD.write_volatile(FRC1_LOAD_VAL);
        FRC1_INT_CLR.write_volatile(1);
        DPORT_EDGE_INT_ENABLE.write_volatile(
            DPORT_EDGE_INT_ENABLE.read_volatile() | DPORT_EDGE_INT_TIMER1,
        );
        FRC1_CTRL.write_volatile(
            FRC1_CTRL_DIV16
                | FRC1_CTRL_AUTOLOAD
                | FRC1_CTRL_INT_EDGE
                | FRC1_CTRL_EN,
        );
    }
}

/// The idle task body: feed the watchdog and wait for the next interrupt.
/// Runs in slot 0 forever.
#[no_mangle]
pub extern "C" fn idle_task() -> ! {
    const WDT_FEED: *mut u32 = 0x6000_0914 as *mut u32;
    loop {
        // Safety: writing the feed value is the documented way to pet the
        // watchdog; waiti at level 0 just sleeps until an interrupt.
        unsafe {
            WDT_FEED.write_volatile(0x73);
            asm!("waiti 0", options(nostack));
        }
    }
}

/// Parks the caller until an interrupt arrives. Used by the task-exit path.
pub fn wait_for_interrupt() {
    // Safety: waiti at level 0 only sleeps.
    unsafe {
        asm!("waiti 0", options(nostack));
    }
}

/// Address tasks' initial frames resume at; the trampoline pulls the entry
/// function from a2 and its argument from a3.
pub fn entry_trampoline_addr() -> usize {
    _task_entry_trampoline as usize
}

extern "C" {
    fn _task_entry_trampoline();
    fn _context_restore() -> !;
}

/// Loads the current task's saved context and starts it via the common
/// restore path. Interrupts unmask as the task begins, because its initial
/// PS has EXCM set and `rfe` clears it.
///
/// # Safety
///
/// Must be called exactly once, after the scheduler has run once (so the
/// current-task pointer names a Running task with a valid initial frame).
pub unsafe fn start_first_task() -> ! {
    instruction_barrier();
    _context_restore()
}

global_asm! {"
    .section .iram.text._exception_entry, \"ax\"
    .literal_position
    .align 4
    .global _exception_entry
    .type _exception_entry, @function

    /* Single exception/interrupt entry. The hardware vector is a bare */
    /* jump here, so every address register still holds the interrupted */
    /* task's value and a1 is its stack pointer. PS.EXCM is set and stays */
    /* set for the whole visit. */
_exception_entry:
    /* Push the context frame onto the interrupted task's stack. */
    addi a1, a1, -{frame_size}
    s32i a0, a1, 0
    s32i a2, a1, 8
    s32i a3, a1, 12
    s32i a4, a1, 16
    s32i a5, a1, 20
    s32i a6, a1, 24
    s32i a7, a1, 28
    s32i a8, a1, 32
    s32i a9, a1, 36
    s32i a10, a1, 40
    s32i a11, a1, 44
    s32i a12, a1, 48
    s32i a13, a1, 52
    s32i a14, a1, 56
    s32i a15, a1, 60
    rsr a2, ps
    s32i a2, a1, 64
    rsr a2, sar
    s32i a2, a1, 68
    rsr a2, epc1
    s32i a2, a1, 72
    /* Saved a1 is the pre-exception stack pointer. */
    addi a2, a1, {frame_size}
    s32i a2, a1, 4

    /* Record the frame's address in the current TCB. saved_sp is the TCB's */
    /* first field, so this needs no knowledge of the TCB layout. */
    movi a2, CURRENT_TASK_PTR
    l32i a2, a2, 0
    s32i a1, a2, 0

    /* Pivot to the ISR stack and run the Rust dispatcher, interrupts still */
    /* masked. The dispatcher may switch the current task. */
    movi a1, ISR_STACK + {isr_stack_size}
    call0 exception_entry

    /* Fall through to restore whichever task is now current. */
    .global _context_restore
    .type _context_restore, @function
_context_restore:
    movi a2, CURRENT_TASK_PTR
    l32i a2, a2, 0
    l32i a1, a2, 0

    l32i a2, a1, 64
    wsr a2, ps
    l32i a2, a1, 68
    wsr a2, sar
    l32i a2, a1, 72
    wsr a2, epc1
    rsync

    l32i a0, a1, 0
    l32i a2, a1, 8
    l32i a3, a1, 12
    l32i a4, a1, 16
    l32i a5, a1, 20
    l32i a6, a1, 24
    l32i a7, a1, 28
    l32i a8, a1, 32
    l32i a9, a1, 36
    l32i a10, a1, 40
    l32i a11, a1, 44
    l32i a12, a1, 48
    l32i a13, a1, 52
    l32i a14, a1, 56
    l32i a15, a1, 60
    /* Last: replace a1 with the saved pre-exception stack pointer, then */
    /* return from exception. rfe clears PS.EXCM and jumps to EPC1 */
    /* atomically. */
    l32i a1, a1, 4
    rfe

    .section .iram.text._task_entry_trampoline, \"ax\"
    .literal_position
    .align 4
    .global _task_entry_trampoline
    .type _task_entry_trampoline, @function

    /* First instruction a new task executes. Its initial frame preloaded */
    /* a2 = entry function, a3 = argument. Under the call0 ABI the first */
    /* argument travels in a2. */
_task_entry_trampoline:
    mov a4, a2
    mov a2, a3
    callx0 a4
    /* The task function returned: hand off to the exit handler, which */
    /* marks the task Dead and parks forever. */
    call0 task_exit_handler
1:
    j 1b
",
    frame_size = const CONTEXT_FRAME_SIZE,
    isr_stack_size = const ISR_STACK_SIZE,
}
