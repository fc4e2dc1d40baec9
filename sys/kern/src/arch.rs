// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents.
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, tailored for the current target. Each port must define
//! the same set of names:
//!
//! - `InterruptGuard` -- scoped level-1 interrupt masking, see below.
//! - `memory_barrier` / `instruction_barrier`.
//! - `set_current_task` -- records the TCB the context switch reads the
//!   saved stack pointer through.
//! - `pend_soft_interrupt` -- the one-bit "please reschedule" register.
//! - `exception_is_interrupt`, `pending_interrupts`, `ack_tick`,
//!   `clear_pending` -- dispatcher plumbing.
//! - `enable_interrupt_sources`, `start_tick_timer` -- init-time setup.
//! - `start_first_task`, `idle_task`, `wait_for_interrupt`,
//!   `entry_trampoline_addr` -- scheduler entry points.
//!
//! The `lx106` port is the real hardware; `fake` exists so that the
//! scheduler, semaphores, queues, and timers can be exercised by `cargo
//! test` on a development machine.

pub mod frame;

pub use frame::{ContextFrame, SavedState, CONTEXT_FRAME_SIZE, INITIAL_PS};

bitflags::bitflags! {
    /// Level-1 interrupt sources the kernel cares about. Bit positions match
    /// the platform's interrupt map, so the raw pending word can be wrapped
    /// directly.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct IntSource: u32 {
        /// Serial receive.
        const SERIAL = 1 << 5;
        /// Software interrupt, raised by `yield`.
        const SOFT = 1 << 7;
        /// Periodic tick timer.
        const TICK = 1 << 9;
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "xtensa")] {
        pub mod lx106;
        pub use lx106::*;
    } else {
        pub mod fake;
        pub use fake::*;
    }
}
