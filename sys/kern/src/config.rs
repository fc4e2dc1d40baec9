// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel configuration constants.
//!
//! Everything here is fixed at compile time; there is no runtime
//! configuration surface. The numbers are sized for a part with about 80 KiB
//! of data RAM, so be deliberate about raising them.

/// Maximum number of tasks, including the idle task in slot 0.
pub const MAX_TASKS: usize = 8;

/// Scheduler tick rate in Hz. The platform may run any rate of at least
/// 10 Hz; timeouts elsewhere in the system are expressed in ticks of this
/// rate.
pub const TICK_HZ: u32 = 100;

/// Stack size for every task, in bytes. One fixed slab per slot.
pub const TASK_STACK_SIZE: usize = 1536;

/// Size of the single stack shared by all interrupt service routines.
pub const ISR_STACK_SIZE: usize = 512;

/// Fixed-block pool geometry: 256 blocks of 32 bytes, 8 KiB total.
pub const POOL_BLOCK_SIZE: usize = 32;
pub const POOL_BLOCK_COUNT: usize = 256;

/// Heap region size for variable-size allocations.
pub const HEAP_SIZE: usize = 8192;

/// Maximum number of registered software timers.
pub const SWTIMER_MAX: usize = 8;
