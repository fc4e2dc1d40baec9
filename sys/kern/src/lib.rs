// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Osprey kernel.
//!
//! This is the preemptive core of the system: the scheduler, the context
//! switch and interrupt dispatch machinery, the synchronization primitives,
//! and the guarded global allocators. Drivers, the shell, and the
//! filesystem's flash/serial plumbing live outside and reach in through the
//! seams in [`arch`], [`dispatch`], and [`klog`].
//!
//! # Design principles
//!
//! While this isn't a *deeply* principled kernel, there are some basic ideas
//! that appear consistently.
//!
//! 1. Static configuration. The task table, stacks, pool, and heap all take
//!    a single shape specified at compile time in [`config`].
//! 2. A strong preference for safe code where reasonable. The pieces that
//!    must be `unsafe` -- the context switch, the initial stack frames, the
//!    singleton globals -- are kept small and documented.
//! 3. Simple and clear algorithms over fast and clever ones. Everything
//!    here scans a table of at most eight entries.
//! 4. Indices, not pointers, for anything cyclic: semaphore wait queues
//!    store [`abi::TaskId`]s, never TCB pointers.
//!
//! # Initialization order
//!
//! The platform's `main` is expected to call, in order:
//!
//! 1. [`mem::init`] -- wires up the pool and heap.
//! 2. Filesystem mount (a collaborator concern, see the `flatfs` crate).
//! 3. [`startup::init_scheduler`] -- builds the idle task in slot 0.
//! 4. [`task::create`] for each application task.
//! 5. [`startup::enable_interrupts`] -- unmasks tick, soft-yield, and
//!    serial sources and starts the tick timer.
//! 6. [`startup::start`] -- loads the idle context and never returns.
//!
//! Calling anything before its prerequisite is a contract violation, not a
//! checked error.

#![cfg_attr(target_arch = "xtensa", no_std)]

#[macro_use]
pub mod klog;

pub mod arch;
pub mod config;
pub mod dispatch;
pub mod fail;
pub mod mem;
pub mod mq;
pub mod sem;
pub mod startup;
pub mod swtimer;
pub mod task;

mod cell;
