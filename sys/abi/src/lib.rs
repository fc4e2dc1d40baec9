// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and its collaborators.
//!
//! The shell and host-side debug tooling both need to name tasks, interpret
//! task states, and translate kernel error codes. Those types live here so
//! that the kernel proper doesn't have to be a dependency of every tool that
//! merely wants the vocabulary.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Names a slot in the kernel's task table.
///
/// Task slots are assigned at `task_create` time and never move; slot 0 is
/// always the idle task. There is no generation number: tasks are never
/// reclaimed, so a `TaskId` stays valid for the life of the system.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
    FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(transparent)]
pub struct TaskId(pub u8);

impl TaskId {
    /// The idle task, which always occupies slot 0.
    pub const IDLE: Self = Self(0);

    /// Extracts the slot index for use with the task table.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Indicates priority of a task.
///
/// Priorities are small numbers; numerically *greater* priorities run first.
/// The idle task is priority 0 and only runs when nothing else can.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means more important
/// or less important.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values directly.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

/// Scheduling state of a task slot.
///
/// Exactly one slot is `Running` at any moment. A `Blocked` task records
/// *what* it is blocked on, which makes "on one wait queue or asleep, never
/// both" a property of the type rather than a convention.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    /// Slot is unused.
    #[default]
    Free,
    /// Eligible to be chosen by the scheduler.
    Ready,
    /// Currently executing.
    Running,
    /// Waiting; will not be chosen until woken.
    Blocked(WaitKind),
    /// The task function returned. The slot is never reused.
    Dead,
}

impl TaskState {
    /// Checks if this task is in a potentially schedulable state.
    pub fn is_ready(&self) -> bool {
        matches!(self, TaskState::Ready)
    }
}

/// What a `Blocked` task is waiting for.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WaitKind {
    /// Asleep until the tick counter passes `wake_tick` (signed comparison,
    /// so the 2^32 wrap is harmless).
    Sleep { wake_tick: u32 },
    /// Parked on some semaphore's FIFO wait queue. The semaphore knows which
    /// tasks it holds; the task does not point back at it.
    Semaphore,
}

/// Errors returned by kernel primitives.
///
/// These are the recoverable, caller-visible failures; invariant violations
/// are not errors (the kernel logs them and returns, see the kernel docs).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum KernError {
    /// All task slots are occupied.
    NoSlot,
    /// A non-blocking wait found the resource unavailable.
    WouldBlock,
    /// A non-blocking send found the queue full.
    QueueFull,
    /// A non-blocking receive found the queue empty.
    QueueEmpty,
    /// A parameter failed validation (zero-size message, bad capacity, ...).
    InvalidParam,
}

/// Read-only snapshot of one task slot, for `ps`-style diagnostics.
///
/// The shell reads these out through the kernel's stats interface; they are
/// copies, and may be stale by the time anyone looks at them.
#[derive(Copy, Clone, Debug, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: &'static str,
    pub priority: Priority,
    pub state: TaskState,
    /// Timer ticks observed while this task was current (accounting only).
    pub ticks_run: u32,
}
