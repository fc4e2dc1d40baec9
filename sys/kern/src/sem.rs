// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Counting semaphores and mutexes.
//!
//! A semaphore is a count plus a FIFO wait queue of task ids, bounded by
//! the task count. `post` hands a unit directly to the longest-waiting
//! task when one exists -- the count is *not* incremented in that case, the
//! resource moves straight from poster to waiter.
//!
//! Blocking operations may only be called from task context. `post` and
//! `try_wait` are also safe from timer callbacks and peripheral handlers,
//! since they never block.
//!
//! Recursive acquisition is not supported and not detected; neither is
//! unlock-by-non-owner on [`Mutex`]. Callers must honor the discipline.

use core::cell::UnsafeCell;

use abi::{KernError, TaskId, WaitKind};
use tinyvec::ArrayVec;

use crate::arch::InterruptGuard;
use crate::config::MAX_TASKS;
use crate::startup::with_task_table;
use crate::task::TaskTable;

/// The unsynchronized guts of a semaphore. The primitives here are combined
/// by both the public [`Semaphore`] wrappers (against the one global task
/// table) and the host tests (against tables they build themselves).
pub(crate) struct SemState {
    count: i32,
    waiters: ArrayVec<[TaskId; MAX_TASKS]>,
}

impl SemState {
    pub(crate) const fn new(count: i32) -> Self {
        Self {
            count,
            waiters: ArrayVec::from_array_empty([TaskId(0); MAX_TASKS]),
        }
    }

    /// Takes a unit if one is available.
    fn take_unit(&mut self) -> bool {
        if self.count > 0 {
            self.count -= 1;
            true
        } else {
            false
        }
    }

    /// Appends a waiter; `false` if the queue is somehow full, which cannot
    /// happen while waiters are distinct blocked tasks.
    fn enqueue_waiter(&mut self, id: TaskId) -> bool {
        self.waiters.try_push(id).is_none()
    }

    /// Removes and returns the longest-waiting task, if any.
    fn pop_waiter(&mut self) -> Option<TaskId> {
        if self.waiters.is_empty() {
            None
        } else {
            Some(self.waiters.remove(0))
        }
    }

    fn increment(&mut self) {
        self.count += 1;
    }

    pub(crate) fn count(&self) -> i32 {
        self.count
    }

    /// Takes a unit or enqueues the current task. Returns `true` if the
    /// caller blocked and must yield.
    pub(crate) fn wait_in(&mut self, table: &mut TaskTable) -> bool {
        if self.take_unit() {
            return false;
        }
        if !self.enqueue_waiter(table.current_id()) {
            // More waiters than tasks exist: an invariant violation, not a
            // recoverable error. Decline to block so the caller at least
            // keeps running.
            klog!("sem: wait queue overflow");
            return false;
        }
        table.block_current(WaitKind::Semaphore);
        true
    }

    pub(crate) fn try_wait_in(&mut self) -> Result<(), KernError> {
        if self.take_unit() {
            Ok(())
        } else {
            Err(KernError::WouldBlock)
        }
    }

    /// Releases a unit: hands it to the head of the wait queue if anyone is
    /// parked there, otherwise increments the count.
    pub(crate) fn post_in(&mut self, table: &mut TaskTable) {
        match self.pop_waiter() {
            Some(id) => table.make_ready(id),
            None => self.increment(),
        }
    }

    #[cfg(test)]
    pub(crate) fn waiter_ids(&self) -> &[TaskId] {
        &self.waiters
    }
}

/// A counting semaphore, suitable for a `static`.
pub struct Semaphore {
    state: UnsafeCell<SemState>,
}

// Safety: all access to the inner state happens under an interrupt guard on
// a single core, so there is never an aliasing &mut.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Creates a semaphore holding `count` units (0 for pure signaling, N
    /// for an N-unit resource).
    pub const fn new(count: i32) -> Self {
        Self {
            state: UnsafeCell::new(SemState::new(count)),
        }
    }

    /// Takes one unit, blocking until a matching `post` if none is
    /// available. FIFO fairness over waiters.
    pub fn wait(&self) {
        let blocked = {
            let _guard = InterruptGuard::acquire();
            // Safety: guard held, single core; no aliasing &mut.
            let state = unsafe { &mut *self.state.get() };
            if state.take_unit() {
                false
            } else {
                with_task_table(|t| {
                    if state.enqueue_waiter(t.current_id()) {
                        t.block_current(WaitKind::Semaphore);
                        true
                    } else {
                        klog!("sem: wait queue overflow");
                        false
                    }
                })
            }
        };
        if blocked {
            // The task resumes here only after a matching post.
            crate::task::yield_now();
        }
    }

    /// Takes one unit without blocking; fails with `WouldBlock` if none is
    /// available.
    pub fn try_wait(&self) -> Result<(), KernError> {
        let _guard = InterruptGuard::acquire();
        // Safety: as in wait.
        unsafe { &mut *self.state.get() }.try_wait_in()
    }

    /// Releases one unit, waking the longest-waiting task if any.
    pub fn post(&self) {
        let _guard = InterruptGuard::acquire();
        // Safety: as in wait.
        let state = unsafe { &mut *self.state.get() };
        match state.pop_waiter() {
            Some(id) => with_task_table(|t| t.make_ready(id)),
            None => state.increment(),
        }
    }

    /// The current count. Informational: it may be stale by the time the
    /// caller looks at it.
    pub fn count(&self) -> i32 {
        let _guard = InterruptGuard::acquire();
        // Safety: as in wait.
        unsafe { &*self.state.get() }.count()
    }
}

/// A mutual-exclusion lock: a semaphore with exactly one unit.
pub struct Mutex {
    sem: Semaphore,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
        }
    }

    pub fn lock(&self) {
        self.sem.wait()
    }

    pub fn try_lock(&self) -> Result<(), KernError> {
        self.sem.try_wait()
    }

    pub fn unlock(&self) {
        self.sem.post()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Stacks;
    use abi::{Priority, TaskState};

    fn entry(_: usize) {}

    fn table_with_tasks(n: usize) -> TaskTable {
        let stacks = Box::leak(Box::new(Stacks::new()));
        let mut table = TaskTable::new();
        unsafe {
            table.attach_stacks(stacks);
        }
        table.spawn_idle(0x1000);
        for _ in 0..n {
            table.create_task("t", entry, 0, Priority(1)).unwrap();
        }
        table
    }

    #[test]
    fn wait_with_units_does_not_block() {
        let mut table = table_with_tasks(1);
        table.schedule();
        let mut sem = SemState::new(2);
        assert!(!sem.wait_in(&mut table));
        assert!(!sem.wait_in(&mut table));
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn wait_without_units_blocks_and_post_hands_over() {
        let mut table = table_with_tasks(1);
        table.schedule(); // task 1 running
        let mut sem = SemState::new(0);

        assert!(sem.wait_in(&mut table));
        assert_eq!(
            table.task(1).state(),
            TaskState::Blocked(WaitKind::Semaphore)
        );

        sem.post_in(&mut table);
        assert_eq!(table.task(1).state(), TaskState::Ready);
        // Direct hand-over: the unit went to the waiter, not the count.
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn post_with_no_waiters_increments() {
        let mut table = table_with_tasks(0);
        let mut sem = SemState::new(0);
        sem.post_in(&mut table);
        sem.post_in(&mut table);
        assert_eq!(sem.count(), 2);
    }

    #[test]
    fn waiters_wake_fifo() {
        let mut table = table_with_tasks(3);
        let mut sem = SemState::new(0);

        // Block tasks 1, 2, 3 in that order.
        for expect in 1..=3 {
            table.schedule();
            assert_eq!(table.current_index(), expect);
            assert!(sem.wait_in(&mut table));
        }
        assert_eq!(sem.waiter_ids(), [TaskId(1), TaskId(2), TaskId(3)]);

        sem.post_in(&mut table);
        assert_eq!(table.task(1).state(), TaskState::Ready);
        assert!(matches!(table.task(2).state(), TaskState::Blocked(_)));

        sem.post_in(&mut table);
        assert_eq!(table.task(2).state(), TaskState::Ready);
        assert!(matches!(table.task(3).state(), TaskState::Blocked(_)));
    }

    #[test]
    fn priority_handover_sequence() {
        // The preemption scenario at table level: a high-priority waiter
        // becomes Ready on post and wins the very next scheduling pass.
        let stacks = Box::leak(Box::new(Stacks::new()));
        let mut table = TaskTable::new();
        unsafe {
            table.attach_stacks(stacks);
        }
        table.spawn_idle(0x1000);
        table.create_task("lo", entry, 0, Priority(1)).unwrap();
        table.create_task("hi", entry, 0, Priority(3)).unwrap();
        let mut sem = SemState::new(0);

        // hi runs first and blocks on the semaphore.
        assert_eq!(table.schedule(), 2);
        assert!(sem.wait_in(&mut table));

        // lo runs, posts, and at the next pass hi preempts it.
        assert_eq!(table.schedule(), 1);
        sem.post_in(&mut table);
        assert_eq!(table.schedule(), 2);

        // hi finishes (blocks again); lo resumes, then idle.
        assert!(sem.wait_in(&mut table));
        assert_eq!(table.schedule(), 1);
        table.block_current(WaitKind::Semaphore);
        assert_eq!(table.schedule(), crate::task::IDLE_SLOT);
    }

    #[test]
    fn try_wait_surfaces_would_block() {
        let mut sem = SemState::new(1);
        assert_eq!(sem.try_wait_in(), Ok(()));
        assert_eq!(sem.try_wait_in(), Err(KernError::WouldBlock));
    }
}
