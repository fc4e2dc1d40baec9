// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tasks and the scheduler core.
//!
//! All scheduling state lives in a single [`TaskTable`]: a fixed array of
//! TCBs, the index of the running task, and the round-robin cursor. The
//! table-level operations are plain functions over `&mut TaskTable` so they
//! can be exercised on the host; the module-level functions at the bottom
//! are the task-context API that reaches the one global table through
//! [`crate::startup::with_task_table`].

use abi::{KernError, Priority, TaskId, TaskSnapshot, TaskState, WaitKind};

use crate::arch::{self, SavedState};
use crate::config::{MAX_TASKS, TASK_STACK_SIZE};

/// Slot 0 is always the idle task. It is created at init, never blocks, and
/// is chosen only when nothing else is Ready.
pub(crate) const IDLE_SLOT: usize = 0;

/// Internal representation of a task.
///
/// The fields are private so the state invariants stay in this module. The
/// struct is `repr(C)` and the saved machine state *must* stay the first
/// field: the context switch assembly finds the saved stack pointer at
/// offset 0 from the TCB pointer, without knowing anything else about the
/// layout.
#[repr(C)]
pub struct Task {
    /// Saved machine state. NOTE: it is critical that this field appear
    /// first!
    save: SavedState,
    state: TaskState,
    id: TaskId,
    priority: Priority,
    /// Timer ticks observed while this task was current. Accounting only.
    ticks_run: u32,
    stack_base: usize,
    stack_size: usize,
    name: &'static str,
}

impl Task {
    const FREE: Task = Task {
        save: SavedState { sp: 0 },
        state: TaskState::Free,
        id: TaskId(0),
        priority: Priority(0),
        ticks_run: 0,
        stack_base: 0,
        stack_size: 0,
        name: "",
    };

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Saved stack pointer; valid whenever the task is not Running.
    pub fn saved_sp(&self) -> usize {
        self.save.sp
    }
}

/// Backing storage for every task's stack: one fixed slab per slot.
#[repr(C, align(16))]
pub struct Stacks([[u8; TASK_STACK_SIZE]; MAX_TASKS]);

impl Stacks {
    pub const fn new() -> Self {
        Self([[0; TASK_STACK_SIZE]; MAX_TASKS])
    }
}

/// The scheduler's entire mutable state.
pub struct TaskTable {
    tasks: [Task; MAX_TASKS],
    /// Index of the Running task.
    current: usize,
    /// Last slot chosen by the scheduler; round-robin scans start just
    /// after it.
    cursor: usize,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            tasks: [Task::FREE; MAX_TASKS],
            current: IDLE_SLOT,
            cursor: IDLE_SLOT,
        }
    }

    /// Assigns each slot its stack slab.
    ///
    /// # Safety
    ///
    /// Only the slab *addresses* are recorded, so `stacks` must stay valid
    /// (and otherwise untouched) for as long as this table schedules tasks.
    /// The kernel's stacks are a `static`, which trivially satisfies this;
    /// tests leak a box.
    pub(crate) unsafe fn attach_stacks(&mut self, stacks: &mut Stacks) {
        for (i, task) in self.tasks.iter_mut().enumerate() {
            task.stack_base = stacks.0[i].as_mut_ptr() as usize;
            task.stack_size = TASK_STACK_SIZE;
        }
    }

    /// Creates the idle task in slot 0, Ready, with a context frame that
    /// resumes straight into `idle_pc` (no trampoline: the idle body takes
    /// no argument and never returns).
    pub(crate) fn spawn_idle(&mut self, idle_pc: usize) {
        let t = &mut self.tasks[IDLE_SLOT];
        assert!(t.stack_base != 0);
        t.id = TaskId(IDLE_SLOT as u8);
        t.priority = Priority(0);
        t.name = "idle";
        t.ticks_run = 0;
        // Safety: the slab was attached above and is exclusively ours.
        t.save.sp = unsafe {
            arch::frame::push_initial_frame(
                t.stack_base,
                t.stack_size,
                idle_pc,
                0,
                0,
            )
        };
        t.state = TaskState::Ready;
    }

    /// Reserves the lowest-numbered free slot for a new task and builds its
    /// initial context frame. The frame resumes at the entry trampoline
    /// with a2/a3 preloaded so the trampoline can call `entry(arg)`.
    ///
    /// Fails with `NoSlot` when every slot is taken. Slots are never
    /// recycled: a Dead task keeps its slot forever.
    pub(crate) fn create_task(
        &mut self,
        name: &'static str,
        entry: fn(usize),
        arg: usize,
        priority: Priority,
    ) -> Result<TaskId, KernError> {
        let slot = self.tasks[1..]
            .iter()
            .position(|t| matches!(t.state, TaskState::Free))
            .map(|p| p + 1)
            .ok_or(KernError::NoSlot)?;

        let t = &mut self.tasks[slot];
        assert!(t.stack_base != 0);
        t.id = TaskId(slot as u8);
        t.priority = priority;
        t.name = name;
        t.ticks_run = 0;
        // Safety: the slab was attached at init and belongs to this slot.
        t.save.sp = unsafe {
            arch::frame::push_initial_frame(
                t.stack_base,
                t.stack_size,
                arch::entry_trampoline_addr(),
                entry as usize,
                arg,
            )
        };
        t.state = TaskState::Ready;
        Ok(t.id)
    }

    /// Picks the next task to run. Called from the dispatcher only, with
    /// interrupts masked. Cannot fail: idle is always eligible.
    ///
    /// The priority rule, precisely: among all Ready tasks in slots 1..N,
    /// the greatest priority wins; among equals, the first one encountered
    /// scanning from just past the cursor wins. Idle runs only when that
    /// set is empty.
    pub(crate) fn schedule(&mut self) -> usize {
        if matches!(self.tasks[self.current].state, TaskState::Running) {
            self.tasks[self.current].state = TaskState::Ready;
        }

        let next = priority_scan(self.cursor, &self.tasks, |i, t| {
            i != IDLE_SLOT && t.state.is_ready()
        })
        .unwrap_or(IDLE_SLOT);

        self.tasks[next].state = TaskState::Running;
        self.cursor = next;
        self.current = next;

        // Safety: the table is a static (or test-owned and outliving the
        // test); the pointer is read only at exception exit.
        unsafe {
            arch::set_current_task(&mut self.tasks[next]);
        }
        next
    }

    /// Makes Ready every sleeping task whose wake tick has been reached.
    /// The comparison is a signed difference, so it keeps working across
    /// the 2^32 tick wrap.
    pub(crate) fn wake_sleepers(&mut self, now: u32) {
        for task in &mut self.tasks {
            if let TaskState::Blocked(WaitKind::Sleep { wake_tick }) =
                task.state
            {
                if now.wrapping_sub(wake_tick) as i32 >= 0 {
                    task.state = TaskState::Ready;
                }
            }
        }
    }

    /// Charges the interrupted task for one tick. Accounting only.
    pub(crate) fn charge_current(&mut self) {
        self.tasks[self.current].ticks_run =
            self.tasks[self.current].ticks_run.wrapping_add(1);
    }

    /// Moves the Running task into a Blocked state. The caller must follow
    /// up with a yield so the block takes effect.
    pub(crate) fn block_current(&mut self, kind: WaitKind) {
        self.tasks[self.current].state = TaskState::Blocked(kind);
    }

    /// Unblocks a task (semaphore hand-over, etc). Waking a task that is
    /// not Blocked is a no-op rather than an error: a timer may race a
    /// wake with the task's own state change.
    pub(crate) fn make_ready(&mut self, id: TaskId) {
        let t = &mut self.tasks[id.index()];
        if matches!(t.state, TaskState::Blocked(_)) {
            t.state = TaskState::Ready;
        }
    }

    pub(crate) fn mark_current_dead(&mut self) {
        self.tasks[self.current].state = TaskState::Dead;
    }

    pub(crate) fn current_index(&self) -> usize {
        self.current
    }

    pub(crate) fn current_id(&self) -> TaskId {
        self.tasks[self.current].id
    }

    pub(crate) fn task_mut(&mut self, index: usize) -> &mut Task {
        &mut self.tasks[index]
    }

    pub fn task(&self, index: usize) -> &Task {
        &self.tasks[index]
    }

    /// Copies out one slot's bookkeeping, or `None` for a Free slot.
    pub fn snapshot(&self, index: usize) -> Option<TaskSnapshot> {
        let t = self.tasks.get(index)?;
        if matches!(t.state, TaskState::Free) {
            return None;
        }
        Some(TaskSnapshot {
            id: t.id,
            name: t.name,
            priority: t.priority,
            state: t.state,
            ticks_run: t.ticks_run,
        })
    }
}

/// Scans the task table for a prioritized candidate.
///
/// Visits every slot starting just past `previous`, wrapping once around.
/// Of the slots satisfying `pred`, the one with the most important priority
/// wins; among equals, the first one visited wins -- which is what makes
/// the tie-break round-robin.
fn priority_scan(
    previous: usize,
    tasks: &[Task],
    pred: impl Fn(usize, &Task) -> bool,
) -> Option<usize> {
    let mut pos = previous;
    let mut choice: Option<(usize, Priority)> = None;
    for _ in 0..tasks.len() {
        pos += 1;
        if pos >= tasks.len() {
            pos = 0;
        }
        let t = &tasks[pos];
        if !pred(pos, t) {
            continue;
        }
        if let Some((_, best)) = choice {
            if !t.priority.is_more_important_than(best) {
                continue;
            }
        }
        choice = Some((pos, t.priority));
    }
    choice.map(|(i, _)| i)
}

// ---- Task-context API over the global table ----

/// Creates a task in the lowest free slot. Fails with `NoSlot` when the
/// table is full.
pub fn create(
    name: &'static str,
    entry: fn(usize),
    arg: usize,
    priority: Priority,
) -> Result<TaskId, KernError> {
    let _guard = arch::InterruptGuard::acquire();
    crate::startup::with_task_table(|t| {
        t.create_task(name, entry, arg, priority)
    })
}

/// Requests a reschedule. The actual switch happens during the ensuing
/// dispatcher pass; calling this twice before that pass is harmless.
pub fn yield_now() {
    arch::pend_soft_interrupt();
}

/// Blocks the calling task for at least `ticks` timer periods.
pub fn sleep(ticks: u32) {
    {
        let _guard = arch::InterruptGuard::acquire();
        let wake_tick = crate::dispatch::tick_count().wrapping_add(ticks);
        crate::startup::with_task_table(|t| {
            t.block_current(WaitKind::Sleep { wake_tick })
        });
    }
    yield_now();
}

/// The calling task's id.
pub fn current() -> TaskId {
    let _guard = arch::InterruptGuard::acquire();
    crate::startup::with_task_table(|t| t.current_id())
}

/// Feeds a snapshot of every live slot to `f`, for `ps`-style listings.
pub fn snapshots(mut f: impl FnMut(TaskSnapshot)) {
    for i in 0..MAX_TASKS {
        let snap = {
            let _guard = arch::InterruptGuard::acquire();
            crate::startup::with_task_table(|t| t.snapshot(i))
        };
        if let Some(s) = snap {
            f(s);
        }
    }
}

/// Where tasks land if their entry function returns: the entry trampoline
/// calls this. The task is marked Dead (its slot is never reused) and
/// parks forever; the scheduler will not choose it again.
#[no_mangle]
pub extern "C" fn task_exit_handler() -> ! {
    {
        let _guard = arch::InterruptGuard::acquire();
        crate::startup::with_task_table(|t| t.mark_current_dead());
    }
    loop {
        yield_now();
        arch::wait_for_interrupt();
    }
}
