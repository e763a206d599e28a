//! # Cooperative Scheduler
//!
//! Round-robin, time-sliced multitasking over a single real thread. Tasks
//! live in an ordered ring; the machine runs one instruction of the current
//! task per tick and rotates when the configured quantum is exhausted or the
//! current task yields (blocks or terminates).
//!
//! ## Rotation
//!
//! `rotate` walks the ring once, starting after the current task, collecting
//! three side effects along the way:
//!
//! 1. done tasks other than the root are scheduled for removal,
//! 2. a blocked task with at least one *favorable* wait token — a send wait
//!    on an empty channel, or a receive wait on a full one — is woken (its
//!    waiting-set is cleared),
//! 3. the first runnable task encountered becomes the new current task.
//!
//! A full revolution with no runnable candidate is a deadlock, which is
//! fatal for the whole machine.
//!
//! ## Collection roots
//!
//! The scheduler is the collector's [`RootProvider`]: it presents the global
//! environment plus every task's environment, operand stack, runtime stack,
//! wait tokens, and working set.

use crate::error::VmError;
use crate::heap::{Heap, RootProvider};
use crate::task::{Task, TaskId};
use crate::value::{Addr, Tag};

/// The ordered ring of tasks and the rotation state.
pub struct Scheduler {
    /// The task ring, walked round-robin.
    ring: Vec<Task>,
    /// Index of the current task within the ring.
    current: usize,
    /// Instructions per time slice.
    quantum: usize,
    /// Instructions executed in the current slice.
    ticks: usize,
    /// ID generator.
    next_id: u64,
    /// The root task, whose termination ends the program.
    root: TaskId,
    /// The global environment (frame 0: the built-in library).
    global_env: Addr,
}

impl Scheduler {
    /// Create a scheduler whose root task starts at `root_pc` in the global
    /// environment.
    pub fn new(quantum: usize, global_env: Addr, root_pc: usize) -> Self {
        let root = TaskId(0);
        let root_task = Task::new(root, root_pc, global_env);
        Self {
            ring: vec![root_task],
            current: 0,
            quantum,
            ticks: 0,
            next_id: 1,
            root,
            global_env,
        }
    }

    /// The root task's ID.
    pub fn root_id(&self) -> TaskId {
        self.root
    }

    /// The global environment address.
    pub fn global_env(&self) -> Addr {
        self.global_env
    }

    /// The current task.
    pub fn current_task(&self) -> &Task {
        &self.ring[self.current]
    }

    /// The current task, mutably.
    pub fn current_task_mut(&mut self) -> &mut Task {
        &mut self.ring[self.current]
    }

    /// Look up a task by ID.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.ring.iter().find(|t| t.id == id)
    }

    /// Number of tasks in the ring.
    pub fn task_count(&self) -> usize {
        self.ring.len()
    }

    /// Number of runnable tasks.
    pub fn runnable_count(&self) -> usize {
        self.ring.iter().filter(|t| t.is_runnable()).count()
    }

    /// Append a new task to the ring, starting at `pc` in environment `env`.
    pub fn spawn(&mut self, pc: usize, env: Addr) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.ring.push(Task::new(id, pc, env));
        tracing::debug!(task = %id, pc, "task spawned");
        id
    }

    /// Count one executed instruction; true when the slice is used up and
    /// the ring should rotate.
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        self.ticks >= self.quantum
    }

    /// Rotate to the next runnable task.
    ///
    /// Walks one full revolution starting after the current task, waking
    /// blocked tasks whose wait-sets have become favorable and scheduling
    /// done tasks for removal. Errors with [`VmError::Deadlock`] when the
    /// revolution finds no runnable candidate.
    pub fn rotate(&mut self, heap: &Heap) -> Result<(), VmError> {
        let len = self.ring.len();
        let mut chosen: Option<usize> = None;

        for offset in 1..=len {
            let idx = (self.current + offset) % len;
            let task = &mut self.ring[idx];

            if task.is_done() {
                continue; // spliced out below; the root is kept regardless
            }

            if task.is_blocked() && wait_set_favorable(heap, &task.waiting)? {
                task.unblock();
                tracing::trace!(task = %task.id, "task woken by channel state");
            }

            if task.is_runnable() && chosen.is_none() {
                chosen = Some(idx);
            }
        }

        let Some(chosen) = chosen else {
            tracing::error!(tasks = len, "deadlock: no runnable task in the ring");
            return Err(VmError::Deadlock);
        };

        // Splice out finished tasks, preserving the chosen task's position.
        let chosen_id = self.ring[chosen].id;
        let root = self.root;
        let before = self.ring.len();
        self.ring.retain(|t| !t.is_done() || t.id == root);
        let removed = before - self.ring.len();
        if removed > 0 {
            tracing::trace!(removed, "finished tasks removed from ring");
        }

        self.current = self
            .ring
            .iter()
            .position(|t| t.id == chosen_id)
            .expect("chosen task survives the splice");
        self.ticks = 0;
        tracing::trace!(task = %chosen_id, "rotated");
        Ok(())
    }
}

/// A wait set is favorable when at least one of its tokens names a channel
/// in the state the task is waiting for: empty for a send wait, full for a
/// receive wait.
fn wait_set_favorable(heap: &Heap, waiting: &[Addr]) -> Result<bool, VmError> {
    for &token in waiting {
        let chan = heap.wait_channel(token)?;
        let favorable = match heap.tag_of(token) {
            Tag::WaitSend => heap.channel_is_empty(chan)?,
            Tag::WaitReceive => heap.channel_is_full(chan)?,
            _ => unreachable!("wait_channel enforces the token tags"),
        };
        if favorable {
            return Ok(true);
        }
    }
    Ok(false)
}

impl RootProvider for Scheduler {
    fn visit_roots(&self, visitor: &mut dyn FnMut(Addr)) {
        visitor(self.global_env);
        for task in &self.ring {
            task.visit_roots(visitor);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
