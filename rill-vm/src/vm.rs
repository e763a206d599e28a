//! # The Assembled Machine
//!
//! [`Vm`] ties the subsystems together: the managed heap, the cooperative
//! scheduler, the compiled program, and the program output sink. Driving it
//! is one loop: execute one instruction of the current task, count the
//! quantum, rotate when the slice is spent or the task yields, stop when the
//! root task terminates.

use std::io::{self, Write};

use rill_bytecode::Program;

use crate::builtins::{BUILTINS, MATH_CONSTANTS};
use crate::config::VmConfig;
use crate::error::VmError;
use crate::heap::{Heap, NoRoots};
use crate::interp::Flow;
use crate::scheduler::Scheduler;
use crate::value::Value;

/// A ready-to-run virtual machine.
///
/// ```no_run
/// use rill_bytecode::{Instruction, Literal, Program};
/// use rill_vm::{Vm, VmConfig};
///
/// let program = Program::new(vec![
///     Instruction::LoadConst(Literal::Number(7.0)),
///     Instruction::Done,
/// ]);
/// let mut vm = Vm::new(program, VmConfig::default()).unwrap();
/// let exit = vm.run().unwrap();
/// println!("program finished with {}", exit);
/// ```
pub struct Vm {
    pub(crate) program: Program,
    pub(crate) heap: Heap,
    pub(crate) scheduler: Scheduler,
    pub(crate) out: Box<dyn Write>,
}

impl Vm {
    /// Build a machine for `program`.
    ///
    /// Allocates the heap, seeds the global frame with the built-in library
    /// and the math constants (in registry order, so compile-time `(0, slot)`
    /// addresses resolve correctly), and creates the root task at
    /// instruction 0.
    pub fn new(program: Program, config: VmConfig) -> Result<Self, VmError> {
        config.validate()?;
        let mut heap = Heap::new(config.heap_size)?;

        // The global frame and environment exist before any task does, so
        // the working set is the only root protecting them while they are
        // under construction.
        let frame = heap.allocate_frame(&NoRoots, crate::builtins::global_frame_len())?;
        heap.push_working(frame);

        let mut build = || -> Result<crate::value::Addr, VmError> {
            for (id, _def) in BUILTINS.iter().enumerate() {
                let b = heap.allocate_builtin(&NoRoots, id as u32)?;
                heap.frame_set(frame, id, b)?;
            }
            for (offset, (_name, value)) in MATH_CONSTANTS.iter().enumerate() {
                let n = heap.allocate_number(&NoRoots, *value)?;
                heap.frame_set(frame, BUILTINS.len() + offset, n)?;
            }
            let env = heap.allocate_environment(&NoRoots, 1)?;
            heap.child_set(env, 0, frame)?;
            Ok(env)
        };
        let env = build();
        heap.pop_working(1);
        let global_env = env?;

        let scheduler = Scheduler::new(config.quantum, global_env, 0);
        tracing::debug!(
            quantum = config.quantum,
            heap_bytes = config.heap_size,
            instructions = program.len(),
            "vm created"
        );

        Ok(Self {
            program,
            heap,
            scheduler,
            out: Box::new(io::stdout()),
        })
    }

    /// Redirect program output (the `display` builtin). Defaults to stdout.
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    /// Run until the root task terminates.
    ///
    /// Returns the root task's final operand-stack top, unboxed —
    /// [`Value::Undefined`] when the stack is empty or holds a compound
    /// object. Fatal faults (type errors, exhaustion, deadlock) surface as
    /// the error.
    pub fn run(&mut self) -> Result<Value, VmError> {
        loop {
            let flow = self.step()?;

            let root = self.scheduler.root_id();
            let root_task = self
                .scheduler
                .task(root)
                .expect("root task stays in the ring");
            if root_task.is_done() {
                let exit = root_task
                    .top()
                    .and_then(|addr| self.heap.addr_to_value(addr).ok())
                    .unwrap_or(Value::Undefined);
                tracing::debug!(%exit, "root task finished");
                return Ok(exit);
            }

            match flow {
                Flow::Advance => {
                    if self.scheduler.tick() {
                        self.scheduler.rotate(&self.heap)?;
                    }
                }
                Flow::Yield => self.scheduler.rotate(&self.heap)?,
            }
        }
    }

    /// Heap counters (collections, growth, live nodes).
    pub fn heap_stats(&self) -> crate::heap::HeapStats {
        self.heap.stats()
    }

    /// Number of tasks currently in the ring.
    pub fn task_count(&self) -> usize {
        self.scheduler.task_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
