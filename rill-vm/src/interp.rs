//! # Instruction Execution
//!
//! Opcode semantics, one instruction per scheduler tick. The operand stack
//! holds only heap addresses: results of operator evaluation are boxed the
//! moment they are produced, and addresses popped off the stack before an
//! allocation are re-rooted through the heap's working set for the duration.
//!
//! The execution methods live on [`Vm`] so every handler can reach the heap,
//! the scheduler (which doubles as the collector's root set), the program,
//! and the output sink as disjoint borrows.

use rill_bytecode::{BinOp, Instruction, Literal, UnOp};

use crate::builtins::{self, kind_name, BuiltinCtx};
use crate::error::{RuntimeError, VmError};
use crate::value::{Addr, Tag, Value};
use crate::vm::Vm;

/// What the executed instruction means for the scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Keep running this task (quantum permitting).
    Advance,
    /// The task blocked or terminated; rotate immediately.
    Yield,
}

impl Vm {
    /// Fetch and execute one instruction of the current task.
    pub(crate) fn step(&mut self) -> Result<Flow, VmError> {
        let pc = self.scheduler.current_task().pc;
        let instr = self
            .program
            .fetch(pc)
            .cloned()
            .ok_or(RuntimeError::PcOutOfRange {
                pc,
                len: self.program.len(),
            })?;
        tracing::trace!(task = %self.scheduler.current_task().id, pc, %instr, "execute");
        self.execute(pc, instr)
    }

    fn execute(&mut self, pc: usize, instr: Instruction) -> Result<Flow, VmError> {
        match instr {
            Instruction::LoadConst(lit) => {
                let value = literal_value(lit);
                let addr = self.heap.value_to_addr(&self.scheduler, &value)?;
                let task = self.scheduler.current_task_mut();
                task.push(addr);
                task.pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::UnaryOp(op) => {
                let operand = self.scheduler.current_task_mut().pop()?;
                let result = self.eval_unop(op, operand)?;
                let addr = self.heap.value_to_addr(&self.scheduler, &result)?;
                let task = self.scheduler.current_task_mut();
                task.push(addr);
                task.pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::BinaryOp(op) => {
                // Arguments are pushed left-to-right, so the right operand
                // is on top.
                let task = self.scheduler.current_task_mut();
                let rhs = task.pop()?;
                let lhs = task.pop()?;
                let result = self.eval_binop(op, lhs, rhs)?;
                let addr = self.heap.value_to_addr(&self.scheduler, &result)?;
                let task = self.scheduler.current_task_mut();
                task.push(addr);
                task.pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::Pop => {
                let task = self.scheduler.current_task_mut();
                task.pop()?;
                task.pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::JumpIfFalse(target) => {
                let false_obj = self.heap.singletons().false_obj;
                let task = self.scheduler.current_task_mut();
                let test = task.pop()?;
                task.pc = if test == false_obj { target } else { pc + 1 };
                Ok(Flow::Advance)
            }

            Instruction::Jump(target) => {
                self.scheduler.current_task_mut().pc = target;
                Ok(Flow::Advance)
            }

            Instruction::EnterScope { locals } => {
                let env = self.scheduler.current_task().env;
                let block = self.heap.allocate_block_frame(&self.scheduler, env)?;
                self.scheduler.current_task_mut().frames.push(block);

                let frame = self.heap.allocate_frame(&self.scheduler, locals)?;
                let new_env = self.heap.extend_environment(&self.scheduler, env, frame)?;
                let task = self.scheduler.current_task_mut();
                task.env = new_env;
                task.pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::ExitScope => {
                let top = self
                    .scheduler
                    .current_task_mut()
                    .frames
                    .pop()
                    .ok_or(RuntimeError::ScopeMismatch)?;
                if self.heap.tag_of(top) != Tag::BlockFrame {
                    return Err(RuntimeError::ScopeMismatch.into());
                }
                let env = self.heap.block_frame_env(top)?;
                let task = self.scheduler.current_task_mut();
                task.env = env;
                task.pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::Load { name, addr } => {
                let frame = self.resolve_frame(addr.frame)?;
                let value = self.heap.frame_get(frame, addr.slot)?;
                if self.heap.is_unallocated(value) {
                    return Err(RuntimeError::UnassignedVariable { name }.into());
                }
                let task = self.scheduler.current_task_mut();
                task.push(value);
                task.pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::Store { name: _, addr } => {
                // Assignment is an expression: the value stays on the stack
                // and the compiler pops it when used as a statement.
                let value = self
                    .scheduler
                    .current_task()
                    .top()
                    .ok_or(RuntimeError::StackUnderflow)?;
                let frame = self.resolve_frame(addr.frame)?;
                self.heap.frame_set(frame, addr.slot, value)?;
                self.scheduler.current_task_mut().pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::MakeClosure { arity, entry } => {
                let env = self.scheduler.current_task().env;
                let closure = self
                    .heap
                    .allocate_closure(&self.scheduler, arity, entry, env)?;
                let task = self.scheduler.current_task_mut();
                task.push(closure);
                task.pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::Call { argc } => self.call(pc, argc, false),
            Instruction::TailCall { argc } => self.call(pc, argc, true),
            Instruction::Return => self.return_through_frames(),

            Instruction::Spawn { cont } => {
                let task = self.scheduler.current_task();
                let (child_pc, env) = (pc + 1, task.env);
                self.scheduler.spawn(child_pc, env);
                self.scheduler.current_task_mut().pc = cont;
                Ok(Flow::Advance)
            }

            Instruction::Send => {
                let task = self.scheduler.current_task_mut();
                let value = task.pop()?;
                let chan = task.pop()?;
                self.expect_channel(chan)?;

                if self.heap.channel_is_full(chan)? {
                    // Restore the operands so the send retries after the
                    // wake-up, then go to sleep on the channel.
                    let task = self.scheduler.current_task_mut();
                    task.push(chan);
                    task.push(value);
                    let token = self.heap.allocate_wait_send(&self.scheduler, chan)?;
                    let task = self.scheduler.current_task_mut();
                    task.waiting.push(token);
                    task.block();
                    Ok(Flow::Yield)
                } else {
                    // Deposit, then park until the receiver takes the item:
                    // an unbuffered send completes only through the
                    // rendezvous. The program counter already points past
                    // the send, so the wake-up resumes after it.
                    self.heap.channel_push_item(chan, value)?;
                    let token = self.heap.allocate_wait_send(&self.scheduler, chan)?;
                    let task = self.scheduler.current_task_mut();
                    task.waiting.push(token);
                    task.pc = pc + 1;
                    task.block();
                    Ok(Flow::Yield)
                }
            }

            Instruction::Receive => {
                let chan = self.scheduler.current_task_mut().pop()?;
                self.expect_channel(chan)?;

                if self.heap.channel_is_empty(chan)? {
                    let task = self.scheduler.current_task_mut();
                    task.push(chan);
                    let token = self.heap.allocate_wait_receive(&self.scheduler, chan)?;
                    let task = self.scheduler.current_task_mut();
                    task.waiting.push(token);
                    task.block();
                    Ok(Flow::Yield)
                } else {
                    let item = self.heap.channel_pop_item(chan)?;
                    let task = self.scheduler.current_task_mut();
                    task.push(item);
                    task.pc = pc + 1;
                    Ok(Flow::Advance)
                }
            }

            Instruction::TrySend { fail } => {
                let task = self.scheduler.current_task_mut();
                let value = task.pop()?;
                let chan = task.pop()?;
                self.expect_channel(chan)?;

                if self.heap.channel_is_full(chan)? {
                    // Register the wait and move to the next case without
                    // blocking.
                    self.heap.push_working(chan);
                    let token = self.heap.allocate_wait_send(&self.scheduler, chan);
                    self.heap.pop_working(1);
                    let task = self.scheduler.current_task_mut();
                    task.waiting.push(token?);
                    task.pc = fail;
                } else {
                    self.heap.channel_push_item(chan, value)?;
                    self.scheduler.current_task_mut().pc = pc + 1;
                }
                Ok(Flow::Advance)
            }

            Instruction::TryReceive { fail } => {
                let chan = self.scheduler.current_task_mut().pop()?;
                self.expect_channel(chan)?;

                if self.heap.channel_is_empty(chan)? {
                    self.heap.push_working(chan);
                    let token = self.heap.allocate_wait_receive(&self.scheduler, chan);
                    self.heap.pop_working(1);
                    let task = self.scheduler.current_task_mut();
                    task.waiting.push(token?);
                    task.pc = fail;
                } else {
                    let item = self.heap.channel_pop_item(chan)?;
                    let task = self.scheduler.current_task_mut();
                    task.push(item);
                    task.pc = pc + 1;
                }
                Ok(Flow::Advance)
            }

            Instruction::Block => {
                let task = self.scheduler.current_task_mut();
                task.pc = pc + 1;
                task.block();
                tracing::trace!(task = %task.id, "blocked in select");
                Ok(Flow::Yield)
            }

            Instruction::ClearWait => {
                let task = self.scheduler.current_task_mut();
                task.waiting.clear();
                task.pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::Done => {
                let task = self.scheduler.current_task_mut();
                task.finish();
                tracing::debug!(task = %task.id, "task finished");
                Ok(Flow::Yield)
            }

            Instruction::IndexLoad => {
                let task = self.scheduler.current_task_mut();
                let index = task.pop()?;
                let array = task.pop()?;
                let i = self.checked_index(array, index)?;
                let value = self.heap.array_get(array, i)?;
                if self.heap.is_unallocated(value) {
                    return Err(RuntimeError::UnsetElement { index: i }.into());
                }
                let task = self.scheduler.current_task_mut();
                task.push(value);
                task.pc = pc + 1;
                Ok(Flow::Advance)
            }

            Instruction::IndexStore => {
                let task = self.scheduler.current_task_mut();
                let index = task.pop()?;
                let array = task.pop()?;
                let value = task.pop()?;
                let i = self.checked_index(array, index)?;
                self.heap.array_set(array, i, value)?;
                self.scheduler.current_task_mut().pc = pc + 1;
                Ok(Flow::Advance)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Call protocol
    // -----------------------------------------------------------------------

    fn call(&mut self, pc: usize, argc: usize, tail: bool) -> Result<Flow, VmError> {
        let mut args = Vec::with_capacity(argc);
        let callee = {
            let task = self.scheduler.current_task_mut();
            for _ in 0..argc {
                args.push(task.pop()?);
            }
            args.reverse();
            task.pop()?
        };

        match self.heap.tag_of(callee) {
            Tag::Closure => {
                let entry = self.heap.closure_entry(callee)? as usize;
                let closure_env = self.heap.closure_env(callee)?;

                // The args and the callee left the operand stack; keep them
                // alive across the frame allocations below.
                for &arg in &args {
                    self.heap.push_working(arg);
                }
                self.heap.push_working(callee);
                let result = self.enter_closure(pc, &args, closure_env, entry, tail);
                self.heap.pop_working(args.len() + 1);
                result
            }

            Tag::Builtin => {
                let id = self.heap.builtin_id(callee)?;
                let def = builtins::lookup(id)?;
                if def.arity != argc {
                    return Err(RuntimeError::BuiltinArity {
                        name: def.name,
                        expected: def.arity,
                        got: argc,
                    }
                    .into());
                }

                for &arg in &args {
                    self.heap.push_working(arg);
                }
                let result = {
                    let mut ctx = BuiltinCtx {
                        heap: &mut self.heap,
                        roots: &self.scheduler,
                        out: &mut *self.out,
                    };
                    (def.run)(&mut ctx, &args)
                };
                self.heap.pop_working(args.len());

                self.scheduler.current_task_mut().push(result?);
                if tail {
                    // A tail call to a host function is a call followed by
                    // the return sequence.
                    self.return_through_frames()
                } else {
                    self.scheduler.current_task_mut().pc = pc + 1;
                    Ok(Flow::Advance)
                }
            }

            tag => Err(RuntimeError::NotCallable { tag }.into()),
        }
    }

    fn enter_closure(
        &mut self,
        pc: usize,
        args: &[Addr],
        closure_env: Addr,
        entry: usize,
        tail: bool,
    ) -> Result<Flow, VmError> {
        if !tail {
            let caller_env = self.scheduler.current_task().env;
            let call_frame = self
                .heap
                .allocate_call_frame(&self.scheduler, caller_env, pc + 1)?;
            self.scheduler.current_task_mut().frames.push(call_frame);
        }

        let frame = self.heap.allocate_frame(&self.scheduler, args.len())?;
        for (slot, &arg) in args.iter().enumerate() {
            self.heap.frame_set(frame, slot, arg)?;
        }
        let new_env = self
            .heap
            .extend_environment(&self.scheduler, closure_env, frame)?;

        let task = self.scheduler.current_task_mut();
        task.env = new_env;
        task.pc = entry;
        Ok(Flow::Advance)
    }

    /// Pop runtime-stack entries until a call frame appears, then restore
    /// its environment and return address. Block frames passed on the way
    /// are discarded (returning out of nested blocks).
    fn return_through_frames(&mut self) -> Result<Flow, VmError> {
        loop {
            let top = self
                .scheduler
                .current_task_mut()
                .frames
                .pop()
                .ok_or(RuntimeError::NoCallFrame)?;
            match self.heap.tag_of(top) {
                Tag::CallFrame => {
                    let env = self.heap.call_frame_env(top)?;
                    let return_pc = self.heap.call_frame_return_pc(top)?;
                    let task = self.scheduler.current_task_mut();
                    task.env = env;
                    task.pc = return_pc;
                    return Ok(Flow::Advance);
                }
                Tag::BlockFrame => continue,
                _ => return Err(RuntimeError::NoCallFrame.into()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Operand helpers
    // -----------------------------------------------------------------------

    /// Walk `frames_back` environments from the current one and return the
    /// frame address there.
    fn resolve_frame(&self, frames_back: usize) -> Result<Addr, VmError> {
        let env = self.scheduler.current_task().env;
        let len = self.heap.environment_len(env)?;
        let index = len
            .checked_sub(1 + frames_back)
            .ok_or(crate::heap::HeapError::ChildOutOfRange {
                at: env,
                index: frames_back,
                count: len,
            })?;
        Ok(self.heap.environment_frame(env, index)?)
    }

    fn expect_channel(&self, addr: Addr) -> Result<(), VmError> {
        let tag = self.heap.tag_of(addr);
        if tag != Tag::Chan {
            return Err(RuntimeError::NotAChannel { tag }.into());
        }
        Ok(())
    }

    /// Validate an index operand against an array and return it as a slot
    /// number.
    fn checked_index(&self, array: Addr, index: Addr) -> Result<usize, VmError> {
        if self.heap.tag_of(array) != Tag::Array {
            return Err(RuntimeError::OperandType {
                op: "[]",
                expected: "array",
                got: kind_name(&self.heap, array),
            }
            .into());
        }
        let len = self.heap.array_len(array)?;
        let n = self
            .heap
            .number_value(index)
            .map_err(|_| RuntimeError::OperandType {
                op: "[]",
                expected: "number index",
                got: kind_name(&self.heap, index),
            })?;
        if n < 0.0 || n.fract() != 0.0 || (n as usize) >= len {
            return Err(RuntimeError::IndexOutOfRange { index: n, len }.into());
        }
        Ok(n as usize)
    }

    fn eval_unop(&self, op: UnOp, operand: Addr) -> Result<Value, VmError> {
        let value = self.heap.addr_to_value(operand).ok();
        match (op, value) {
            (UnOp::Neg, Some(Value::Number(n))) => Ok(Value::Number(-n)),
            (UnOp::Not, Some(Value::Bool(b))) => Ok(Value::Bool(!b)),
            (op, _) => Err(RuntimeError::OperandType {
                op: op.symbol(),
                expected: if op == UnOp::Neg { "number" } else { "boolean" },
                got: kind_name(&self.heap, operand),
            }
            .into()),
        }
    }

    fn eval_binop(&self, op: BinOp, lhs: Addr, rhs: Addr) -> Result<Value, VmError> {
        use BinOp::*;
        use Value::*;

        let lv = self.heap.addr_to_value(lhs).ok();
        let rv = self.heap.addr_to_value(rhs).ok();

        // Equality compares unboxed values; operands that do not unbox
        // (channels, closures, arrays) compare by identity.
        if op == Eq || op == Ne {
            let equal = match (&lv, &rv) {
                (Some(a), Some(b)) => a == b,
                _ => lhs == rhs,
            };
            return Ok(Bool(if op == Eq { equal } else { !equal }));
        }

        match (op, lv, rv) {
            (Add, Some(Number(a)), Some(Number(b))) => Ok(Number(a + b)),
            (Add, Some(Str(a)), Some(Str(b))) => Ok(Str(a + &b)),
            (Sub, Some(Number(a)), Some(Number(b))) => Ok(Number(a - b)),
            (Mul, Some(Number(a)), Some(Number(b))) => Ok(Number(a * b)),
            (Div, Some(Number(a)), Some(Number(b))) => Ok(Number(a / b)),
            (Rem, Some(Number(a)), Some(Number(b))) => Ok(Number(a % b)),
            (Lt, Some(Number(a)), Some(Number(b))) => Ok(Bool(a < b)),
            (Le, Some(Number(a)), Some(Number(b))) => Ok(Bool(a <= b)),
            (Gt, Some(Number(a)), Some(Number(b))) => Ok(Bool(a > b)),
            (Ge, Some(Number(a)), Some(Number(b))) => Ok(Bool(a >= b)),
            (And, Some(Bool(a)), Some(Bool(b))) => Ok(Bool(a && b)),
            (Or, Some(Bool(a)), Some(Bool(b))) => Ok(Bool(a || b)),
            (op, lv, _) => {
                let offender = if matches!(
                    (&op, &lv),
                    (Add, Some(Number(_)))
                        | (Add, Some(Str(_)))
                        | (Sub | Mul | Div | Rem | Lt | Le | Gt | Ge, Some(Number(_)))
                        | (And | Or, Some(Bool(_)))
                ) {
                    rhs
                } else {
                    lhs
                };
                Err(RuntimeError::OperandType {
                    op: op.symbol(),
                    expected: match op {
                        Add => "two numbers or two strings",
                        And | Or => "booleans",
                        _ => "numbers",
                    },
                    got: kind_name(&self.heap, offender),
                }
                .into())
            }
        }
    }
}

/// Turn an instruction-stream literal into an unboxed value.
fn literal_value(lit: Literal) -> Value {
    match lit {
        Literal::Number(n) => Value::Number(n),
        Literal::Bool(b) => Value::Bool(b),
        Literal::Str(s) => Value::Str(s),
        Literal::Null => Value::Null,
        Literal::Undefined => Value::Undefined,
    }
}
