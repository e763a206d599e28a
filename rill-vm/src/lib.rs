//! # Rill Virtual Machine
//!
//! The runtime for Rill, a small concurrent Go-like language. The VM
//! executes the flat instruction stream produced by the compiler front-end
//! on a cooperative, time-sliced scheduler that multiplexes many lightweight
//! tasks over a single real thread.
//!
//! Three subsystems carry the weight:
//!
//! - **Managed heap** ([`heap`]): fixed-size tagged nodes in a word-addressed
//!   buffer, a free-list allocator, a mark-and-sweep collector, and dynamic
//!   growth by doubling.
//! - **Interpreter** (`interp.rs`): a stack machine over heap addresses with
//!   compile-time-resolved lexical addressing, closures, and block/call
//!   frames on a per-task runtime stack.
//! - **Scheduler & channels** ([`scheduler`]): a round-robin task ring with
//!   a configurable quantum, rendezvous channels, `select` support, and
//!   deadlock detection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          RILL VM                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────────┐  │
//! │  │ Interpreter │──▶│  Scheduler   │──▶│  Tasks (ring)   │  │
//! │  │ (interp.rs) │   │(scheduler.rs)│   │   (task.rs)     │  │
//! │  └─────────────┘   └──────────────┘   └─────────────────┘  │
//! │         │                  │ roots             │           │
//! │         ▼                  ▼                   ▼           │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │            Managed heap  (heap.rs)                  │   │
//! │  │   tagged nodes · free list · mark-and-sweep GC      │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! │         ▲                                                  │
//! │  ┌─────────────┐   ┌──────────────┐                        │
//! │  │  Builtins   │   │    Config    │                        │
//! │  │(builtins.rs)│   │ (config.rs)  │                        │
//! │  └─────────────┘   └──────────────┘                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! Strictly single-threaded and cooperative: there are no OS threads, no
//! async runtime, and no data races. The only suspension points are quantum
//! exhaustion, blocking on a channel, and collection (which runs only from
//! allocation). All observable effects are totally ordered by the scheduler.
//!
//! ## Quick start
//!
//! ```no_run
//! use rill_bytecode::{Instruction, Literal, Program};
//! use rill_vm::{Vm, VmConfig};
//!
//! let program = Program::new(vec![
//!     Instruction::LoadConst(Literal::Number(1.0)),
//!     Instruction::LoadConst(Literal::Number(2.0)),
//!     Instruction::BinaryOp(rill_bytecode::BinOp::Add),
//!     Instruction::Done,
//! ]);
//!
//! let config = VmConfig::from_env();
//! let mut vm = Vm::new(program, config).unwrap();
//! let exit = vm.run().unwrap();
//! assert_eq!(exit, rill_vm::Value::Number(3.0));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builtins;
pub mod config;
pub mod error;
pub mod heap;
mod interp;
pub mod scheduler;
pub mod task;
pub mod value;
pub mod vm;

// Re-exports
pub use config::{ConfigError, VmConfig, VmConfigBuilder};
pub use error::{RuntimeError, VmError};
pub use heap::{Heap, HeapError, HeapStats, RootProvider};
pub use scheduler::Scheduler;
pub use task::{Task, TaskId, TaskState};
pub use value::{Addr, Tag, Value};
pub use vm::Vm;

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
