//! Runtime error taxonomy.
//!
//! Every fault a running program can trigger is fatal for the VM: there is no
//! user-level exception mechanism in the language, so the machine surfaces
//! the first error from [`Vm::run`](crate::Vm::run) and stops. Compile-time
//! faults (parse, type, compile errors) are caught by the out-of-process
//! front-end and never reach this crate.

use thiserror::Error;

use crate::config::ConfigError;
use crate::heap::HeapError;
use crate::value::Tag;

/// A fault raised by executing program instructions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    /// An operator received an operand of the wrong kind.
    #[error("operator '{op}' expected {expected}, got {got}")]
    OperandType {
        /// The operator's source spelling.
        op: &'static str,
        /// Expected operand kind.
        expected: &'static str,
        /// Actual operand kind.
        got: &'static str,
    },

    /// A variable was read before any assignment reached its slot.
    #[error("variable '{name}' used before assignment")]
    UnassignedVariable {
        /// Source-level name from the instruction stream.
        name: String,
    },

    /// An array element was read before being written.
    #[error("array element {index} read before assignment")]
    UnsetElement {
        /// The element index.
        index: usize,
    },

    /// `Call`/`TailCall` applied to something that is neither a closure nor
    /// a builtin.
    #[error("value of kind '{tag}' is not callable")]
    NotCallable {
        /// The callee's node tag.
        tag: Tag,
    },

    /// A channel operation applied to a non-channel value.
    #[error("send/receive on a value of kind '{tag}', not a channel")]
    NotAChannel {
        /// The operand's node tag.
        tag: Tag,
    },

    /// An array index is not a valid element position.
    #[error("array index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// The requested index (as written by the program).
        index: f64,
        /// The array length.
        len: usize,
    },

    /// A builtin received the wrong number of arguments.
    #[error("builtin '{name}' expects {expected} argument(s), got {got}")]
    BuiltinArity {
        /// Builtin name.
        name: &'static str,
        /// Declared arity.
        expected: usize,
        /// Arguments supplied at the call site.
        got: usize,
    },

    /// A builtin id in the heap does not name a registered host function.
    #[error("unknown builtin id {id}")]
    UnknownBuiltin {
        /// The id found in the node metadata.
        id: u32,
    },

    /// The operand stack was popped while empty: the instruction stream is
    /// corrupt (compiler bug).
    #[error("operand stack underflow")]
    StackUnderflow,

    /// `Return` found no call frame on the runtime stack.
    #[error("no call frame to return to")]
    NoCallFrame,

    /// A scope exit found no matching scope entry on the runtime stack.
    #[error("scope exit without a matching scope entry")]
    ScopeMismatch,

    /// The program counter left the instruction stream without reaching a
    /// terminating instruction.
    #[error("program counter {pc} out of range (program length {len})")]
    PcOutOfRange {
        /// The runaway program counter.
        pc: usize,
        /// Program length.
        len: usize,
    },

    /// An output write from the `display` builtin failed.
    #[error("failed to write program output: {message}")]
    Output {
        /// The underlying I/O error text.
        message: String,
    },
}

/// The top-level machine error.
#[derive(Debug, Error)]
pub enum VmError {
    /// A heap fault (exhaustion or a tag-discipline breach).
    #[error(transparent)]
    Heap(#[from] HeapError),

    /// A fault in the running program.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Every task in the ring is blocked or done with no runnable candidate.
    #[error("deadlock: all tasks are blocked")]
    Deadlock,

    /// The supplied configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RuntimeError::UnassignedVariable { name: "x".into() };
        assert_eq!(err.to_string(), "variable 'x' used before assignment");

        let err = RuntimeError::NotCallable { tag: Tag::Number };
        assert!(err.to_string().contains("number"));

        let err = RuntimeError::IndexOutOfRange { index: 9.0, len: 3 };
        assert!(err.to_string().contains("9"));
        assert!(err.to_string().contains("3"));
    }

    #[test]
    fn test_vm_error_from_runtime() {
        let err: VmError = RuntimeError::StackUnderflow.into();
        assert!(matches!(err, VmError::Runtime(_)));
        assert_eq!(err.to_string(), "operand stack underflow");
    }

    #[test]
    fn test_deadlock_message() {
        assert_eq!(VmError::Deadlock.to_string(), "deadlock: all tasks are blocked");
    }
}
