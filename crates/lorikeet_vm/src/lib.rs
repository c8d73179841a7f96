//! Bytecode compiler and stack virtual machine for Lorikeet.

pub mod builtins;
pub mod code;
pub mod compiler;
pub mod object;
mod session;
pub mod symbol_table;
pub mod vm;

pub use builtins::{Console, BUILTINS};
pub use code::{Instructions, Opcode};
pub use compiler::{compile, Bytecode, CompileError, Compiler};
pub use object::{Closure, CompiledFunction, HashKey, Object};
pub use session::{run_source, EvalError, Session};
pub use symbol_table::{Symbol, SymbolScope, SymbolTable};
pub use vm::{Globals, Limits, Vm, VmError, VmState};
