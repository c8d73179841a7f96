use std::mem;

use lorikeet_parser::{parse_program, ParseError};

use crate::builtins::Console;
use crate::compiler::{CompileError, Compiler};
use crate::object::Object;
use crate::symbol_table::SymbolTable;
use crate::vm::{Globals, Limits, Vm, VmError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("{}", join_lines(.0))]
    Parse(Vec<ParseError>),
    #[error("{}", join_lines(.0))]
    Compile(Vec<CompileError>),
    #[error("runtime error: {0}")]
    Runtime(#[from] VmError),
}

fn join_lines<T: ToString>(errors: &[T]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// State carried from one evaluation to the next: the global symbol table,
/// the constant pool, the global slots and the console.
pub struct Session {
    symbols: SymbolTable,
    constants: Vec<Object>,
    globals: Globals,
    console: Console,
    limits: Limits,
}

impl Session {
    pub fn new() -> Self {
        Self {
            symbols: SymbolTable::with_builtins(),
            constants: Vec::new(),
            globals: Globals::new(),
            console: Console::stdio(),
            limits: Limits::default(),
        }
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Parses, compiles and runs `source`, returning the last popped value.
    ///
    /// Symbols and constants are committed only when compilation succeeds.
    /// Globals assigned before a runtime fault are kept. Globals this input
    /// declared but never assigned are forgotten so they can be declared again.
    pub fn eval(&mut self, source: &str) -> Result<Object, EvalError> {
        let program = parse_program(source).map_err(EvalError::Parse)?;
        let first_new_global = self.symbols.num_definitions();
        let mut compiler = Compiler::with_state(self.symbols.clone(), self.constants.clone());
        compiler
            .compile_program(&program)
            .map_err(EvalError::Compile)?;
        let (bytecode, symbols) = compiler.into_parts();
        self.symbols = symbols;
        self.constants = bytecode.constants.clone();

        let mut vm = Vm::new(bytecode)
            .with_limits(self.limits)
            .with_globals(mem::take(&mut self.globals))
            .with_console(mem::take(&mut self.console));
        let outcome = vm.run();
        let value = vm.last_popped_stack_elem();
        let (globals, console) = vm.into_parts();
        self.globals = globals;
        self.console = console;
        if outcome.is_err() {
            let globals = &self.globals;
            self.symbols.forget_globals(|symbol| {
                symbol.index >= first_new_global && globals.get(symbol.index).is_none()
            });
        }
        outcome?;
        Ok(value)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a whole program on a fresh session that uses the standard streams.
pub fn run_source(source: &str, limits: Limits) -> Result<Object, EvalError> {
    Session::new().with_limits(limits).eval(source)
}

#[cfg(test)]
mod tests {
    use super::{EvalError, Session};
    use crate::builtins::Console;
    use crate::compiler::CompileError;
    use crate::object::Object;
    use crate::vm::VmError;

    fn session() -> Session {
        Session::new().with_console(Console::captured(""))
    }

    #[test]
    fn globals_persist_across_inputs() {
        let mut session = session();
        assert_eq!(session.eval("let a = 1;").expect("eval"), Object::Null);
        assert_eq!(session.eval("let b = a + 1;").expect("eval"), Object::Null);
        assert_eq!(session.eval("a + b").expect("eval"), Object::Integer(3));
    }

    #[test]
    fn functions_and_constants_persist() {
        let mut session = session();
        session
            .eval("let add = fn(a, b) { a + b };")
            .expect("define add");
        session.eval("let mut total = 10;").expect("define total");
        session.eval("total = add(total, 5);").expect("update total");
        assert_eq!(session.eval("total").expect("eval"), Object::Integer(15));
        assert_eq!(
            session.eval("\"x\" |> add(\"y\")").expect("eval"),
            Object::string("xy")
        );
    }

    #[test]
    fn failed_compile_leaves_the_session_untouched() {
        let mut session = session();
        session.eval("let a = 1;").expect("eval");
        let err = session.eval("let b = 2; missing").expect_err("compile error");
        assert_eq!(
            err,
            EvalError::Compile(vec![CompileError::UnresolvedIdentifier {
                name: "missing".to_string(),
                line: 1
            }])
        );
        // `b` was never committed, so it can be declared now.
        session.eval("let b = 5;").expect("declare b");
        assert_eq!(session.eval("a + b").expect("eval"), Object::Integer(6));
    }

    #[test]
    fn runtime_fault_keeps_earlier_globals() {
        let mut session = session();
        let err = session
            .eval("let a = 7; let b = a / 0;")
            .expect_err("runtime error");
        assert_eq!(err, EvalError::Runtime(VmError::DivisionByZero));
        assert_eq!(session.eval("a").expect("eval"), Object::Integer(7));
        assert_eq!(
            session.eval("b").expect_err("forgotten global"),
            EvalError::Compile(vec![CompileError::UnresolvedIdentifier {
                name: "b".to_string(),
                line: 1
            }])
        );
    }

    #[test]
    fn unassigned_globals_can_be_declared_after_a_fault() {
        let mut session = session();
        assert_eq!(
            session.eval("let b = 1 / 0;").expect_err("runtime error"),
            EvalError::Runtime(VmError::DivisionByZero)
        );
        session.eval("let b = 5;").expect("declare b again");
        assert_eq!(session.eval("b").expect("eval"), Object::Integer(5));

        session.eval("let len = [][0] + 1;").expect_err("runtime error");
        assert_eq!(session.eval("len(\"ab\")").expect("eval"), Object::Integer(2));
    }

    #[test]
    fn parse_errors_are_reported() {
        let mut session = session();
        let err = session.eval("let = 1;").expect_err("parse error");
        assert!(matches!(err, EvalError::Parse(ref errors) if !errors.is_empty()));
        assert!(err.to_string().starts_with("parse error on line 1"));
    }

    #[test]
    fn console_output_is_kept_between_inputs() {
        let mut session = Session::new().with_console(Console::captured("Ada\n"));
        session
            .eval("let name = ask(\"name? \");")
            .expect("ask");
        session.eval("say(\"hello \", name)").expect("say");
        assert_eq!(
            session.console_mut().take_output(),
            vec!["name? hello Ada".to_string()]
        );
    }
}
