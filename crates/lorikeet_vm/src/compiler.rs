use std::rc::Rc;

use lorikeet_syntax::{Block, Expr, Ident, InfixOp, PrefixOp, Program, Stmt};

use crate::code::{make, Instructions, Opcode, OperandOverflow};
use crate::object::{CompiledFunction, Object};
use crate::symbol_table::{Symbol, SymbolScope, SymbolTable};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("compile error on line {line}: duplicate declaration of `{name}`")]
    DuplicateDeclaration { name: String, line: usize },
    #[error("compile error on line {line}: undefined variable `{name}`")]
    UnresolvedIdentifier { name: String, line: usize },
    #[error("compile error on line {line}: cannot assign to immutable variable `{name}`")]
    ImmutableAssignment { name: String, line: usize },
    #[error("compile error on line {line}: cannot assign to captured variable `{name}`")]
    CapturedAssignment { name: String, line: usize },
    #[error("compile error on line {line}: cannot assign to `{name}` inside its own body, it names the enclosing function")]
    FunctionSelfAssignment { name: String, line: usize },
    #[error("compile error on line {line}: `${name}` does not name an enclosing function")]
    InvalidSelfCall { name: String, line: usize },
    #[error("compile error on line {line}: right side of `|>` must be a call")]
    InvalidPipeTarget { line: usize },
    #[error("compile error on line {line}: macros cannot be compiled")]
    UnsupportedMacro { line: usize },
    #[error("compile error on line {line}: {overflow}")]
    OperandOverflow {
        line: usize,
        overflow: OperandOverflow,
    },
}

/// Output of a compilation: the top-level instruction stream and the
/// constant pool it indexes into.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

/// Compiles a program with a fresh symbol table and constant pool.
pub fn compile(program: &Program) -> Result<Bytecode, Vec<CompileError>> {
    let mut compiler = Compiler::new();
    compiler.compile_program(program)?;
    Ok(compiler.into_parts().0)
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

/// Compiler state saved at the start of `compile_program`.
struct Checkpoint {
    symbols: SymbolTable,
    constants: usize,
    instructions: usize,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Object>,
    symbols: SymbolTable,
    scopes: Vec<CompilationScope>,
    line: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_state(SymbolTable::with_builtins(), Vec::new())
    }

    /// Continues from an earlier compilation: globals and constants defined
    /// there stay valid and new ones are appended.
    pub fn with_state(symbols: SymbolTable, constants: Vec<Object>) -> Self {
        Self {
            constants,
            symbols,
            scopes: vec![CompilationScope::default()],
            line: 0,
        }
    }

    /// Compiles every top-level statement, collecting one error per failing
    /// statement. On error the compiler is rolled back to its state before
    /// the call: no symbols, constants or instructions from `program` remain.
    pub fn compile_program(&mut self, program: &Program) -> Result<(), Vec<CompileError>> {
        let checkpoint = self.checkpoint();
        let mut errors = Vec::new();
        for stmt in &program.statements {
            if let Err(err) = self.compile_stmt(stmt) {
                errors.push(err);
                self.scopes.truncate(1);
                self.symbols.reset_to_global();
            }
        }
        if !errors.is_empty() {
            log::debug!("compilation failed with {} error(s)", errors.len());
            self.restore(checkpoint);
            return Err(errors);
        }
        log::debug!(
            "compiled {} statement(s): {} instruction bytes, {} constant(s)",
            program.statements.len(),
            self.current_instructions().len(),
            self.constants.len()
        );
        Ok(())
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.current_instructions().clone(),
            constants: self.constants.clone(),
        }
    }

    pub fn into_parts(mut self) -> (Bytecode, SymbolTable) {
        let main = self.scopes.swap_remove(0);
        let bytecode = Bytecode {
            instructions: main.instructions,
            constants: self.constants,
        };
        (bytecode, self.symbols)
    }

    fn checkpoint(&self) -> Checkpoint {
        let main = &self.scopes[0];
        Checkpoint {
            symbols: self.symbols.clone(),
            constants: self.constants.len(),
            instructions: main.instructions.len(),
            last: main.last,
            previous: main.previous,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.scopes.truncate(1);
        self.symbols = checkpoint.symbols;
        self.constants.truncate(checkpoint.constants);
        let main = &mut self.scopes[0];
        main.instructions.truncate(checkpoint.instructions);
        main.last = checkpoint.last;
        main.previous = checkpoint.previous;
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.line = stmt.line();
        match stmt {
            Stmt::Expr { expr, .. } => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop, &[])?;
            }
            Stmt::Let {
                line,
                name,
                mutable,
                value,
            } => {
                self.compile_expr(value)?;
                let symbol = self.symbols.define(&name.name, *mutable).map_err(|_| {
                    CompileError::DuplicateDeclaration {
                        name: name.name.clone(),
                        line: *line,
                    }
                })?;
                self.store_symbol(&symbol)?;
            }
            Stmt::Assign { line, name, value } => {
                let symbol = self.resolve(name)?;
                match symbol.scope {
                    SymbolScope::Free => {
                        return Err(CompileError::CapturedAssignment {
                            name: name.name.clone(),
                            line: *line,
                        });
                    }
                    SymbolScope::FunctionSelf => {
                        return Err(CompileError::FunctionSelfAssignment {
                            name: name.name.clone(),
                            line: *line,
                        });
                    }
                    SymbolScope::Global | SymbolScope::Local if symbol.mutable => {
                        self.compile_expr(value)?;
                        self.store_symbol(&symbol)?;
                    }
                    _ => {
                        return Err(CompileError::ImmutableAssignment {
                            name: name.name.clone(),
                            line: *line,
                        });
                    }
                }
            }
            Stmt::Return { value, .. } => match value {
                Some(value) => {
                    self.compile_expr(value)?;
                    self.emit(Opcode::ReturnValue, &[])?;
                }
                None => {
                    self.emit(Opcode::Return, &[])?;
                }
            },
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stmt in &block.statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    /// Compiles a block whose value stays on the stack.
    fn compile_block_value(&mut self, block: &Block) -> Result<(), CompileError> {
        self.compile_block(block)?;
        match block.statements.last() {
            Some(Stmt::Expr { .. }) if self.last_instruction_is(Opcode::Pop) => {
                self.remove_last_pop();
            }
            Some(Stmt::Return { .. }) => {}
            _ => {
                self.emit(Opcode::Null, &[])?;
            }
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        self.line = expr.line();
        match expr {
            Expr::Int(value, _) => {
                let index = self.add_constant(Object::Integer(*value));
                self.emit(Opcode::Constant, &[index])?;
            }
            Expr::Float(value, _) => {
                let index = self.add_constant(Object::Float(*value));
                self.emit(Opcode::Constant, &[index])?;
            }
            Expr::String(value, _) => {
                let index = self.add_constant(Object::string(value));
                self.emit(Opcode::Constant, &[index])?;
            }
            Expr::Bool(value, _) => {
                let opcode = if *value { Opcode::True } else { Opcode::False };
                self.emit(opcode, &[])?;
            }
            Expr::Ident(ident) => {
                let symbol = self.resolve(ident)?;
                self.load_symbol(&symbol)?;
            }
            Expr::Prefix { op, right, .. } => {
                self.compile_expr(right)?;
                let opcode = match op {
                    PrefixOp::Neg => Opcode::Minus,
                    PrefixOp::Not => Opcode::Bang,
                };
                self.emit(opcode, &[])?;
            }
            Expr::Infix {
                left, op, right, ..
            } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                let opcode = match op {
                    InfixOp::Add => Opcode::Add,
                    InfixOp::Sub => Opcode::Sub,
                    InfixOp::Mul => Opcode::Mul,
                    InfixOp::Div => Opcode::Div,
                    InfixOp::Eq => Opcode::Equal,
                    InfixOp::Neq => Opcode::NotEqual,
                    InfixOp::Lt => Opcode::LessThan,
                    InfixOp::Gt => Opcode::GreaterThan,
                };
                self.emit(opcode, &[])?;
            }
            Expr::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                self.compile_expr(condition)?;
                let jump_not_truthy = self.emit(Opcode::JumpNotTruthy, &[0])?;
                self.compile_block_value(consequence)?;
                let jump = self.emit(Opcode::Jump, &[0])?;
                self.patch_jump(jump_not_truthy, Opcode::JumpNotTruthy)?;
                match alternative {
                    Some(alternative) => self.compile_block_value(alternative)?,
                    None => {
                        self.emit(Opcode::Null, &[])?;
                    }
                }
                self.patch_jump(jump, Opcode::Jump)?;
            }
            Expr::Function {
                name, params, body, ..
            } => self.compile_function(name.as_deref(), params, body)?,
            Expr::Call { callee, args, .. } => {
                self.compile_expr(callee)?;
                self.compile_args(None, args)?;
            }
            Expr::SelfCall { name, args, .. } => {
                self.compile_self_callee(name)?;
                self.compile_args(None, args)?;
            }
            Expr::Pipe { value, call, .. } => match call.as_ref() {
                Expr::Call { callee, args, .. } => {
                    self.compile_expr(callee)?;
                    self.compile_args(Some(value), args)?;
                }
                Expr::SelfCall { name, args, .. } => {
                    self.compile_self_callee(name)?;
                    self.compile_args(Some(value), args)?;
                }
                other => return Err(CompileError::InvalidPipeTarget { line: other.line() }),
            },
            Expr::Index { target, index, .. } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.emit(Opcode::Index, &[])?;
            }
            Expr::Array { elements, .. } => {
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()])?;
            }
            Expr::Hash { pairs, .. } => {
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len() * 2])?;
            }
            Expr::Macro { line, .. } => {
                return Err(CompileError::UnsupportedMacro { line: *line });
            }
        }
        Ok(())
    }

    fn compile_function(
        &mut self,
        name: Option<&str>,
        params: &[Ident],
        body: &Block,
    ) -> Result<(), CompileError> {
        self.enter_scope();
        if let Some(name) = name {
            self.symbols.define_function_self(name);
        }
        for param in params {
            self.symbols
                .define(&param.name, false)
                .map_err(|_| CompileError::DuplicateDeclaration {
                    name: param.name.clone(),
                    line: param.line,
                })?;
        }
        self.compile_block(body)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[])?;
        }

        let (instructions, scope) = self.leave_scope();
        let free_symbols = scope.free_symbols().to_vec();
        for symbol in &free_symbols {
            self.load_symbol(symbol)?;
        }
        let function = CompiledFunction {
            instructions,
            num_locals: scope.num_definitions(),
            num_parameters: params.len(),
            name: name.map(str::to_string),
        };
        let index = self.add_function(function);
        self.emit(Opcode::Closure, &[index, free_symbols.len()])?;
        Ok(())
    }

    /// Emits the arguments of a call, with the piped value first when
    /// present, followed by the call itself.
    fn compile_args(&mut self, piped: Option<&Expr>, args: &[Expr]) -> Result<(), CompileError> {
        if let Some(piped) = piped {
            self.compile_expr(piped)?;
        }
        for arg in args {
            self.compile_expr(arg)?;
        }
        let count = args.len() + usize::from(piped.is_some());
        self.emit(Opcode::Call, &[count])?;
        Ok(())
    }

    /// `$name` must name the function being compiled or one that encloses it.
    fn compile_self_callee(&mut self, name: &Ident) -> Result<(), CompileError> {
        let invalid = || CompileError::InvalidSelfCall {
            name: name.name.clone(),
            line: name.line,
        };
        let symbol = self.symbols.resolve(&name.name).ok_or_else(invalid)?;
        match symbol.scope {
            SymbolScope::FunctionSelf => {
                self.emit(Opcode::CurrentClosure, &[])?;
            }
            SymbolScope::Free
                if self.symbols.origin(&symbol).scope == SymbolScope::FunctionSelf =>
            {
                self.emit(Opcode::GetFree, &[symbol.index])?;
            }
            _ => return Err(invalid()),
        }
        Ok(())
    }

    fn resolve(&mut self, ident: &Ident) -> Result<Symbol, CompileError> {
        self.symbols
            .resolve(&ident.name)
            .ok_or_else(|| CompileError::UnresolvedIdentifier {
                name: ident.name.clone(),
                line: ident.line,
            })
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> Result<(), CompileError> {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index])?,
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index])?,
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index])?,
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index])?,
            SymbolScope::FunctionSelf => self.emit(Opcode::CurrentClosure, &[])?,
        };
        Ok(())
    }

    fn store_symbol(&mut self, symbol: &Symbol) -> Result<(), CompileError> {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index])?,
            SymbolScope::Local => self.emit(Opcode::SetLocal, &[symbol.index])?,
            _ => {
                return Err(CompileError::ImmutableAssignment {
                    name: symbol.name.clone(),
                    line: self.line,
                })
            }
        };
        Ok(())
    }

    /// Reuses an identical literal already in the pool.
    fn add_constant(&mut self, object: Object) -> usize {
        let existing = self.constants.iter().position(|constant| match (constant, &object) {
            (Object::Integer(a), Object::Integer(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a.to_bits() == b.to_bits(),
            (Object::String(a), Object::String(b)) => a == b,
            _ => false,
        });
        if let Some(index) = existing {
            return index;
        }
        self.constants.push(object);
        self.constants.len() - 1
    }

    fn add_function(&mut self, function: CompiledFunction) -> usize {
        self.constants
            .push(Object::CompiledFunction(Rc::new(function)));
        self.constants.len() - 1
    }

    fn emit(&mut self, opcode: Opcode, operands: &[usize]) -> Result<usize, CompileError> {
        let bytes = make(opcode, operands).map_err(|overflow| CompileError::OperandOverflow {
            line: self.line,
            overflow,
        })?;
        let scope = self.scope_mut();
        let position = scope.instructions.push(&bytes);
        scope.previous = scope.last;
        scope.last = Some(EmittedInstruction { opcode, position });
        Ok(position)
    }

    /// Points the jump at `position` to the end of the current stream.
    fn patch_jump(&mut self, position: usize, opcode: Opcode) -> Result<(), CompileError> {
        let target = self.current_instructions().len();
        let bytes = make(opcode, &[target]).map_err(|overflow| CompileError::OperandOverflow {
            line: self.line,
            overflow,
        })?;
        self.scope_mut().instructions.replace(position, &bytes);
        Ok(())
    }

    fn last_instruction_is(&self, opcode: Opcode) -> bool {
        self.scope()
            .last
            .is_some_and(|last| last.opcode == opcode)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.scope_mut();
        if let Some(last) = scope.last {
            scope.instructions.truncate(last.position);
            scope.last = scope.previous;
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = self.scope_mut();
        if let Some(last) = scope.last.as_mut() {
            scope
                .instructions
                .replace(last.position, &[Opcode::ReturnValue as u8]);
            last.opcode = Opcode::ReturnValue;
        }
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.symbols.enter_scope();
    }

    fn leave_scope(&mut self) -> (Instructions, crate::symbol_table::Scope) {
        let instructions = if self.scopes.len() > 1 {
            self.scopes.pop().map(|scope| scope.instructions).unwrap_or_default()
        } else {
            Instructions::new()
        };
        let scope = self.symbols.leave_scope().unwrap_or_default();
        (instructions, scope)
    }

    fn scope(&self) -> &CompilationScope {
        &self.scopes[self.scopes.len() - 1]
    }

    fn scope_mut(&mut self) -> &mut CompilationScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn current_instructions(&self) -> &Instructions {
        &self.scope().instructions
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{compile, Bytecode, CompileError, Compiler};
    use crate::object::Object;
    use crate::symbol_table::SymbolTable;
    use lorikeet_parser::parse_program;

    fn compile_source(source: &str) -> Bytecode {
        let program = parse_program(source).expect("parse program");
        compile(&program).expect("compile program")
    }

    fn compile_errors(source: &str) -> Vec<CompileError> {
        let program = parse_program(source).expect("parse program");
        compile(&program).expect_err("expected compile error")
    }

    fn function_listing(bytecode: &Bytecode, index: usize) -> String {
        match &bytecode.constants[index] {
            Object::CompiledFunction(function) => function.instructions.to_string(),
            other => panic!("constant {index} is not a function: {other:?}"),
        }
    }

    #[test]
    fn integer_arithmetic() {
        let bytecode = compile_source("1 + 2; 1 - 2; -1");
        assert_eq!(
            bytecode.instructions.to_string(),
            "0000 OpConstant 0\n0003 OpConstant 1\n0006 OpAdd\n0007 OpPop\n\
             0008 OpConstant 0\n0011 OpConstant 1\n0014 OpSub\n0015 OpPop\n\
             0016 OpConstant 0\n0019 OpMinus\n0020 OpPop\n"
        );
        assert_eq!(bytecode.constants, vec![Object::Integer(1), Object::Integer(2)]);
    }

    #[test]
    fn literals_are_deduplicated_by_type() {
        let bytecode = compile_source("1; 1.0; \"1\"; 1; \"1\"");
        assert_eq!(bytecode.constants.len(), 3);
        assert!(matches!(bytecode.constants[1], Object::Float(_)));
    }

    #[test]
    fn less_than_keeps_operand_order() {
        let bytecode = compile_source("1 < 2");
        assert_eq!(
            bytecode.instructions.to_string(),
            "0000 OpConstant 0\n0003 OpConstant 1\n0006 OpLessThan\n0007 OpPop\n"
        );
    }

    #[test]
    fn conditionals_patch_jumps() {
        let bytecode = compile_source("if (true) { 10 }; 3333;");
        assert_eq!(
            bytecode.instructions.to_string(),
            "0000 OpTrue\n0001 OpJumpNotTruthy 10\n0004 OpConstant 0\n0007 OpJump 11\n\
             0010 OpNull\n0011 OpPop\n0012 OpConstant 1\n0015 OpPop\n"
        );

        let bytecode = compile_source("if (true) { 10 } else { 20 }; 3333;");
        assert_eq!(
            bytecode.instructions.to_string(),
            "0000 OpTrue\n0001 OpJumpNotTruthy 10\n0004 OpConstant 0\n0007 OpJump 13\n\
             0010 OpConstant 1\n0013 OpPop\n0014 OpConstant 2\n0017 OpPop\n"
        );
    }

    #[test]
    fn block_without_trailing_expression_yields_null() {
        let bytecode = compile_source("if (true) { let a = 1; }");
        assert_eq!(
            bytecode.instructions.to_string(),
            "0000 OpTrue\n0001 OpJumpNotTruthy 14\n0004 OpConstant 0\n0007 OpSetGlobal 0\n\
             0010 OpNull\n0011 OpJump 15\n0014 OpNull\n0015 OpPop\n"
        );
    }

    #[test]
    fn globals_and_mutable_reassignment() {
        let bytecode = compile_source("let mut one = 1; one = 2; one;");
        assert_eq!(
            bytecode.instructions.to_string(),
            "0000 OpConstant 0\n0003 OpSetGlobal 0\n0006 OpConstant 1\n0009 OpSetGlobal 0\n\
             0012 OpGetGlobal 0\n0015 OpPop\n"
        );
    }

    #[test]
    fn collections_and_index() {
        let bytecode = compile_source("[1, 2][0]; {1: 2, 3: 4}");
        assert_eq!(
            bytecode.instructions.to_string(),
            "0000 OpConstant 0\n0003 OpConstant 1\n0006 OpArray 2\n0009 OpConstant 2\n\
             0012 OpIndex\n0013 OpPop\n0014 OpConstant 0\n0017 OpConstant 1\n\
             0020 OpConstant 3\n0023 OpConstant 4\n0026 OpHash 4\n0029 OpPop\n"
        );
    }

    #[test]
    fn functions_return_their_last_expression() {
        let bytecode = compile_source("fn() { 5 + 10 }");
        assert_eq!(
            function_listing(&bytecode, 2),
            "0000 OpConstant 0\n0003 OpConstant 1\n0006 OpAdd\n0007 OpReturnValue\n"
        );
        assert_eq!(bytecode.instructions.to_string(), "0000 OpClosure 2 0\n0004 OpPop\n");

        let bytecode = compile_source("fn() { }");
        assert_eq!(function_listing(&bytecode, 0), "0000 OpReturn\n");

        let bytecode = compile_source("fn() { let a = 1; }");
        assert_eq!(
            function_listing(&bytecode, 1),
            "0000 OpConstant 0\n0003 OpSetLocal 0\n0005 OpReturn\n"
        );
    }

    #[test]
    fn locals_and_builtins() {
        let bytecode = compile_source("fn(a) { let b = a; len(b) }");
        assert_eq!(
            function_listing(&bytecode, 0),
            "0000 OpGetLocal 0\n0002 OpSetLocal 1\n0004 OpGetBuiltin 0\n0006 OpGetLocal 1\n\
             0008 OpCall 1\n0010 OpReturnValue\n"
        );
        match &bytecode.constants[0] {
            Object::CompiledFunction(function) => {
                assert_eq!(function.num_locals, 2);
                assert_eq!(function.num_parameters, 1);
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn closures_load_free_variables_before_creation() {
        let bytecode = compile_source("fn(a) { fn(b) { a + b } }");
        assert_eq!(
            function_listing(&bytecode, 0),
            "0000 OpGetFree 0\n0002 OpGetLocal 0\n0004 OpAdd\n0005 OpReturnValue\n"
        );
        assert_eq!(
            function_listing(&bytecode, 1),
            "0000 OpGetLocal 0\n0002 OpClosure 0 1\n0006 OpReturnValue\n"
        );
        assert_eq!(bytecode.instructions.to_string(), "0000 OpClosure 1 0\n0004 OpPop\n");
    }

    #[test]
    fn recursion_uses_current_closure() {
        let bytecode = compile_source("let f = fn(n) { $f(n) }; let g = fn() { g() };");
        assert_eq!(
            function_listing(&bytecode, 0),
            "0000 OpCurrentClosure\n0001 OpGetLocal 0\n0003 OpCall 1\n0005 OpReturnValue\n"
        );
        assert_eq!(
            function_listing(&bytecode, 1),
            "0000 OpCurrentClosure\n0001 OpCall 0\n0003 OpReturnValue\n"
        );
    }

    #[test]
    fn self_call_from_nested_function_uses_free_slot() {
        let bytecode = compile_source("let f = fn(n) { fn() { $f(n) } };");
        assert_eq!(
            function_listing(&bytecode, 0),
            "0000 OpGetFree 0\n0002 OpGetFree 1\n0004 OpCall 1\n0006 OpReturnValue\n"
        );
        assert_eq!(
            function_listing(&bytecode, 1),
            "0000 OpCurrentClosure\n0001 OpGetLocal 0\n0003 OpClosure 0 2\n0007 OpReturnValue\n"
        );
    }

    #[test]
    fn pipe_inserts_value_as_first_argument() {
        let piped = compile_source("let add = fn(a, b) { a + b }; 5 |> add(3);");
        let direct = compile_source("let add = fn(a, b) { a + b }; add(5, 3);");
        assert_eq!(piped.instructions, direct.instructions);
        assert!(piped
            .instructions
            .to_string()
            .ends_with("0007 OpGetGlobal 0\n0010 OpConstant 1\n0013 OpConstant 2\n0016 OpCall 2\n0018 OpPop\n"));
    }

    #[test]
    fn reports_resolution_errors() {
        assert_eq!(
            compile_errors("x;"),
            vec![CompileError::UnresolvedIdentifier {
                name: "x".to_string(),
                line: 1
            }]
        );
        assert_eq!(
            compile_errors("let a = 1;\nlet a = 2;"),
            vec![CompileError::DuplicateDeclaration {
                name: "a".to_string(),
                line: 2
            }]
        );
        assert!(matches!(
            compile_errors("fn(a, a) { a }")[0],
            CompileError::DuplicateDeclaration { .. }
        ));
        assert_eq!(compile_errors("a; b; 1;").len(), 2);
    }

    #[test]
    fn reports_assignment_errors() {
        assert!(matches!(
            compile_errors("let x = 5; x = 6;")[0],
            CompileError::ImmutableAssignment { .. }
        ));
        assert!(matches!(
            compile_errors("fn(p) { p = 1; }")[0],
            CompileError::ImmutableAssignment { .. }
        ));
        assert!(matches!(
            compile_errors("len = 1;")[0],
            CompileError::ImmutableAssignment { .. }
        ));
        assert!(matches!(
            compile_errors("fn() { let mut x = 1; fn() { x = 2; } }")[0],
            CompileError::CapturedAssignment { .. }
        ));
        assert_eq!(
            compile_errors("let mut f = fn() { f = 1; };")[0],
            CompileError::FunctionSelfAssignment {
                name: "f".to_string(),
                line: 1
            }
        );
    }

    #[test]
    fn failed_compilation_rolls_back_state() {
        let mut compiler = Compiler::new();
        let program = parse_program("let a = 1;").expect("parse program");
        compiler.compile_program(&program).expect("compile first");

        let program = parse_program("let b = \"two\"; let f = fn() { b }; missing;")
            .expect("parse program");
        assert!(compiler.compile_program(&program).is_err());

        let (bytecode, mut symbols) = compiler.into_parts();
        assert_eq!(
            bytecode.instructions.to_string(),
            "0000 OpConstant 0\n0003 OpSetGlobal 0\n"
        );
        assert_eq!(bytecode.constants, vec![Object::Integer(1)]);
        assert!(symbols.resolve("a").is_some());
        assert!(symbols.resolve("b").is_none());
        assert!(symbols.resolve("f").is_none());
    }

    #[test]
    fn reports_invalid_self_calls_and_macros() {
        assert!(matches!(
            compile_errors("let g = 1; $g();")[0],
            CompileError::InvalidSelfCall { .. }
        ));
        assert!(matches!(
            compile_errors("let f = fn(f) { $f(1) };")[0],
            CompileError::InvalidSelfCall { .. }
        ));
        assert!(matches!(
            compile_errors("let m = macro(x) { x };")[0],
            CompileError::UnsupportedMacro { .. }
        ));
    }

    #[test]
    fn continues_from_previous_state() {
        let program = parse_program("let a = 1;").expect("parse program");
        let mut compiler = Compiler::with_state(SymbolTable::with_builtins(), Vec::new());
        compiler.compile_program(&program).expect("compile first");
        let (first, symbols) = compiler.into_parts();

        let program = parse_program("a + 2;").expect("parse program");
        let mut compiler = Compiler::with_state(symbols, first.constants);
        compiler.compile_program(&program).expect("compile second");
        let bytecode = compiler.bytecode();
        assert_eq!(
            bytecode.instructions.to_string(),
            "0000 OpGetGlobal 0\n0003 OpConstant 1\n0006 OpAdd\n0007 OpPop\n"
        );
        assert_eq!(bytecode.constants.len(), 2);
    }
}
