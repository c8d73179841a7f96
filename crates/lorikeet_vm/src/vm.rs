use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::builtins::{Console, BUILTINS};
use crate::code::{read_u16, read_u8, Opcode};
use crate::compiler::Bytecode;
use crate::object::{Closure, CompiledFunction, HashKey, Object};

pub const STACK_SIZE: usize = 2048;
pub const MAX_FRAMES: usize = 1024;

/// Capacity limits for one VM run. Global slots are bounded separately by
/// the two-byte operand of `OpSetGlobal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub stack_size: usize,
    pub max_frames: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            stack_size: STACK_SIZE,
            max_frames: MAX_FRAMES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Ready,
    Running,
    Halted,
    Faulted,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("stack overflow: operand stack limit of {0} exceeded")]
    StackOverflow(usize),
    #[error("stack overflow: maximum call depth {0} exceeded")]
    FrameOverflow(usize),
    #[error("stack underflow")]
    StackUnderflow,
    #[error("unknown operator: {left} {op} {right}")]
    UnknownOperator {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("unsupported type for negation: {0}")]
    UnsupportedNegation(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    #[error("unusable as hash key: {0}")]
    UnusableHashKey(&'static str),
    #[error("index operator not supported: {target}[{index}]")]
    IndexNotSupported {
        target: &'static str,
        index: &'static str,
    },
    #[error("calling non-function: {0}")]
    NotCallable(&'static str),
    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongArity { want: usize, got: usize },
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("invalid constant at index {0}")]
    InvalidConstant(usize),
    #[error("unknown builtin {0}")]
    UnknownBuiltin(usize),
    #[error("undefined global at slot {0}")]
    UndefinedGlobal(usize),
    #[error("undefined free variable at slot {0}")]
    UndefinedFree(usize),
    #[error("vm cannot run from state {0:?}")]
    NotReady(VmState),
}

/// Global slots shared by every top-level evaluation of a session.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    slots: Vec<Option<Object>>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Option<&Object> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn set(&mut self, index: usize, value: Object) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(value);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Self {
            closure,
            ip: 0,
            base_pointer,
        }
    }

    fn instructions(&self) -> &[u8] {
        self.closure.function.instructions.as_bytes()
    }
}

pub struct Vm {
    constants: Vec<Object>,
    stack: Vec<Object>,
    sp: usize,
    globals: Globals,
    frames: Vec<Frame>,
    limits: Limits,
    console: Console,
    state: VmState,
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        let main = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
            name: None,
        };
        let main = Rc::new(Closure {
            function: Rc::new(main),
            free: Vec::new(),
        });
        let limits = Limits::default();
        Self {
            constants: bytecode.constants,
            stack: vec![Object::Null; limits.stack_size],
            sp: 0,
            globals: Globals::new(),
            frames: vec![Frame::new(main, 0)],
            limits,
            console: Console::stdio(),
            state: VmState::Ready,
        }
    }

    pub fn with_globals(mut self, globals: Globals) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self.stack = vec![Object::Null; limits.stack_size];
        self
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    /// Hands back the state a session carries into its next evaluation.
    pub fn into_parts(self) -> (Globals, Console) {
        (self.globals, self.console)
    }

    /// The value most recently popped off the operand stack.
    pub fn last_popped_stack_elem(&self) -> Object {
        self.stack.get(self.sp).cloned().unwrap_or(Object::Null)
    }

    pub fn run(&mut self) -> Result<(), VmError> {
        if self.state != VmState::Ready {
            return Err(VmError::NotReady(self.state));
        }
        self.state = VmState::Running;
        log::debug!(
            "vm run: {} instruction bytes, {} constant(s)",
            self.frames[0].instructions().len(),
            self.constants.len()
        );
        match self.execute() {
            Ok(()) => {
                self.state = VmState::Halted;
                log::debug!("vm halted with {}", self.last_popped_stack_elem());
                Ok(())
            }
            Err(err) => {
                self.state = VmState::Faulted;
                log::debug!("vm faulted: {err}");
                Err(err)
            }
        }
    }

    fn execute(&mut self) -> Result<(), VmError> {
        loop {
            let frame = self.current_frame_mut();
            let Some(&byte) = frame.instructions().get(frame.ip) else {
                if self.frames.len() == 1 {
                    return Ok(());
                }
                self.return_from_frame(Object::Null)?;
                continue;
            };
            frame.ip += 1;
            let opcode = Opcode::from_byte(byte).ok_or(VmError::UnknownOpcode(byte))?;

            match opcode {
                Opcode::Constant => {
                    let index = self.read_u16_operand();
                    let constant = self
                        .constants
                        .get(index)
                        .cloned()
                        .ok_or(VmError::InvalidConstant(index))?;
                    self.push(constant)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    self.execute_binary_operation(opcode)?;
                }
                Opcode::True => self.push(Object::Boolean(true))?,
                Opcode::False => self.push(Object::Boolean(false))?,
                Opcode::Null => self.push(Object::Null)?,
                Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan | Opcode::LessThan => {
                    self.execute_comparison(opcode)?;
                }
                Opcode::Minus => {
                    let operand = self.pop()?;
                    let result = match operand {
                        Object::Integer(value) => Object::Integer(value.wrapping_neg()),
                        Object::Float(value) => Object::Float(-value),
                        other => return Err(VmError::UnsupportedNegation(other.type_name())),
                    };
                    self.push(result)?;
                }
                Opcode::Bang => {
                    let operand = self.pop()?;
                    self.push(Object::Boolean(!operand.is_truthy()))?;
                }
                Opcode::Jump => {
                    let target = self.read_u16_operand();
                    self.current_frame_mut().ip = target;
                }
                Opcode::JumpNotTruthy => {
                    let target = self.read_u16_operand();
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = target;
                    }
                }
                Opcode::SetGlobal => {
                    let index = self.read_u16_operand();
                    let value = self.pop()?;
                    self.globals.set(index, value);
                }
                Opcode::GetGlobal => {
                    let index = self.read_u16_operand();
                    let value = self
                        .globals
                        .get(index)
                        .cloned()
                        .ok_or(VmError::UndefinedGlobal(index))?;
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let index = self.read_u8_operand();
                    let slot = self.current_frame().base_pointer + index;
                    let value = self.pop()?;
                    self.stack[slot] = value;
                }
                Opcode::GetLocal => {
                    let index = self.read_u8_operand();
                    let slot = self.current_frame().base_pointer + index;
                    let value = self.stack[slot].clone();
                    self.push(value)?;
                }
                Opcode::GetBuiltin => {
                    let index = self.read_u8_operand();
                    if index >= BUILTINS.len() {
                        return Err(VmError::UnknownBuiltin(index));
                    }
                    self.push(Object::Builtin(index))?;
                }
                Opcode::GetFree => {
                    let index = self.read_u8_operand();
                    let value = self
                        .current_frame()
                        .closure
                        .free
                        .get(index)
                        .cloned()
                        .ok_or(VmError::UndefinedFree(index))?;
                    self.push(value)?;
                }
                Opcode::CurrentClosure => {
                    let closure = Rc::clone(&self.current_frame().closure);
                    self.push(Object::Closure(closure))?;
                }
                Opcode::Array => {
                    let count = self.read_u16_operand();
                    let elements = self.take_top(count)?;
                    self.push(Object::array(elements))?;
                }
                Opcode::Hash => {
                    let count = self.read_u16_operand();
                    let hash = self.build_hash(count)?;
                    self.push(hash)?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let target = self.pop()?;
                    let value = execute_index(&target, &index)?;
                    self.push(value)?;
                }
                Opcode::Call => {
                    let argc = self.read_u8_operand();
                    self.call(argc)?;
                }
                Opcode::ReturnValue => {
                    let value = self.pop()?;
                    if self.frames.len() == 1 {
                        return Ok(());
                    }
                    self.return_from_frame(value)?;
                }
                Opcode::Return => {
                    if self.frames.len() == 1 {
                        if let Some(slot) = self.stack.get_mut(self.sp) {
                            *slot = Object::Null;
                        }
                        return Ok(());
                    }
                    self.return_from_frame(Object::Null)?;
                }
                Opcode::Closure => {
                    let index = self.read_u16_operand();
                    let free_count = self.read_u8_operand();
                    self.push_closure(index, free_count)?;
                }
            }
        }
    }

    fn call(&mut self, argc: usize) -> Result<(), VmError> {
        if argc >= self.sp {
            return Err(VmError::StackUnderflow);
        }
        match self.stack[self.sp - 1 - argc].clone() {
            Object::Closure(closure) => self.call_closure(closure, argc),
            Object::Builtin(index) => self.call_builtin(index, argc),
            other => Err(VmError::NotCallable(other.type_name())),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, argc: usize) -> Result<(), VmError> {
        let function = &closure.function;
        if argc != function.num_parameters {
            return Err(VmError::WrongArity {
                want: function.num_parameters,
                got: argc,
            });
        }
        if self.frames.len() >= self.limits.max_frames {
            return Err(VmError::FrameOverflow(self.limits.max_frames));
        }
        let base_pointer = self.sp - argc;
        let top = base_pointer + function.num_locals;
        if top > self.stack.len() {
            return Err(VmError::StackOverflow(self.stack.len()));
        }
        for slot in &mut self.stack[self.sp..top] {
            *slot = Object::Null;
        }
        log::trace!(
            "call {} with {argc} argument(s) at depth {}",
            function.name.as_deref().unwrap_or("<anonymous>"),
            self.frames.len()
        );
        self.frames.push(Frame::new(closure, base_pointer));
        self.sp = top;
        Ok(())
    }

    fn call_builtin(&mut self, index: usize, argc: usize) -> Result<(), VmError> {
        let builtin = BUILTINS.get(index).ok_or(VmError::UnknownBuiltin(index))?;
        log::trace!("call builtin {} with {argc} argument(s)", builtin.name);
        let result = (builtin.func)(&mut self.console, &self.stack[self.sp - argc..self.sp]);
        self.sp -= argc + 1;
        self.push(result)
    }

    fn return_from_frame(&mut self, value: Object) -> Result<(), VmError> {
        let frame = self.frames.pop().ok_or(VmError::StackUnderflow)?;
        log::trace!("return {value} to depth {}", self.frames.len());
        self.sp = frame.base_pointer.saturating_sub(1);
        self.push(value)
    }

    fn push_closure(&mut self, index: usize, free_count: usize) -> Result<(), VmError> {
        let function = match self.constants.get(index) {
            Some(Object::CompiledFunction(function)) => Rc::clone(function),
            _ => return Err(VmError::InvalidConstant(index)),
        };
        let free = self.take_top(free_count)?;
        self.push(Object::Closure(Rc::new(Closure { function, free })))
    }

    fn build_hash(&mut self, count: usize) -> Result<Object, VmError> {
        let items = self.take_top(count)?;
        let mut pairs = IndexMap::with_capacity(count / 2);
        for pair in items.chunks(2) {
            let [key, value] = pair else {
                return Err(VmError::StackUnderflow);
            };
            let key = HashKey::try_from_object(key)
                .ok_or(VmError::UnusableHashKey(key.type_name()))?;
            pairs.insert(key, value.clone());
        }
        Ok(Object::Hash(Rc::new(pairs)))
    }

    fn execute_binary_operation(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (&left, &right) {
            (Object::Integer(a), Object::Integer(b)) => integer_operation(opcode, *a, *b)?,
            (Object::Integer(a), Object::Float(b)) => float_operation(opcode, *a as f64, *b),
            (Object::Float(a), Object::Integer(b)) => float_operation(opcode, *a, *b as f64),
            (Object::Float(a), Object::Float(b)) => float_operation(opcode, *a, *b),
            (Object::String(a), Object::String(b)) if opcode == Opcode::Add => {
                let mut joined = String::with_capacity(a.len() + b.len());
                joined.push_str(a);
                joined.push_str(b);
                Object::string(joined)
            }
            _ => return Err(unknown_operator(opcode, &left, &right)),
        };
        self.push(result)
    }

    fn execute_comparison(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match opcode {
            Opcode::Equal => left == right,
            Opcode::NotEqual => left != right,
            _ => {
                let ordering = match (&left, &right) {
                    (Object::Integer(a), Object::Integer(b)) => Some(a.cmp(b)),
                    (Object::Integer(a), Object::Float(b)) => (*a as f64).partial_cmp(b),
                    (Object::Float(a), Object::Integer(b)) => a.partial_cmp(&(*b as f64)),
                    (Object::Float(a), Object::Float(b)) => a.partial_cmp(b),
                    _ => return Err(unknown_operator(opcode, &left, &right)),
                };
                if opcode == Opcode::GreaterThan {
                    ordering.is_some_and(Ordering::is_gt)
                } else {
                    ordering.is_some_and(Ordering::is_lt)
                }
            }
        };
        self.push(Object::Boolean(result))
    }

    /// Removes the top `count` stack values, oldest first.
    fn take_top(&mut self, count: usize) -> Result<Vec<Object>, VmError> {
        if count > self.sp {
            return Err(VmError::StackUnderflow);
        }
        let start = self.sp - count;
        let values = self.stack[start..self.sp].to_vec();
        self.sp = start;
        Ok(values)
    }

    fn push(&mut self, object: Object) -> Result<(), VmError> {
        let Some(slot) = self.stack.get_mut(self.sp) else {
            return Err(VmError::StackOverflow(self.stack.len()));
        };
        *slot = object;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Object, VmError> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    fn read_u16_operand(&mut self) -> usize {
        let frame = self.current_frame_mut();
        let value = read_u16(frame.instructions(), frame.ip);
        frame.ip += 2;
        usize::from(value)
    }

    fn read_u8_operand(&mut self) -> usize {
        let frame = self.current_frame_mut();
        let value = read_u8(frame.instructions(), frame.ip);
        frame.ip += 1;
        usize::from(value)
    }

    fn current_frame(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

fn integer_operation(opcode: Opcode, a: i64, b: i64) -> Result<Object, VmError> {
    let value = match opcode {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        _ => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            a.wrapping_div(b)
        }
    };
    Ok(Object::Integer(value))
}

fn float_operation(opcode: Opcode, a: f64, b: f64) -> Object {
    let value = match opcode {
        Opcode::Add => a + b,
        Opcode::Sub => a - b,
        Opcode::Mul => a * b,
        _ => a / b,
    };
    Object::Float(value)
}

fn execute_index(target: &Object, index: &Object) -> Result<Object, VmError> {
    match (target, index) {
        (Object::Array(elements), Object::Integer(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| elements.get(i))
            .cloned()
            .unwrap_or(Object::Null)),
        (Object::Hash(pairs), key) => {
            let key = HashKey::try_from_object(key)
                .ok_or(VmError::UnusableHashKey(key.type_name()))?;
            Ok(pairs.get(&key).cloned().unwrap_or(Object::Null))
        }
        _ => Err(VmError::IndexNotSupported {
            target: target.type_name(),
            index: index.type_name(),
        }),
    }
}

fn unknown_operator(opcode: Opcode, left: &Object, right: &Object) -> VmError {
    let op = match opcode {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Equal => "==",
        Opcode::NotEqual => "!=",
        Opcode::GreaterThan => ">",
        Opcode::LessThan => "<",
        other => other.name(),
    };
    VmError::UnknownOperator {
        op,
        left: left.type_name(),
        right: right.type_name(),
    }
}
