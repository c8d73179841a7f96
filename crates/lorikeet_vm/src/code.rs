use std::fmt;

/// One-byte instruction tags. Operands follow the tag as big-endian
/// integers whose widths come from [`Opcode::operand_widths`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Constant,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    True,
    False,
    Null,
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    Minus,
    Bang,
    JumpNotTruthy,
    Jump,
    GetGlobal,
    SetGlobal,
    Array,
    Hash,
    Index,
    Call,
    ReturnValue,
    Return,
    GetLocal,
    SetLocal,
    GetBuiltin,
    Closure,
    GetFree,
    CurrentClosure,
}

const OPCODES: [Opcode; 31] = [
    Opcode::Constant,
    Opcode::Pop,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::True,
    Opcode::False,
    Opcode::Null,
    Opcode::Equal,
    Opcode::NotEqual,
    Opcode::GreaterThan,
    Opcode::LessThan,
    Opcode::Minus,
    Opcode::Bang,
    Opcode::JumpNotTruthy,
    Opcode::Jump,
    Opcode::GetGlobal,
    Opcode::SetGlobal,
    Opcode::Array,
    Opcode::Hash,
    Opcode::Index,
    Opcode::Call,
    Opcode::ReturnValue,
    Opcode::Return,
    Opcode::GetLocal,
    Opcode::SetLocal,
    Opcode::GetBuiltin,
    Opcode::Closure,
    Opcode::GetFree,
    Opcode::CurrentClosure,
];

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        OPCODES.get(usize::from(byte)).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Constant => "OpConstant",
            Opcode::Pop => "OpPop",
            Opcode::Add => "OpAdd",
            Opcode::Sub => "OpSub",
            Opcode::Mul => "OpMul",
            Opcode::Div => "OpDiv",
            Opcode::True => "OpTrue",
            Opcode::False => "OpFalse",
            Opcode::Null => "OpNull",
            Opcode::Equal => "OpEqual",
            Opcode::NotEqual => "OpNotEqual",
            Opcode::GreaterThan => "OpGreaterThan",
            Opcode::LessThan => "OpLessThan",
            Opcode::Minus => "OpMinus",
            Opcode::Bang => "OpBang",
            Opcode::JumpNotTruthy => "OpJumpNotTruthy",
            Opcode::Jump => "OpJump",
            Opcode::GetGlobal => "OpGetGlobal",
            Opcode::SetGlobal => "OpSetGlobal",
            Opcode::Array => "OpArray",
            Opcode::Hash => "OpHash",
            Opcode::Index => "OpIndex",
            Opcode::Call => "OpCall",
            Opcode::ReturnValue => "OpReturnValue",
            Opcode::Return => "OpReturn",
            Opcode::GetLocal => "OpGetLocal",
            Opcode::SetLocal => "OpSetLocal",
            Opcode::GetBuiltin => "OpGetBuiltin",
            Opcode::Closure => "OpClosure",
            Opcode::GetFree => "OpGetFree",
            Opcode::CurrentClosure => "OpCurrentClosure",
        }
    }

    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            Opcode::Constant
            | Opcode::JumpNotTruthy
            | Opcode::Jump
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::Array
            | Opcode::Hash => &[2],
            Opcode::Call
            | Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::GetBuiltin
            | Opcode::GetFree => &[1],
            Opcode::Closure => &[2, 1],
            _ => &[],
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operand {operand} of {opcode} does not fit in {width} byte(s)")]
pub struct OperandOverflow {
    pub opcode: Opcode,
    pub operand: usize,
    pub width: usize,
}

/// Encodes one instruction.
pub fn make(opcode: Opcode, operands: &[usize]) -> Result<Vec<u8>, OperandOverflow> {
    let widths = opcode.operand_widths();
    let mut bytes = Vec::with_capacity(1 + widths.iter().sum::<usize>());
    bytes.push(opcode as u8);
    for (&operand, &width) in operands.iter().zip(widths) {
        let overflow = OperandOverflow {
            opcode,
            operand,
            width,
        };
        if width == 1 {
            bytes.push(u8::try_from(operand).map_err(|_| overflow)?);
        } else {
            let value = u16::try_from(operand).map_err(|_| overflow)?;
            bytes.extend_from_slice(&value.to_be_bytes());
        }
    }
    Ok(bytes)
}

/// Decodes the operands that follow an opcode, returning them with the
/// number of bytes consumed.
pub fn read_operands(opcode: Opcode, bytes: &[u8]) -> (Vec<usize>, usize) {
    let mut operands = Vec::with_capacity(opcode.operand_widths().len());
    let mut offset = 0;
    for &width in opcode.operand_widths() {
        if width == 1 {
            operands.push(usize::from(read_u8(bytes, offset)));
        } else {
            operands.push(usize::from(read_u16(bytes, offset)));
        }
        offset += width;
    }
    (operands, offset)
}

pub fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn read_u8(bytes: &[u8], offset: usize) -> u8 {
    bytes[offset]
}

/// A flat, byte-addressed instruction stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Appends an encoded instruction and returns its offset.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> usize {
        let position = self.0.len();
        self.0.extend_from_slice(bytes);
        position
    }

    /// Overwrites an instruction in place; the replacement must have the
    /// same width as the original.
    pub(crate) fn replace(&mut self, position: usize, bytes: &[u8]) {
        self.0[position..position + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut offset = 0;
        while offset < self.0.len() {
            let byte = self.0[offset];
            let Some(opcode) = Opcode::from_byte(byte) else {
                writeln!(f, "{offset:04} ERROR: unknown opcode {byte}")?;
                offset += 1;
                continue;
            };
            let needed = opcode.operand_widths().iter().sum::<usize>();
            if offset + 1 + needed > self.0.len() {
                writeln!(f, "{offset:04} ERROR: truncated {opcode}")?;
                break;
            }
            let (operands, read) = read_operands(opcode, &self.0[offset + 1..]);
            write!(f, "{offset:04} {opcode}")?;
            for operand in operands {
                write!(f, " {operand}")?;
            }
            writeln!(f)?;
            offset += 1 + read;
        }
        Ok(())
    }
}
