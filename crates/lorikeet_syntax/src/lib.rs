use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Ident {
    pub name: String,
    pub line: usize,
}

impl Ident {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub line: usize,
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Stmt {
    Let {
        line: usize,
        name: Ident,
        mutable: bool,
        value: Expr,
    },
    /// `name = value;` on an existing binding.
    Assign {
        line: usize,
        name: Ident,
        value: Expr,
    },
    Return {
        line: usize,
        value: Option<Expr>,
    },
    Expr {
        line: usize,
        expr: Expr,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Int(i64, usize),
    Float(f64, usize),
    String(String, usize),
    Bool(bool, usize),
    Ident(Ident),
    Prefix {
        line: usize,
        op: PrefixOp,
        right: Box<Expr>,
    },
    Infix {
        line: usize,
        left: Box<Expr>,
        op: InfixOp,
        right: Box<Expr>,
    },
    If {
        line: usize,
        condition: Box<Expr>,
        consequence: Block,
        alternative: Option<Block>,
    },
    Function {
        line: usize,
        /// Set when the literal is the direct value of a `let`.
        name: Option<String>,
        params: Vec<Ident>,
        body: Block,
    },
    Call {
        line: usize,
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `$name(args)`: call the enclosing function literal bound to `name`.
    SelfCall {
        line: usize,
        name: Ident,
        args: Vec<Expr>,
    },
    /// `value |> call`, where `call` is a `Call` or `SelfCall`.
    Pipe {
        line: usize,
        value: Box<Expr>,
        call: Box<Expr>,
    },
    Index {
        line: usize,
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Array {
        line: usize,
        elements: Vec<Expr>,
    },
    Hash {
        line: usize,
        pairs: Vec<(Expr, Expr)>,
    },
    Macro {
        line: usize,
        params: Vec<Ident>,
        body: Block,
    },
}

impl Expr {
    pub fn line(&self) -> usize {
        match self {
            Expr::Int(_, line)
            | Expr::Float(_, line)
            | Expr::String(_, line)
            | Expr::Bool(_, line) => *line,
            Expr::Ident(ident) => ident.line,
            Expr::Prefix { line, .. }
            | Expr::Infix { line, .. }
            | Expr::If { line, .. }
            | Expr::Function { line, .. }
            | Expr::Call { line, .. }
            | Expr::SelfCall { line, .. }
            | Expr::Pipe { line, .. }
            | Expr::Index { line, .. }
            | Expr::Array { line, .. }
            | Expr::Hash { line, .. }
            | Expr::Macro { line, .. } => *line,
        }
    }
}

impl Stmt {
    pub fn line(&self) -> usize {
        match self {
            Stmt::Let { line, .. }
            | Stmt::Assign { line, .. }
            | Stmt::Return { line, .. }
            | Stmt::Expr { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PrefixOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Gt,
}

impl PrefixOp {
    pub fn symbol(self) -> &'static str {
        match self {
            PrefixOp::Neg => "-",
            PrefixOp::Not => "!",
        }
    }
}

impl InfixOp {
    pub fn symbol(self) -> &'static str {
        match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
            InfixOp::Eq => "==",
            InfixOp::Neq => "!=",
            InfixOp::Lt => "<",
            InfixOp::Gt => ">",
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.statements {
            write!(f, "{stmt}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.statements {
            write!(f, "{stmt}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Let {
                name,
                mutable,
                value,
                ..
            } => {
                if *mutable {
                    write!(f, "let mut {name} = {value};")
                } else {
                    write!(f, "let {name} = {value};")
                }
            }
            Stmt::Assign { name, value, .. } => write!(f, "{name} = {value};"),
            Stmt::Return { value, .. } => match value {
                Some(value) => write!(f, "return {value};"),
                None => write!(f, "return;"),
            },
            Stmt::Expr { expr, .. } => write!(f, "{expr}"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(value, _) => write!(f, "{value}"),
            Expr::Float(value, _) => write!(f, "{value}"),
            Expr::String(value, _) => write!(f, "{value}"),
            Expr::Bool(value, _) => write!(f, "{value}"),
            Expr::Ident(ident) => write!(f, "{ident}"),
            Expr::Prefix { op, right, .. } => write!(f, "({}{right})", op.symbol()),
            Expr::Infix {
                left, op, right, ..
            } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                write!(f, "if {condition} {consequence}")?;
                if let Some(alternative) = alternative {
                    write!(f, " else {alternative}")?;
                }
                Ok(())
            }
            Expr::Function {
                name, params, body, ..
            } => {
                f.write_str("fn")?;
                if let Some(name) = name {
                    write!(f, "<{name}>")?;
                }
                write!(f, "({}) {body}", join(params))
            }
            Expr::Call { callee, args, .. } => write!(f, "{callee}({})", join(args)),
            Expr::SelfCall { name, args, .. } => write!(f, "${name}({})", join(args)),
            Expr::Pipe { value, call, .. } => write!(f, "({value} |> {call})"),
            Expr::Index { target, index, .. } => write!(f, "({target}[{index}])"),
            Expr::Array { elements, .. } => write!(f, "[{}]", join(elements)),
            Expr::Hash { pairs, .. } => {
                let pairs = pairs
                    .iter()
                    .map(|(key, value)| format!("{key}:{value}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{pairs}}}")
            }
            Expr::Macro { params, body, .. } => write!(f, "macro({}) {body}", join(params)),
        }
    }
}
