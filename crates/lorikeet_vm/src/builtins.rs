use std::fmt;
use std::io::{self, BufRead, Write};

use crate::object::Object;

pub type BuiltinFn = fn(&mut Console, &[Object]) -> Object;

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

/// Host functions in dispatch order. The compiler registers each name at
/// its position here, and `OpGetBuiltin` carries the same index.
pub static BUILTINS: [Builtin; 10] = [
    Builtin {
        name: "len",
        func: builtin_len,
    },
    Builtin {
        name: "say",
        func: builtin_say,
    },
    Builtin {
        name: "ask",
        func: builtin_ask,
    },
    Builtin {
        name: "head",
        func: builtin_head,
    },
    Builtin {
        name: "last",
        func: builtin_last,
    },
    Builtin {
        name: "tail",
        func: builtin_tail,
    },
    Builtin {
        name: "push",
        func: builtin_push,
    },
    Builtin {
        name: "int",
        func: builtin_int,
    },
    Builtin {
        name: "float",
        func: builtin_float,
    },
    Builtin {
        name: "string",
        func: builtin_string,
    },
];

pub fn lookup(name: &str) -> Option<usize> {
    BUILTINS.iter().position(|builtin| builtin.name == name)
}

enum Output {
    Stdout,
    Captured { lines: Vec<String>, partial: String },
}

/// Line-oriented I/O used by `say` and `ask`.
pub struct Console {
    input: Box<dyn BufRead>,
    output: Output,
}

impl Console {
    pub fn stdio() -> Self {
        Self {
            input: Box::new(io::BufReader::new(io::stdin())),
            output: Output::Stdout,
        }
    }

    /// Reads from `input` and records output lines in memory.
    pub fn captured(input: impl Into<String>) -> Self {
        Self {
            input: Box::new(io::Cursor::new(input.into().into_bytes())),
            output: Output::Captured {
                lines: Vec::new(),
                partial: String::new(),
            },
        }
    }

    /// Lines written so far; always empty when writing to stdout.
    pub fn output(&self) -> &[String] {
        match &self.output {
            Output::Stdout => &[],
            Output::Captured { lines, .. } => lines,
        }
    }

    pub fn take_output(&mut self) -> Vec<String> {
        match &mut self.output {
            Output::Stdout => Vec::new(),
            Output::Captured { lines, partial } => {
                if !partial.is_empty() {
                    lines.push(std::mem::take(partial));
                }
                std::mem::take(lines)
            }
        }
    }

    fn write(&mut self, text: &str) -> io::Result<()> {
        match &mut self.output {
            Output::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(text.as_bytes())?;
                stdout.flush()
            }
            Output::Captured { partial, .. } => {
                partial.push_str(text);
                Ok(())
            }
        }
    }

    fn write_line(&mut self, text: &str) -> io::Result<()> {
        match &mut self.output {
            Output::Stdout => writeln!(io::stdout().lock(), "{text}"),
            Output::Captured { lines, partial } => {
                let mut line = std::mem::take(partial);
                line.push_str(text);
                lines.push(line);
                Ok(())
            }
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdio()
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.output {
            Output::Stdout => "stdio",
            Output::Captured { .. } => "captured",
        };
        f.debug_struct("Console").field("output", &kind).finish()
    }
}

fn wrong_arity(got: usize, want: usize) -> Object {
    Object::error(format!(
        "wrong number of arguments. got={got}, want={want}"
    ))
}

fn expect_array<'a>(name: &str, args: &'a [Object]) -> Result<&'a [Object], Object> {
    if args.len() != 1 {
        return Err(wrong_arity(args.len(), 1));
    }
    match &args[0] {
        Object::Array(elements) => Ok(elements.as_slice()),
        other => Err(Object::error(format!(
            "argument to `{name}` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

/// Interprets `\n`, `\t`, `\\` and `\"`; other sequences are kept as written.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn builtin_len(_console: &mut Console, args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_arity(args.len(), 1);
    }
    match &args[0] {
        Object::Array(elements) => Object::Integer(elements.len() as i64),
        Object::String(value) => Object::Integer(value.len() as i64),
        other => Object::error(format!(
            "argument to `len` not supported, got {}",
            other.type_name()
        )),
    }
}

fn builtin_say(console: &mut Console, args: &[Object]) -> Object {
    let text: String = args.iter().map(|arg| unescape(&arg.to_string())).collect();
    match console.write_line(&text) {
        Ok(()) => Object::Null,
        Err(err) => Object::error(format!("say: {err}")),
    }
}

fn builtin_ask(console: &mut Console, args: &[Object]) -> Object {
    if args.len() > 1 {
        return Object::error(format!(
            "wrong number of arguments, no more than 1. got={}",
            args.len()
        ));
    }
    if let Some(prompt) = args.first() {
        let Object::String(prompt) = prompt else {
            return Object::error(format!(
                "argument to `ask` must be STRING, got {}",
                prompt.type_name()
            ));
        };
        if let Err(err) = console.write(prompt) {
            return Object::error(format!("ask: {err}"));
        }
    }
    match console.read_line() {
        Ok(Some(line)) => Object::string(line),
        Ok(None) => Object::Null,
        Err(err) => Object::error(format!("ask: {err}")),
    }
}

fn builtin_head(_console: &mut Console, args: &[Object]) -> Object {
    match expect_array("head", args) {
        Ok(elements) => elements.first().cloned().unwrap_or(Object::Null),
        Err(err) => err,
    }
}

fn builtin_last(_console: &mut Console, args: &[Object]) -> Object {
    match expect_array("last", args) {
        Ok(elements) => elements.last().cloned().unwrap_or(Object::Null),
        Err(err) => err,
    }
}

fn builtin_tail(_console: &mut Console, args: &[Object]) -> Object {
    match expect_array("tail", args) {
        Ok([]) => Object::Null,
        Ok([_, rest @ ..]) => Object::array(rest.to_vec()),
        Err(err) => err,
    }
}

fn builtin_push(_console: &mut Console, args: &[Object]) -> Object {
    if args.len() != 2 {
        return wrong_arity(args.len(), 2);
    }
    match &args[0] {
        Object::Array(elements) => {
            let mut elements = elements.as_ref().clone();
            elements.push(args[1].clone());
            Object::array(elements)
        }
        other => Object::error(format!(
            "argument to `push` must be ARRAY, got {}",
            other.type_name()
        )),
    }
}

fn builtin_int(_console: &mut Console, args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_arity(args.len(), 1);
    }
    match &args[0] {
        Object::Integer(value) => Object::Integer(*value),
        Object::Float(value) => Object::Integer(*value as i64),
        Object::String(value) => match value.parse::<i64>() {
            Ok(parsed) => Object::Integer(parsed),
            Err(_) => match value.parse::<f64>() {
                Ok(parsed) => Object::Integer(parsed as i64),
                Err(_) => Object::Null,
            },
        },
        other => Object::error(format!(
            "argument to `int` not supported, got {}",
            other.type_name()
        )),
    }
}

fn builtin_float(_console: &mut Console, args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_arity(args.len(), 1);
    }
    match &args[0] {
        Object::Integer(value) => Object::Float(*value as f64),
        Object::Float(value) => Object::Float(*value),
        Object::String(value) => match value.parse::<f64>() {
            Ok(parsed) => Object::Float(parsed),
            Err(_) => Object::Null,
        },
        other => Object::error(format!(
            "argument to `float` not supported, got {}",
            other.type_name()
        )),
    }
}

fn builtin_string(_console: &mut Console, args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_arity(args.len(), 1);
    }
    match &args[0] {
        Object::Integer(_) | Object::Float(_) => Object::string(args[0].to_string()),
        Object::String(value) => Object::String(value.clone()),
        other => Object::error(format!(
            "argument to `string` not supported, got {}",
            other.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::{lookup, Console, BUILTINS};
    use crate::object::Object;

    fn call(name: &str, args: &[Object]) -> Object {
        let mut console = Console::captured("");
        let index = lookup(name).expect("builtin exists");
        (BUILTINS[index].func)(&mut console, args)
    }

    #[test]
    fn registry_order_is_stable() {
        let names: Vec<_> = BUILTINS.iter().map(|builtin| builtin.name).collect();
        assert_eq!(
            names,
            ["len", "say", "ask", "head", "last", "tail", "push", "int", "float", "string"]
        );
    }

    #[test]
    fn len_of_strings_and_arrays() {
        assert_eq!(call("len", &[Object::string("four")]), Object::Integer(4));
        assert_eq!(
            call("len", &[Object::array(vec![Object::Integer(1), Object::Integer(2)])]),
            Object::Integer(2)
        );
        assert_eq!(
            call("len", &[Object::Integer(1)]).to_string(),
            "Error: argument to `len` not supported, got INTEGER"
        );
        assert_eq!(
            call("len", &[Object::string("a"), Object::string("b")]).to_string(),
            "Error: wrong number of arguments. got=2, want=1"
        );
    }

    #[test]
    fn array_helpers() {
        let array = Object::array(vec![Object::Integer(1), Object::Integer(2), Object::Integer(3)]);
        assert_eq!(call("head", &[array.clone()]), Object::Integer(1));
        assert_eq!(call("last", &[array.clone()]), Object::Integer(3));
        assert_eq!(call("tail", &[array.clone()]).to_string(), "[2, 3]");
        assert_eq!(
            call("push", &[array.clone(), Object::Integer(4)]).to_string(),
            "[1, 2, 3, 4]"
        );
        assert_eq!(array.to_string(), "[1, 2, 3]");

        let empty = Object::array(Vec::new());
        assert_eq!(call("head", &[empty.clone()]), Object::Null);
        assert_eq!(call("last", &[empty.clone()]), Object::Null);
        assert_eq!(call("tail", &[empty]), Object::Null);
        assert_eq!(
            call("head", &[Object::Integer(1)]).to_string(),
            "Error: argument to `head` must be ARRAY, got INTEGER"
        );
    }

    #[test]
    fn conversions() {
        assert_eq!(call("int", &[Object::Float(3.9)]), Object::Integer(3));
        assert_eq!(call("int", &[Object::string("42")]), Object::Integer(42));
        assert_eq!(call("int", &[Object::string("2.5")]), Object::Integer(2));
        assert_eq!(call("int", &[Object::string("nope")]), Object::Null);
        assert!(matches!(call("float", &[Object::Integer(2)]), Object::Float(v) if v == 2.0));
        assert_eq!(call("float", &[Object::string("x")]), Object::Null);
        assert_eq!(call("string", &[Object::Float(1.5)]), Object::string("1.5"));
        assert_eq!(call("string", &[Object::Integer(7)]), Object::string("7"));
        assert!(matches!(call("string", &[Object::Null]), Object::Error(_)));
    }

    #[test]
    fn say_and_ask_use_the_console() {
        let mut console = Console::captured("Ada\n");
        let say = BUILTINS[lookup("say").expect("say")].func;
        let ask = BUILTINS[lookup("ask").expect("ask")].func;

        let name = ask(&mut console, &[Object::string("name? ")]);
        assert_eq!(name, Object::string("Ada"));
        assert_eq!(
            say(&mut console, &[Object::string("hi "), name, Object::string("\\n!")]),
            Object::Null
        );
        assert_eq!(ask(&mut console, &[]), Object::Null);
        assert_eq!(console.take_output(), vec!["name? hi Ada\n!".to_string()]);
    }
}
