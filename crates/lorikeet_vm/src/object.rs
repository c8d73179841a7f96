use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::builtins::BUILTINS;
use crate::code::Instructions;

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
    pub name: Option<String>,
}

/// A compiled function plus the free values captured when it was created.
#[derive(Debug, Clone)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<Object>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Boolean(bool),
    String(Rc<str>),
}

impl HashKey {
    pub fn try_from_object(object: &Object) -> Option<Self> {
        match object {
            Object::Integer(value) => Some(HashKey::Integer(*value)),
            Object::Boolean(value) => Some(HashKey::Boolean(*value)),
            Object::String(value) => Some(HashKey::String(Rc::clone(value))),
            _ => None,
        }
    }

    pub fn to_object(&self) -> Object {
        match self {
            HashKey::Integer(value) => Object::Integer(*value),
            HashKey::Boolean(value) => Object::Boolean(*value),
            HashKey::String(value) => Object::String(Rc::clone(value)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Object {
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    Boolean(bool),
    Null,
    Error(Rc<str>),
    Array(Rc<Vec<Object>>),
    Hash(Rc<IndexMap<HashKey, Object>>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    Builtin(usize),
}

impl Object {
    pub fn string(value: impl AsRef<str>) -> Self {
        Object::String(Rc::from(value.as_ref()))
    }

    pub fn error(message: impl AsRef<str>) -> Self {
        Object::Error(Rc::from(message.as_ref()))
    }

    pub fn array(elements: Vec<Object>) -> Self {
        Object::Array(Rc::new(elements))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Integer(_) => "INTEGER",
            Object::Float(_) => "FLOAT",
            Object::String(_) => "STRING",
            Object::Boolean(_) => "BOOLEAN",
            Object::Null => "NULL",
            Object::Error(_) => "ERROR",
            Object::Array(_) => "ARRAY",
            Object::Hash(_) => "HASH",
            Object::CompiledFunction(_) => "COMPILED_FUNCTION",
            Object::Closure(_) => "CLOSURE",
            Object::Builtin(_) => "BUILTIN",
        }
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Object::Null | Object::Boolean(false))
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::String(value) => write!(f, "\"{value}\""),
            other => write!(f, "{other}"),
        }
    }
}

/// Numbers compare across int and float; strings, booleans and null by
/// value; collections and functions by identity.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Integer(a), Object::Integer(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a == b,
            (Object::Integer(a), Object::Float(b)) => (*a as f64) == *b,
            (Object::Float(a), Object::Integer(b)) => *a == (*b as f64),
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Object::Null, Object::Null) => true,
            (Object::Error(a), Object::Error(b)) => a == b,
            (Object::Array(a), Object::Array(b)) => Rc::ptr_eq(a, b),
            (Object::Hash(a), Object::Hash(b)) => Rc::ptr_eq(a, b),
            (Object::CompiledFunction(a), Object::CompiledFunction(b)) => Rc::ptr_eq(a, b),
            (Object::Closure(a), Object::Closure(b)) => Rc::ptr_eq(a, b),
            (Object::Builtin(a), Object::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Integer(value) => write!(f, "{value}"),
            Object::Float(value) => write!(f, "{value}"),
            Object::String(value) => f.write_str(value),
            Object::Boolean(value) => write!(f, "{value}"),
            Object::Null => f.write_str("null"),
            Object::Error(message) => write!(f, "Error: {message}"),
            Object::Array(elements) => {
                f.write_str("[")?;
                for (index, element) in elements.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    element.fmt_nested(f)?;
                }
                f.write_str("]")
            }
            Object::Hash(pairs) => {
                f.write_str("{")?;
                for (index, (key, value)) in pairs.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    key.to_object().fmt_nested(f)?;
                    f.write_str(": ")?;
                    value.fmt_nested(f)?;
                }
                f.write_str("}")
            }
            Object::CompiledFunction(_) => f.write_str("<fn>"),
            Object::Closure(_) => f.write_str("<closure>"),
            Object::Builtin(index) => match BUILTINS.get(*index) {
                Some(builtin) => write!(f, "<builtin {}>", builtin.name),
                None => f.write_str("<builtin>"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HashKey, Object};
    use indexmap::IndexMap;
    use std::rc::Rc;

    #[test]
    fn truthiness() {
        assert!(!Object::Null.is_truthy());
        assert!(!Object::Boolean(false).is_truthy());
        assert!(Object::Integer(0).is_truthy());
        assert!(Object::string("").is_truthy());
    }

    #[test]
    fn equality_promotes_numbers_and_compares_collections_by_identity() {
        assert_eq!(Object::Integer(2), Object::Float(2.0));
        assert_ne!(Object::Integer(1), Object::string("1"));
        assert_eq!(Object::string("ab"), Object::string("ab"));

        let shared = Object::array(vec![Object::Integer(1)]);
        assert_eq!(shared, shared.clone());
        assert_ne!(shared, Object::array(vec![Object::Integer(1)]));
    }

    #[test]
    fn hash_keys_from_objects() {
        assert_eq!(
            HashKey::try_from_object(&Object::string("a")),
            Some(HashKey::String(Rc::from("a")))
        );
        assert_eq!(HashKey::try_from_object(&Object::Float(1.0)), None);
        assert_eq!(HashKey::try_from_object(&Object::Null), None);
    }

    #[test]
    fn display_text() {
        let mut pairs = IndexMap::new();
        pairs.insert(HashKey::String(Rc::from("a")), Object::Integer(1));
        pairs.insert(HashKey::Integer(2), Object::string("two"));
        let hash = Object::Hash(Rc::new(pairs));
        assert_eq!(hash.to_string(), "{\"a\": 1, 2: \"two\"}");

        let array = Object::array(vec![
            Object::Integer(1),
            Object::Float(2.5),
            Object::string("x"),
            Object::Null,
        ]);
        assert_eq!(array.to_string(), "[1, 2.5, \"x\", null]");
        assert_eq!(Object::string("raw").to_string(), "raw");
        assert_eq!(Object::error("boom").to_string(), "Error: boom");
        assert_eq!(Object::Float(3.0).to_string(), "3");
        assert_eq!(Object::Builtin(0).to_string(), "<builtin len>");
    }
}
