use std::collections::HashMap;

use crate::builtins::BUILTINS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Free,
    Builtin,
    FunctionSelf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate declaration of `{0}`")]
pub struct DuplicateDeclaration(pub String);

/// Bindings of one function body (or of the top level).
#[derive(Debug, Clone, Default)]
pub struct Scope {
    store: HashMap<String, Symbol>,
    num_definitions: usize,
    free_symbols: Vec<Symbol>,
}

impl Scope {
    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    /// Captured outer symbols, in the order their free slots were assigned.
    pub fn free_symbols(&self) -> &[Symbol] {
        &self.free_symbols
    }

    fn capture(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len(),
            mutable: original.mutable,
        };
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }
}

/// Nested scopes kept as a stack: the last entry is the innermost scope and
/// each entry's outer scope is the one before it. The first entry is the
/// global scope and is never popped.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    /// A global table with every builtin registered at its dispatch index.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        for (index, builtin) in BUILTINS.iter().enumerate() {
            table.define_builtin(index, builtin.name);
        }
        table
    }

    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pops the innermost scope. The global scope stays in place.
    pub fn leave_scope(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    /// Drops every nested scope, keeping only the global one.
    pub fn reset_to_global(&mut self) {
        self.scopes.truncate(1);
    }

    pub fn num_definitions(&self) -> usize {
        self.current().num_definitions
    }

    pub fn define(&mut self, name: &str, mutable: bool) -> Result<Symbol, DuplicateDeclaration> {
        let scope = if self.scopes.len() == 1 {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let current = self.current_mut();
        if let Some(existing) = current.store.get(name) {
            if matches!(existing.scope, SymbolScope::Global | SymbolScope::Local) {
                return Err(DuplicateDeclaration(name.to_string()));
            }
        }
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: current.num_definitions,
            mutable,
        };
        current.num_definitions += 1;
        current.store.insert(symbol.name.clone(), symbol.clone());
        Ok(symbol)
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
            mutable: false,
        };
        self.current_mut()
            .store
            .insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    pub fn define_function_self(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::FunctionSelf,
            index: 0,
            mutable: false,
        };
        self.current_mut()
            .store
            .insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Looks `name` up from the innermost scope outwards. A local of an
    /// enclosing function is captured as a free symbol in every scope
    /// between its definition and here.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        resolve_in(&mut self.scopes, name)
    }

    /// Drops the global bindings matched by `forget`. A forgotten global that
    /// shadowed a builtin makes the builtin visible again.
    pub fn forget_globals(&mut self, forget: impl Fn(&Symbol) -> bool) {
        self.scopes[0]
            .store
            .retain(|_, symbol| symbol.scope != SymbolScope::Global || !forget(symbol));
        for (index, builtin) in BUILTINS.iter().enumerate() {
            if !self.scopes[0].store.contains_key(builtin.name) {
                let symbol = Symbol {
                    name: builtin.name.to_string(),
                    scope: SymbolScope::Builtin,
                    index,
                    mutable: false,
                };
                self.scopes[0].store.insert(symbol.name.clone(), symbol);
            }
        }
    }

    /// Follows a free symbol back to the binding it was captured from.
    pub fn origin(&self, symbol: &Symbol) -> Symbol {
        let mut symbol = symbol.clone();
        let mut level = self.scopes.len() - 1;
        while symbol.scope == SymbolScope::Free && level > 0 {
            match self.scopes[level].free_symbols.get(symbol.index) {
                Some(original) => symbol = original.clone(),
                None => break,
            }
            level -= 1;
        }
        symbol
    }

    fn current(&self) -> &Scope {
        &self.scopes[self.scopes.len() - 1]
    }

    fn current_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_in(scopes: &mut [Scope], name: &str) -> Option<Symbol> {
    let (current, outer) = scopes.split_last_mut()?;
    if let Some(symbol) = current.store.get(name) {
        return Some(symbol.clone());
    }
    if outer.is_empty() {
        return None;
    }
    let symbol = resolve_in(outer, name)?;
    match symbol.scope {
        SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
        _ => Some(current.capture(symbol)),
    }
}

#[cfg(test)]
mod tests {
    use super::{DuplicateDeclaration, Symbol, SymbolScope, SymbolTable};

    fn symbol(name: &str, scope: SymbolScope, index: usize) -> Symbol {
        Symbol {
            name: name.to_string(),
            scope,
            index,
            mutable: false,
        }
    }

    #[test]
    fn defines_globals_and_locals() {
        let mut table = SymbolTable::new();
        assert_eq!(table.define("a", false), Ok(symbol("a", SymbolScope::Global, 0)));
        assert_eq!(table.define("b", false), Ok(symbol("b", SymbolScope::Global, 1)));

        table.enter_scope();
        assert_eq!(table.define("c", false), Ok(symbol("c", SymbolScope::Local, 0)));
        table.enter_scope();
        assert_eq!(table.define("e", false), Ok(symbol("e", SymbolScope::Local, 0)));
        assert_eq!(table.define("f", false), Ok(symbol("f", SymbolScope::Local, 1)));
        assert_eq!(table.depth(), 2);
    }

    #[test]
    fn rejects_duplicates_in_the_same_scope_only() {
        let mut table = SymbolTable::new();
        table.define("a", false).expect("define a");
        assert_eq!(
            table.define("a", true),
            Err(DuplicateDeclaration("a".to_string()))
        );

        table.enter_scope();
        assert_eq!(table.define("a", false), Ok(symbol("a", SymbolScope::Local, 0)));
    }

    #[test]
    fn builtins_and_function_self_can_be_shadowed() {
        let mut table = SymbolTable::with_builtins();
        assert_eq!(table.resolve("len"), Some(symbol("len", SymbolScope::Builtin, 0)));
        assert_eq!(table.define("len", false), Ok(symbol("len", SymbolScope::Global, 0)));

        table.enter_scope();
        table.define_function_self("f");
        assert_eq!(table.resolve("f"), Some(symbol("f", SymbolScope::FunctionSelf, 0)));
        assert_eq!(table.define("f", false), Ok(symbol("f", SymbolScope::Local, 0)));
    }

    #[test]
    fn resolves_free_variables_through_nested_scopes() {
        let mut table = SymbolTable::new();
        table.define("a", false).expect("define");
        table.enter_scope();
        table.define("c", false).expect("define");
        table.enter_scope();
        table.define("e", false).expect("define");

        assert_eq!(table.resolve("a"), Some(symbol("a", SymbolScope::Global, 0)));
        assert_eq!(table.resolve("c"), Some(symbol("c", SymbolScope::Free, 0)));
        assert_eq!(table.resolve("e"), Some(symbol("e", SymbolScope::Local, 0)));
        assert_eq!(table.resolve("missing"), None);

        let inner = table.leave_scope().expect("inner scope");
        assert_eq!(inner.free_symbols(), &[symbol("c", SymbolScope::Local, 0)]);
    }

    #[test]
    fn free_resolution_is_idempotent() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        table.define("x", false).expect("define");
        table.define("y", true).expect("define");
        table.enter_scope();

        let first = table.resolve("y").expect("resolve y");
        let second = table.resolve("y").expect("resolve y again");
        assert_eq!(first, second);
        assert_eq!(first.index, 0);
        assert!(first.mutable);
        assert_eq!(table.resolve("x").map(|s| s.index), Some(1));

        let inner = table.leave_scope().expect("inner scope");
        assert_eq!(inner.free_symbols().len(), 2);
    }

    #[test]
    fn capture_crosses_intermediate_scopes() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        table.define("a", false).expect("define");
        table.enter_scope();
        table.enter_scope();

        assert_eq!(table.resolve("a"), Some(symbol("a", SymbolScope::Free, 0)));
        let origin = table.origin(&symbol("a", SymbolScope::Free, 0));
        assert_eq!(origin, symbol("a", SymbolScope::Local, 0));

        let innermost = table.leave_scope().expect("innermost");
        assert_eq!(innermost.free_symbols(), &[symbol("a", SymbolScope::Free, 0)]);
        let middle = table.leave_scope().expect("middle");
        assert_eq!(middle.free_symbols(), &[symbol("a", SymbolScope::Local, 0)]);
    }

    #[test]
    fn global_scope_is_never_left() {
        let mut table = SymbolTable::new();
        assert!(table.leave_scope().is_none());
        table.enter_scope();
        table.enter_scope();
        table.reset_to_global();
        assert_eq!(table.depth(), 0);
    }

    #[test]
    fn forgotten_globals_can_be_declared_again() {
        let mut table = SymbolTable::with_builtins();
        table.define("a", false).expect("define a");
        table.define("b", false).expect("define b");
        table.define("len", false).expect("shadow len");

        table.forget_globals(|symbol| symbol.index >= 1);
        assert_eq!(table.resolve("a"), Some(symbol("a", SymbolScope::Global, 0)));
        assert_eq!(table.resolve("b"), None);
        assert_eq!(table.resolve("len"), Some(symbol("len", SymbolScope::Builtin, 0)));
        assert_eq!(table.define("b", false), Ok(symbol("b", SymbolScope::Global, 3)));
    }
}
