// Environment for variable bindings and scope management

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::ast::{Program, Symbol};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::{CapturedEnv, Closure, Function, Value};

/// Environment for variable bindings.
///
/// Scopes are built with [`Environment::define`] and then frozen behind an
/// `Arc`; nothing mutates a scope once it is shared. `depth` is the number of
/// closure-call frames active when the scope was created.
pub struct Environment {
    bindings: HashMap<String, Value>,
    parent: Option<Arc<Environment>>,
    depth: usize,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            bindings: HashMap::new(),
            parent: None,
            depth: 0,
        }
    }

    /// Child scope in the same call frame as `parent`.
    pub fn with_parent(parent: Arc<Environment>) -> Self {
        let depth = parent.depth;
        Environment {
            bindings: HashMap::new(),
            parent: Some(parent),
            depth,
        }
    }

    /// Scope for a closure call: lexical parent, dynamic depth.
    pub fn frame(parent: Arc<Environment>, depth: usize) -> Self {
        Environment {
            bindings: HashMap::new(),
            parent: Some(parent),
            depth,
        }
    }

    /// Frozen single-binding child of `parent`.
    pub fn child(parent: Arc<Environment>, symbol: &Symbol, value: Value) -> Arc<Environment> {
        let mut env = Environment::with_parent(parent);
        env.define(symbol, value);
        Arc::new(env)
    }

    pub fn define(&mut self, symbol: &Symbol, value: Value) {
        self.bindings.insert(symbol.0.clone(), value);
    }

    /// Looks a symbol up in this scope, then in each parent.
    pub fn lookup(&self, symbol: &Symbol) -> RuntimeResult<Value> {
        self.find(symbol.as_str())
            .cloned()
            .ok_or_else(|| RuntimeError::UnboundIdentifier {
                name: symbol.0.clone(),
            })
    }

    pub fn find(&self, name: &str) -> Option<&Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.bindings.get(name) {
                return Some(value);
            }
            scope = scope.parent.as_deref()?;
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn symbol_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("bindings", &self.symbol_names())
            .field("depth", &self.depth)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Builds the root scope of a program: every top-level function, visible to
/// every other, on top of `base` (normally the standard library).
pub fn create_program_environment(program: &Program, base: Arc<Environment>) -> Arc<Environment> {
    Arc::new_cyclic(|root| {
        let mut env = Environment::with_parent(base);
        for def in &program.definitions {
            if let Some(name) = &def.name {
                let closure = Closure {
                    def: def.clone(),
                    env: CapturedEnv::Global(root.clone()),
                };
                env.define(name, Value::Function(Function::Closure(Arc::new(closure))));
            }
        }
        env
    })
}
