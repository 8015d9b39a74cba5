//! Abstract syntax tree for flowscript programs.
//!
//! The tree is built once by the parser and never mutated afterwards. Pipe
//! chains do not appear here: `x >> f` is desugared into an ordinary
//! [`Expression::Call`] while parsing.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

// --- Literal, Symbol ---

#[derive(Debug, PartialEq, Clone)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, PartialEq, Clone, Eq, Hash)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: &str) -> Self {
        Symbol(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name bound to the value flowing through a pipe when a literal is used as a stage.
pub const PIPE_SUBJECT: &str = "$";

/// Line/column of a node, kept only where later passes need to report it.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
}

// --- Operators ---

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UnaryOp {
    Not,
    Neg,
}

// --- Functions ---

#[derive(Debug, PartialEq, Clone)]
pub struct ParamDef {
    pub name: Symbol,
    pub default: Option<Expression>,
}

impl ParamDef {
    pub fn required(name: &str) -> Self {
        ParamDef {
            name: Symbol::new(name),
            default: None,
        }
    }
}

/// A function definition, either a top-level `fun name(...)` or an anonymous `fun(...)`.
#[derive(Debug, PartialEq, Clone)]
pub struct FnDef {
    pub name: Option<Symbol>,
    pub params: Vec<ParamDef>,
    pub body: Expression,
}

impl FnDef {
    /// Number of leading parameters without a default.
    pub fn required_params(&self) -> usize {
        self.params
            .iter()
            .take_while(|p| p.default.is_none())
            .count()
    }

    pub fn accepts(&self, arg_count: usize) -> bool {
        arg_count >= self.required_params() && arg_count <= self.params.len()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_ref().map(|s| s.as_str()).unwrap_or("#<fun>")
    }
}

// --- Special forms ---

#[derive(Debug, PartialEq, Clone)]
pub struct LetBinding {
    pub name: Symbol,
    pub value: Expression,
}

#[derive(Debug, PartialEq, Clone)]
pub struct LetExpr {
    pub bindings: Vec<LetBinding>,
    pub body: Box<Expression>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Guard {
    Wildcard,
    Expr(Expression),
}

#[derive(Debug, PartialEq, Clone)]
pub struct MatchClause {
    pub guard: Guard,
    pub body: Expression,
}

#[derive(Debug, PartialEq, Clone)]
pub struct MatchExpr {
    pub scrutinee: Option<Box<Expression>>,
    /// `match x as name { ... }` binds the scrutinee for guards and bodies.
    pub binder: Option<Symbol>,
    pub clauses: Vec<MatchClause>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct LoopExpr {
    pub initial: Box<Expression>,
    pub body: Box<Expression>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct RecurExpr {
    pub value: Box<Expression>,
    pub pos: SourcePos,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ModelExpr {
    pub template: String,
    pub options: Option<Box<Expression>>,
}

// --- Core expression structure ---

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Literal(Literal),
    Identifier(Symbol),
    /// Entries keep declaration order; keys are unique (checked by the parser).
    Object(Vec<(String, Expression)>),
    Array(Vec<Expression>),
    Lambda(Arc<FnDef>),
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Field {
        target: Box<Expression>,
        field: String,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Let(LetExpr),
    Match(MatchExpr),
    Loop(LoopExpr),
    Recur(RecurExpr),
    Model(ModelExpr),
    Try(Box<Expression>),
    /// `is-defined?(expr)` applied directly: missing fields and unbound names are `false`.
    Defined(Box<Expression>),
}

impl Expression {
    pub fn identifier(name: &str) -> Expression {
        Expression::Identifier(Symbol::new(name))
    }

    pub fn call(callee: Expression, arguments: Vec<Expression>) -> Expression {
        Expression::Call {
            callee: Box::new(callee),
            arguments,
        }
    }

    /// Every identifier mentioned anywhere inside this expression, including
    /// names that are rebound internally. Used as a conservative dependency set.
    pub fn identifiers(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers(&self, out: &mut HashSet<String>) {
        match self {
            Expression::Literal(_) | Expression::Model(ModelExpr { options: None, .. }) => {}
            Expression::Model(ModelExpr {
                options: Some(options),
                ..
            }) => options.collect_identifiers(out),
            Expression::Identifier(sym) => {
                out.insert(sym.0.clone());
            }
            Expression::Object(entries) => {
                for (_, value) in entries {
                    value.collect_identifiers(out);
                }
            }
            Expression::Array(items) => {
                for item in items {
                    item.collect_identifiers(out);
                }
            }
            Expression::Lambda(def) => {
                for param in &def.params {
                    if let Some(default) = &param.default {
                        default.collect_identifiers(out);
                    }
                }
                def.body.collect_identifiers(out);
            }
            Expression::Call { callee, arguments } => {
                callee.collect_identifiers(out);
                for arg in arguments {
                    arg.collect_identifiers(out);
                }
            }
            Expression::Field { target, .. } => target.collect_identifiers(out),
            Expression::Index { target, index } => {
                target.collect_identifiers(out);
                index.collect_identifiers(out);
            }
            Expression::Unary { operand, .. } => operand.collect_identifiers(out),
            Expression::Binary { left, right, .. } => {
                left.collect_identifiers(out);
                right.collect_identifiers(out);
            }
            Expression::Let(let_expr) => {
                for binding in &let_expr.bindings {
                    binding.value.collect_identifiers(out);
                }
                let_expr.body.collect_identifiers(out);
            }
            Expression::Match(match_expr) => {
                if let Some(scrutinee) = &match_expr.scrutinee {
                    scrutinee.collect_identifiers(out);
                }
                for clause in &match_expr.clauses {
                    if let Guard::Expr(guard) = &clause.guard {
                        guard.collect_identifiers(out);
                    }
                    clause.body.collect_identifiers(out);
                }
            }
            Expression::Loop(loop_expr) => {
                loop_expr.initial.collect_identifiers(out);
                loop_expr.body.collect_identifiers(out);
            }
            Expression::Recur(recur) => recur.value.collect_identifiers(out),
            Expression::Try(inner) | Expression::Defined(inner) => inner.collect_identifiers(out),
        }
    }
}

// --- Top level ---

/// A parsed program: the top-level `fun` definitions, in source order.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Program {
    pub definitions: Vec<Arc<FnDef>>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&Arc<FnDef>> {
        self.definitions
            .iter()
            .find(|def| def.name.as_ref().map(|s| s.as_str()) == Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_params_stop_at_first_default() {
        let def = FnDef {
            name: Some(Symbol::new("generate")),
            params: vec![
                ParamDef::required("task"),
                ParamDef {
                    name: Symbol::new("feedback"),
                    default: Some(Expression::Literal(Literal::Null)),
                },
            ],
            body: Expression::identifier("task"),
        };
        assert_eq!(def.required_params(), 1);
        assert!(def.accepts(1));
        assert!(def.accepts(2));
        assert!(!def.accepts(0));
        assert!(!def.accepts(3));
    }

    #[test]
    fn identifiers_include_nested_references() {
        let expr = Expression::call(
            Expression::identifier("concat"),
            vec![
                Expression::Field {
                    target: Box::new(Expression::identifier("state")),
                    field: "history".to_string(),
                },
                Expression::Array(vec![Expression::identifier("entry")]),
            ],
        );
        let ids = expr.identifiers();
        assert!(ids.contains("concat"));
        assert!(ids.contains("state"));
        assert!(ids.contains("entry"));
        assert!(!ids.contains("history"));
    }
}
