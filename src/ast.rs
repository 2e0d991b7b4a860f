//! Expression tree produced by the parser.
//!
//! Lexical scopes live in a [`ScopeArena`] and are referenced by
//! [`ScopeId`]; the tree itself has no back-edges.

use crate::tree::Value;
use std::rc::Rc;

/// Merge flavor: `+` is hard, `+?` is soft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// The right side wins scalar conflicts.
    Hard,
    /// The left side keeps its value on scalar conflicts.
    Soft,
}

/// A single-argument function. Currying nests definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub parameter: String,
    pub body: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Unit,
    /// A literal value (string, number, boolean, or `{}`).
    Scalar(Value),
    /// A literal sequence (`[]`).
    Vector(Vec<Expression>),
    Assignment {
        key: String,
        operand: Box<Expression>,
    },
    /// A symbol reference applied to zero or more operands, in source
    /// order. `function` holds the definition when the parser resolved the
    /// identifier lexically; otherwise resolution happens at evaluation.
    Application {
        identifier: String,
        operands: Vec<Expression>,
        function: Option<Rc<FunctionDefinition>>,
    },
    Function(Rc<FunctionDefinition>),
    Lift(Box<Expression>),
    Merge {
        lhs: Box<Expression>,
        rhs: Box<Expression>,
        mode: MergeMode,
    },
    Yield(Box<Expression>),
    Block(Block),
    Scope {
        scope: ScopeId,
        operand: Box<Expression>,
    },
    /// `lhs | rhs`
    Pipeline {
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    /// `subject ? pattern`
    PatternMatch {
        subject: Box<Expression>,
        pattern: Box<Expression>,
    },
    /// `target:field`
    Access {
        target: Box<Expression>,
        field: String,
    },
}

impl Expression {
    pub fn is_assignment(&self) -> bool {
        matches!(self, Expression::Assignment { .. })
    }

    pub fn is_yield(&self) -> bool {
        matches!(self, Expression::Yield(_))
    }

    /// A bare identifier reference with no operands.
    pub fn reference(identifier: impl Into<String>) -> Self {
        Expression::Application {
            identifier: identifier.into(),
            operands: Vec::new(),
            function: None,
        }
    }
}

/// A `---`-delimited run of expressions sharing one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub scope: ScopeId,
    pub expressions: Vec<Expression>,
}

impl Section {
    pub fn new(scope: ScopeId) -> Self {
        Section {
            scope,
            expressions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    /// Every expression is a key/value assignment.
    pub fn is_struct_shaped(&self) -> bool {
        !self.expressions.is_empty() && self.expressions.iter().all(Expression::is_assignment)
    }

    pub fn yield_count(&self) -> usize {
        self.expressions.iter().filter(|e| e.is_yield()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub sections: Vec<Section>,
}

/// Handle of a scope record in a [`ScopeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

/// What a name in a scope stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A function parameter; its value only exists at evaluation time.
    Parameter,
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScopeRecord {
    pub parent: Option<ScopeId>,
    /// Insertion-ordered; a later binding of the same name shadows earlier ones.
    pub symbols: Vec<(String, Binding)>,
}

/// Owns every scope of one parse. Scopes are never freed individually.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScopeArena {
    scopes: Vec<ScopeRecord>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.scopes.push(ScopeRecord {
            parent,
            symbols: Vec::new(),
        });
        ScopeId(self.scopes.len() - 1)
    }

    pub fn get(&self, id: ScopeId) -> &ScopeRecord {
        &self.scopes[id.0]
    }

    pub fn bind(&mut self, id: ScopeId, name: impl Into<String>, binding: Binding) {
        self.scopes[id.0].symbols.push((name.into(), binding));
    }

    /// Look `name` up in `id`, then in each ancestor.
    pub fn lookup(&self, id: ScopeId, name: &str) -> Option<&Binding> {
        let mut current = Some(id);
        while let Some(scope_id) = current {
            let record = self.get(scope_id);
            if let Some((_, binding)) = record.symbols.iter().rev().find(|(n, _)| n == name) {
                return Some(binding);
            }
            current = record.parent;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// A parsed document: the root expression plus the scopes it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: Expression,
    pub scopes: ScopeArena,
}
