use crate::ast::*;
use crate::error::EvalError;
use crate::tree::*;
use crate::types::{self, Cardinality, Type, TypeTable};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, trace};

/// A parsed document ready to be evaluated against initial bindings.
#[derive(Debug, Clone)]
pub struct Program {
    document: Document,
}

/// Prepare a parsed document for evaluation.
pub fn compile(document: Document) -> Program {
    Program { document }
}

impl Program {
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Evaluate the document. Each call starts from a fresh context.
    pub fn evaluate(&self, bindings: &Bindings) -> Result<Value, EvalError> {
        let root = Frame::root(bindings);
        let mut evaluator = Evaluator { args: Vec::new() };
        let value = evaluator.eval(&self.document.root, &root)?;
        debug!(kind = value.kind_name(), "evaluated document");
        Ok(value)
    }

    /// Statically inferred type of the document, given the types of the
    /// bindings it will be evaluated with.
    pub fn data_type(&self, bindings: &Bindings) -> Type {
        let table: TypeTable = bindings
            .iter()
            .map(|(k, v)| (k.clone(), Type::of_value(v)))
            .collect();
        types::data_type(&table, &self.document.root)
    }

    pub fn cardinality(&self) -> Cardinality {
        types::cardinality(&self.document.root)
    }
}

// ── Binding context ─────────────────────────────────────────────────

/// State of one name in a frame. Assignments are registered before any
/// of them is evaluated, so a binding may refer to one defined later.
#[derive(Debug, Clone)]
enum Slot<'p> {
    Pending(&'p Expression),
    Resolving,
    Ready(Value),
    Function(&'p FunctionDefinition),
}

/// One level of the binding context: a section, a function call, or the
/// caller's initial bindings.
#[derive(Debug)]
struct Frame<'p> {
    slots: RefCell<HashMap<String, Slot<'p>>>,
    parent: Option<Env<'p>>,
}

type Env<'p> = Rc<Frame<'p>>;

impl<'p> Frame<'p> {
    fn root(bindings: &Bindings) -> Env<'p> {
        let slots = bindings
            .iter()
            .map(|(k, v)| (k.clone(), Slot::Ready(v.clone())))
            .collect();
        Rc::new(Frame {
            slots: RefCell::new(slots),
            parent: None,
        })
    }

    fn child(parent: &Env<'p>) -> Env<'p> {
        Rc::new(Frame {
            slots: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    fn set(&self, name: &str, slot: Slot<'p>) {
        self.slots.borrow_mut().insert(name.to_string(), slot);
    }

    fn get(&self, name: &str) -> Option<Slot<'p>> {
        self.slots.borrow().get(name).cloned()
    }
}

/// What an identifier resolved to.
enum Resolved<'p> {
    Value(Value),
    Function(&'p FunctionDefinition, Env<'p>),
}

// ── Evaluation ──────────────────────────────────────────────────────

struct Evaluator {
    /// Pending function arguments. Operands are pushed right to left, so
    /// the top of the stack is the next argument to bind.
    args: Vec<Value>,
}

impl Evaluator {
    fn eval<'p>(&mut self, expr: &'p Expression, env: &Env<'p>) -> Result<Value, EvalError> {
        match expr {
            Expression::Unit => Ok(Value::Unit),
            Expression::Scalar(value) => Ok(value.clone()),
            Expression::Vector(items) => items
                .iter()
                .map(|item| self.eval(item, env))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expression::Yield(operand)
            | Expression::Assignment { operand, .. }
            | Expression::Scope { operand, .. } => self.eval(operand, env),
            Expression::Lift(operand) => match self.eval(operand, env)? {
                array @ Value::Array(_) => Ok(array),
                other => Ok(Value::Array(vec![other])),
            },
            Expression::Block(block) => self.eval_block(block, env),
            Expression::Merge { lhs, rhs, mode } => self.eval_merge(lhs, rhs, *mode, env),
            Expression::Application {
                identifier,
                operands,
                function,
            } => self.eval_application(identifier, operands, function.as_deref(), env),
            Expression::Function(def) => {
                let base = self.args.len();
                self.call(&def.parameter, def, env, base)
            }
            Expression::Access { target, field } => match self.eval(target, env)? {
                Value::Struct(mut fields) => fields.remove(field).ok_or(EvalError::NoSuchField {
                    field: field.clone(),
                    target: "mapping",
                }),
                other => Err(EvalError::NoSuchField {
                    field: field.clone(),
                    target: other.kind_name(),
                }),
            },
            Expression::Pipeline { .. } => Err(EvalError::Unsupported("pipeline")),
            Expression::PatternMatch { .. } => Err(EvalError::Unsupported("pattern match")),
        }
    }

    /// `0` sections give unit, one gives that section's value, several give
    /// the sequence of section values. Sections after the first see the
    /// first section's bindings.
    fn eval_block<'p>(&mut self, block: &'p Block, env: &Env<'p>) -> Result<Value, EvalError> {
        match block.sections.as_slice() {
            [] => Ok(Value::Unit),
            [only] => Ok(self.eval_section(only, env)?.0),
            [front, rest @ ..] => {
                let (first, front_env) = self.eval_section(front, env)?;
                let mut values = Vec::with_capacity(block.sections.len());
                values.push(first);
                for section in rest {
                    values.push(self.eval_section(section, &front_env)?.0);
                }
                trace!(sections = values.len(), "evaluated multi-section block");
                Ok(Value::Array(values))
            }
        }
    }

    /// A section's value is its yields when it has any, else its trailing
    /// non-assignment expression, else the mapping of its assignments.
    fn eval_section<'p>(
        &mut self,
        section: &'p Section,
        env: &Env<'p>,
    ) -> Result<(Value, Env<'p>), EvalError> {
        let frame = Frame::child(env);
        for expr in &section.expressions {
            if let Expression::Assignment { key, operand } = expr {
                let slot = match operand.as_ref() {
                    Expression::Function(def) => Slot::Function(def.as_ref()),
                    other => Slot::Pending(other),
                };
                frame.set(key, slot);
            }
        }

        let mut fields = BTreeMap::new();
        let mut yields = Vec::new();
        let mut trailing = None;

        for expr in &section.expressions {
            match expr {
                Expression::Assignment { key, operand } => {
                    trailing = None;
                    if matches!(operand.as_ref(), Expression::Function(_)) {
                        continue;
                    }
                    let value = self.force(key, &frame)?;
                    if !types::is_hidden(key, operand) {
                        fields.insert(key.clone(), value);
                    }
                }
                Expression::Yield(operand) => {
                    trailing = None;
                    yields.push(self.eval(operand, &frame)?);
                }
                other => trailing = Some(self.eval(other, &frame)?),
            }
        }

        let value = if !yields.is_empty() {
            trace!(yields = yields.len(), "section yields a sequence");
            Value::Array(yields)
        } else if let Some(value) = trailing {
            trace!(kind = value.kind_name(), "section takes its trailing value");
            value
        } else {
            trace!(fields = fields.len(), "section is a mapping");
            Value::Struct(fields)
        };
        Ok((value, frame))
    }

    /// Evaluate the binding `name` owned by `frame`, memoizing the result.
    fn force<'p>(&mut self, name: &str, frame: &Env<'p>) -> Result<Value, EvalError> {
        match self.resolve(name, frame)? {
            Resolved::Value(value) => Ok(value),
            Resolved::Function(..) => Ok(Value::Unit),
        }
    }

    /// Look `name` up from `env` outwards, evaluating a pending binding in
    /// the frame that owns it.
    fn resolve<'p>(&mut self, name: &str, env: &Env<'p>) -> Result<Resolved<'p>, EvalError> {
        let mut frame = Rc::clone(env);
        loop {
            match frame.get(name) {
                Some(Slot::Ready(value)) => return Ok(Resolved::Value(value)),
                Some(Slot::Function(def)) => return Ok(Resolved::Function(def, frame)),
                Some(Slot::Resolving) => return Err(EvalError::Cycle(name.to_string())),
                Some(Slot::Pending(expr)) => {
                    frame.set(name, Slot::Resolving);
                    return match self.eval(expr, &frame) {
                        Ok(value) => {
                            frame.set(name, Slot::Ready(value.clone()));
                            Ok(Resolved::Value(value))
                        }
                        Err(err) => {
                            frame.set(name, Slot::Pending(expr));
                            Err(err)
                        }
                    };
                }
                None => match &frame.parent {
                    Some(parent) => frame = Rc::clone(parent),
                    None => return Err(EvalError::UnresolvedIdentifier(name.to_string())),
                },
            }
        }
    }

    /// `f a b`: push `b` then `a`, then let `f` consume them.
    fn eval_application<'p>(
        &mut self,
        identifier: &str,
        operands: &'p [Expression],
        function: Option<&'p FunctionDefinition>,
        env: &Env<'p>,
    ) -> Result<Value, EvalError> {
        let base = self.args.len();
        let result = match self.push_operands(operands, env, base) {
            Ok(()) => self.apply(identifier, function, env, base),
            Err(err) => Err(err),
        };

        let leftover = self.args.len() > base;
        self.args.truncate(base);
        match result {
            Ok(_) if leftover => Err(EvalError::NotAFunction(identifier.to_string())),
            other => other,
        }
    }

    /// Resolve `identifier` and, when it names a function, call it with
    /// the arguments above `base`.
    fn apply<'p>(
        &mut self,
        identifier: &str,
        function: Option<&'p FunctionDefinition>,
        env: &Env<'p>,
        base: usize,
    ) -> Result<Value, EvalError> {
        match self.resolve(identifier, env) {
            Ok(Resolved::Function(def, closure)) => self.call(identifier, def, &closure, base),
            Ok(Resolved::Value(value)) => Ok(value),
            Err(EvalError::UnresolvedIdentifier(name)) => match function {
                Some(def) => self.call(identifier, def, env, base),
                None => Err(EvalError::UnresolvedIdentifier(name)),
            },
            Err(err) => Err(err),
        }
    }

    /// Push operands right to left. A bare function reference among them
    /// consumes the arguments already pushed and pushes its result.
    fn push_operands<'p>(
        &mut self,
        operands: &'p [Expression],
        env: &Env<'p>,
        base: usize,
    ) -> Result<(), EvalError> {
        for operand in operands.iter().rev() {
            let value = match operand {
                Expression::Application {
                    identifier,
                    operands,
                    function,
                } if operands.is_empty() => {
                    self.apply(identifier, function.as_deref(), env, base)?
                }
                other => self.eval(other, env)?,
            };
            self.args.push(value);
        }
        Ok(())
    }

    /// Bind the next argument to the parameter and evaluate the body.
    /// Curried definitions keep consuming arguments from the same stack.
    fn call<'p>(
        &mut self,
        name: &str,
        def: &'p FunctionDefinition,
        env: &Env<'p>,
        base: usize,
    ) -> Result<Value, EvalError> {
        if self.args.len() <= base {
            return Err(EvalError::MissingArgument(name.to_string()));
        }
        let argument = self.args.pop().unwrap_or_default();
        let frame = Frame::child(env);
        frame.set(&def.parameter, Slot::Ready(argument));

        match &def.body {
            Expression::Function(inner) => self.call(name, inner, &frame, base),
            body => self.eval(body, &frame),
        }
    }

    fn eval_merge<'p>(
        &mut self,
        lhs: &'p Expression,
        rhs: &'p Expression,
        mode: MergeMode,
        env: &Env<'p>,
    ) -> Result<Value, EvalError> {
        let left = self.eval(lhs, env)?;
        let right = self.eval(rhs, env)?;

        let vector = match types::cardinality(lhs) {
            Cardinality::Vector => true,
            Cardinality::Unknown => matches!(left, Value::Array(_)),
            Cardinality::Unit | Cardinality::Scalar => false,
        };
        trace!(vector, ?mode, "merge");

        if vector {
            concat(left, right)
        } else {
            let mut path = Vec::new();
            deep_merge(left, right, mode, &mut path)
        }
    }
}

/// Append `right` to the sequence `left`: its elements if it is a
/// sequence, nothing if it is unit, else the value itself.
fn concat(left: Value, right: Value) -> Result<Value, EvalError> {
    let mut items = match left {
        Value::Array(items) => items,
        other => {
            return Err(EvalError::NotASequence {
                lhs: other.kind_name(),
            })
        }
    };
    match right {
        Value::Array(more) => items.extend(more),
        Value::Unit => {}
        other => items.push(other),
    }
    Ok(Value::Array(items))
}

/// Recursively merge `right` into `left`.
///
/// Mappings merge key by key and sequences concatenate. A scalar conflict
/// goes to `right` for a hard merge and stays with `left` for a soft one.
/// Mixing a mapping or a sequence with anything else is an error.
pub fn deep_merge(
    left: Value,
    right: Value,
    mode: MergeMode,
    path: &mut Vec<String>,
) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Struct(mut fields), Value::Struct(incoming)) => {
            for (key, value) in incoming {
                let merged = match fields.remove(&key) {
                    Some(existing) => {
                        path.push(key.clone());
                        let merged = deep_merge(existing, value, mode, path)?;
                        path.pop();
                        merged
                    }
                    None => value,
                };
                fields.insert(key, merged);
            }
            Ok(Value::Struct(fields))
        }
        (Value::Array(mut items), Value::Array(more)) => {
            items.extend(more);
            Ok(Value::Array(items))
        }
        (Value::Unit, right) => Ok(right),
        (left, Value::Unit) => Ok(left),
        (left, right)
            if matches!(left, Value::Struct(_) | Value::Array(_))
                || matches!(right, Value::Struct(_) | Value::Array(_)) =>
        {
            Err(EvalError::MergeMismatch {
                lhs: left.kind_name(),
                rhs: right.kind_name(),
                path: if path.is_empty() {
                    "$".to_string()
                } else {
                    path.join(".")
                },
            })
        }
        (left, right) => Ok(match mode {
            MergeMode::Hard => right,
            MergeMode::Soft => left,
        }),
    }
}
