//! Structural type lattice, static type inference and cardinality.

use crate::ast::{Block, Expression, Section};
use crate::tree::Value;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

/// Types already inferred for the names visible at some point.
pub type TypeTable = BTreeMap<String, Type>;

/// How many values an expression produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// No values.
    Unit,
    /// Exactly one value.
    Scalar,
    /// Zero or more values.
    Vector,
    /// Not determinable statically.
    Unknown,
}

/// A set of types with no duplicates, in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeSet(Vec<Type>);

impl TypeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(ty: Type) -> Self {
        TypeSet(vec![ty])
    }

    pub fn insert(&mut self, ty: Type) {
        if !self.0.contains(&ty) {
            self.0.push(ty);
        }
    }

    pub fn extend(&mut self, other: TypeSet) {
        for ty in other.0 {
            self.insert(ty);
        }
    }

    pub fn contains(&self, ty: &Type) -> bool {
        self.0.contains(ty)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Type> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collapse to one type: the member itself, or a union.
    pub fn to_type(&self) -> Type {
        match self.0.as_slice() {
            [] => Type::Unit,
            [only] => only.clone(),
            _ => Type::Union(self.clone()),
        }
    }
}

impl FromIterator<Type> for TypeSet {
    fn from_iter<I: IntoIterator<Item = Type>>(iter: I) -> Self {
        let mut set = TypeSet::new();
        for ty in iter {
            set.insert(ty);
        }
        set
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Unit,
    String { pattern: Option<String> },
    Number { min: Option<f64>, max: Option<f64> },
    Boolean,
    Struct(BTreeMap<String, TypeSet>),
    Vector(TypeSet),
    Union(TypeSet),
    Any,
    Unresolved,
    /// A mapping with required string `apiVersion` and `kind` fields.
    KubernetesResource,
}

impl Type {
    pub fn string() -> Self {
        Type::String { pattern: None }
    }

    pub fn number() -> Self {
        Type::Number {
            min: None,
            max: None,
        }
    }

    /// Discriminant name, used for tag-based assignability.
    pub fn tag(&self) -> &'static str {
        match self {
            Type::Unit => "unit",
            Type::String { .. } => "string",
            Type::Number { .. } => "number",
            Type::Boolean => "boolean",
            Type::Struct(_) => "struct",
            Type::Vector(_) => "vector",
            Type::Union(_) => "union",
            Type::Any => "any",
            Type::Unresolved => "unresolved",
            Type::KubernetesResource => "KubernetesResource",
        }
    }

    /// Whether a value of this type may be used where `target` is expected.
    /// Struct and vector compatibility is by tag only.
    pub fn assignable_to(&self, target: &Type) -> bool {
        match (self, target) {
            (_, Type::Any) => true,
            (Type::Union(members), _) => members.iter().all(|m| m.assignable_to(target)),
            (_, Type::Union(members)) => members.iter().any(|m| self.assignable_to(m)),
            (Type::Struct(fields), Type::KubernetesResource) => {
                has_string_field(fields, "apiVersion") && has_string_field(fields, "kind")
            }
            (Type::KubernetesResource, Type::Struct(_)) => true,
            _ => self.tag() == target.tag(),
        }
    }

    pub fn assignable_from(&self, source: &Type) -> bool {
        source.assignable_to(self)
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            Type::Unit => Cardinality::Unit,
            Type::Vector(_) => Cardinality::Vector,
            Type::Any | Type::Unresolved => Cardinality::Unknown,
            Type::Union(members) => {
                let mut cards = members.iter().map(Type::cardinality);
                match cards.next() {
                    Some(first) if cards.all(|c| c == first) => first,
                    _ => Cardinality::Unknown,
                }
            }
            _ => Cardinality::Scalar,
        }
    }

    /// The most specific type describing a runtime value.
    pub fn of_value(value: &Value) -> Type {
        match value {
            Value::Unit => Type::Unit,
            Value::String(_) => Type::string(),
            Value::Number(_) => Type::number(),
            Value::Boolean(_) => Type::Boolean,
            Value::Array(items) => Type::Vector(items.iter().map(Type::of_value).collect()),
            Value::Struct(fields) => Type::Struct(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), TypeSet::single(Type::of_value(v))))
                    .collect(),
            ),
        }
    }

    /// Whether a runtime value conforms to this type. String patterns are
    /// regular expressions; an invalid pattern admits nothing. Struct
    /// fields are all required.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (Type::Any | Type::Unresolved, _) => true,
            (Type::Unit, Value::Unit) => true,
            (Type::String { pattern: None }, Value::String(_)) => true,
            (Type::String { pattern: Some(p) }, Value::String(s)) => {
                Regex::new(p).map(|re| re.is_match(s)).unwrap_or(false)
            }
            (Type::Number { min, max }, Value::Number(n)) => {
                min.is_none_or(|m| *n >= m) && max.is_none_or(|m| *n <= m)
            }
            (Type::Boolean, Value::Boolean(_)) => true,
            (Type::Struct(fields), Value::Struct(values)) => fields.iter().all(|(name, types)| {
                values
                    .get(name)
                    .is_some_and(|v| types.iter().any(|t| t.admits(v)))
            }),
            (Type::Vector(elements), Value::Array(items)) => {
                elements.is_empty()
                    || items.iter().all(|item| elements.iter().any(|t| t.admits(item)))
            }
            (Type::Union(members), v) => members.iter().any(|t| t.admits(v)),
            (Type::KubernetesResource, Value::Struct(values)) => {
                matches!(values.get("apiVersion"), Some(Value::String(_)))
                    && matches!(values.get("kind"), Some(Value::String(_)))
            }
            _ => false,
        }
    }
}

fn has_string_field(fields: &BTreeMap<String, TypeSet>, name: &str) -> bool {
    fields
        .get(name)
        .is_some_and(|types| !types.is_empty() && types.iter().all(|t| t.tag() == "string"))
}

fn write_set(f: &mut fmt::Formatter<'_>, set: &TypeSet, sep: &str) -> fmt::Result {
    for (i, ty) in set.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", ty)?;
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::String { pattern: Some(p) } => write!(f, "string(/{}/)", p),
            Type::Number { min, max } if min.is_some() || max.is_some() => {
                let bound = |b: &Option<f64>| b.map(|n| n.to_string()).unwrap_or_default();
                write!(f, "number[{}..{}]", bound(min), bound(max))
            }
            Type::Struct(fields) => {
                f.write_str("{")?;
                for (i, (name, types)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: ", name)?;
                    write_set(f, types, "|")?;
                }
                f.write_str("}")
            }
            Type::Vector(elements) => {
                f.write_str("[")?;
                write_set(f, elements, "|")?;
                f.write_str("]")
            }
            Type::Union(members) => write_set(f, members, " | "),
            other => f.write_str(other.tag()),
        }
    }
}

// ── Static inference ────────────────────────────────────────────────

/// Infer the type of an expression given the types of visible bindings.
pub fn data_type(table: &TypeTable, expr: &Expression) -> Type {
    match expr {
        Expression::Unit => Type::Unit,
        Expression::Scalar(value) => Type::of_value(value),
        Expression::Vector(items) => {
            Type::Vector(items.iter().map(|e| data_type(table, e)).collect())
        }
        Expression::Application { identifier, .. } => {
            table.get(identifier).cloned().unwrap_or(Type::Unresolved)
        }
        Expression::Function(_) => Type::Any,
        Expression::Lift(operand) => match data_type(table, operand) {
            vector @ Type::Vector(_) => vector,
            other => Type::Vector(TypeSet::single(other)),
        },
        Expression::Merge { lhs, rhs, .. } => {
            match (data_type(table, lhs), data_type(table, rhs)) {
                (Type::Vector(mut left), Type::Vector(right)) => {
                    left.extend(right);
                    Type::Vector(left)
                }
                (left, _) => left,
            }
        }
        Expression::Yield(operand) | Expression::Assignment { operand, .. } => {
            data_type(table, operand)
        }
        Expression::Block(block) => block_type(table, block),
        Expression::Scope { operand, .. } => data_type(table, operand),
        Expression::Access { target, field } => match data_type(table, target) {
            Type::Struct(fields) => fields
                .get(field)
                .map(TypeSet::to_type)
                .unwrap_or(Type::Unresolved),
            Type::KubernetesResource if field == "apiVersion" || field == "kind" => {
                Type::string()
            }
            _ => Type::Unresolved,
        },
        Expression::Pipeline { .. } | Expression::PatternMatch { .. } => Type::Unresolved,
    }
}

fn block_type(table: &TypeTable, block: &Block) -> Type {
    match block.sections.as_slice() {
        [] => Type::Unit,
        [only] => section_type(table, only),
        [front, rest @ ..] => {
            let mut front_table = table.clone();
            bind_section(&mut front_table, front);
            let mut elements = TypeSet::single(section_type(table, front));
            for section in rest {
                elements.insert(section_type(&front_table, section));
            }
            Type::Vector(elements)
        }
    }
}

/// Fold a section's assignments into `table`.
fn bind_section(table: &mut TypeTable, section: &Section) {
    for expr in &section.expressions {
        if let Expression::Assignment { key, operand } = expr {
            let ty = data_type(table, operand);
            table.insert(key.clone(), ty);
        }
    }
}

/// Infer a section's type: a vector of yielded types when it yields,
/// else the trailing expression's type, else a struct of its assignments.
pub fn section_type(table: &TypeTable, section: &Section) -> Type {
    let mut local = table.clone();
    let mut fields: BTreeMap<String, TypeSet> = BTreeMap::new();
    let mut yields = TypeSet::new();
    let mut yielded = false;
    let mut trailing = None;

    for expr in &section.expressions {
        match expr {
            Expression::Assignment { key, operand } => {
                let ty = data_type(&local, operand);
                if !is_hidden(key, operand) {
                    fields.entry(key.clone()).or_default().insert(ty.clone());
                }
                local.insert(key.clone(), ty);
                trailing = None;
            }
            Expression::Yield(operand) => {
                yields.insert(data_type(&local, operand));
                yielded = true;
                trailing = None;
            }
            other => trailing = Some(data_type(&local, other)),
        }
    }

    if yielded {
        Type::Vector(yields)
    } else if let Some(ty) = trailing {
        ty
    } else {
        Type::Struct(fields)
    }
}

/// Assignments left out of a section's mapping output.
pub(crate) fn is_hidden(key: &str, operand: &Expression) -> bool {
    key.starts_with('_') || matches!(operand, Expression::Function(_))
}

// ── Cardinality ─────────────────────────────────────────────────────

/// Static cardinality of an expression.
pub fn cardinality(expr: &Expression) -> Cardinality {
    match expr {
        Expression::Unit => Cardinality::Unit,
        Expression::Scalar(_) => Cardinality::Scalar,
        Expression::Vector(_) | Expression::Lift(_) => Cardinality::Vector,
        Expression::Merge { lhs, .. } => cardinality(lhs),
        Expression::Yield(operand)
        | Expression::Assignment { operand, .. }
        | Expression::Scope { operand, .. } => cardinality(operand),
        Expression::Block(block) => block_cardinality(block),
        Expression::Application { .. }
        | Expression::Function(_)
        | Expression::Pipeline { .. }
        | Expression::PatternMatch { .. }
        | Expression::Access { .. } => Cardinality::Unknown,
    }
}

/// No sections is `Unit`, several sections are `Vector`, and a single
/// section decides by its own shape.
pub fn block_cardinality(block: &Block) -> Cardinality {
    match block.sections.as_slice() {
        [] => Cardinality::Unit,
        [only] => section_cardinality(only),
        _ => Cardinality::Vector,
    }
}

/// Any yield makes a section `Vector`, a single one included: evaluation
/// always wraps yielded values in a sequence, so `yield x` produces `[x]`.
pub fn section_cardinality(section: &Section) -> Cardinality {
    if section.yield_count() > 0 {
        return Cardinality::Vector;
    }
    if section.is_struct_shaped() {
        return Cardinality::Scalar;
    }
    match section.expressions.last() {
        None => Cardinality::Unit,
        Some(last) if !last.is_assignment() => cardinality(last),
        Some(_) => Cardinality::Scalar,
    }
}
