//! Host-language-neutral expression AST.
//!
//! Nodes are immutable and shared through [`ExprRef`]; transformations
//! rebuild the spine bottom-up and reuse every untouched subtree (see
//! [`visit`]). Every node carries a static [`ExprType`]; member and method
//! types are left [`TypeKind::Unknown`] by the builders and resolved against
//! metadata when clause expressions are bound to query sources.

pub mod builder;
pub mod types;
pub mod visit;

pub use builder::{E, lit, null, param};

use crate::query::SourceId;
use crate::value::{Value, ValueType};
use std::fmt;
use std::sync::Arc;

pub type ExprRef = Arc<Expr>;

/// Static type categories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Unknown,
    /// The type of a bare `null` literal.
    Null,
    Bool,
    Int,
    Float,
    Text,
    /// The universal supertype; values converted to it keep their runtime type.
    Object,
    Entity(Arc<str>),
    Collection(Arc<str>),
    /// A grouping of entity elements produced by `group_by`.
    Group(Arc<str>),
    Record,
}

/// A static type: category plus nullability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExprType {
    pub kind: TypeKind,
    pub nullable: bool,
}

impl ExprType {
    pub const fn new(kind: TypeKind, nullable: bool) -> Self {
        Self { kind, nullable }
    }

    pub const fn unknown() -> Self {
        Self::new(TypeKind::Unknown, true)
    }

    pub const fn bool() -> Self {
        Self::new(TypeKind::Bool, false)
    }

    pub const fn int() -> Self {
        Self::new(TypeKind::Int, false)
    }

    pub const fn float() -> Self {
        Self::new(TypeKind::Float, false)
    }

    pub const fn text() -> Self {
        Self::new(TypeKind::Text, false)
    }

    pub const fn null() -> Self {
        Self::new(TypeKind::Null, true)
    }

    pub const fn object() -> Self {
        Self::new(TypeKind::Object, true)
    }

    pub const fn record() -> Self {
        Self::new(TypeKind::Record, false)
    }

    pub fn entity(name: impl Into<Arc<str>>) -> Self {
        Self::new(TypeKind::Entity(name.into()), false)
    }

    pub fn collection(name: impl Into<Arc<str>>) -> Self {
        Self::new(TypeKind::Collection(name.into()), false)
    }

    pub fn scalar(ty: ValueType, nullable: bool) -> Self {
        let kind = match ty {
            ValueType::Bool => TypeKind::Bool,
            ValueType::Int => TypeKind::Int,
            ValueType::Float => TypeKind::Float,
            ValueType::Text => TypeKind::Text,
        };
        Self::new(kind, nullable)
    }

    pub fn of_value(value: &Value) -> Self {
        match value.value_type() {
            Some(ty) => Self::scalar(ty, false),
            None => Self::null(),
        }
    }

    pub fn value_type(&self) -> Option<ValueType> {
        match self.kind {
            TypeKind::Bool => Some(ValueType::Bool),
            TypeKind::Int => Some(ValueType::Int),
            TypeKind::Float => Some(ValueType::Float),
            TypeKind::Text => Some(ValueType::Text),
            _ => None,
        }
    }

    pub fn with_nullable(&self, nullable: bool) -> Self {
        Self::new(self.kind.clone(), nullable)
    }

    pub fn is_bool(&self) -> bool {
        self.kind == TypeKind::Bool
    }

    pub fn is_text(&self) -> bool {
        self.kind == TypeKind::Text
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.kind, TypeKind::Int | TypeKind::Float)
    }

    pub fn is_scalar(&self) -> bool {
        self.value_type().is_some()
    }

    pub fn entity_name(&self) -> Option<&Arc<str>> {
        match &self.kind {
            TypeKind::Entity(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Unknown => write!(f, "?")?,
            TypeKind::Null => write!(f, "null")?,
            TypeKind::Bool => write!(f, "bool")?,
            TypeKind::Int => write!(f, "int")?,
            TypeKind::Float => write!(f, "float")?,
            TypeKind::Text => write!(f, "string")?,
            TypeKind::Object => write!(f, "object")?,
            TypeKind::Entity(name) => write!(f, "{}", name)?,
            TypeKind::Collection(name) => write!(f, "IEnumerable<{}>", name)?,
            TypeKind::Group(name) => write!(f, "IGrouping<{}>", name)?,
            TypeKind::Record => write!(f, "record")?,
        }
        if self.nullable && self.is_scalar() {
            write!(f, "?")?;
        }
        Ok(())
    }
}

/// Identifies a method by declaring type and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Method {
    pub declaring: Arc<str>,
    pub name: Arc<str>,
}

impl Method {
    pub fn new(declaring: &str, name: &str) -> Self {
        Self {
            declaring: declaring.into(),
            name: name.into(),
        }
    }

    pub fn is(&self, declaring: &str, name: &str) -> bool {
        &*self.declaring == declaring && &*self.name == name
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring, self.name)
    }
}

/// Declaring type names of the built-in method families.
pub mod declaring {
    pub const STRING: &str = "string";
    pub const MATH: &str = "Math";
    pub const OBJECT: &str = "object";
    pub const SEQUENCE: &str = "Enumerable";
    pub const HOST: &str = "host";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Coalesce,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// The comparison that holds exactly when `self` does not (ignoring NULL).
    pub fn negated(self) -> Option<BinaryOp> {
        Some(match self {
            BinaryOp::Eq => BinaryOp::Ne,
            BinaryOp::Ne => BinaryOp::Eq,
            BinaryOp::Lt => BinaryOp::Ge,
            BinaryOp::Le => BinaryOp::Gt,
            BinaryOp::Gt => BinaryOp::Le,
            BinaryOp::Ge => BinaryOp::Lt,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Coalesce => "??",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    /// Conversion to the node's static type.
    Convert,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Constant {
        value: Value,
        ty: ExprType,
    },
    /// A lambda parameter reference.
    Parameter {
        name: Arc<str>,
        ty: ExprType,
    },
    /// A value slot bound when the query executes.
    QueryParameter {
        name: Arc<str>,
        ty: ExprType,
    },
    /// The current row of a query source.
    SourceRef {
        source: SourceId,
        ty: ExprType,
    },
    Member {
        target: ExprRef,
        member: Arc<str>,
        ty: ExprType,
    },
    MethodCall {
        target: Option<ExprRef>,
        method: Method,
        args: Vec<ExprRef>,
        ty: ExprType,
    },
    Binary {
        op: BinaryOp,
        left: ExprRef,
        right: ExprRef,
        ty: ExprType,
    },
    Unary {
        op: UnaryOp,
        operand: ExprRef,
        ty: ExprType,
    },
    Conditional {
        test: ExprRef,
        if_true: ExprRef,
        if_false: ExprRef,
        ty: ExprType,
    },
    Lambda {
        params: Vec<Arc<str>>,
        body: ExprRef,
    },
    /// Anonymous object construction, e.g. `new { A = x.Name }`.
    Record {
        fields: Vec<(Arc<str>, ExprRef)>,
    },
}

impl Expr {
    /// The node's static type.
    pub fn ty(&self) -> ExprType {
        match self {
            Expr::Constant { ty, .. }
            | Expr::Parameter { ty, .. }
            | Expr::QueryParameter { ty, .. }
            | Expr::SourceRef { ty, .. }
            | Expr::Member { ty, .. }
            | Expr::MethodCall { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Conditional { ty, .. } => ty.clone(),
            Expr::Lambda { body, .. } => body.ty(),
            Expr::Record { .. } => ExprType::record(),
        }
    }

    pub fn constant(value: Value) -> ExprRef {
        let ty = ExprType::of_value(&value);
        Arc::new(Expr::Constant { value, ty })
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, Expr::Constant { value: Value::Null, .. })
    }

    /// Strip conversions, returning the innermost operand.
    pub fn unwrap_convert(self: &Arc<Self>) -> &ExprRef {
        let mut current = self;
        while let Expr::Unary {
            op: UnaryOp::Convert,
            operand,
            ..
        } = &**current
        {
            current = operand;
        }
        current
    }

    /// Lambda parameters and body; a non-lambda is treated as a zero-arity lambda.
    pub fn as_lambda(self: &Arc<Self>) -> (&[Arc<str>], &ExprRef) {
        match &**self {
            Expr::Lambda { params, body } => (params, body),
            _ => (&[], self),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { value: Value::Text(s), .. } => write!(f, "\"{}\"", s),
            Expr::Constant { value, .. } => write!(f, "{}", value),
            Expr::Parameter { name, .. } => write!(f, "{}", name),
            Expr::QueryParameter { name, .. } => write!(f, "${}", name),
            Expr::SourceRef { source, .. } => write!(f, "{}", source),
            Expr::Member { target, member, .. } => write!(f, "{}.{}", target, member),
            Expr::MethodCall {
                target,
                method,
                args,
                ..
            } => {
                match target {
                    Some(t) => write!(f, "{}.{}(", t, method.name)?,
                    None => write!(f, "{}(", method)?,
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Binary {
                op, left, right, ..
            } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Unary { op, operand, ty } => match op {
                UnaryOp::Not => write!(f, "!{}", operand),
                UnaryOp::Negate => write!(f, "-{}", operand),
                UnaryOp::Convert => write!(f, "({}){}", ty, operand),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => write!(f, "({} ? {} : {})", test, if_true, if_false),
            Expr::Lambda { params, body } => {
                if params.len() == 1 {
                    write!(f, "{} => {}", params[0], body)
                } else {
                    write!(f, "({}) => {}", params.join(", "), body)
                }
            }
            Expr::Record { fields } => {
                write!(f, "new {{ ")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, value)?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_shape() {
        let e = E::lambda1(|p| p.member("Price").ge(10).and(p.member("Name").contains("a")));
        assert_eq!(
            e.to_string(),
            "x0 => ((x0.Price >= 10) && x0.Name.Contains(\"a\"))"
        );
    }

    #[test]
    fn test_unwrap_convert() {
        let inner = lit(5).into_ref();
        let converted = E(inner.clone()).as_object().into_ref();
        assert!(Arc::ptr_eq(converted.unwrap_convert(), &inner));
    }

    #[test]
    fn test_negated_comparisons() {
        assert_eq!(BinaryOp::Lt.negated(), Some(BinaryOp::Ge));
        assert_eq!(BinaryOp::And.negated(), None);
    }
}
