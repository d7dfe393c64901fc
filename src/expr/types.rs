//! Static result types of operators and built-in methods.

use super::{BinaryOp, ExprType, Method, TypeKind, declaring};

/// Result type of a binary operator over operands of the given types.
pub fn binary_type(op: BinaryOp, left: &ExprType, right: &ExprType) -> ExprType {
    if op.is_comparison() || op.is_logical() {
        return ExprType::bool();
    }
    match op {
        BinaryOp::Coalesce => {
            let kind = if left.kind == TypeKind::Null {
                right.kind.clone()
            } else {
                left.kind.clone()
            };
            ExprType::new(kind, right.nullable)
        }
        BinaryOp::Add if left.is_text() || right.is_text() => {
            ExprType::new(TypeKind::Text, left.nullable && right.nullable)
        }
        _ => {
            let nullable = left.nullable || right.nullable;
            let kind = match (&left.kind, &right.kind) {
                (TypeKind::Float, _) | (_, TypeKind::Float) => TypeKind::Float,
                (TypeKind::Int, TypeKind::Int) => TypeKind::Int,
                (TypeKind::Int, _) => TypeKind::Int,
                (_, TypeKind::Int) => TypeKind::Int,
                _ => TypeKind::Unknown,
            };
            ExprType::new(kind, nullable)
        }
    }
}

/// Type of a scalar member such as `string.Length`, if known.
pub fn member_type(target: &ExprType, member: &str) -> Option<ExprType> {
    match (&target.kind, member) {
        (TypeKind::Text, "Length") => Some(ExprType::new(TypeKind::Int, target.nullable)),
        _ => None,
    }
}

/// Result type of a method call.
///
/// `selector` is the body type of a lambda argument for sequence methods.
pub fn method_type(
    method: &Method,
    target: Option<&ExprType>,
    args: &[ExprType],
    selector: Option<&ExprType>,
) -> ExprType {
    let target_nullable = target.map(|t| t.nullable).unwrap_or(false);
    match (&*method.declaring, &*method.name) {
        (declaring::STRING, "Contains" | "StartsWith" | "EndsWith") => ExprType::bool(),
        (declaring::STRING, "ToUpper" | "ToLower" | "Trim" | "Substring" | "Replace") => {
            ExprType::new(TypeKind::Text, target_nullable)
        }
        (declaring::STRING, "IndexOf") => ExprType::new(TypeKind::Int, target_nullable),
        (declaring::STRING, "Compare") => ExprType::int(),
        (declaring::MATH, "Abs" | "Round" | "Floor" | "Ceiling") => match args.first() {
            Some(arg) if arg.is_numeric() => arg.clone(),
            _ => ExprType::unknown(),
        },
        (declaring::OBJECT, "Equals") => ExprType::bool(),
        (declaring::SEQUENCE, "Any" | "All") => ExprType::bool(),
        (declaring::SEQUENCE, "Count") => ExprType::int(),
        (declaring::SEQUENCE, "Sum") => selector
            .map(|s| s.with_nullable(false))
            .unwrap_or_else(ExprType::unknown),
        (declaring::SEQUENCE, "Min" | "Max") => selector
            .map(|s| s.with_nullable(true))
            .unwrap_or_else(ExprType::unknown),
        (declaring::SEQUENCE, "Average") => ExprType::new(TypeKind::Float, true),
        (declaring::HOST, _) => ExprType::object(),
        _ => ExprType::unknown(),
    }
}

/// Whether two static types can never hold equal values.
///
/// Only scalar types are compared; anything involving `object`, unknown or
/// entity types is never provably different.
pub fn provably_distinct(a: &ExprType, b: &ExprType) -> bool {
    match (a.value_type(), b.value_type()) {
        (Some(x), Some(y)) => x != y && !(x.is_numeric() && y.is_numeric()),
        _ => false,
    }
}
