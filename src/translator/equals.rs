//! `Equals(object)` translation.
//!
//! Operands reach `Equals` boxed to `object`. After unwrapping the boxing
//! conversions the static types decide the outcome: equal (or both numeric)
//! types compare with `=` after an optional cast, provably different types
//! fold to a constant `false` with a diagnostic, anything else is declined.

use super::{MethodCallSite, SqlFragment, TranslationContext};
use crate::error::{Diagnostic, DiagnosticCode};
use crate::expr::{ExprType, TypeKind, declaring, types};
use crate::sql::SqlExpr;
use crate::value::ValueType;

#[derive(Debug, Default, Clone, Copy)]
pub struct EqualsTranslator;

impl super::MethodCallTranslator for EqualsTranslator {
    fn translate(&self, call: &MethodCallSite<'_>, ctx: &mut TranslationContext) -> Option<SqlExpr> {
        if !call.is(declaring::OBJECT, "Equals") {
            return None;
        }
        let (left, right) = match (call.target, call.args) {
            (Some(target), [arg]) => (target, arg),
            (None, [a, b]) => (a, b),
            _ => return None,
        };

        let left_ty = left.expr.unwrap_convert().ty();
        let right_ty = right.expr.unwrap_convert().ty();

        if types::provably_distinct(&left_ty, &right_ty) {
            ctx.report(Diagnostic::new(
                DiagnosticCode::IncompatibleEquals,
                format!(
                    "'{}' of type {} is compared with '{}' of type {}; the comparison is always false",
                    left.expr.unwrap_convert(),
                    left_ty,
                    right.expr.unwrap_convert(),
                    right_ty
                ),
            ));
            return Some(SqlExpr::literal(false));
        }

        let (l, r) = match (left_ty.value_type(), right_ty.value_type()) {
            (Some(a), Some(b)) if a == b => (left.sql.clone(), right.sql.clone()),
            (Some(a), Some(b)) if a.is_numeric() && b.is_numeric() => {
                (as_float(left, a), as_float(right, b))
            }
            _ => return None,
        };
        Some(null_safe_equals(l, r, &left_ty, &right_ty))
    }
}

fn as_float(fragment: &SqlFragment, ty: ValueType) -> SqlExpr {
    if ty == ValueType::Float {
        fragment.sql.clone()
    } else {
        SqlExpr::Cast {
            operand: Box::new(fragment.sql.clone()),
            to: ValueType::Float,
        }
    }
}

/// `Equals` treats two NULLs as equal.
fn null_safe_equals(l: SqlExpr, r: SqlExpr, lt: &ExprType, rt: &ExprType) -> SqlExpr {
    let eq = SqlExpr::eq(l.clone(), r.clone());
    if lt.nullable && rt.nullable && lt.kind != TypeKind::Null {
        SqlExpr::or(eq, SqlExpr::and(SqlExpr::is_null(l), SqlExpr::is_null(r)))
    } else {
        eq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{E, Expr, Method};
    use crate::translator::MethodCallTranslator;

    fn fragment(name: &str, ty: ExprType) -> SqlFragment {
        let column = Expr::Member {
            target: Expr::constant(crate::value::Value::Null),
            member: name.into(),
            ty: ty.clone(),
        };
        let boxed = E(std::sync::Arc::new(column)).as_object().into_ref();
        SqlFragment {
            sql: SqlExpr::column(&"p".into(), &name.into()),
            ty: ExprType::object(),
            expr: boxed,
        }
    }

    fn translate(left: SqlFragment, right: SqlFragment) -> (Option<SqlExpr>, TranslationContext) {
        let method = Method::new(declaring::OBJECT, "Equals");
        let args = [right];
        let site = MethodCallSite {
            method: &method,
            target: Some(&left),
            args: &args,
            ty: &ExprType::bool(),
        };
        let mut ctx = TranslationContext::new();
        let sql = EqualsTranslator.translate(&site, &mut ctx);
        (sql, ctx)
    }

    #[test]
    fn test_incompatible_types_fold_to_false() {
        let (sql, ctx) = translate(
            fragment("Id", ExprType::int()),
            fragment("Name", ExprType::text()),
        );
        assert_eq!(sql, Some(SqlExpr::literal(false)));
        assert_eq!(ctx.diagnostics().len(), 1);
        assert_eq!(ctx.diagnostics()[0].code, DiagnosticCode::IncompatibleEquals);
    }

    #[test]
    fn test_mixed_numeric_types_cast_and_compare() {
        let (sql, ctx) = translate(
            fragment("Id", ExprType::int()),
            fragment("Price", ExprType::float()),
        );
        let expected = SqlExpr::eq(
            SqlExpr::Cast {
                operand: Box::new(SqlExpr::column(&"p".into(), &"Id".into())),
                to: ValueType::Float,
            },
            SqlExpr::column(&"p".into(), &"Price".into()),
        );
        assert_eq!(sql, Some(expected));
        assert!(ctx.diagnostics().is_empty());
    }
}
