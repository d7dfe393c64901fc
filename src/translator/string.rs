//! String method and member translators.

use super::{MemberSite, MethodCallSite, SqlFragment, TranslationContext};
use crate::expr::declaring;
use crate::sql::{SqlBinaryOp, SqlExpr, func};
use crate::value::Value;

/// Escape character used for translated LIKE patterns.
pub const LIKE_ESCAPE: char = '\\';

/// `Contains`, `StartsWith`, `EndsWith`, `ToUpper`, `ToLower`, `Trim`,
/// `Substring`, `IndexOf` and `Replace` on string-typed targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringMethodTranslator;

impl super::MethodCallTranslator for StringMethodTranslator {
    fn translate(&self, call: &MethodCallSite<'_>, _: &mut TranslationContext) -> Option<SqlExpr> {
        if &*call.method.declaring != declaring::STRING {
            return None;
        }
        let target = call.target?;
        if !target.ty.is_text() {
            return None;
        }
        let text_args = call.args.iter().all(|a| a.ty.is_text());
        let sql = match (&*call.method.name, call.args) {
            ("Contains", [arg]) if text_args => like(target, Some(arg), true, true),
            ("StartsWith", [arg]) if text_args => like(target, Some(arg), false, true),
            ("EndsWith", [arg]) if text_args => like(target, Some(arg), true, false),
            ("ToUpper", []) => SqlExpr::function(func::UPPER, vec![target.sql.clone()]),
            ("ToLower", []) => SqlExpr::function(func::LOWER, vec![target.sql.clone()]),
            ("Trim", []) => SqlExpr::function(func::TRIM, vec![target.sql.clone()]),
            ("Substring", [start, length]) if start.ty.is_numeric() && length.ty.is_numeric() => {
                SqlExpr::function(
                    func::SUBSTR,
                    vec![
                        target.sql.clone(),
                        plus_one(&start.sql),
                        length.sql.clone(),
                    ],
                )
            }
            ("IndexOf", [arg]) if text_args => SqlExpr::binary(
                SqlBinaryOp::Sub,
                SqlExpr::function(func::INDEX_OF, vec![target.sql.clone(), arg.sql.clone()]),
                SqlExpr::literal(1),
            ),
            ("Replace", [from, to]) if text_args => SqlExpr::function(
                func::REPLACE,
                vec![target.sql.clone(), from.sql.clone(), to.sql.clone()],
            ),
            _ => return None,
        };
        Some(sql)
    }
}

/// Host indexes are 0-based, SQL positions 1-based.
fn plus_one(start: &SqlExpr) -> SqlExpr {
    match start {
        SqlExpr::Literal(Value::Int(n)) => SqlExpr::literal(n + 1),
        other => SqlExpr::binary(SqlBinaryOp::Add, other.clone(), SqlExpr::literal(1)),
    }
}

/// Build `target LIKE [%] escaped(arg) [%] ESCAPE '\'`.
///
/// The argument is wrapped in an escape node instead of being formatted
/// here: it is usually a parameter, and the wildcard set is dialect-specific.
fn like(target: &SqlFragment, arg: Option<&SqlFragment>, lead: bool, trail: bool) -> SqlExpr {
    let mut pattern = match arg {
        Some(arg) => SqlExpr::EscapeLikePattern {
            operand: Box::new(arg.sql.clone()),
            escape: LIKE_ESCAPE,
        },
        None => SqlExpr::literal(""),
    };
    if lead {
        pattern = SqlExpr::binary(SqlBinaryOp::Concat, SqlExpr::literal("%"), pattern);
    }
    if trail {
        pattern = SqlExpr::binary(SqlBinaryOp::Concat, pattern, SqlExpr::literal("%"));
    }
    SqlExpr::Like {
        matched: Box::new(target.sql.clone()),
        pattern: Box::new(pattern),
        escape: Some(LIKE_ESCAPE),
    }
}

/// `string.Compare(a, b)` as an opaque three-way comparison function.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCompareTranslator;

impl super::MethodCallTranslator for StringCompareTranslator {
    fn translate(&self, call: &MethodCallSite<'_>, _: &mut TranslationContext) -> Option<SqlExpr> {
        if !call.is(declaring::STRING, "Compare") || call.target.is_some() {
            return None;
        }
        match call.args {
            [a, b] if a.ty.is_text() && b.ty.is_text() => Some(SqlExpr::function(
                func::COMPARE,
                vec![a.sql.clone(), b.sql.clone()],
            )),
            _ => None,
        }
    }
}

/// `string.Length`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringLengthTranslator;

impl super::MemberTranslator for StringLengthTranslator {
    fn translate(&self, member: &MemberSite<'_>, _: &mut TranslationContext) -> Option<SqlExpr> {
        if member.member == "Length" && member.target.ty.is_text() {
            Some(SqlExpr::function(func::LENGTH, vec![member.target.sql.clone()]))
        } else {
            None
        }
    }
}

/// Escape LIKE wildcards and the escape character in a literal pattern.
pub fn escape_like(pattern: &str, wildcards: &str, escape: char) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == escape || wildcards.contains(c) {
            out.push(escape);
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expr, ExprType, Method};
    use crate::translator::MethodCallTranslator;

    fn text(sql: SqlExpr) -> SqlFragment {
        SqlFragment {
            sql,
            ty: ExprType::text(),
            expr: Expr::constant(Value::Null),
        }
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\", "%_", '\\'), "50\\%\\_off\\\\");
        assert_eq!(escape_like("[a]", "%_[", '\\'), "\\[a]");
    }

    #[test]
    fn test_contains_builds_escaped_like() {
        let target = text(SqlExpr::column(&"p".into(), &"Name".into()));
        let arg = text(SqlExpr::Parameter("__p_0".into()));
        let method = Method::new(declaring::STRING, "Contains");
        let args = [arg];
        let site = MethodCallSite {
            method: &method,
            target: Some(&target),
            args: &args,
            ty: &ExprType::bool(),
        };
        let sql = StringMethodTranslator
            .translate(&site, &mut TranslationContext::new())
            .unwrap();
        let SqlExpr::Like {
            pattern, escape, ..
        } = sql
        else {
            panic!("expected LIKE");
        };
        assert_eq!(escape, Some('\\'));
        assert!(matches!(
            *pattern,
            SqlExpr::Binary {
                op: SqlBinaryOp::Concat,
                ..
            }
        ));
    }

    #[test]
    fn test_non_text_target_is_declined() {
        let target = SqlFragment {
            sql: SqlExpr::column(&"p".into(), &"Price".into()),
            ty: ExprType::int(),
            expr: Expr::constant(Value::Null),
        };
        let method = Method::new(declaring::STRING, "ToUpper");
        let site = MethodCallSite {
            method: &method,
            target: Some(&target),
            args: &[],
            ty: &ExprType::text(),
        };
        assert!(StringMethodTranslator
            .translate(&site, &mut TranslationContext::new())
            .is_none());
    }
}
