//! Compile-time scope check for SQL trees.
//!
//! Every column must name a FROM/JOIN alias of its own select or of an
//! enclosing one (correlation). A dangling alias is a front-end defect and
//! is reported as an internal error before any command is rendered.

use super::{Select, SqlExpr, TableSource};
use crate::error::{RelqError, RelqResult};
use std::sync::Arc;

pub fn verify(select: &Select) -> RelqResult<()> {
    verify_select(select, &[])
}

fn verify_select(select: &Select, outer: &[&Arc<str>]) -> RelqResult<()> {
    // derived tables cannot see the enclosing scope
    let mut sources = vec![&select.from];
    sources.extend(select.joins.iter().map(|j| &j.source));
    for source in sources {
        if let TableSource::Subquery { select: inner, .. } = source {
            verify_select(inner, &[])?;
        }
    }

    let mut scope: Vec<&Arc<str>> = outer.to_vec();
    scope.extend(select.aliases());

    let mut exprs: Vec<&SqlExpr> = Vec::new();
    exprs.extend(select.projection.iter().map(|p| &p.expr));
    exprs.extend(select.joins.iter().filter_map(|j| j.condition.as_ref()));
    exprs.extend(select.predicate.iter());
    exprs.extend(select.group_by.iter());
    exprs.extend(select.having.iter());
    exprs.extend(select.order_by.iter().map(|o| &o.expr));
    exprs.extend(select.limit.iter());
    exprs.extend(select.offset.iter());
    exprs.extend(select.identity.iter());

    for expr in exprs {
        verify_expr(expr, &scope)?;
    }
    Ok(())
}

fn verify_expr(expr: &SqlExpr, scope: &[&Arc<str>]) -> RelqResult<()> {
    match expr {
        SqlExpr::Column { table, name } => {
            if scope.iter().any(|alias| **alias == *table) {
                Ok(())
            } else {
                Err(RelqError::Internal(format!(
                    "column {}.{} references an alias that is not in scope",
                    table, name
                )))
            }
        }
        SqlExpr::Literal(_) | SqlExpr::Parameter(_) => Ok(()),
        SqlExpr::Binary { left, right, .. } => {
            verify_expr(left, scope)?;
            verify_expr(right, scope)
        }
        SqlExpr::Not(e)
        | SqlExpr::IsNull(e)
        | SqlExpr::IsNotNull(e)
        | SqlExpr::Negate(e)
        | SqlExpr::EscapeLikePattern { operand: e, .. }
        | SqlExpr::Cast { operand: e, .. } => verify_expr(e, scope),
        SqlExpr::Like {
            matched, pattern, ..
        } => {
            verify_expr(matched, scope)?;
            verify_expr(pattern, scope)
        }
        SqlExpr::Function { args, .. } => args.iter().try_for_each(|a| verify_expr(a, scope)),
        SqlExpr::Case { whens, otherwise } => {
            for (test, result) in whens {
                verify_expr(test, scope)?;
                verify_expr(result, scope)?;
            }
            match otherwise {
                Some(e) => verify_expr(e, scope),
                None => Ok(()),
            }
        }
        SqlExpr::Exists(select) | SqlExpr::Subquery(select) => verify_select(select, scope),
    }
}
