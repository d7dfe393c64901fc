//! Bottom-up rewriting with structural sharing.
//!
//! A rewrite returns the original `Arc` for every subtree it leaves
//! untouched, so unaffected branches are never reallocated.

use super::{Expr, ExprRef};
use crate::error::RelqResult;
use std::collections::HashMap;
use std::sync::Arc;

/// Child slots of a node, in evaluation order.
pub fn children(expr: &Expr) -> Vec<&ExprRef> {
    match expr {
        Expr::Constant { .. }
        | Expr::Parameter { .. }
        | Expr::QueryParameter { .. }
        | Expr::SourceRef { .. } => Vec::new(),
        Expr::Member { target, .. } => vec![target],
        Expr::MethodCall { target, args, .. } => target.iter().chain(args.iter()).collect(),
        Expr::Binary { left, right, .. } => vec![left, right],
        Expr::Unary { operand, .. } => vec![operand],
        Expr::Conditional {
            test,
            if_true,
            if_false,
            ..
        } => vec![test, if_true, if_false],
        Expr::Lambda { body, .. } => vec![body],
        Expr::Record { fields } => fields.iter().map(|(_, e)| e).collect(),
    }
}

/// Rebuild `expr` with each child replaced by `f(child)`.
///
/// Returns `expr` itself when every child comes back pointer-equal.
pub fn map_children<F>(expr: &ExprRef, mut f: F) -> RelqResult<ExprRef>
where
    F: FnMut(&ExprRef) -> RelqResult<ExprRef>,
{
    let mut changed = false;
    let mut apply = |child: &ExprRef| -> RelqResult<ExprRef> {
        let next = f(child)?;
        if !Arc::ptr_eq(&next, child) {
            changed = true;
        }
        Ok(next)
    };

    let rebuilt = match &**expr {
        Expr::Constant { .. }
        | Expr::Parameter { .. }
        | Expr::QueryParameter { .. }
        | Expr::SourceRef { .. } => return Ok(expr.clone()),
        Expr::Member { target, member, ty } => Expr::Member {
            target: apply(target)?,
            member: member.clone(),
            ty: ty.clone(),
        },
        Expr::MethodCall {
            target,
            method,
            args,
            ty,
        } => Expr::MethodCall {
            target: target.as_ref().map(&mut apply).transpose()?,
            method: method.clone(),
            args: args.iter().map(&mut apply).collect::<RelqResult<_>>()?,
            ty: ty.clone(),
        },
        Expr::Binary {
            op,
            left,
            right,
            ty,
        } => Expr::Binary {
            op: *op,
            left: apply(left)?,
            right: apply(right)?,
            ty: ty.clone(),
        },
        Expr::Unary { op, operand, ty } => Expr::Unary {
            op: *op,
            operand: apply(operand)?,
            ty: ty.clone(),
        },
        Expr::Conditional {
            test,
            if_true,
            if_false,
            ty,
        } => Expr::Conditional {
            test: apply(test)?,
            if_true: apply(if_true)?,
            if_false: apply(if_false)?,
            ty: ty.clone(),
        },
        Expr::Lambda { params, body } => Expr::Lambda {
            params: params.clone(),
            body: apply(body)?,
        },
        Expr::Record { fields } => Expr::Record {
            fields: fields
                .iter()
                .map(|(name, e)| Ok((name.clone(), apply(e)?)))
                .collect::<RelqResult<_>>()?,
        },
    };

    if changed {
        Ok(Arc::new(rebuilt))
    } else {
        Ok(expr.clone())
    }
}

/// Pre-order rewrite: `f` may replace a node outright (its children are
/// then not visited); otherwise the children are rewritten recursively.
pub fn rewrite<F>(expr: &ExprRef, f: &mut F) -> RelqResult<ExprRef>
where
    F: FnMut(&ExprRef) -> RelqResult<Option<ExprRef>>,
{
    if let Some(replacement) = f(expr)? {
        return Ok(replacement);
    }
    map_children(expr, |child| rewrite(child, f))
}

/// Infallible variant of [`rewrite`].
pub fn rewrite_with<F>(expr: &ExprRef, mut f: F) -> ExprRef
where
    F: FnMut(&ExprRef) -> Option<ExprRef>,
{
    let mut wrapped = |e: &ExprRef| -> RelqResult<Option<ExprRef>> { Ok(f(e)) };
    rewrite(expr, &mut wrapped).unwrap_or_else(|_| expr.clone())
}

/// Replace lambda parameter references by name.
pub fn substitute(expr: &ExprRef, bindings: &HashMap<Arc<str>, ExprRef>) -> ExprRef {
    if bindings.is_empty() {
        return expr.clone();
    }
    rewrite_with(expr, |e| match &**e {
        Expr::Parameter { name, .. } => bindings.get(name).cloned(),
        _ => None,
    })
}

/// Apply a lambda to argument expressions by substituting its parameters.
pub fn apply_lambda(lambda: &ExprRef, args: &[ExprRef]) -> ExprRef {
    let (params, body) = lambda.as_lambda();
    let bindings: HashMap<Arc<str>, ExprRef> = params
        .iter()
        .cloned()
        .zip(args.iter().cloned())
        .collect();
    substitute(body, &bindings)
}

/// True when any node satisfies `pred`.
pub fn any_node(expr: &ExprRef, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
    if pred(expr) {
        return true;
    }
    children(expr).into_iter().any(|c| any_node(c, pred))
}

/// Whether the value depends on the current row of some query source.
///
/// Unbound lambda parameters count as row references: they stand for
/// elements of a sequence that only exists on the server.
pub fn is_row_dependent(expr: &ExprRef) -> bool {
    any_node(expr, &mut |e| {
        matches!(e, Expr::SourceRef { .. } | Expr::Parameter { .. })
    })
}

/// Rename lambda parameters to `x{depth}` (or `x{depth}_{i}` for multi-parameter
/// lambdas) so structurally equal queries compare equal regardless of the
/// names their author chose.
pub fn normalize_lambdas(expr: &ExprRef) -> ExprRef {
    normalize_at(expr, 0, &HashMap::new())
}

fn normalize_at(expr: &ExprRef, depth: usize, scope: &HashMap<Arc<str>, ExprRef>) -> ExprRef {
    match &**expr {
        Expr::Parameter { name, .. } => scope.get(name).cloned().unwrap_or_else(|| expr.clone()),
        Expr::Lambda { params, body } => {
            let mut inner = scope.clone();
            let renamed: Vec<Arc<str>> = (0..params.len())
                .map(|i| {
                    if params.len() == 1 {
                        format!("x{}", depth).into()
                    } else {
                        format!("x{}_{}", depth, i).into()
                    }
                })
                .collect();
            for (old, new) in params.iter().zip(&renamed) {
                let ty = find_parameter_type(body, old).unwrap_or_else(super::ExprType::unknown);
                inner.insert(
                    old.clone(),
                    Arc::new(Expr::Parameter {
                        name: new.clone(),
                        ty,
                    }),
                );
            }
            let new_body = normalize_at(body, depth + 1, &inner);
            if renamed == *params && Arc::ptr_eq(&new_body, body) {
                return expr.clone();
            }
            Arc::new(Expr::Lambda {
                params: renamed,
                body: new_body,
            })
        }
        _ => rewrite_children_infallible(expr, |c| normalize_at(c, depth, scope)),
    }
}

fn rewrite_children_infallible(expr: &ExprRef, mut f: impl FnMut(&ExprRef) -> ExprRef) -> ExprRef {
    map_children(expr, |c| Ok(f(c))).unwrap_or_else(|_| expr.clone())
}

fn find_parameter_type(expr: &ExprRef, name: &str) -> Option<super::ExprType> {
    match &**expr {
        Expr::Parameter { name: n, ty } if &**n == name => Some(ty.clone()),
        _ => children(expr)
            .into_iter()
            .find_map(|c| find_parameter_type(c, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{E, lit};

    #[test]
    fn test_rewrite_shares_untouched_subtrees() {
        let left = E::lambda1(|p| p.member("Name").contains("x")).into_ref();
        let (_, body) = left.as_lambda();
        let combined = E(body.clone()).and(lit(1).eq(2)).into_ref();

        let rewritten = rewrite_with(&combined, |e| match &**e {
            Expr::Constant { value, .. } if value == &crate::value::Value::Int(2) => {
                Some(lit(3).into_ref())
            }
            _ => None,
        });

        let (Expr::Binary { left: a, .. }, Expr::Binary { left: b, .. }) =
            (&*combined, &*rewritten)
        else {
            panic!("expected binary nodes");
        };
        assert!(Arc::ptr_eq(a, b));
        assert_ne!(combined, rewritten);
    }

    #[test]
    fn test_normalize_lambdas_ignores_author_names() {
        let a = Arc::new(Expr::Lambda {
            params: vec!["product".into()],
            body: Arc::new(Expr::Member {
                target: Arc::new(Expr::Parameter {
                    name: "product".into(),
                    ty: crate::expr::ExprType::unknown(),
                }),
                member: "Price".into(),
                ty: crate::expr::ExprType::unknown(),
            }),
        });
        let b = E::lambda1(|p| p.member("Price")).into_ref();
        assert_eq!(normalize_lambdas(&a), b);
    }

    #[test]
    fn test_row_dependence() {
        let lambda = E::lambda1(|p| p.member("Price").gt(3)).into_ref();
        let (_, body) = lambda.as_lambda();
        assert!(is_row_dependent(body));
        assert!(!is_row_dependent(&lit(3).add(4).into_ref()));
    }
}
