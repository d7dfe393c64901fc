//! Literal extraction for query-shape caching.
//!
//! Every non-null constant is replaced by a query parameter named
//! `__p_{n}` (numbered in a fixed traversal order) and lambda parameters are
//! renamed by depth. Two models that differ only in literal values therefore
//! normalize to equal shapes. NULL constants stay in the shape: they change
//! the translation (`IS NULL` instead of `=`).

use super::QueryModel;
use crate::expr::visit::{normalize_lambdas, rewrite_with};
use crate::expr::{Expr, ExprType};
use crate::value::Value;
use std::sync::Arc;

/// Prefix of generated literal parameters.
pub const LITERAL_PREFIX: &str = "__p_";

/// A normalized query shape plus the literal values lifted out of it.
#[derive(Debug, Clone)]
pub struct Parameterized {
    pub shape: QueryModel,
    pub values: Vec<(Arc<str>, Value)>,
}

/// Normalize lambda names and, when `lift_literals` is set, lift constants
/// into parameters.
pub fn parameterize(model: &QueryModel, lift_literals: bool) -> Parameterized {
    let mut values: Vec<(Arc<str>, Value)> = Vec::new();
    let shape = model.map_exprs(&mut |e| {
        let normalized = normalize_lambdas(e);
        if !lift_literals {
            return normalized;
        }
        rewrite_with(&normalized, |node| match &**node {
            Expr::Constant { value, .. } if !value.is_null() => {
                let name: Arc<str> = format!("{}{}", LITERAL_PREFIX, values.len()).into();
                values.push((name.clone(), value.clone()));
                Some(Arc::new(Expr::QueryParameter {
                    name,
                    ty: ExprType::of_value(value),
                }))
            }
            _ => None,
        })
    });
    Parameterized { shape, values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use pretty_assertions::assert_eq;

    fn price_query(low: i64, high: i64) -> QueryModel {
        Query::from("Product")
            .filter(|p| p.member("Price").ge(low).and(p.member("Price").le(high)))
            .take(5)
            .build()
            .unwrap()
    }

    #[test]
    fn test_literals_become_parameters() {
        let p = parameterize(&price_query(10, 14), true);
        assert_eq!(
            p.values,
            vec![
                ("__p_0".into(), Value::Int(10)),
                ("__p_1".into(), Value::Int(14)),
                ("__p_2".into(), Value::Int(5)),
            ]
        );
        assert_eq!(
            p.shape.to_string(),
            "Product.where(x0 => ((x0.Price >= $__p_0) && (x0.Price <= $__p_1))).take($__p_2)"
        );
    }

    #[test]
    fn test_shapes_ignore_literal_values() {
        let a = parameterize(&price_query(10, 14), true);
        let b = parameterize(&price_query(1, 2), true);
        assert_eq!(a.shape, b.shape);

        let c = parameterize(
            &Query::from("Product")
                .filter(|p| p.member("Price").gt(10))
                .build()
                .unwrap(),
            true,
        );
        assert_ne!(a.shape, c.shape);
    }

    #[test]
    fn test_null_constants_stay_in_shape() {
        let model = Query::from("Product")
            .filter(|p| p.member("Name").is_null())
            .build()
            .unwrap();
        let p = parameterize(&model, true);
        assert!(p.values.is_empty());
        assert_eq!(p.shape, model);
    }
}
