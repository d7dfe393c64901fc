//! Fluent query builder.
//!
//! ```ignore
//! use relq::prelude::*;
//!
//! let query = Query::from("Product")
//!     .filter(|p| p.member("Price").ge(10).and(p.member("Price").le(14)))
//!     .order_by(|p| p.member("Name"))
//!     .take(5)
//!     .build()?;
//! ```

use super::{BodyClause, Ordering, QueryModel, QuerySource, ResultOperator};
use crate::error::{RelqError, RelqResult};
use crate::expr::E;
use std::sync::Arc;

/// Builds a [`QueryModel`] clause by clause.
#[derive(Debug)]
pub struct Query {
    model: QueryModel,
    /// Number of sources lambdas must accept.
    arity: usize,
    grouped: bool,
    error: Option<RelqError>,
}

impl Query {
    pub fn from(entity: &str) -> Self {
        Self {
            model: QueryModel::new(entity),
            arity: 1,
            grouped: false,
            error: None,
        }
    }

    fn fail(mut self, construct: &str, reason: &str) -> Self {
        if self.error.is_none() {
            self.error = Some(RelqError::untranslatable(construct, reason));
        }
        self
    }

    fn body_clause(mut self, name: &str, clause: BodyClause) -> Self {
        if self.model.select.is_some() {
            return self.fail(name, "clauses after select are not supported");
        }
        // include leaves the sequence unchanged, so clauses may follow it
        if self
            .model
            .result_operators
            .iter()
            .any(|op| !matches!(op, ResultOperator::Include(_)))
        {
            return self.fail(name, "clauses after result operators are not supported");
        }
        self.model.body.push(clause);
        self
    }

    fn lambda(&self, f: impl FnOnce(&[E]) -> E) -> E {
        let arity = if self.grouped { 1 } else { self.arity };
        E::lambda(arity, f)
    }

    /// Filter with a single-source predicate.
    pub fn filter(self, f: impl FnOnce(E) -> E) -> Self {
        let lambda = self.lambda(|p| f(p[0].clone()));
        self.body_clause("where", BodyClause::Where(lambda.into_ref()))
    }

    /// Filter with a predicate over every source in scope.
    pub fn filter_n(self, f: impl FnOnce(&[E]) -> E) -> Self {
        let lambda = self.lambda(f);
        self.body_clause("where", BodyClause::Where(lambda.into_ref()))
    }

    /// Order by a key over every source in scope. `then` appends to the
    /// preceding `order_by` instead of starting a new ordering.
    pub fn ordering(self, f: impl FnOnce(&[E]) -> E, descending: bool, then: bool) -> Self {
        let key = self.lambda(f).into_ref();
        let ordering = Ordering { key, descending };
        if then {
            let mut this = self;
            match this.model.body.last_mut() {
                Some(BodyClause::OrderBy(keys)) if this.model.select.is_none() => {
                    keys.push(ordering);
                    this
                }
                _ => this.fail("then_by", "then_by must follow order_by"),
            }
        } else {
            self.body_clause("order_by", BodyClause::OrderBy(vec![ordering]))
        }
    }

    pub fn order_by(self, f: impl FnOnce(E) -> E) -> Self {
        self.ordering(|p| f(p[0].clone()), false, false)
    }

    pub fn order_by_desc(self, f: impl FnOnce(E) -> E) -> Self {
        self.ordering(|p| f(p[0].clone()), true, false)
    }

    pub fn then_by(self, f: impl FnOnce(E) -> E) -> Self {
        self.ordering(|p| f(p[0].clone()), false, true)
    }

    pub fn then_by_desc(self, f: impl FnOnce(E) -> E) -> Self {
        self.ordering(|p| f(p[0].clone()), true, true)
    }

    /// Inner join: `outer_key` ranges over the sources in scope, `inner_key`
    /// over the joined entity. Later lambdas take one more parameter.
    pub fn join(
        mut self,
        entity: &str,
        outer_key: impl FnOnce(&[E]) -> E,
        inner_key: impl FnOnce(E) -> E,
    ) -> Self {
        if self.grouped {
            return self.fail("join", "join after group_by is not supported");
        }
        let outer_key = self.lambda(outer_key).into_ref();
        let inner_key = E::lambda1(inner_key).into_ref();
        let source = QuerySource {
            id: self.model.next_source_id(),
            entity: entity.into(),
        };
        self.arity += 1;
        self.body_clause(
            "join",
            BodyClause::Join {
                source,
                outer_key,
                inner_key,
            },
        )
    }

    /// Cross join with another entity set.
    pub fn from_also(mut self, entity: &str) -> Self {
        if self.grouped {
            return self.fail("from", "additional sources after group_by are not supported");
        }
        let source = QuerySource {
            id: self.model.next_source_id(),
            entity: entity.into(),
        };
        self.arity += 1;
        self.body_clause("from", BodyClause::AdditionalFrom(source))
    }

    pub fn group_by(self, f: impl FnOnce(&[E]) -> E) -> Self {
        let key = self.lambda(f).into_ref();
        let mut this = self.body_clause("group_by", BodyClause::GroupBy(key));
        this.grouped = true;
        this
    }

    pub fn select(mut self, f: impl FnOnce(&[E]) -> E) -> Self {
        if self.model.select.is_some() {
            return self.fail("select", "only one projection is supported");
        }
        if !self.model.result_operators.is_empty() {
            return self.fail("select", "projection after result operators is not supported");
        }
        let lambda = self.lambda(f).into_ref();
        self.model.select = Some(lambda);
        self
    }

    fn operator(mut self, op: ResultOperator) -> Self {
        if let Some(last) = self.model.result_operators.last() {
            if last.is_terminal() {
                return self.fail(op.name(), "operators after a terminal operator");
            }
        }
        self.model.result_operators.push(op);
        self
    }

    pub fn take(self, count: impl Into<E>) -> Self {
        self.operator(ResultOperator::Take(count.into().into_ref()))
    }

    pub fn skip(self, count: impl Into<E>) -> Self {
        self.operator(ResultOperator::Skip(count.into().into_ref()))
    }

    pub fn distinct(self) -> Self {
        self.operator(ResultOperator::Distinct)
    }

    /// Eagerly load a navigation path such as `"Orders.Lines"`.
    pub fn include(self, path: &str) -> Self {
        let path: Vec<Arc<str>> = path.split('.').map(|s| Arc::from(s.trim())).collect();
        self.operator(ResultOperator::Include(path))
    }

    pub fn count(self) -> Self {
        self.operator(ResultOperator::Count)
    }

    pub fn any(self) -> Self {
        self.operator(ResultOperator::Any)
    }

    pub fn sum(self, f: impl FnOnce(E) -> E) -> Self {
        let selector = E::lambda1(f).into_ref();
        self.operator(ResultOperator::Sum(selector))
    }

    pub fn min(self, f: impl FnOnce(E) -> E) -> Self {
        let selector = E::lambda1(f).into_ref();
        self.operator(ResultOperator::Min(selector))
    }

    pub fn max(self, f: impl FnOnce(E) -> E) -> Self {
        let selector = E::lambda1(f).into_ref();
        self.operator(ResultOperator::Max(selector))
    }

    pub fn average(self, f: impl FnOnce(E) -> E) -> Self {
        let selector = E::lambda1(f).into_ref();
        self.operator(ResultOperator::Average(selector))
    }

    pub fn first(self) -> Self {
        self.operator(ResultOperator::First)
    }

    pub fn first_or_default(self) -> Self {
        self.operator(ResultOperator::FirstOrDefault)
    }

    pub fn build(self) -> RelqResult<QueryModel> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.model),
        }
    }
}

impl From<QueryModel> for Query {
    fn from(model: QueryModel) -> Self {
        let arity = 1 + model
            .body
            .iter()
            .filter(|c| matches!(c, BodyClause::Join { .. } | BodyClause::AdditionalFrom(_)))
            .count();
        let grouped = model
            .body
            .iter()
            .any(|c| matches!(c, BodyClause::GroupBy(_)));
        Self {
            model,
            arity,
            grouped,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_orders_clauses() {
        let model = Query::from("Product")
            .filter(|p| p.member("Price").ge(10))
            .order_by(|p| p.member("Name"))
            .then_by_desc(|p| p.member("Id"))
            .take(5)
            .build()
            .unwrap();
        assert_eq!(model.body.len(), 2);
        let BodyClause::OrderBy(keys) = &model.body[1] else {
            panic!("expected order_by");
        };
        assert_eq!(keys.len(), 2);
        assert!(keys[1].descending);
        assert_eq!(
            model.to_string(),
            "Product.where(x0 => (x0.Price >= 10)).order_by(x0 => x0.Name).then_by_desc(x0 => x0.Id).take(5)"
        );
    }

    #[test]
    fn test_where_after_select_is_rejected() {
        let err = Query::from("Product")
            .select(|p| p[0].member("Name"))
            .filter(|p| p.member("Price").gt(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, RelqError::Untranslatable { .. }));
    }

    #[test]
    fn test_join_widens_lambda_arity() {
        let model = Query::from("Order")
            .join("Customer", |s| s[0].member("CustomerId"), |c| c.member("Id"))
            .filter_n(|s| s[1].member("Name").eq("Ann"))
            .build()
            .unwrap();
        let BodyClause::Where(pred) = &model.body[1] else {
            panic!("expected where");
        };
        let (params, _) = pred.as_lambda();
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_clauses_may_follow_include() {
        let model = Query::from("Category")
            .include("Products")
            .filter(|c| c.member("Id").gt(0))
            .order_by(|c| c.member("Name"))
            .then_by(|c| c.member("Id"))
            .build()
            .unwrap();
        assert_eq!(model.body.len(), 2);
        assert_eq!(model.result_operators.len(), 1);

        let err = Query::from("Category")
            .take(1)
            .order_by(|c| c.member("Name"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RelqError::Untranslatable { .. }));
    }
}
