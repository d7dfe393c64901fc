//! Operator-chain query model.
//!
//! A [`QueryModel`] is a main source followed by body clauses, an optional
//! projection and an ordered list of result operators. Lambdas in body
//! clauses take one parameter per query source in scope, in the order the
//! sources were introduced; after a `group_by` they take the group instead.

pub mod builder;
pub mod parameterize;

pub use builder::Query;
pub use parameterize::parameterize;

use crate::expr::ExprRef;
use std::fmt;
use std::sync::Arc;

/// Opaque identity of one row stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[s{}]", self.0)
    }
}

/// A query source: an identity plus the entity type it ranges over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySource {
    pub id: SourceId,
    pub entity: Arc<str>,
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ordering {
    pub key: ExprRef,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BodyClause {
    Where(ExprRef),
    /// Keys in priority order. A later `OrderBy` clause replaces earlier ones.
    OrderBy(Vec<Ordering>),
    /// Inner equi-join with another entity set.
    Join {
        source: QuerySource,
        outer_key: ExprRef,
        inner_key: ExprRef,
    },
    /// Cross join.
    AdditionalFrom(QuerySource),
    GroupBy(ExprRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultOperator {
    Take(ExprRef),
    Skip(ExprRef),
    Distinct,
    /// Dotted navigation path from the projected entity, e.g. `Orders.Lines`.
    Include(Vec<Arc<str>>),
    Count,
    Any,
    Sum(ExprRef),
    Min(ExprRef),
    Max(ExprRef),
    Average(ExprRef),
    First,
    FirstOrDefault,
}

impl ResultOperator {
    /// Operators that reduce the sequence to one value and must come last.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResultOperator::Count
                | ResultOperator::Any
                | ResultOperator::Sum(_)
                | ResultOperator::Min(_)
                | ResultOperator::Max(_)
                | ResultOperator::Average(_)
                | ResultOperator::First
                | ResultOperator::FirstOrDefault
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResultOperator::Take(_) => "Take",
            ResultOperator::Skip(_) => "Skip",
            ResultOperator::Distinct => "Distinct",
            ResultOperator::Include(_) => "Include",
            ResultOperator::Count => "Count",
            ResultOperator::Any => "Any",
            ResultOperator::Sum(_) => "Sum",
            ResultOperator::Min(_) => "Min",
            ResultOperator::Max(_) => "Max",
            ResultOperator::Average(_) => "Average",
            ResultOperator::First => "First",
            ResultOperator::FirstOrDefault => "FirstOrDefault",
        }
    }
}

/// The whole query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryModel {
    pub main_from: QuerySource,
    pub body: Vec<BodyClause>,
    pub select: Option<ExprRef>,
    pub result_operators: Vec<ResultOperator>,
}

impl QueryModel {
    pub fn new(entity: impl Into<Arc<str>>) -> Self {
        Self {
            main_from: QuerySource {
                id: SourceId(0),
                entity: entity.into(),
            },
            body: Vec::new(),
            select: None,
            result_operators: Vec::new(),
        }
    }

    /// A source id not yet used by this model.
    pub fn next_source_id(&self) -> SourceId {
        let max = self
            .body
            .iter()
            .filter_map(|c| match c {
                BodyClause::Join { source, .. } | BodyClause::AdditionalFrom(source) => {
                    Some(source.id.0)
                }
                _ => None,
            })
            .max()
            .unwrap_or(self.main_from.id.0);
        SourceId(max.max(self.main_from.id.0) + 1)
    }

    /// Apply `f` to every expression in the model, in a fixed order.
    pub fn map_exprs(&self, f: &mut impl FnMut(&ExprRef) -> ExprRef) -> QueryModel {
        let body = self
            .body
            .iter()
            .map(|clause| match clause {
                BodyClause::Where(e) => BodyClause::Where(f(e)),
                BodyClause::OrderBy(keys) => BodyClause::OrderBy(
                    keys.iter()
                        .map(|o| Ordering {
                            key: f(&o.key),
                            descending: o.descending,
                        })
                        .collect(),
                ),
                BodyClause::Join {
                    source,
                    outer_key,
                    inner_key,
                } => BodyClause::Join {
                    source: source.clone(),
                    outer_key: f(outer_key),
                    inner_key: f(inner_key),
                },
                BodyClause::AdditionalFrom(s) => BodyClause::AdditionalFrom(s.clone()),
                BodyClause::GroupBy(e) => BodyClause::GroupBy(f(e)),
            })
            .collect();
        let select = self.select.as_ref().map(|e| f(e));
        let result_operators = self
            .result_operators
            .iter()
            .map(|op| match op {
                ResultOperator::Take(e) => ResultOperator::Take(f(e)),
                ResultOperator::Skip(e) => ResultOperator::Skip(f(e)),
                ResultOperator::Sum(e) => ResultOperator::Sum(f(e)),
                ResultOperator::Min(e) => ResultOperator::Min(f(e)),
                ResultOperator::Max(e) => ResultOperator::Max(f(e)),
                ResultOperator::Average(e) => ResultOperator::Average(f(e)),
                other => other.clone(),
            })
            .collect();
        QueryModel {
            main_from: self.main_from.clone(),
            body,
            select,
            result_operators,
        }
    }
}

impl fmt::Display for QueryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.main_from.entity)?;
        for clause in &self.body {
            match clause {
                BodyClause::Where(e) => write!(f, ".where({})", e)?,
                BodyClause::OrderBy(keys) => {
                    for (i, key) in keys.iter().enumerate() {
                        let name = match (i, key.descending) {
                            (0, false) => "order_by",
                            (0, true) => "order_by_desc",
                            (_, false) => "then_by",
                            (_, true) => "then_by_desc",
                        };
                        write!(f, ".{}({})", name, key.key)?;
                    }
                }
                BodyClause::Join {
                    source,
                    outer_key,
                    inner_key,
                } => write!(f, ".join({}, {}, {})", source.entity, outer_key, inner_key)?,
                BodyClause::AdditionalFrom(s) => write!(f, ".from({})", s.entity)?,
                BodyClause::GroupBy(e) => write!(f, ".group_by({})", e)?,
            }
        }
        if let Some(select) = &self.select {
            write!(f, ".select({})", select)?;
        }
        for op in &self.result_operators {
            match op {
                ResultOperator::Take(e) | ResultOperator::Skip(e) => {
                    write!(f, ".{}({})", op.name().to_lowercase(), e)?
                }
                ResultOperator::Include(path) => write!(f, ".include(\"{}\")", path.join("."))?,
                ResultOperator::Sum(e)
                | ResultOperator::Min(e)
                | ResultOperator::Max(e)
                | ResultOperator::Average(e) => {
                    write!(f, ".{}({})", op.name().to_lowercase(), e)?
                }
                ResultOperator::FirstOrDefault => write!(f, ".first_or_default()")?,
                other => write!(f, ".{}()", other.name().to_lowercase())?,
            }
        }
        Ok(())
    }
}
