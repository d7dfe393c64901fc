//! Relational expression tree.
//!
//! Produced by the front end, rendered by a dialect generator. Nodes own
//! their children; there are no cycles and no dialect decisions here.

pub mod verify;

use crate::value::{Value, ValueType};
use std::fmt;
use std::sync::Arc;

/// Generic scalar function names. Dialects map these to native spellings.
pub mod func {
    pub const UPPER: &str = "upper";
    pub const LOWER: &str = "lower";
    pub const TRIM: &str = "trim";
    pub const LENGTH: &str = "length";
    /// `substr(text, start1, length)` with a 1-based start.
    pub const SUBSTR: &str = "substr";
    /// 1-based position of the second argument in the first, 0 when absent.
    pub const INDEX_OF: &str = "index_of";
    pub const REPLACE: &str = "replace";
    /// Negative, zero or positive integer consistent with lexical ordering.
    pub const COMPARE: &str = "compare";
    pub const ABS: &str = "abs";
    pub const ROUND: &str = "round";
    pub const FLOOR: &str = "floor";
    pub const CEILING: &str = "ceiling";
    pub const COALESCE: &str = "coalesce";
    /// `count()` with no arguments renders `COUNT(*)`.
    pub const COUNT: &str = "count";
    pub const SUM: &str = "sum";
    pub const MIN: &str = "min";
    pub const MAX: &str = "max";
    pub const AVG: &str = "avg";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlBinaryOp {
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
    /// String concatenation; the operator is dialect-specific.
    Concat,
}

impl SqlBinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Concat => "||",
        }
    }
}

/// A scalar or predicate expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column {
        table: Arc<str>,
        name: Arc<str>,
    },
    Literal(Value),
    /// A named placeholder; the generator decides its spelling and position.
    Parameter(Arc<str>),
    Binary {
        op: SqlBinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Not(Box<SqlExpr>),
    IsNull(Box<SqlExpr>),
    IsNotNull(Box<SqlExpr>),
    Negate(Box<SqlExpr>),
    Like {
        matched: Box<SqlExpr>,
        pattern: Box<SqlExpr>,
        escape: Option<char>,
    },
    /// The operand with every LIKE wildcard and the escape character
    /// prefixed by the escape character.
    EscapeLikePattern {
        operand: Box<SqlExpr>,
        escape: char,
    },
    Function {
        name: Arc<str>,
        args: Vec<SqlExpr>,
    },
    Case {
        whens: Vec<(SqlExpr, SqlExpr)>,
        otherwise: Option<Box<SqlExpr>>,
    },
    Cast {
        operand: Box<SqlExpr>,
        to: ValueType,
    },
    Exists(Box<Select>),
    /// Scalar subquery.
    Subquery(Box<Select>),
}

impl SqlExpr {
    pub fn column(table: &Arc<str>, name: &Arc<str>) -> SqlExpr {
        SqlExpr::Column {
            table: table.clone(),
            name: name.clone(),
        }
    }

    pub fn binary(op: SqlBinaryOp, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        Self::binary(SqlBinaryOp::Eq, left, right)
    }

    pub fn and(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        Self::binary(SqlBinaryOp::And, left, right)
    }

    pub fn or(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        Self::binary(SqlBinaryOp::Or, left, right)
    }

    /// AND together any number of predicates; `None` when empty.
    pub fn and_all(preds: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
        preds.into_iter().reduce(SqlExpr::and)
    }

    pub fn is_null(operand: SqlExpr) -> SqlExpr {
        SqlExpr::IsNull(Box::new(operand))
    }

    pub fn is_not_null(operand: SqlExpr) -> SqlExpr {
        SqlExpr::IsNotNull(Box::new(operand))
    }

    pub fn not(operand: SqlExpr) -> SqlExpr {
        match operand {
            SqlExpr::Not(inner) => *inner,
            SqlExpr::IsNull(inner) => SqlExpr::IsNotNull(inner),
            SqlExpr::IsNotNull(inner) => SqlExpr::IsNull(inner),
            other => SqlExpr::Not(Box::new(other)),
        }
    }

    pub fn function(name: &str, args: Vec<SqlExpr>) -> SqlExpr {
        SqlExpr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn literal(value: impl Into<Value>) -> SqlExpr {
        SqlExpr::Literal(value.into())
    }

    /// True for nodes that are predicates (search conditions) rather than values.
    pub fn is_predicate(&self) -> bool {
        match self {
            SqlExpr::Binary { op, .. } => op.is_comparison() || op.is_logical(),
            SqlExpr::Not(_)
            | SqlExpr::IsNull(_)
            | SqlExpr::IsNotNull(_)
            | SqlExpr::Like { .. }
            | SqlExpr::Exists(_) => true,
            _ => false,
        }
    }
}

/// Something rows come from.
#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    Table {
        name: Arc<str>,
        schema: Option<Arc<str>>,
        alias: Arc<str>,
    },
    Subquery {
        select: Box<Select>,
        alias: Arc<str>,
    },
}

impl TableSource {
    pub fn alias(&self) -> &Arc<str> {
        match self {
            TableSource::Table { alias, .. } | TableSource::Subquery { alias, .. } => alias,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub source: TableSource,
    pub condition: Option<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub expr: SqlExpr,
    pub alias: Arc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: SqlExpr,
    pub descending: bool,
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub projection: Vec<Projection>,
    pub from: TableSource,
    pub joins: Vec<Join>,
    pub predicate: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub having: Option<SqlExpr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<SqlExpr>,
    pub offset: Option<SqlExpr>,
    /// Columns that identify a row; the generator orders by them when a
    /// dialect needs an ordering for paging and none was requested.
    pub identity: Vec<SqlExpr>,
}

impl Select {
    pub fn new(from: TableSource) -> Self {
        Self {
            distinct: false,
            projection: Vec::new(),
            from,
            joins: Vec::new(),
            predicate: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            identity: Vec::new(),
        }
    }

    /// AND a predicate into the WHERE clause.
    pub fn add_predicate(&mut self, pred: SqlExpr) {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => SqlExpr::and(existing, pred),
            None => pred,
        });
    }

    pub fn add_having(&mut self, pred: SqlExpr) {
        self.having = Some(match self.having.take() {
            Some(existing) => SqlExpr::and(existing, pred),
            None => pred,
        });
    }

    /// Append a projection under an alias unique within this select.
    /// Returns the column index.
    pub fn add_projection(&mut self, expr: SqlExpr, alias: &str) -> usize {
        let alias = self.unique_alias(alias);
        self.projection.push(Projection { expr, alias });
        self.projection.len() - 1
    }

    fn unique_alias(&self, base: &str) -> Arc<str> {
        let taken = |name: &str| self.projection.iter().any(|p| &*p.alias == name);
        if !taken(base) {
            return base.into();
        }
        let mut n = 0;
        loop {
            let candidate = format!("{}{}", base, n);
            if !taken(&candidate) {
                return candidate.into();
            }
            n += 1;
        }
    }

    pub fn is_paged(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// Every alias introduced by FROM and JOIN.
    pub fn aliases(&self) -> impl Iterator<Item = &Arc<str>> {
        std::iter::once(self.from.alias()).chain(self.joins.iter().map(|j| j.source.alias()))
    }
}

/// Rendered command text plus parameter names in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub text: String,
    pub parameters: Vec<Arc<str>>,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_folds_null_checks() {
        let col = SqlExpr::column(&"p".into(), &"Name".into());
        assert_eq!(
            SqlExpr::not(SqlExpr::is_null(col.clone())),
            SqlExpr::is_not_null(col.clone())
        );
        assert_eq!(SqlExpr::not(SqlExpr::not(col.clone())), col);
    }

    #[test]
    fn test_projection_aliases_are_unique() {
        let mut select = Select::new(TableSource::Table {
            name: "Orders".into(),
            schema: None,
            alias: "o".into(),
        });
        select.add_projection(SqlExpr::literal(1), "Id");
        select.add_projection(SqlExpr::literal(2), "Id");
        select.add_projection(SqlExpr::literal(3), "Id");
        let aliases: Vec<&str> = select.projection.iter().map(|p| &*p.alias).collect();
        assert_eq!(aliases, vec!["Id", "Id0", "Id1"]);
    }
}
