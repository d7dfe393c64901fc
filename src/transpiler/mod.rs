//! SQL generation from the relational tree.
//!
//! Rendering is a pure function of the tree and the dialect's
//! [`DialectCapabilities`]. Dialect decisions made here are textual only:
//! quoting, placeholders, paging syntax, function spellings and boolean
//! coercion between predicate and value positions. Anything a dialect
//! cannot express is a [`RelqError::DialectGap`].

pub mod dialect;
pub mod sql;
pub mod traits;

#[cfg(test)]
mod tests;

pub use dialect::Dialect;
pub use traits::{
    CastTypes, CustomGenerator, DialectCapabilities, PagingStyle, PlaceholderStyle, SqlGenerator,
};

use crate::error::{RelqError, RelqResult};
use crate::sql::{Command, JoinKind, OrderItem, Select, SqlBinaryOp, SqlExpr, TableSource};
use crate::translator::string::escape_like;
use crate::value::Value;
use std::sync::Arc;

/// Column added by row-number paging.
const ROW_NUMBER_COLUMN: &str = "__RowNumber__";
const ROW_NUMBER_ALIAS: &str = "__rn";

/// Trait for converting relational trees to SQL.
pub trait ToSql {
    /// Render for SQLite.
    fn to_sql(&self) -> RelqResult<Command> {
        self.to_sql_with_dialect(Dialect::Sqlite)
    }

    fn to_sql_with_dialect(&self, dialect: Dialect) -> RelqResult<Command>;
}

impl ToSql for Select {
    fn to_sql_with_dialect(&self, dialect: Dialect) -> RelqResult<Command> {
        dialect.generator().generate(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Value,
    Predicate,
}

// Binding strength of rendered operators; higher binds tighter.
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_COMPARE: u8 = 4;
const PREC_ADD: u8 = 5;
const PREC_MUL: u8 = 6;
const PREC_NEGATE: u8 = 7;
const PREC_ATOM: u8 = 8;

fn precedence(op: SqlBinaryOp) -> u8 {
    match op {
        SqlBinaryOp::Or => PREC_OR,
        SqlBinaryOp::And => PREC_AND,
        SqlBinaryOp::Add | SqlBinaryOp::Sub | SqlBinaryOp::Concat => PREC_ADD,
        SqlBinaryOp::Mul | SqlBinaryOp::Div | SqlBinaryOp::Mod => PREC_MUL,
        _ => PREC_COMPARE,
    }
}

fn paren(text: String, prec: u8, min: u8) -> String {
    if prec < min {
        format!("({})", text)
    } else {
        text
    }
}

/// Renders one command; collects parameter names in placeholder order.
pub struct Renderer<'g, G: SqlGenerator + ?Sized> {
    generator: &'g G,
    caps: &'g DialectCapabilities,
    parameters: Vec<Arc<str>>,
}

impl<'g, G: SqlGenerator + ?Sized> Renderer<'g, G> {
    pub fn new(generator: &'g G) -> Self {
        Self {
            generator,
            caps: generator.capabilities(),
            parameters: Vec::new(),
        }
    }

    pub fn render(mut self, select: &Select) -> RelqResult<Command> {
        let text = self.select(select)?;
        Ok(Command {
            text,
            parameters: self.parameters,
        })
    }

    fn gap(&self, construct: impl Into<String>) -> RelqError {
        RelqError::dialect_gap(self.generator.name(), construct)
    }

    fn quote(&self, name: &str) -> String {
        self.generator.quote_identifier(name)
    }

    fn select(&mut self, select: &Select) -> RelqResult<String> {
        let order = self.effective_order(select);
        let row_number = self.caps.paging == PagingStyle::RowNumber && select.offset.is_some();
        if row_number {
            return self.row_number_select(select, &order);
        }

        let mut sql = String::from("SELECT ");
        if select.distinct {
            sql.push_str("DISTINCT ");
        }
        let top = self.caps.paging != PagingStyle::LimitOffset && select.offset.is_none();
        if let (true, Some(limit)) = (top, &select.limit) {
            sql.push_str(&format!("TOP({}) ", self.value(limit)?));
        }
        sql.push_str(&self.projection(select)?);
        sql.push_str(&self.from_clause(select)?);
        sql.push_str(&self.order_clause(&order, select.is_paged())?);

        match self.caps.paging {
            PagingStyle::LimitOffset => {
                if let Some(limit) = &select.limit {
                    sql.push_str(&format!(" LIMIT {}", self.value(limit)?));
                } else if let (Some(_), Some(unbounded)) = (&select.offset, &self.caps.unbounded_limit) {
                    sql.push_str(&format!(" LIMIT {}", unbounded));
                }
                if let Some(offset) = &select.offset {
                    sql.push_str(&format!(" OFFSET {}", self.value(offset)?));
                }
            }
            PagingStyle::OffsetFetch | PagingStyle::RowNumber => {
                if let Some(offset) = &select.offset {
                    sql.push_str(&format!(" OFFSET {} ROWS", self.value(offset)?));
                    if let Some(limit) = &select.limit {
                        sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", self.value(limit)?));
                    }
                }
            }
        }
        Ok(sql)
    }

    /// Skip without `OFFSET`: number the rows in a derived table and filter
    /// on the number outside it.
    fn row_number_select(&mut self, select: &Select, order: &[OrderItem]) -> RelqResult<String> {
        if select.distinct {
            return Err(self.gap("DISTINCT combined with row-number paging"));
        }
        let wrapper = self.quote(ROW_NUMBER_ALIAS);
        let number = format!("{}.{}", wrapper, self.quote(ROW_NUMBER_COLUMN));

        let outer: Vec<String> = select
            .projection
            .iter()
            .map(|p| format!("{}.{}", wrapper, self.quote(&p.alias)))
            .collect();
        let mut sql = format!("SELECT {} FROM (SELECT ", outer.join(", "));
        sql.push_str(&self.projection(select)?);
        let ordering = match self.order_list(order)? {
            Some(list) => list,
            None => "(SELECT 1)".to_string(),
        };
        sql.push_str(&format!(
            ", ROW_NUMBER() OVER(ORDER BY {}) AS {}",
            ordering,
            self.quote(ROW_NUMBER_COLUMN)
        ));
        sql.push_str(&self.from_clause(select)?);
        sql.push_str(&format!(") AS {}", wrapper));

        let offset = select
            .offset
            .as_ref()
            .ok_or_else(|| RelqError::Internal("row-number paging without an offset".into()))?;
        sql.push_str(&format!(" WHERE {} > {}", number, self.operand(offset, Position::Value, PREC_ADD)?));
        if let Some(limit) = &select.limit {
            let first = self.operand(offset, Position::Value, PREC_ADD)?;
            let count = self.operand(limit, Position::Value, PREC_MUL)?;
            sql.push_str(&format!(" AND {} <= {} + {}", number, first, count));
        }
        sql.push_str(&format!(" ORDER BY {}", number));
        Ok(sql)
    }

    /// The select's ordering, or one synthesized from its identity when the
    /// dialect needs an ordering to page.
    fn effective_order(&self, select: &Select) -> Vec<OrderItem> {
        if !select.order_by.is_empty()
            || !select.is_paged()
            || !self.caps.paging_requires_order_by
        {
            return select.order_by.clone();
        }
        select
            .identity
            .iter()
            .map(|expr| OrderItem {
                expr: expr.clone(),
                descending: false,
            })
            .collect()
    }

    fn order_list(&mut self, order: &[OrderItem]) -> RelqResult<Option<String>> {
        if order.is_empty() {
            return Ok(None);
        }
        let mut items = Vec::with_capacity(order.len());
        for item in order {
            let mut text = self.value(&item.expr)?;
            if item.descending {
                text.push_str(" DESC");
            }
            items.push(text);
        }
        Ok(Some(items.join(", ")))
    }

    fn order_clause(&mut self, order: &[OrderItem], paged: bool) -> RelqResult<String> {
        Ok(match self.order_list(order)? {
            Some(list) => format!(" ORDER BY {}", list),
            None if paged && self.caps.paging_requires_order_by => " ORDER BY (SELECT 1)".to_string(),
            None => String::new(),
        })
    }

    fn projection(&mut self, select: &Select) -> RelqResult<String> {
        if select.projection.is_empty() {
            return Err(RelqError::Internal("select without projection".into()));
        }
        let mut columns = Vec::with_capacity(select.projection.len());
        for p in &select.projection {
            let text = self.value(&p.expr)?;
            match &p.expr {
                SqlExpr::Column { name, .. } if *name == p.alias => columns.push(text),
                _ => columns.push(format!("{} AS {}", text, self.quote(&p.alias))),
            }
        }
        Ok(columns.join(", "))
    }

    /// FROM through HAVING.
    fn from_clause(&mut self, select: &Select) -> RelqResult<String> {
        let mut sql = format!(" FROM {}", self.source(&select.from)?);
        for join in &select.joins {
            let keyword = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::LeftOuter => "LEFT JOIN",
                JoinKind::Cross => "CROSS JOIN",
            };
            sql.push_str(&format!(" {} {}", keyword, self.source(&join.source)?));
            match (&join.condition, join.kind) {
                (_, JoinKind::Cross) => {}
                (Some(condition), _) => {
                    sql.push_str(&format!(" ON {}", self.predicate(condition)?));
                }
                (None, _) => sql.push_str(" ON 1 = 1"),
            }
        }
        if let Some(predicate) = &select.predicate {
            sql.push_str(&format!(" WHERE {}", self.predicate(predicate)?));
        }
        if !select.group_by.is_empty() {
            let mut keys = Vec::with_capacity(select.group_by.len());
            for key in &select.group_by {
                keys.push(self.value(key)?);
            }
            sql.push_str(&format!(" GROUP BY {}", keys.join(", ")));
        }
        if let Some(having) = &select.having {
            sql.push_str(&format!(" HAVING {}", self.predicate(having)?));
        }
        Ok(sql)
    }

    fn source(&mut self, source: &TableSource) -> RelqResult<String> {
        Ok(match source {
            TableSource::Table {
                name,
                schema,
                alias,
            } => {
                let table = match schema {
                    Some(schema) => format!("{}.{}", self.quote(schema), self.quote(name)),
                    None => self.quote(name),
                };
                format!("{} AS {}", table, self.quote(alias))
            }
            TableSource::Subquery { select, alias } => {
                format!("({}) AS {}", self.select(select)?, self.quote(alias))
            }
        })
    }

    fn value(&mut self, expr: &SqlExpr) -> RelqResult<String> {
        Ok(self.expr(expr, Position::Value)?.0)
    }

    fn predicate(&mut self, expr: &SqlExpr) -> RelqResult<String> {
        Ok(self.expr(expr, Position::Predicate)?.0)
    }

    fn operand(&mut self, expr: &SqlExpr, position: Position, min: u8) -> RelqResult<String> {
        let (text, prec) = self.expr(expr, position)?;
        Ok(paren(text, prec, min))
    }

    /// Render in the given position, applying boolean coercion.
    fn expr(&mut self, expr: &SqlExpr, position: Position) -> RelqResult<(String, u8)> {
        match position {
            Position::Predicate if !expr.is_predicate() && self.caps.bool_values_as_predicates => {
                if let SqlExpr::Literal(Value::Bool(b)) = expr {
                    let text = if *b { "1 = 1" } else { "1 = 0" };
                    return Ok((text.to_string(), PREC_COMPARE));
                }
                let (text, prec) = self.node(expr)?;
                Ok((
                    format!("{} = {}", paren(text, prec, PREC_ADD), self.caps.true_literal),
                    PREC_COMPARE,
                ))
            }
            Position::Value if expr.is_predicate() && self.caps.bool_predicates_as_values => {
                let (text, _) = self.node(expr)?;
                Ok((
                    format!(
                        "CASE WHEN {} THEN {} ELSE {} END",
                        text,
                        self.generator.bool_literal(true),
                        self.generator.bool_literal(false)
                    ),
                    PREC_ATOM,
                ))
            }
            _ => self.node(expr),
        }
    }

    fn node(&mut self, expr: &SqlExpr) -> RelqResult<(String, u8)> {
        Ok(match expr {
            SqlExpr::Column { table, name } => {
                (format!("{}.{}", self.quote(table), self.quote(name)), PREC_ATOM)
            }
            SqlExpr::Literal(value) => self.literal(value)?,
            SqlExpr::Parameter(name) => (self.parameter(name), PREC_ATOM),
            SqlExpr::Binary { op, left, right } => {
                let prec = precedence(*op);
                let text = if op.is_logical() {
                    let l = self.logical_operand(left, *op)?;
                    let r = self.logical_operand(right, *op)?;
                    format!("{} {} {}", l, op.symbol(), r)
                } else {
                    let symbol = match op {
                        SqlBinaryOp::Concat => self.caps.concat_operator.as_str(),
                        other => other.symbol(),
                    };
                    let min = if op.is_comparison() { PREC_ADD } else { prec };
                    let l = self.operand(left, Position::Value, min)?;
                    let r = self.operand(right, Position::Value, min + 1)?;
                    format!("{} {} {}", l, symbol, r)
                };
                (text, prec)
            }
            SqlExpr::Not(inner) => (
                format!("NOT {}", self.operand(inner, Position::Predicate, PREC_ATOM)?),
                3,
            ),
            SqlExpr::IsNull(inner) => (
                format!("{} IS NULL", self.operand(inner, Position::Value, PREC_ADD)?),
                PREC_COMPARE,
            ),
            SqlExpr::IsNotNull(inner) => (
                format!("{} IS NOT NULL", self.operand(inner, Position::Value, PREC_ADD)?),
                PREC_COMPARE,
            ),
            SqlExpr::Negate(inner) => (
                format!("-{}", self.operand(inner, Position::Value, PREC_ATOM)?),
                PREC_NEGATE,
            ),
            SqlExpr::Like {
                matched,
                pattern,
                escape,
            } => {
                let mut text = format!(
                    "{} LIKE {}",
                    self.operand(matched, Position::Value, PREC_ADD)?,
                    self.operand(pattern, Position::Value, PREC_ADD)?
                );
                if let Some(escape) = escape {
                    text.push_str(&format!(
                        " ESCAPE {}",
                        self.generator.string_literal(&escape.to_string())
                    ));
                }
                (text, PREC_COMPARE)
            }
            SqlExpr::EscapeLikePattern { operand, escape } => self.escape_pattern(operand, *escape)?,
            SqlExpr::Function { name, args } => (self.function(name, args)?, PREC_ATOM),
            SqlExpr::Case { whens, otherwise } => {
                let mut text = String::from("CASE");
                for (test, result) in whens {
                    text.push_str(&format!(
                        " WHEN {} THEN {}",
                        self.predicate(test)?,
                        self.value(result)?
                    ));
                }
                if let Some(otherwise) = otherwise {
                    text.push_str(&format!(" ELSE {}", self.value(otherwise)?));
                }
                text.push_str(" END");
                (text, PREC_ATOM)
            }
            SqlExpr::Cast { operand, to } => (
                format!(
                    "CAST({} AS {})",
                    self.value(operand)?,
                    self.caps.cast_types.name(*to)
                ),
                PREC_ATOM,
            ),
            SqlExpr::Exists(select) => (format!("EXISTS ({})", self.select(select)?), PREC_ATOM),
            SqlExpr::Subquery(select) => (format!("({})", self.select(select)?), PREC_ATOM),
        })
    }

    /// Mixed AND/OR nesting is always parenthesized.
    fn logical_operand(&mut self, expr: &SqlExpr, parent: SqlBinaryOp) -> RelqResult<String> {
        let (text, prec) = self.expr(expr, Position::Predicate)?;
        let mixed = matches!(expr, SqlExpr::Binary { op, .. } if op.is_logical() && *op != parent);
        if mixed || prec < precedence(parent) {
            Ok(format!("({})", text))
        } else {
            Ok(text)
        }
    }

    fn literal(&self, value: &Value) -> RelqResult<(String, u8)> {
        Ok(match value {
            Value::Null => ("NULL".to_string(), PREC_ATOM),
            Value::Bool(b) => (self.generator.bool_literal(*b), PREC_ATOM),
            Value::Int(n) => (n.to_string(), if *n < 0 { PREC_NEGATE } else { PREC_ATOM }),
            Value::Float(f) => {
                if !f.is_finite() {
                    return Err(self.gap(format!("non-finite literal {}", f)));
                }
                let text = if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                };
                let prec = if *f < 0.0 { PREC_NEGATE } else { PREC_ATOM };
                (text, prec)
            }
            Value::Text(s) => (self.generator.string_literal(s), PREC_ATOM),
        })
    }

    fn parameter(&mut self, name: &Arc<str>) -> String {
        let position = match self.caps.placeholder {
            PlaceholderStyle::Question => None,
            PlaceholderStyle::Dollar | PlaceholderStyle::AtName => {
                self.parameters.iter().position(|p| p == name)
            }
        };
        let position = match position {
            Some(i) => i + 1,
            None => {
                self.parameters.push(name.clone());
                self.parameters.len()
            }
        };
        self.generator.placeholder(position, name)
    }

    /// Literal patterns are escaped here; anything else is escaped by
    /// nested `REPLACE` calls, escape character first.
    fn escape_pattern(&mut self, operand: &SqlExpr, escape: char) -> RelqResult<(String, u8)> {
        if let SqlExpr::Literal(Value::Text(s)) = operand {
            let escaped = escape_like(s, &self.caps.like_wildcards, escape);
            return Ok((self.generator.string_literal(&escaped), PREC_ATOM));
        }
        let replace = self
            .caps
            .function(crate::sql::func::REPLACE)
            .ok_or_else(|| self.gap("REPLACE"))?
            .into_owned();
        let mut text = self.value(operand)?;
        let specials = std::iter::once(escape).chain(self.caps.like_wildcards.chars());
        for c in specials {
            text = format!(
                "{}({}, {}, {})",
                replace,
                text,
                self.generator.string_literal(&c.to_string()),
                self.generator.string_literal(&format!("{}{}", escape, c))
            );
        }
        Ok((text, PREC_ATOM))
    }

    fn function(&mut self, name: &str, args: &[SqlExpr]) -> RelqResult<String> {
        let spelling = self
            .caps
            .function(name)
            .ok_or_else(|| self.gap(format!("function {}", name)))?
            .into_owned();
        if !spelling.contains('{') {
            if args.is_empty() && name == crate::sql::func::COUNT {
                return Ok(format!("{}(*)", spelling));
            }
            let mut rendered = Vec::with_capacity(args.len());
            for arg in args {
                rendered.push(self.value(arg)?);
            }
            return Ok(format!("{}({})", spelling, rendered.join(", ")));
        }

        // template: each {i} renders its argument in place
        let mut out = String::new();
        let mut chars = spelling.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '{' {
                out.push(c);
                continue;
            }
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                chars.next();
                if d == '}' {
                    break;
                }
                digits.push(d);
            }
            let arg = digits
                .parse::<usize>()
                .ok()
                .and_then(|i| args.get(i))
                .ok_or_else(|| self.gap(format!("template '{}' for {}", spelling, name)))?;
            out.push_str(&self.operand(arg, Position::Value, PREC_ADD)?);
        }
        Ok(out)
    }
}
