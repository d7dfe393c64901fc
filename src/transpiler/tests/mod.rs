//! Rendering tests against SQLite, plus per-dialect tests in [`dialects`].

mod dialects;

use crate::error::RelqError;
use crate::sql::{OrderItem, Select, SqlBinaryOp, SqlExpr, TableSource, func};
use crate::transpiler::ToSql;
use crate::translator::string::LIKE_ESCAPE;
use pretty_assertions::assert_eq;
use std::sync::Arc;

pub(super) fn col(table: &str, name: &str) -> SqlExpr {
    SqlExpr::column(&table.into(), &name.into())
}

pub(super) fn param(name: &str) -> SqlExpr {
    SqlExpr::Parameter(name.into())
}

/// `Product AS p` projecting its key, name and price.
pub(super) fn products() -> Select {
    let mut select = Select::new(TableSource::Table {
        name: "Product".into(),
        schema: None,
        alias: "p".into(),
    });
    for column in ["Id", "Name", "Price"] {
        select.add_projection(col("p", column), column);
    }
    select.identity = vec![col("p", "Id")];
    select
}

pub(super) fn price_between(select: &mut Select, low: SqlExpr, high: SqlExpr) {
    select.add_predicate(SqlExpr::binary(SqlBinaryOp::Ge, col("p", "Price"), low));
    select.add_predicate(SqlExpr::binary(SqlBinaryOp::Le, col("p", "Price"), high));
}

pub(super) fn order_by_name(select: &mut Select) {
    select.order_by.push(OrderItem {
        expr: col("p", "Name"),
        descending: false,
    });
}

#[test]
fn test_filter_and_order() {
    let mut select = products();
    price_between(&mut select, SqlExpr::literal(10), SqlExpr::literal(14));
    order_by_name(&mut select);
    let cmd = select.to_sql().unwrap();
    assert_eq!(
        cmd.text,
        "SELECT \"p\".\"Id\", \"p\".\"Name\", \"p\".\"Price\" FROM \"Product\" AS \"p\" \
         WHERE \"p\".\"Price\" >= 10 AND \"p\".\"Price\" <= 14 ORDER BY \"p\".\"Name\""
    );
    assert!(cmd.parameters.is_empty());
}

#[test]
fn test_limit_and_offset() {
    let mut select = products();
    select.limit = Some(SqlExpr::literal(5));
    select.offset = Some(SqlExpr::literal(10));
    assert_eq!(
        select.to_sql().unwrap().text,
        "SELECT \"p\".\"Id\", \"p\".\"Name\", \"p\".\"Price\" FROM \"Product\" AS \"p\" LIMIT 5 OFFSET 10"
    );

    select.limit = None;
    assert!(
        select
            .to_sql()
            .unwrap()
            .text
            .ends_with("FROM \"Product\" AS \"p\" LIMIT -1 OFFSET 10")
    );
}

#[test]
fn test_question_placeholders_repeat_per_occurrence() {
    let mut select = products();
    select.add_predicate(SqlExpr::or(
        SqlExpr::binary(SqlBinaryOp::Gt, col("p", "Price"), param("min")),
        SqlExpr::binary(SqlBinaryOp::Lt, col("p", "Id"), param("min")),
    ));
    select.add_predicate(SqlExpr::is_not_null(col("p", "Name")));
    let cmd = select.to_sql().unwrap();
    assert!(cmd.text.ends_with(
        "WHERE (\"p\".\"Price\" > ? OR \"p\".\"Id\" < ?) AND \"p\".\"Name\" IS NOT NULL"
    ));
    assert_eq!(cmd.parameters, vec![Arc::<str>::from("min"), Arc::from("min")]);
}

#[test]
fn test_literals() {
    let mut select = products();
    select.add_predicate(SqlExpr::eq(col("p", "Name"), SqlExpr::literal("O'Brien")));
    select.add_predicate(SqlExpr::eq(col("p", "Price"), SqlExpr::literal(10.0)));
    select.add_predicate(SqlExpr::binary(
        SqlBinaryOp::Ne,
        SqlExpr::Negate(Box::new(SqlExpr::literal(-5))),
        col("p", "Id"),
    ));
    assert!(select.to_sql().unwrap().text.ends_with(
        "WHERE \"p\".\"Name\" = 'O''Brien' AND \"p\".\"Price\" = 10.0 AND -(-5) <> \"p\".\"Id\""
    ));
}

#[test]
fn test_like_with_escaped_literal() {
    let mut select = products();
    select.add_predicate(SqlExpr::Like {
        matched: Box::new(col("p", "Name")),
        pattern: Box::new(SqlExpr::binary(
            SqlBinaryOp::Concat,
            SqlExpr::EscapeLikePattern {
                operand: Box::new(SqlExpr::literal("50%_off")),
                escape: LIKE_ESCAPE,
            },
            SqlExpr::literal("%"),
        )),
        escape: Some(LIKE_ESCAPE),
    });
    assert!(
        select
            .to_sql()
            .unwrap()
            .text
            .ends_with("WHERE \"p\".\"Name\" LIKE '50\\%\\_off' || '%' ESCAPE '\\'")
    );
}

#[test]
fn test_like_with_escaped_parameter() {
    let mut select = products();
    select.add_predicate(SqlExpr::Like {
        matched: Box::new(col("p", "Name")),
        pattern: Box::new(SqlExpr::EscapeLikePattern {
            operand: Box::new(param("prefix")),
            escape: LIKE_ESCAPE,
        }),
        escape: Some(LIKE_ESCAPE),
    });
    let cmd = select.to_sql().unwrap();
    assert!(cmd.text.ends_with(
        "WHERE \"p\".\"Name\" LIKE REPLACE(REPLACE(REPLACE(?, '\\', '\\\\'), '%', '\\%'), '_', '\\_') ESCAPE '\\'"
    ));
    assert_eq!(cmd.parameters, vec![Arc::<str>::from("prefix")]);
}

#[test]
fn test_count_star_and_function_templates() {
    let mut select = products();
    select.projection.clear();
    select.add_projection(SqlExpr::function(func::COUNT, vec![]), "Count");
    select.add_projection(
        SqlExpr::function(func::INDEX_OF, vec![col("p", "Name"), SqlExpr::literal("x")]),
        "At",
    );
    assert_eq!(
        select.to_sql().unwrap().text,
        "SELECT COUNT(*) AS \"Count\", INSTR(\"p\".\"Name\", 'x') AS \"At\" FROM \"Product\" AS \"p\""
    );
}

#[test]
fn test_unknown_function_is_dialect_gap() {
    let mut select = products();
    select.add_projection(SqlExpr::function("soundex", vec![col("p", "Name")]), "S");
    let err = select.to_sql().unwrap_err();
    assert!(matches!(err, RelqError::DialectGap { .. }));
}

#[test]
fn test_negated_comparison_is_parenthesized() {
    let mut select = products();
    select.add_predicate(SqlExpr::Not(Box::new(SqlExpr::binary(
        SqlBinaryOp::Gt,
        col("p", "Price"),
        SqlExpr::literal(5),
    ))));
    assert!(
        select
            .to_sql()
            .unwrap()
            .text
            .ends_with("WHERE NOT (\"p\".\"Price\" > 5)")
    );
}

#[test]
fn test_derived_table_and_exists() {
    let mut inner = products();
    inner.limit = Some(SqlExpr::literal(10));
    let mut outer = Select::new(TableSource::Subquery {
        select: Box::new(inner),
        alias: "t".into(),
    });
    outer.add_projection(col("t", "Name"), "Name");

    let mut exists = Select::new(TableSource::Table {
        name: "Category".into(),
        schema: Some("shop".into()),
        alias: "c".into(),
    });
    exists.add_projection(SqlExpr::literal(1), "One");
    outer.add_predicate(SqlExpr::Exists(Box::new(exists)));

    assert_eq!(
        outer.to_sql().unwrap().text,
        "SELECT \"t\".\"Name\" FROM (SELECT \"p\".\"Id\", \"p\".\"Name\", \"p\".\"Price\" \
         FROM \"Product\" AS \"p\" LIMIT 10) AS \"t\" \
         WHERE EXISTS (SELECT 1 AS \"One\" FROM \"shop\".\"Category\" AS \"c\")"
    );
}
