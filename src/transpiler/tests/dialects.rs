//! SQL dialect tests.

use super::{col, order_by_name, param, price_between, products};
use crate::error::RelqError;
use crate::sql::{SqlBinaryOp, SqlExpr, func};
use crate::transpiler::sql::sqlite::SqliteGenerator;
use crate::transpiler::{CustomGenerator, Dialect, PlaceholderStyle, SqlGenerator, ToSql};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[test]
fn test_postgres_dialect() {
    let mut select = products();
    price_between(&mut select, param("min"), param("max"));
    select.add_predicate(SqlExpr::binary(SqlBinaryOp::Ne, col("p", "Id"), param("min")));
    order_by_name(&mut select);
    select.limit = Some(SqlExpr::literal(2));
    let cmd = select.to_sql_with_dialect(Dialect::Postgres).unwrap();
    assert_eq!(
        cmd.text,
        "SELECT \"p\".\"Id\", \"p\".\"Name\", \"p\".\"Price\" FROM \"Product\" AS \"p\" \
         WHERE \"p\".\"Price\" >= $1 AND \"p\".\"Price\" <= $2 AND \"p\".\"Id\" <> $1 \
         ORDER BY \"p\".\"Name\" LIMIT 2"
    );
    assert_eq!(cmd.parameters, vec![Arc::<str>::from("min"), Arc::from("max")]);
}

#[test]
fn test_postgres_offset_without_limit() {
    let mut select = products();
    select.offset = Some(SqlExpr::literal(3));
    assert!(
        select
            .to_sql_with_dialect(Dialect::Postgres)
            .unwrap()
            .text
            .ends_with("FROM \"Product\" AS \"p\" OFFSET 3")
    );
}

#[test]
fn test_sqlserver_take_orders_by_identity() {
    let mut select = products();
    select.limit = Some(SqlExpr::literal(5));
    assert_eq!(
        select.to_sql_with_dialect(Dialect::SqlServer).unwrap().text,
        "SELECT TOP(5) [p].[Id], [p].[Name], [p].[Price] FROM [Product] AS [p] ORDER BY [p].[Id]"
    );
}

#[test]
fn test_sqlserver_offset_fetch() {
    let mut select = products();
    order_by_name(&mut select);
    select.limit = Some(SqlExpr::literal(5));
    select.offset = Some(SqlExpr::literal(10));
    assert_eq!(
        select.to_sql_with_dialect(Dialect::SqlServer).unwrap().text,
        "SELECT [p].[Id], [p].[Name], [p].[Price] FROM [Product] AS [p] \
         ORDER BY [p].[Name] OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY"
    );
}

#[test]
fn test_sqlserver2008_row_number_paging() {
    let mut select = products();
    order_by_name(&mut select);
    select.limit = Some(SqlExpr::literal(5));
    select.offset = Some(SqlExpr::literal(10));
    assert_eq!(
        select
            .to_sql_with_dialect(Dialect::SqlServer2008)
            .unwrap()
            .text,
        "SELECT [__rn].[Id], [__rn].[Name], [__rn].[Price] FROM (SELECT [p].[Id], [p].[Name], \
         [p].[Price], ROW_NUMBER() OVER(ORDER BY [p].[Name]) AS [__RowNumber__] \
         FROM [Product] AS [p]) AS [__rn] \
         WHERE [__rn].[__RowNumber__] > 10 AND [__rn].[__RowNumber__] <= 10 + 5 \
         ORDER BY [__rn].[__RowNumber__]"
    );

    // no skip: plain TOP
    select.offset = None;
    assert!(
        select
            .to_sql_with_dialect(Dialect::SqlServer2008)
            .unwrap()
            .text
            .starts_with("SELECT TOP(5) [p].[Id]")
    );
}

#[test]
fn test_sqlserver2008_distinct_skip_is_gap() {
    let mut select = products();
    select.distinct = true;
    select.offset = Some(SqlExpr::literal(1));
    let err = select
        .to_sql_with_dialect(Dialect::SqlServer2008)
        .unwrap_err();
    let RelqError::DialectGap { dialect, .. } = err else {
        panic!("expected a dialect gap, got {:?}", err);
    };
    assert_eq!(dialect, "sqlserver2008");
}

#[test]
fn test_sqlserver_bool_coercion() {
    let mut select = products();
    select.add_projection(
        SqlExpr::binary(SqlBinaryOp::Gt, col("p", "Price"), SqlExpr::literal(5)),
        "Expensive",
    );
    select.add_predicate(col("p", "Active"));
    select.add_predicate(SqlExpr::literal(true));
    let cmd = select.to_sql_with_dialect(Dialect::SqlServer).unwrap();
    assert_eq!(
        cmd.text,
        "SELECT [p].[Id], [p].[Name], [p].[Price], \
         CASE WHEN [p].[Price] > 5 THEN 1 ELSE 0 END AS [Expensive] \
         FROM [Product] AS [p] WHERE [p].[Active] = 1 AND 1 = 1"
    );

    // SQLite takes both forms as they are
    assert!(
        select
            .to_sql()
            .unwrap()
            .text
            .ends_with("WHERE \"p\".\"Active\" AND 1")
    );
}

#[test]
fn test_sqlserver_named_parameters_and_functions() {
    let mut select = products();
    select.projection.clear();
    select.add_projection(
        SqlExpr::binary(SqlBinaryOp::Concat, col("p", "Name"), param("suffix")),
        "Label",
    );
    select.add_projection(SqlExpr::function(func::LENGTH, vec![col("p", "Name")]), "Len");
    select.add_projection(
        SqlExpr::function(func::INDEX_OF, vec![col("p", "Name"), param("suffix")]),
        "At",
    );
    let cmd = select.to_sql_with_dialect(Dialect::SqlServer).unwrap();
    assert_eq!(
        cmd.text,
        "SELECT [p].[Name] + @suffix AS [Label], LEN([p].[Name]) AS [Len], \
         CHARINDEX(@suffix, [p].[Name]) AS [At] FROM [Product] AS [p]"
    );
    assert_eq!(cmd.parameters, vec![Arc::<str>::from("suffix")]);
}

#[test]
fn test_sqlserver_like_escapes_brackets() {
    let mut select = products();
    select.add_predicate(SqlExpr::Like {
        matched: Box::new(col("p", "Name")),
        pattern: Box::new(SqlExpr::EscapeLikePattern {
            operand: Box::new(SqlExpr::literal("[a]%")),
            escape: '\\',
        }),
        escape: Some('\\'),
    });
    assert!(
        select
            .to_sql_with_dialect(Dialect::SqlServer)
            .unwrap()
            .text
            .ends_with("WHERE [p].[Name] LIKE '\\[a]\\%' ESCAPE '\\'")
    );
}

#[test]
fn test_cast_type_names() {
    let mut select = products();
    select.projection.clear();
    select.add_projection(
        SqlExpr::Cast {
            operand: Box::new(col("p", "Id")),
            to: crate::value::ValueType::Text,
        },
        "IdText",
    );
    let render = |dialect| select.to_sql_with_dialect(dialect).unwrap().text;
    assert!(render(Dialect::Sqlite).starts_with("SELECT CAST(\"p\".\"Id\" AS TEXT) AS \"IdText\""));
    assert!(render(Dialect::SqlServer).starts_with("SELECT CAST([p].[Id] AS NVARCHAR(MAX)) AS [IdText]"));
}

#[test]
fn test_identifier_quoting_doubles_close_char() {
    let generator = Dialect::SqlServer.generator();
    assert_eq!(generator.quote_identifier("odd]name"), "[odd]]name]");
    assert_eq!(SqliteGenerator.quote_identifier("a\"b"), "\"a\"\"b\"");
}

#[test]
fn test_custom_generator_from_capabilities() {
    let mut capabilities = SqliteGenerator.capabilities().clone();
    capabilities.placeholder = PlaceholderStyle::Dollar;
    capabilities.functions.insert("length".into(), "CHAR_LENGTH".into());
    let generator = CustomGenerator {
        name: "custom".into(),
        capabilities,
    };

    let mut select = products();
    select.add_predicate(SqlExpr::binary(
        SqlBinaryOp::Gt,
        SqlExpr::function(func::LENGTH, vec![col("p", "Name")]),
        param("n"),
    ));
    assert!(
        generator
            .generate(&select)
            .unwrap()
            .text
            .ends_with("WHERE CHAR_LENGTH(\"p\".\"Name\") > $1")
    );
}

#[test]
fn test_dialect_names_parse() {
    for dialect in Dialect::ALL {
        assert_eq!(dialect.name().parse::<Dialect>().unwrap(), dialect);
    }
    assert_eq!("mssql".parse::<Dialect>().unwrap(), Dialect::SqlServer);
    assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
    assert!("oracle".parse::<Dialect>().is_err());
}
