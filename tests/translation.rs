//! Query text to dialect SQL, through the full compile pipeline.

mod common;

use common::compiler;
use pretty_assertions::assert_eq;
use relq::prelude::*;
use relq::visitor::Terminal;

#[test]
fn test_filter_order_sqlite() {
    let compiler = compiler(Dialect::Sqlite);
    let prepared = compiler
        .compile_text("Product.where(p => p.Price >= 10 && p.Price <= 14).order_by(p => p.Name)")
        .unwrap();
    let command = prepared.command();
    assert!(
        command
            .text
            .starts_with("SELECT \"p\".\"Id\", \"p\".\"Name\", \"p\".\"Price\", \"p\".\"CategoryId\" FROM \"Product\" AS \"p\""),
        "{}",
        command.text
    );
    assert!(
        command
            .text
            .ends_with("WHERE \"p\".\"Price\" >= ? AND \"p\".\"Price\" <= ? ORDER BY \"p\".\"Name\""),
        "{}",
        command.text
    );
    let values = prepared
        .bind(&Params::new())
        .unwrap()
        .for_command(command)
        .unwrap();
    assert_eq!(values, vec![Value::Int(10), Value::Int(14)]);
    assert!(matches!(prepared.compiled().terminal(), Terminal::Sequence));
}

#[test]
fn test_postgres_numbers_each_parameter_once() {
    let compiler = compiler(Dialect::Postgres);
    let prepared = compiler
        .compile_text("Product.where(p => p.Price > $min || p.Price < $min)")
        .unwrap();
    let command = prepared.command();
    assert!(
        command
            .text
            .contains("\"p\".\"Price\" > $1 OR \"p\".\"Price\" < $1"),
        "{}",
        command.text
    );
    assert_eq!(command.parameters, vec![Arc::<str>::from("min")]);
}

#[test]
fn test_postgres_offset_without_limit() {
    let prepared = compiler(Dialect::Postgres)
        .compile_text("Product.skip(10)")
        .unwrap();
    let text = &prepared.command().text;
    assert!(text.ends_with("OFFSET $1"), "{}", text);
    assert!(!text.contains("LIMIT"));
}

#[test]
fn test_sqlserver_take_without_order_is_deterministic() {
    let prepared = compiler(Dialect::SqlServer)
        .compile_text("Product.take(5)")
        .unwrap();
    let text = &prepared.command().text;
    assert!(text.starts_with("SELECT TOP(@__p_0) [p].[Id]"), "{}", text);
    assert!(text.ends_with("ORDER BY [p].[Id]"), "{}", text);
}

#[test]
fn test_sqlserver2008_paging_uses_row_number() {
    let prepared = compiler(Dialect::SqlServer2008)
        .compile_text("Product.order_by(p => p.Name).skip(10).take(5)")
        .unwrap();
    let text = &prepared.command().text;
    assert!(
        text.contains("ROW_NUMBER() OVER(ORDER BY [p].[Name]) AS [__RowNumber__]"),
        "{}",
        text
    );
    assert!(!text.contains("FETCH NEXT"));

    let modern = compiler(Dialect::SqlServer)
        .compile_text("Product.order_by(p => p.Name).skip(10).take(5)")
        .unwrap();
    assert!(modern.command().text.contains("ROWS FETCH NEXT"));
}

#[test]
fn test_distinct_paging_is_dialect_gap() {
    let err = compiler(Dialect::SqlServer2008)
        .compile_text("Product.distinct().skip(1)")
        .unwrap_err();
    assert!(matches!(err, RelqError::DialectGap { .. }), "{}", err);
    assert!(err.is_compile_error());
}

#[test]
fn test_literal_lifting_can_be_disabled() {
    let compiler = compiler(Dialect::Sqlite).with_options(CompileOptions {
        parameterize_literals: false,
        ..Default::default()
    });
    let prepared = compiler.compile_text("Product.where(p => p.Name == 'B')").unwrap();
    assert!(prepared.command().text.contains("'B'"));
    assert!(prepared.command().parameters.is_empty());
    assert!(prepared.literals().is_empty());
}

#[test]
fn test_text_and_builder_share_cache_entry() {
    let compiler = compiler(Dialect::Sqlite);
    let parsed = compiler
        .compile_text("Product.where(p => p.Price >= 10)")
        .unwrap();
    let built = compiler
        .compile(
            &Query::from("Product")
                .filter(|p| p.member("Price").ge(20))
                .build()
                .unwrap(),
        )
        .unwrap();
    assert!(!parsed.is_cache_hit());
    assert!(built.is_cache_hit());
    assert!(Arc::ptr_eq(parsed.compiled(), built.compiled()));

    let stats = compiler.cache_stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_dialects_do_not_share_compilations() {
    let sqlite = compiler(Dialect::Sqlite);
    let postgres = compiler(Dialect::Postgres);
    let a = sqlite.compile_text("Product.take(1)").unwrap();
    let b = postgres.compile_text("Product.take(1)").unwrap();
    assert_ne!(a.command().text, b.command().text);
    assert_eq!(&*a.compiled().dialect, "sqlite");
    assert_eq!(&*b.compiled().dialect, "postgres");
}

fn is_even() -> HostFunctions {
    let mut host = HostFunctions::new();
    host.register("is_even", |args: &[Value]| {
        Ok(Value::Bool(args[0].as_i64().is_some_and(|n| n % 2 == 0)))
    });
    host
}

#[test]
fn test_client_evaluation_policy() {
    let query = "Product.where(p => is_even(p.Id))";

    let warn = compiler(Dialect::Sqlite).with_host_functions(is_even());
    let prepared = warn.compile_text(query).unwrap();
    assert!(!prepared.compiled().diagnostics().is_empty());
    assert!(!prepared.command().text.contains("WHERE"));

    let throw = compiler(Dialect::Sqlite)
        .with_host_functions(is_even())
        .with_options(CompileOptions {
            client_evaluation: ClientEvaluation::Throw,
            ..Default::default()
        });
    let err = throw.compile_text(query).unwrap_err();
    assert!(matches!(err, RelqError::Untranslatable { .. }));
}

#[test]
fn test_compile_errors() {
    let compiler = compiler(Dialect::Sqlite);
    let err = compiler.compile_text("Product.where(").unwrap_err();
    assert!(matches!(err, RelqError::Parse { .. }));
    assert!(err.is_compile_error());

    let err = compiler.compile_text("Widget").unwrap_err();
    assert!(err.is_compile_error(), "{}", err);
}

#[test]
fn test_include_collection_adds_split_command() {
    let prepared = compiler(Dialect::Sqlite)
        .compile_text("Category.include(\"Products\").order_by(c => c.Name)")
        .unwrap();
    let compiled = prepared.compiled();
    assert_eq!(compiled.split_commands.len(), 1);
    assert_eq!(compiled.commands().count(), 2);
    assert!(compiled.split_commands[0].text.contains("\"Product\""));
}

#[test]
fn test_sqlserver_paged_projection_orders_by_key() {
    let prepared = compiler(Dialect::SqlServer)
        .compile_text("Product.select(p => p.Name).take(5).skip(2)")
        .unwrap();
    let text = &prepared.command().text;
    assert!(text.contains("[p].[Id] AS [__k0]"), "{}", text);
    assert!(text.contains("ORDER BY [t].[__k0]"), "{}", text);
    assert!(!text.contains("(SELECT 1)"), "{}", text);
}

#[test]
fn test_paged_include_orders_root_and_split_alike() {
    let prepared = compiler(Dialect::Postgres)
        .compile_text("Category.include(\"Products\").take(1)")
        .unwrap();
    let compiled = prepared.compiled();
    let root = &compiled.command.text;
    assert!(root.contains("ORDER BY \"c\".\"Id\" LIMIT"), "{}", root);
    let split = &compiled.split_commands[0].text;
    assert!(split.contains("ORDER BY \"c\".\"Id\" LIMIT"), "{}", split);
}
