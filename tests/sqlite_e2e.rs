//! End-to-end queries against an in-memory SQLite database.

mod common;

use common::{compiler, property, shop};
use pretty_assertions::assert_eq;
use relq::prelude::*;

fn names(items: &[Shaped], uow: &UnitOfWork) -> Vec<Value> {
    property(items, uow, "Name")
}

#[tokio::test]
async fn test_filter_and_order() {
    let db = shop(compiler(Dialect::Sqlite)).await;
    let (items, uow) = db
        .query("Product.where(p => p.Price >= 10 && p.Price <= 14).order_by(p => p.Name)")
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(names(&items, &uow), vec![Value::from("B"), Value::from("C")]);
}

#[tokio::test]
async fn test_starts_with_escapes_wildcards() {
    let db = shop(compiler(Dialect::Sqlite)).await;

    let (items, uow) = db
        .query("Product.where(p => p.Name.StartsWith('50%'))")
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(names(&items, &uow), vec![Value::from("50%_off")]);

    let (items, uow) = db
        .query("Product.where(p => p.Name.StartsWith($prefix))")
        .bind("prefix", "50%")
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(names(&items, &uow), vec![Value::from("50%_off")]);
}

#[tokio::test]
async fn test_take_without_order_is_repeatable() {
    let db = shop(compiler(Dialect::Sqlite)).await;
    let query = db.query("Product.take(3)");
    let (first, uow1) = query.fetch_all().await.unwrap();
    let (second, uow2) = query.fetch_all().await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(
        property(&first, &uow1, "Id"),
        property(&second, &uow2, "Id")
    );
}

#[tokio::test]
async fn test_include_both_directions() {
    let db = shop(compiler(Dialect::Sqlite)).await;

    let (categories, uow) = db
        .query("Category.include(\"Products\").order_by(c => c.Id)")
        .fetch_all()
        .await
        .unwrap();
    let counts: Vec<usize> = categories
        .iter()
        .map(|c| uow.entry(c.as_entity().unwrap()).collection("Products").len())
        .collect();
    assert_eq!(counts, vec![2, 2]);

    let (products, uow) = db
        .query("Product.include(\"Category\").order_by(p => p.Id)")
        .fetch_all()
        .await
        .unwrap();
    let categories: Vec<Option<Value>> = products
        .iter()
        .map(|p| {
            uow.entry(p.as_entity().unwrap())
                .reference("Category")
                .map(|c| uow.entry(c).get("Name").cloned().unwrap_or(Value::Null))
        })
        .collect();
    assert_eq!(
        categories,
        vec![
            Some(Value::from("Tools")),
            Some(Value::from("Tools")),
            Some(Value::from("Garden")),
            None,
            Some(Value::from("Garden")),
        ]
    );
}

#[tokio::test]
async fn test_scalar_results() {
    let db = shop(compiler(Dialect::Sqlite)).await;

    let (count, _) = db
        .query("Product.count(p => p.Price >= 12)")
        .fetch_scalar()
        .await
        .unwrap();
    assert_eq!(count, Shaped::Value(Value::Int(3)));

    let (sum, _) = db
        .query("Product.sum(p => p.Price)")
        .fetch_scalar()
        .await
        .unwrap();
    assert_eq!(sum, Shaped::Value(Value::Float(66.0)));

    let (any, _) = db
        .query("Product.any(p => p.Price > 100)")
        .fetch_scalar()
        .await
        .unwrap();
    assert_eq!(any, Shaped::Value(Value::Bool(false)));

    let (none, _) = db
        .query("Product.where(p => p.Price > 100).first_or_default()")
        .fetch_scalar()
        .await
        .unwrap();
    assert_eq!(none, Shaped::Null);

    let err = db
        .query("Product.where(p => p.Price > 100).first()")
        .fetch_scalar()
        .await
        .unwrap_err();
    assert!(matches!(err, RelqError::EmptySequence));
}

#[tokio::test]
async fn test_null_parameter_matches_null_column() {
    let db = shop(compiler(Dialect::Sqlite)).await;

    let (items, uow) = db
        .query("Product.where(p => p.CategoryId == $cat)")
        .bind("cat", Value::Null)
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(property(&items, &uow, "Id"), vec![Value::Int(4)]);

    let (items, uow) = db
        .query("Product.where(p => p.CategoryId == $cat).order_by(p => p.Id)")
        .bind("cat", 2)
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(property(&items, &uow, "Id"), vec![Value::Int(3), Value::Int(5)]);
}

#[tokio::test]
async fn test_client_filter_with_in_memory_take() {
    let mut host = HostFunctions::new();
    host.register("is_even", |args: &[Value]| {
        Ok(Value::Bool(args[0].as_i64().is_some_and(|n| n % 2 == 0)))
    });
    let compiler = compiler(Dialect::Sqlite)
        .with_host_functions(host)
        .with_options(CompileOptions {
            client_evaluation: ClientEvaluation::Allow,
            ..Default::default()
        });
    let db = shop(compiler).await;

    let (items, uow) = db
        .query("Product.where(p => is_even(p.Id)).take(1)")
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(property(&items, &uow, "Id"), vec![Value::Int(2)]);
}

#[tokio::test]
async fn test_missing_binding_fails_before_execution() {
    let db = shop(compiler(Dialect::Sqlite)).await;
    let err = db
        .query("Product.where(p => p.Price > $min)")
        .fetch_all()
        .await
        .unwrap_err();
    assert!(matches!(err, RelqError::Binding(_)));
}

#[tokio::test]
async fn test_null_columns_read_as_null() {
    let db = shop(compiler(Dialect::Sqlite)).await;

    let (items, uow) = db
        .query("Product.where(p => p.Id == 4)")
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(property(&items, &uow, "CategoryId"), vec![Value::Null]);
    assert_eq!(names(&items, &uow), vec![Value::from("50%_off")]);

    let (max, _) = db
        .query("Product.where(p => p.Price > 1000).max(p => p.Price)")
        .fetch_scalar()
        .await
        .unwrap();
    assert_eq!(max, Shaped::Null);
}

#[tokio::test]
async fn test_projected_comparison_over_null_is_false() {
    let db = shop(compiler(Dialect::Sqlite)).await;
    let (items, _) = db
        .query("Product.order_by(p => p.Id).select(p => p.CategoryId > 1)")
        .fetch_all()
        .await
        .unwrap();
    let flags: Vec<Shaped> = [false, false, true, false, true]
        .into_iter()
        .map(|b| Shaped::Value(Value::Bool(b)))
        .collect();
    assert_eq!(items, flags);
}

#[tokio::test]
async fn test_stream_yields_results_lazily() {
    let db = shop(compiler(Dialect::Sqlite)).await;
    let prepared = db.query("Product.order_by(p => p.Id)").prepare().unwrap();

    let mut results = db.stream(&prepared, &Params::new()).await.unwrap();
    let first = results.next().await.unwrap().unwrap();
    assert_eq!(results.unit_of_work().len(), 1);
    assert_eq!(
        results.unit_of_work().entry(first.as_entity().unwrap()).get("Id"),
        Some(&Value::Int(1))
    );
    drop(results);

    let mut results = db.stream(&prepared, &Params::new()).await.unwrap();
    let mut count = 0;
    while let Some(item) = results.next().await {
        item.unwrap();
        count += 1;
    }
    assert_eq!(count, 5);
    assert!(matches!(results.terminal(), relq::visitor::Terminal::Sequence));
}
