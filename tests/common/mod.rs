//! Shared fixtures: a small shop model and its SQLite data.

#![allow(dead_code)]

use relq::prelude::*;

pub const MODEL: &str = r#"
    [[entity]]
    name = "Category"
    key = ["Id"]
    properties = [
        { name = "Id", type = "int" },
        { name = "Name", type = "text" },
    ]
    navigations = [
        { name = "Products", target = "Product", kind = "collection", foreign_key = ["CategoryId"], inverse = "Category" },
    ]

    [[entity]]
    name = "Product"
    key = ["Id"]
    properties = [
        { name = "Id", type = "int" },
        { name = "Name", type = "text", nullable = true },
        { name = "Price", type = "float" },
        { name = "CategoryId", type = "int", nullable = true },
    ]
    navigations = [
        { name = "Category", target = "Category", kind = "reference", foreign_key = ["CategoryId"], inverse = "Products" },
    ]
"#;

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE Category (Id INTEGER PRIMARY KEY, Name TEXT NOT NULL)",
    "CREATE TABLE Product (Id INTEGER PRIMARY KEY, Name TEXT, Price REAL NOT NULL, CategoryId INTEGER)",
    "INSERT INTO Category (Id, Name) VALUES (1, 'Tools'), (2, 'Garden')",
    "INSERT INTO Product (Id, Name, Price, CategoryId) VALUES \
        (1, 'B', 10.0, 1), \
        (2, 'A', 9.0, 1), \
        (3, 'C', 12.0, 2), \
        (4, '50%_off', 20.0, NULL), \
        (5, '50 percent', 15.0, 2)",
];

pub fn model() -> Arc<Model> {
    Arc::new(Model::from_toml_str(MODEL).expect("shop model"))
}

pub fn compiler(dialect: Dialect) -> QueryCompiler {
    QueryCompiler::new(model(), dialect)
}

/// A Product row in projection order.
pub fn product_row(id: i64, name: &str, price: f64, category: Option<i64>) -> ValueBuffer {
    ValueBuffer::new(vec![
        Value::Int(id),
        Value::from(name),
        Value::Float(price),
        Value::from(category),
    ])
}

/// Read one property of every entity result.
pub fn property(items: &[Shaped], uow: &UnitOfWork, name: &str) -> Vec<Value> {
    items
        .iter()
        .map(|item| {
            let id = item.as_entity().expect("entity result");
            uow.entry(id).get(name).cloned().unwrap_or(Value::Null)
        })
        .collect()
}

/// An in-memory SQLite database with the shop schema and rows.
pub async fn shop(compiler: QueryCompiler) -> Database {
    let db = Database::connect("sqlite::memory:", compiler)
        .await
        .expect("connect");
    for statement in SCHEMA {
        db.execute_raw(statement).await.expect("schema");
    }
    db
}
