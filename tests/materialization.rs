//! Shaping rows into tracked entities: identity resolution, reference and
//! collection includes, fixup.

mod common;

use common::{compiler, product_row, property};
use pretty_assertions::assert_eq;
use relq::executor::RecordingExecutor;
use relq::prelude::*;
use relq::sql::Command;
use serde_json::json;

fn category_row(id: i64, name: &str) -> ValueBuffer {
    ValueBuffer::new(vec![Value::Int(id), Value::from(name)])
}

#[test]
fn test_same_key_resolves_to_one_instance() {
    let prepared = compiler(Dialect::Sqlite).compile_text("Product").unwrap();
    let mut executor = RecordingExecutor::new(|_: &Command, _: &[Value]| {
        Ok(vec![
            product_row(1, "B", 10.0, Some(1)),
            product_row(2, "A", 9.0, Some(1)),
            // same key, stale values: the tracked instance wins
            product_row(1, "changed", 99.0, None),
        ])
    });
    let (items, uow) = prepared
        .execute(&mut executor, &Params::new())
        .unwrap()
        .into_vec()
        .unwrap();

    assert_eq!(items.len(), 3);
    assert_eq!(items[0], items[2]);
    assert_eq!(uow.len(), 2);
    assert_eq!(
        property(&items, &uow, "Name"),
        vec![Value::from("B"), Value::from("A"), Value::from("B")]
    );
}

#[test]
fn test_reference_include_shares_principal() {
    let prepared = compiler(Dialect::Sqlite)
        .compile_text("Product.include(\"Category\")")
        .unwrap();
    assert!(prepared.command().text.contains("LEFT JOIN \"Category\""));
    assert!(prepared.compiled().split_commands.is_empty());

    let row = |id, name, category: Option<(i64, &str)>| {
        let mut values = product_row(id, name, 1.0, category.map(|c| c.0)).into_values();
        match category {
            Some((cid, cname)) => values.extend([Value::Int(cid), Value::from(cname)]),
            None => values.extend([Value::Null, Value::Null]),
        }
        ValueBuffer::new(values)
    };
    let mut executor = RecordingExecutor::new(move |_: &Command, _: &[Value]| {
        Ok(vec![
            row(1, "B", Some((1, "Tools"))),
            row(2, "A", Some((1, "Tools"))),
            row(4, "50%_off", None),
        ])
    });
    let (items, uow) = prepared
        .execute(&mut executor, &Params::new())
        .unwrap()
        .into_vec()
        .unwrap();

    let category = |item: &Shaped| uow.entry(item.as_entity().unwrap()).reference("Category");
    let tools = category(&items[0]).unwrap();
    assert_eq!(category(&items[1]), Some(tools));
    assert_eq!(category(&items[2]), None);
    assert_eq!(uow.entry(tools).get("Name"), Some(&Value::from("Tools")));

    // fixup fills the inverse collection too
    let mut products = uow.entry(tools).collection("Products").to_vec();
    products.sort();
    let mut expected = vec![items[0].as_entity().unwrap(), items[1].as_entity().unwrap()];
    expected.sort();
    assert_eq!(products, expected);
}

#[test]
fn test_collection_include_runs_split_first() {
    let prepared = compiler(Dialect::Sqlite)
        .compile_text("Category.include(\"Products\").order_by(c => c.Name)")
        .unwrap();
    let mut executor = RecordingExecutor::new(|command: &Command, _: &[Value]| {
        if command.text.starts_with("SELECT \"c\"") {
            Ok(vec![category_row(2, "Garden"), category_row(1, "Tools")])
        } else {
            Ok(vec![
                product_row(1, "B", 10.0, Some(1)),
                product_row(2, "A", 9.0, Some(1)),
                product_row(3, "C", 12.0, Some(2)),
            ])
        }
    });
    let (items, uow) = prepared
        .execute(&mut executor, &Params::new())
        .unwrap()
        .into_vec()
        .unwrap();

    assert_eq!(executor.executed.len(), 2);
    assert!(executor.executed[0].text.contains("\"Product\""));
    assert_eq!(
        property(&items, &uow, "Name"),
        vec![Value::from("Garden"), Value::from("Tools")]
    );

    let garden = uow.entry(items[0].as_entity().unwrap());
    let tools = uow.entry(items[1].as_entity().unwrap());
    assert!(garden.is_loaded("Products"));
    assert_eq!(garden.collection("Products").len(), 1);
    assert_eq!(tools.collection("Products").len(), 2);
    for child in tools.collection("Products") {
        assert_eq!(
            uow.entry(*child).reference("Category"),
            items[1].as_entity()
        );
    }
}

#[test]
fn test_json_nests_loaded_navigations() {
    let prepared = compiler(Dialect::Sqlite)
        .compile_text("Category.include(\"Products\")")
        .unwrap();
    let mut executor = RecordingExecutor::new(|command: &Command, _: &[Value]| {
        if command.text.starts_with("SELECT \"c\"") {
            Ok(vec![category_row(2, "Garden")])
        } else {
            Ok(vec![product_row(3, "C", 12.0, Some(2))])
        }
    });
    let (items, uow) = prepared
        .execute(&mut executor, &Params::new())
        .unwrap()
        .into_vec()
        .unwrap();

    assert_eq!(
        items[0].to_json(&uow),
        json!({
            "Id": 2,
            "Name": "Garden",
            "Products": [
                { "Id": 3, "Name": "C", "Price": 12.0, "CategoryId": 2, "Category": [2] }
            ]
        })
    );
}

#[test]
fn test_projection_reads_records() {
    let prepared = compiler(Dialect::Sqlite)
        .compile_text("Product.select(p => new { p.Name, Total = p.Price * 2 })")
        .unwrap();
    let mut executor = RecordingExecutor::new(|_: &Command, _: &[Value]| {
        Ok(vec![ValueBuffer::new(vec![Value::from("B"), Value::Float(20.0)])])
    });
    let (items, uow) = prepared
        .execute(&mut executor, &Params::new())
        .unwrap()
        .into_vec()
        .unwrap();

    assert!(uow.is_empty());
    assert_eq!(items[0].field("Name"), Some(&Shaped::Value(Value::from("B"))));
    assert_eq!(items[0].to_json(&uow), json!({ "Name": "B", "Total": 20.0 }));
}
