use super::super::traits::{CastTypes, DialectCapabilities, PagingStyle, PlaceholderStyle, SqlGenerator};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static CAPABILITIES: LazyLock<DialectCapabilities> = LazyLock::new(|| DialectCapabilities {
    paging: PagingStyle::LimitOffset,
    unbounded_limit: None,
    paging_requires_order_by: false,
    placeholder: PlaceholderStyle::Dollar,
    quote_open: '"',
    quote_close: '"',
    true_literal: "TRUE".to_string(),
    false_literal: "FALSE".to_string(),
    concat_operator: "||".to_string(),
    like_wildcards: "%_".to_string(),
    bool_predicates_as_values: false,
    bool_values_as_predicates: false,
    functions: BTreeMap::from([
        ("index_of".to_string(), "STRPOS({0}, {1})".to_string()),
        (
            "compare".to_string(),
            "CASE WHEN {0} = {1} THEN 0 WHEN {0} < {1} THEN -1 ELSE 1 END".to_string(),
        ),
        ("ceiling".to_string(), "CEIL".to_string()),
    ]),
    cast_types: CastTypes {
        bool: "BOOLEAN".to_string(),
        int: "BIGINT".to_string(),
        float: "DOUBLE PRECISION".to_string(),
        text: "TEXT".to_string(),
    },
});

pub struct PostgresGenerator;

impl SqlGenerator for PostgresGenerator {
    fn name(&self) -> &str {
        "postgres"
    }

    fn capabilities(&self) -> &DialectCapabilities {
        &CAPABILITIES
    }
}
