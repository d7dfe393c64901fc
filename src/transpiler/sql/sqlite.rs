use super::super::traits::{CastTypes, DialectCapabilities, PagingStyle, PlaceholderStyle, SqlGenerator};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static CAPABILITIES: LazyLock<DialectCapabilities> = LazyLock::new(|| DialectCapabilities {
    paging: PagingStyle::LimitOffset,
    // OFFSET is only valid after LIMIT
    unbounded_limit: Some("-1".to_string()),
    paging_requires_order_by: false,
    placeholder: PlaceholderStyle::Question,
    quote_open: '"',
    quote_close: '"',
    true_literal: "1".to_string(),
    false_literal: "0".to_string(),
    concat_operator: "||".to_string(),
    like_wildcards: "%_".to_string(),
    bool_predicates_as_values: false,
    bool_values_as_predicates: false,
    functions: BTreeMap::from([
        ("index_of".to_string(), "INSTR({0}, {1})".to_string()),
        (
            "compare".to_string(),
            "CASE WHEN {0} = {1} THEN 0 WHEN {0} < {1} THEN -1 ELSE 1 END".to_string(),
        ),
        // FLOOR/CEIL need the optional math extension
        (
            "floor".to_string(),
            "(CAST({0} AS INTEGER) - ({0} < CAST({0} AS INTEGER)))".to_string(),
        ),
        (
            "ceiling".to_string(),
            "(CAST({0} AS INTEGER) + ({0} > CAST({0} AS INTEGER)))".to_string(),
        ),
    ]),
    cast_types: CastTypes {
        bool: "INTEGER".to_string(),
        int: "INTEGER".to_string(),
        float: "REAL".to_string(),
        text: "TEXT".to_string(),
    },
});

pub struct SqliteGenerator;

impl SqlGenerator for SqliteGenerator {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn capabilities(&self) -> &DialectCapabilities {
        &CAPABILITIES
    }
}
