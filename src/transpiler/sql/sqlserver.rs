use super::super::traits::{CastTypes, DialectCapabilities, PagingStyle, PlaceholderStyle, SqlGenerator};
use std::collections::BTreeMap;
use std::sync::LazyLock;

fn capabilities(paging: PagingStyle) -> DialectCapabilities {
    DialectCapabilities {
        paging,
        unbounded_limit: None,
        paging_requires_order_by: true,
        placeholder: PlaceholderStyle::AtName,
        quote_open: '[',
        quote_close: ']',
        true_literal: "1".to_string(),
        false_literal: "0".to_string(),
        concat_operator: "+".to_string(),
        like_wildcards: "%_[".to_string(),
        bool_predicates_as_values: true,
        bool_values_as_predicates: true,
        functions: BTreeMap::from([
            ("length".to_string(), "LEN".to_string()),
            ("substr".to_string(), "SUBSTRING".to_string()),
            ("index_of".to_string(), "CHARINDEX({1}, {0})".to_string()),
            ("round".to_string(), "ROUND({0}, 0)".to_string()),
            (
                "compare".to_string(),
                "CASE WHEN {0} = {1} THEN 0 WHEN {0} < {1} THEN -1 ELSE 1 END".to_string(),
            ),
        ]),
        cast_types: CastTypes {
            bool: "BIT".to_string(),
            int: "BIGINT".to_string(),
            float: "FLOAT".to_string(),
            text: "NVARCHAR(MAX)".to_string(),
        },
    }
}

static OFFSET_FETCH: LazyLock<DialectCapabilities> =
    LazyLock::new(|| capabilities(PagingStyle::OffsetFetch));
static ROW_NUMBER: LazyLock<DialectCapabilities> =
    LazyLock::new(|| capabilities(PagingStyle::RowNumber));

/// SQL Server 2012 and later.
pub struct SqlServerGenerator;

impl SqlGenerator for SqlServerGenerator {
    fn name(&self) -> &str {
        "sqlserver"
    }

    fn capabilities(&self) -> &DialectCapabilities {
        &OFFSET_FETCH
    }
}

/// SQL Server before `OFFSET … FETCH`: skipping uses `ROW_NUMBER()`.
pub struct SqlServer2008Generator;

impl SqlGenerator for SqlServer2008Generator {
    fn name(&self) -> &str {
        "sqlserver2008"
    }

    fn capabilities(&self) -> &DialectCapabilities {
        &ROW_NUMBER
    }
}
