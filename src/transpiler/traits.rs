//! Generator trait and dialect capability flags.

use super::Renderer;
use crate::error::RelqResult;
use crate::sql::{Command, Select};
use crate::value::ValueType;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// How `limit`/`offset` are spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagingStyle {
    /// `LIMIT n OFFSET m`.
    LimitOffset,
    /// `TOP(n)`, or `OFFSET m ROWS FETCH NEXT n ROWS ONLY` when skipping.
    OffsetFetch,
    /// `TOP(n)`, or a `ROW_NUMBER()` window filtered by an outer select.
    RowNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// `?`, one per occurrence.
    Question,
    /// `$1`, numbered per distinct name.
    Dollar,
    /// `@name`.
    AtName,
}

/// Native type names used by `CAST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastTypes {
    pub bool: String,
    pub int: String,
    pub float: String,
    pub text: String,
}

impl CastTypes {
    pub fn name(&self, ty: ValueType) -> &str {
        match ty {
            ValueType::Bool => &self.bool,
            ValueType::Int => &self.int,
            ValueType::Float => &self.float,
            ValueType::Text => &self.text,
        }
    }
}

/// Everything the renderer needs to know about a backend.
///
/// Pure data, so a provider can describe a dialect in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectCapabilities {
    pub paging: PagingStyle,
    /// Emitted as the limit when only an offset is given, for dialects
    /// that cannot write `OFFSET` alone.
    #[serde(default)]
    pub unbounded_limit: Option<String>,
    /// Paging over an unordered select gets an ordering synthesized from
    /// the select's identity columns.
    #[serde(default)]
    pub paging_requires_order_by: bool,
    pub placeholder: PlaceholderStyle,
    pub quote_open: char,
    pub quote_close: char,
    pub true_literal: String,
    pub false_literal: String,
    pub concat_operator: String,
    /// Characters with special meaning inside a LIKE pattern.
    pub like_wildcards: String,
    /// Predicates in value position are wrapped in `CASE WHEN`.
    #[serde(default)]
    pub bool_predicates_as_values: bool,
    /// Boolean values in predicate position are compared with the true literal.
    #[serde(default)]
    pub bool_values_as_predicates: bool,
    /// Function spellings by generic name. A template uses `{0}`, `{1}`
    /// for arguments; a bare name is called with the arguments in order.
    #[serde(default)]
    pub functions: BTreeMap<String, String>,
    pub cast_types: CastTypes,
}

/// Generic functions every dialect spells as the upper-cased name unless
/// overridden.
const STANDARD_FUNCTIONS: &[&str] = &[
    "upper", "lower", "trim", "length", "substr", "replace", "abs", "round", "floor", "ceiling",
    "coalesce", "count", "sum", "min", "max", "avg",
];

impl DialectCapabilities {
    /// Native spelling of a generic function, `None` when the dialect has none.
    pub fn function(&self, name: &str) -> Option<Cow<'_, str>> {
        match self.functions.get(name) {
            Some(spelling) => Some(Cow::Borrowed(spelling)),
            None if STANDARD_FUNCTIONS.contains(&name) => Some(Cow::Owned(name.to_uppercase())),
            None => None,
        }
    }
}

/// Trait for dialect-specific SQL generation.
pub trait SqlGenerator: Send + Sync {
    /// Dialect name used in errors and diagnostics.
    fn name(&self) -> &str;

    fn capabilities(&self) -> &DialectCapabilities;

    /// Quote an identifier (table, alias or column name).
    fn quote_identifier(&self, name: &str) -> String {
        let caps = self.capabilities();
        let close = caps.quote_close.to_string();
        format!(
            "{}{}{}",
            caps.quote_open,
            name.replace(&close, &format!("{}{}", close, close)),
            caps.quote_close
        )
    }

    /// Placeholder text for the parameter at `position` (1-based) named `name`.
    fn placeholder(&self, position: usize, name: &str) -> String {
        match self.capabilities().placeholder {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Dollar => format!("${}", position),
            PlaceholderStyle::AtName => format!("@{}", name),
        }
    }

    fn bool_literal(&self, val: bool) -> String {
        let caps = self.capabilities();
        if val {
            caps.true_literal.clone()
        } else {
            caps.false_literal.clone()
        }
    }

    fn string_literal(&self, s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    /// Render a select to command text and parameter order.
    fn generate(&self, select: &Select) -> RelqResult<Command> {
        Renderer::new(self).render(select)
    }
}

/// A dialect described entirely by configuration.
#[derive(Debug, Clone)]
pub struct CustomGenerator {
    pub name: String,
    pub capabilities: DialectCapabilities,
}

impl SqlGenerator for CustomGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &DialectCapabilities {
        &self.capabilities
    }
}
