//! # relq: relational query compiler
//!
//! relq compiles query models over an entity model into dialect SQL, runs
//! them, and materializes the rows back into identity-resolved entities.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use relq::prelude::*;
//!
//! let model = Arc::new(Model::from_file("model.toml")?);
//! let compiler = QueryCompiler::new(model, Dialect::Sqlite);
//!
//! let prepared = compiler
//!     .compile_text("Product.where(p => p.Price >= $min).order_by(p => p.Name).take(5)")?;
//! // => SELECT "p"."Id", "p"."Name", "p"."Price" FROM "Product" AS "p"
//! //    WHERE "p"."Price" >= ? ORDER BY "p"."Name" LIMIT ?
//! println!("{}", prepared.command());
//! ```
//!
//! ## Pipeline
//!
//! | Stage       | Module         | Produces                          |
//! |-------------|----------------|-----------------------------------|
//! | Parse       | [`parser`]     | [`QueryModel`](query::QueryModel) |
//! | Translate   | [`visitor`]    | SQL tree, shaper, client stages   |
//! | Render      | [`transpiler`] | command text + parameter order    |
//! | Cache       | [`cache`]      | shared compilations by shape      |
//! | Execute     | [`engine`]     | rows from the database            |
//! | Materialize | [`compiler`]   | entities in a unit of work        |

pub mod cache;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod executor;
pub mod expr;
pub mod metadata;
pub mod parser;
pub mod query;
pub mod shaper;
pub mod sql;
pub mod tracking;
pub mod translator;
pub mod transpiler;
pub mod value;
pub mod visitor;

pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheStats};
    pub use crate::compiler::{CompileOptions, Params, PreparedQuery, QueryCompiler};
    pub use crate::config::RelqConfig;
    pub use crate::engine::{Database, DbQuery, DbResults};
    pub use crate::error::*;
    pub use crate::eval::HostFunctions;
    pub use crate::executor::{CommandExecutor, RecordingExecutor, RowCursor};
    pub use crate::expr::{E, lit, null, param};
    pub use crate::metadata::{EntityDef, Model, NavigationDef, nullable_prop, prop};
    pub use crate::parser::parse;
    pub use crate::query::{Query, QueryModel};
    pub use crate::shaper::Shaped;
    pub use crate::tracking::UnitOfWork;
    pub use crate::transpiler::{Dialect, SqlGenerator, ToSql};
    pub use crate::value::{Value, ValueBuffer, ValueType};
    pub use crate::visitor::ClientEvaluation;
    pub use std::sync::Arc;
}

/// Parse query text into a query model.
///
/// # Example
///
/// ```
/// use relq::parse;
///
/// let query = parse("Product.where(p => p.Price > 10).take(5)").unwrap();
/// assert_eq!(&*query.main_from.entity, "Product");
/// ```
pub fn parse(input: &str) -> Result<query::QueryModel, error::RelqError> {
    parser::parse(input)
}
