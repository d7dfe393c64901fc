//! Built-in dialects.

use super::sql::postgres::PostgresGenerator;
use super::sql::sqlite::SqliteGenerator;
use super::sql::sqlserver::{SqlServer2008Generator, SqlServerGenerator};
use super::traits::SqlGenerator;
use crate::error::RelqError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    #[serde(alias = "postgresql")]
    Postgres,
    #[serde(alias = "mssql")]
    SqlServer,
    SqlServer2008,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::Sqlite,
        Dialect::Postgres,
        Dialect::SqlServer,
        Dialect::SqlServer2008,
    ];

    pub fn generator(self) -> Arc<dyn SqlGenerator> {
        match self {
            Dialect::Sqlite => Arc::new(SqliteGenerator),
            Dialect::Postgres => Arc::new(PostgresGenerator),
            Dialect::SqlServer => Arc::new(SqlServerGenerator),
            Dialect::SqlServer2008 => Arc::new(SqlServer2008Generator),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::SqlServer => "sqlserver",
            Dialect::SqlServer2008 => "sqlserver2008",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = RelqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "sqlserver2008" | "mssql2008" => Ok(Dialect::SqlServer2008),
            other => Err(RelqError::Config(format!("Unknown dialect '{}'", other))),
        }
    }
}
