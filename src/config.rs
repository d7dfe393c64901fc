//! Engine configuration
//!
//! Loaded from TOML, by default `<config dir>/relq/config.toml`:
//!
//! ```toml
//! dialect = "postgres"
//! database_url = "postgres://localhost/shop"
//! model_path = "model.toml"
//!
//! [cache]
//! max_entries = 500
//!
//! [query]
//! client_evaluation = "throw"
//! parameterize_literals = true
//! ```

use crate::cache::CacheConfig;
use crate::compiler::{CompileOptions, QueryCompiler};
use crate::error::{RelqError, RelqResult};
use crate::metadata::Model;
use crate::transpiler::{CustomGenerator, Dialect, DialectCapabilities, SqlGenerator};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelqConfig {
    /// Built-in dialect, ignored when `custom_dialect` is set
    pub dialect: Dialect,

    /// Database connection URL (optional)
    pub database_url: Option<String>,

    /// Path to the metadata model file (optional)
    pub model_path: Option<PathBuf>,

    pub cache: CacheConfig,

    pub query: CompileOptions,

    /// A dialect described entirely by its capabilities
    pub custom_dialect: Option<CustomDialectConfig>,
}

/// `[custom_dialect]` table: a name plus every capability flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomDialectConfig {
    pub name: String,
    #[serde(flatten)]
    pub capabilities: DialectCapabilities,
}

impl RelqConfig {
    /// Create a new configuration builder
    pub fn builder() -> RelqConfigBuilder {
        RelqConfigBuilder::default()
    }

    pub fn from_toml_str(content: &str) -> RelqResult<Self> {
        toml::from_str(content)
            .map_err(|e| RelqError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load a config file. A relative `model_path` is resolved against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> RelqResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        if let (Some(model), Some(dir)) = (&config.model_path, path.parent()) {
            if model.is_relative() {
                config.model_path = Some(dir.join(model));
            }
        }
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `<config dir>/relq/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("relq").join("config.toml"))
    }

    /// Load the default config file, or defaults when there is none.
    pub fn load_default() -> RelqResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn generator(&self) -> Arc<dyn SqlGenerator> {
        match &self.custom_dialect {
            Some(custom) => Arc::new(CustomGenerator {
                name: custom.name.clone(),
                capabilities: custom.capabilities.clone(),
            }),
            None => self.dialect.generator(),
        }
    }

    /// Load the metadata model named by `model_path`.
    pub fn load_model(&self) -> RelqResult<Model> {
        match &self.model_path {
            Some(path) => Model::from_file(path),
            None => Err(RelqError::Config("No model_path configured".into())),
        }
    }

    /// A compiler for `model` with this configuration's dialect, cache and
    /// query options.
    pub fn compiler(&self, model: Arc<Model>) -> QueryCompiler {
        QueryCompiler::new(model, self.dialect)
            .with_generator(self.generator())
            .with_options(self.query)
            .with_cache(self.cache.clone())
    }
}

/// Builder for RelqConfig
#[derive(Debug, Default)]
pub struct RelqConfigBuilder {
    config: RelqConfig,
}

impl RelqConfigBuilder {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.config.dialect = dialect;
        self
    }

    /// Set the database URL
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    /// Set the model path
    pub fn model(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.model_path = Some(path.into());
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn query(mut self, options: CompileOptions) -> Self {
        self.config.query = options;
        self
    }

    pub fn custom_dialect(mut self, name: impl Into<String>, capabilities: DialectCapabilities) -> Self {
        self.config.custom_dialect = Some(CustomDialectConfig {
            name: name.into(),
            capabilities,
        });
        self
    }

    /// Build the configuration
    pub fn build(self) -> RelqConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transpiler::{PagingStyle, PlaceholderStyle};
    use crate::visitor::ClientEvaluation;

    #[test]
    fn test_defaults() {
        let config = RelqConfig::from_toml_str("").unwrap();
        assert_eq!(config.dialect, Dialect::Sqlite);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.query.client_evaluation, ClientEvaluation::Warn);
        assert!(config.query.parameterize_literals);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_parse_sections() {
        let config = RelqConfig::from_toml_str(
            r#"
            dialect = "mssql"
            database_url = "sqlite::memory:"

            [cache]
            enabled = false

            [query]
            client_evaluation = "throw"
            "#,
        )
        .unwrap();
        assert_eq!(config.dialect, Dialect::SqlServer);
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.query.client_evaluation, ClientEvaluation::Throw);
        assert!(config.query.parameterize_literals);
        assert_eq!(config.generator().name(), "sqlserver");
    }

    #[test]
    fn test_custom_dialect() {
        let config = RelqConfig::from_toml_str(
            r#"
            [custom_dialect]
            name = "h2"
            paging = "limit_offset"
            placeholder = "dollar"
            quote_open = '"'
            quote_close = '"'
            true_literal = "TRUE"
            false_literal = "FALSE"
            concat_operator = "||"
            like_wildcards = "%_"

            [custom_dialect.functions]
            length = "CHAR_LENGTH"

            [custom_dialect.cast_types]
            bool = "BOOLEAN"
            int = "BIGINT"
            float = "DOUBLE"
            text = "VARCHAR"
            "#,
        )
        .unwrap();
        let custom = config.custom_dialect.as_ref().unwrap();
        assert_eq!(custom.capabilities.paging, PagingStyle::LimitOffset);
        assert_eq!(custom.capabilities.placeholder, PlaceholderStyle::Dollar);
        assert_eq!(
            custom.capabilities.function("length").as_deref(),
            Some("CHAR_LENGTH")
        );
        assert_eq!(config.generator().name(), "h2");
    }

    #[test]
    fn test_bad_config_is_config_error() {
        let err = RelqConfig::from_toml_str("dialect = \"oracle\"").unwrap_err();
        assert!(matches!(err, RelqError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = RelqConfig::builder()
            .dialect(Dialect::Postgres)
            .database("postgres://localhost/shop")
            .model("model.toml")
            .build();
        assert_eq!(config.dialect, Dialect::Postgres);
        assert_eq!(config.model_path, Some(PathBuf::from("model.toml")));
        assert!(matches!(config.load_model(), Err(RelqError::Io(_))));
        assert!(matches!(
            RelqConfig::default().load_model(),
            Err(RelqError::Config(_))
        ));
    }
}
