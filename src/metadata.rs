//! Entity metadata registry.
//!
//! Maps entity types to tables, columns, keys and relationships. Built once
//! (from code or a TOML model file) and immutable afterwards; translation and
//! shaping only ever read it.
//!
//! ```toml
//! [[entity]]
//! name = "Customer"
//! table = "Customers"
//! key = ["Id"]
//! properties = [
//!     { name = "Id", type = "int" },
//!     { name = "Name", type = "text", nullable = true },
//! ]
//! navigations = [
//!     { name = "Orders", target = "Order", kind = "collection", foreign_key = ["CustomerId"], inverse = "Customer" },
//! ]
//! ```

use crate::error::{RelqError, RelqResult};
use crate::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MODEL_VERSION: AtomicU64 = AtomicU64::new(1);

/// Converts between provider values and model values for one property.
pub trait ValueConverter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Provider (database) value to model value.
    fn from_provider(&self, value: Value) -> RelqResult<Value>;

    /// Model value to provider value.
    fn to_provider(&self, value: Value) -> RelqResult<Value>;
}

/// Stores booleans as 0/1 integers.
#[derive(Debug, Default)]
pub struct BoolAsIntConverter;

impl ValueConverter for BoolAsIntConverter {
    fn name(&self) -> &str {
        "bool_as_int"
    }

    fn from_provider(&self, value: Value) -> RelqResult<Value> {
        match value {
            Value::Int(n) => Ok(Value::Bool(n != 0)),
            other => Ok(other),
        }
    }

    fn to_provider(&self, value: Value) -> RelqResult<Value> {
        match value {
            Value::Bool(b) => Ok(Value::Int(b as i64)),
            other => Ok(other),
        }
    }
}

/// Strips the trailing padding of fixed-width character columns.
#[derive(Debug, Default)]
pub struct TextTrimConverter;

impl ValueConverter for TextTrimConverter {
    fn name(&self) -> &str {
        "text_trim"
    }

    fn from_provider(&self, value: Value) -> RelqResult<Value> {
        match value {
            Value::Text(s) => Ok(Value::Text(s.trim_end().to_string())),
            other => Ok(other),
        }
    }

    fn to_provider(&self, value: Value) -> RelqResult<Value> {
        Ok(value)
    }
}

/// Look up a built-in converter by its configuration name.
pub fn builtin_converter(name: &str) -> Option<Arc<dyn ValueConverter>> {
    match name {
        "bool_as_int" => Some(Arc::new(BoolAsIntConverter)),
        "text_trim" => Some(Arc::new(TextTrimConverter)),
        _ => None,
    }
}

/// Coerce a provider value to the declared property type.
///
/// Backends without native booleans or with loose numeric typing hand back
/// neighbouring representations; anything else is a shape fault.
pub fn coerce(value: Value, ty: ValueType) -> RelqResult<Value> {
    let coerced = match (value, ty) {
        (Value::Null, _) => Value::Null,
        (Value::Bool(b), ValueType::Bool) => Value::Bool(b),
        (Value::Int(n), ValueType::Bool) => Value::Bool(n != 0),
        (Value::Int(n), ValueType::Int) => Value::Int(n),
        (Value::Bool(b), ValueType::Int) => Value::Int(b as i64),
        (Value::Int(n), ValueType::Float) => Value::Float(n as f64),
        (Value::Float(f), ValueType::Float) => Value::Float(f),
        (Value::Float(f), ValueType::Int) if f.fract() == 0.0 => Value::Int(f as i64),
        (Value::Text(s), ValueType::Text) => Value::Text(s),
        (Value::Text(s), ValueType::Int) => Value::Int(s.trim().parse().map_err(|_| {
            RelqError::Binding(format!("cannot read '{}' as {}", s, ty))
        })?),
        (Value::Text(s), ValueType::Float) => Value::Float(s.trim().parse().map_err(|_| {
            RelqError::Binding(format!("cannot read '{}' as {}", s, ty))
        })?),
        (Value::Int(n), ValueType::Text) => Value::Text(n.to_string()),
        (Value::Float(f), ValueType::Text) => Value::Text(f.to_string()),
        (Value::Bool(b), ValueType::Text) => Value::Text(b.to_string()),
        (other, ty) => {
            return Err(RelqError::Binding(format!(
                "cannot read {} as {}",
                other, ty
            )));
        }
    };
    Ok(coerced)
}

/// Whether a navigation points at one entity or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationKind {
    Reference,
    Collection,
}

/// Serializable property definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub converter: Option<String>,
}

/// Serializable navigation definition.
///
/// `foreign_key` names properties on the dependent side: the declaring
/// entity for references, the target entity for collections (and for
/// references with `foreign_key_on_target`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationDef {
    pub name: String,
    pub target: String,
    pub kind: NavigationKind,
    pub foreign_key: Vec<String>,
    #[serde(default)]
    pub foreign_key_on_target: bool,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub inverse: Option<String>,
}

impl NavigationDef {
    /// Dependent-to-principal reference; the foreign key lives on the declaring entity.
    pub fn reference<S: Into<String>>(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: NavigationKind::Reference,
            foreign_key: foreign_key.into_iter().map(Into::into).collect(),
            foreign_key_on_target: false,
            required: None,
            inverse: None,
        }
    }

    /// Principal-to-dependents collection; the foreign key lives on the target.
    pub fn collection<S: Into<String>>(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: NavigationKind::Collection,
            foreign_key: foreign_key.into_iter().map(Into::into).collect(),
            foreign_key_on_target: true,
            required: None,
            inverse: None,
        }
    }

    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }
}

/// Serializable entity definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    pub key: Vec<String>,
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub navigations: Vec<NavigationDef>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ModelFile {
    #[serde(default, rename = "entity")]
    entities: Vec<EntityDef>,
}

/// A mapped scalar property.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: Arc<str>,
    pub column: Arc<str>,
    pub value_type: ValueType,
    pub nullable: bool,
    pub converter: Option<Arc<dyn ValueConverter>>,
}

impl Property {
    /// Convert a raw provider value into this property's model value.
    pub fn read(&self, raw: Value) -> RelqResult<Value> {
        let value = match &self.converter {
            Some(converter) => converter.from_provider(raw)?,
            None => raw,
        };
        coerce(value, self.value_type)
    }
}

/// A resolved relationship navigation.
#[derive(Debug, Clone)]
pub struct Navigation {
    pub name: Arc<str>,
    pub declaring: Arc<str>,
    pub target: Arc<str>,
    pub kind: NavigationKind,
    /// Foreign key property indexes on the dependent entity.
    pub foreign_key: Vec<usize>,
    /// Key property indexes on the principal entity.
    pub principal_key: Vec<usize>,
    /// True when the foreign key lives on the target entity.
    pub foreign_key_on_target: bool,
    pub required: bool,
    pub inverse: Option<Arc<str>>,
}

impl Navigation {
    pub fn is_collection(&self) -> bool {
        self.kind == NavigationKind::Collection
    }

    /// Name of the entity holding the foreign key.
    pub fn dependent(&self) -> &Arc<str> {
        if self.foreign_key_on_target {
            &self.target
        } else {
            &self.declaring
        }
    }

    /// Name of the entity holding the referenced key.
    pub fn principal(&self) -> &Arc<str> {
        if self.foreign_key_on_target {
            &self.declaring
        } else {
            &self.target
        }
    }
}

/// A mapped entity type.
#[derive(Debug, Clone)]
pub struct EntityType {
    pub name: Arc<str>,
    pub table: Arc<str>,
    pub schema: Option<Arc<str>>,
    pub properties: Vec<Property>,
    /// Primary key property indexes.
    pub key: Vec<usize>,
    pub navigations: Vec<Navigation>,
}

impl EntityType {
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| &*p.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| &*p.name == name)
    }

    pub fn navigation(&self, name: &str) -> Option<&Navigation> {
        self.navigations.iter().find(|n| &*n.name == name)
    }

    pub fn key_properties(&self) -> impl Iterator<Item = &Property> {
        self.key.iter().map(|&i| &self.properties[i])
    }
}

/// Immutable registry of entity types.
#[derive(Debug)]
pub struct Model {
    entities: BTreeMap<Arc<str>, Arc<EntityType>>,
    version: u64,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Parse a model from TOML text.
    pub fn from_toml_str(content: &str) -> RelqResult<Model> {
        let file: ModelFile = toml::from_str(content)
            .map_err(|e| RelqError::Config(format!("Failed to parse model: {}", e)))?;
        let mut builder = ModelBuilder::default();
        for entity in file.entities {
            builder = builder.entity(entity);
        }
        builder.build()
    }

    /// Load a model from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> RelqResult<Model> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let model = Self::from_toml_str(&content)?;
        tracing::info!(
            "Loaded {} entity types from {}",
            model.entities.len(),
            path.display()
        );
        Ok(model)
    }

    /// Distinct for every built model; part of the compilation cache key.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entity(&self, name: &str) -> RelqResult<&Arc<EntityType>> {
        self.entities
            .get(name)
            .ok_or_else(|| RelqError::Metadata(format!("Unknown entity type '{}'", name)))
    }

    pub fn find_entity(&self, name: &str) -> Option<&Arc<EntityType>> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.entities.values()
    }
}

/// Collects entity definitions and validates them into a [`Model`].
#[derive(Debug, Default)]
pub struct ModelBuilder {
    entities: Vec<EntityDef>,
    converters: HashMap<(String, String), Arc<dyn ValueConverter>>,
}

impl ModelBuilder {
    pub fn entity(mut self, def: EntityDef) -> Self {
        self.entities.push(def);
        self
    }

    /// Attach a custom converter to `entity.property`.
    pub fn converter(
        mut self,
        entity: impl Into<String>,
        property: impl Into<String>,
        converter: Arc<dyn ValueConverter>,
    ) -> Self {
        self.converters
            .insert((entity.into(), property.into()), converter);
        self
    }

    pub fn build(self) -> RelqResult<Model> {
        let defs: HashMap<&str, &EntityDef> =
            self.entities.iter().map(|e| (e.name.as_str(), e)).collect();
        let mut entities = BTreeMap::new();

        for def in &self.entities {
            let entity = self.build_entity(def, &defs)?;
            entities.insert(entity.name.clone(), Arc::new(entity));
        }

        // inverse navigations must point back at a navigation between the same pair
        for entity in entities.values() {
            for nav in &entity.navigations {
                if let Some(inverse) = &nav.inverse {
                    let target = &entities[&nav.target];
                    let back = target.navigation(inverse).ok_or_else(|| {
                        RelqError::Metadata(format!(
                            "Inverse navigation '{}.{}' of '{}.{}' not found",
                            nav.target, inverse, entity.name, nav.name
                        ))
                    })?;
                    if back.target != entity.name {
                        return Err(RelqError::Metadata(format!(
                            "Navigation '{}.{}' is not the inverse of '{}.{}'",
                            nav.target, inverse, entity.name, nav.name
                        )));
                    }
                }
            }
        }

        Ok(Model {
            entities,
            version: NEXT_MODEL_VERSION.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn build_entity(
        &self,
        def: &EntityDef,
        defs: &HashMap<&str, &EntityDef>,
    ) -> RelqResult<EntityType> {
        let mut properties = Vec::with_capacity(def.properties.len());
        for p in &def.properties {
            let converter = match self.converters.get(&(def.name.clone(), p.name.clone())) {
                Some(c) => Some(c.clone()),
                None => match &p.converter {
                    Some(name) => Some(builtin_converter(name).ok_or_else(|| {
                        RelqError::Metadata(format!("Unknown value converter '{}'", name))
                    })?),
                    None => None,
                },
            };
            properties.push(Property {
                name: p.name.as_str().into(),
                column: p.column.as_deref().unwrap_or(&p.name).into(),
                value_type: p.value_type,
                nullable: p.nullable,
                converter,
            });
        }

        let key = resolve_properties(&def.name, &def.key, &def.properties)?;
        if key.is_empty() {
            return Err(RelqError::Metadata(format!(
                "Entity '{}' has no primary key",
                def.name
            )));
        }

        let mut navigations = Vec::with_capacity(def.navigations.len());
        for n in &def.navigations {
            let target = defs.get(n.target.as_str()).ok_or_else(|| {
                RelqError::Metadata(format!(
                    "Navigation '{}.{}' targets unknown entity '{}'",
                    def.name, n.name, n.target
                ))
            })?;
            let fk_on_target = n.kind == NavigationKind::Collection || n.foreign_key_on_target;
            let (dependent, principal) = if fk_on_target {
                (*target, def)
            } else {
                (def, *target)
            };
            let foreign_key = resolve_properties(&dependent.name, &n.foreign_key, &dependent.properties)?;
            let principal_key = resolve_properties(&principal.name, &principal.key, &principal.properties)?;
            if foreign_key.len() != principal_key.len() {
                return Err(RelqError::Metadata(format!(
                    "Navigation '{}.{}' foreign key arity does not match the principal key",
                    def.name, n.name
                )));
            }
            let fk_nullable = foreign_key
                .iter()
                .any(|&i| dependent.properties[i].nullable);
            navigations.push(Navigation {
                name: n.name.as_str().into(),
                declaring: def.name.as_str().into(),
                target: n.target.as_str().into(),
                kind: n.kind,
                foreign_key,
                principal_key,
                foreign_key_on_target: fk_on_target,
                required: n.required.unwrap_or(!fk_nullable),
                inverse: n.inverse.as_deref().map(Into::into),
            });
        }

        Ok(EntityType {
            name: def.name.as_str().into(),
            table: def.table.as_deref().unwrap_or(&def.name).into(),
            schema: def.schema.as_deref().map(Into::into),
            properties,
            key,
            navigations,
        })
    }
}

fn resolve_properties(
    entity: &str,
    names: &[String],
    properties: &[PropertyDef],
) -> RelqResult<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            properties
                .iter()
                .position(|p| &p.name == name)
                .ok_or_else(|| {
                    RelqError::Metadata(format!("Unknown property '{}.{}'", entity, name))
                })
        })
        .collect()
}

/// Shorthand for declaring a property in code.
pub fn prop(name: &str, value_type: ValueType) -> PropertyDef {
    PropertyDef {
        name: name.to_string(),
        value_type,
        column: None,
        nullable: false,
        converter: None,
    }
}

/// Shorthand for declaring a nullable property in code.
pub fn nullable_prop(name: &str, value_type: ValueType) -> PropertyDef {
    PropertyDef {
        nullable: true,
        ..prop(name, value_type)
    }
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            schema: None,
            key: Vec::new(),
            properties: Vec::new(),
            navigations: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn key<S: Into<String>>(mut self, key: impl IntoIterator<Item = S>) -> Self {
        self.key = key.into_iter().map(Into::into).collect();
        self
    }

    pub fn property(mut self, def: PropertyDef) -> Self {
        self.properties.push(def);
        self
    }

    pub fn navigation(mut self, def: NavigationDef) -> Self {
        self.navigations.push(def);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
        [[entity]]
        name = "Customer"
        table = "Customers"
        key = ["Id"]
        properties = [
            { name = "Id", type = "int" },
            { name = "Name", type = "text", nullable = true },
            { name = "IsVip", type = "bool", column = "is_vip", converter = "bool_as_int" },
        ]
        navigations = [
            { name = "Orders", target = "Order", kind = "collection", foreign_key = ["CustomerId"], inverse = "Customer" },
        ]

        [[entity]]
        name = "Order"
        key = ["Id"]
        properties = [
            { name = "Id", type = "int" },
            { name = "CustomerId", type = "int", nullable = true },
        ]
        navigations = [
            { name = "Customer", target = "Customer", kind = "reference", foreign_key = ["CustomerId"], inverse = "Orders" },
        ]
    "#;

    #[test]
    fn test_model_from_toml() {
        let model = Model::from_toml_str(MODEL).unwrap();
        let customer = model.entity("Customer").unwrap();
        assert_eq!(&*customer.table, "Customers");
        assert_eq!(&*customer.property("IsVip").unwrap().column, "is_vip");

        let orders = customer.navigation("Orders").unwrap();
        assert!(orders.is_collection());
        assert_eq!(&**orders.dependent(), "Order");

        let order = model.entity("Order").unwrap();
        assert_eq!(&*order.table, "Order");
        let nav = order.navigation("Customer").unwrap();
        assert!(!nav.required, "nullable foreign key makes the reference optional");
        assert_eq!(nav.foreign_key, vec![1]);
    }

    #[test]
    fn test_unknown_inverse_is_rejected() {
        let broken = MODEL.replace("inverse = \"Orders\"", "inverse = \"Missing\"");
        assert!(matches!(
            Model::from_toml_str(&broken),
            Err(RelqError::Metadata(_))
        ));
    }

    #[test]
    fn test_models_get_distinct_versions() {
        let a = Model::from_toml_str(MODEL).unwrap();
        let b = Model::from_toml_str(MODEL).unwrap();
        assert_ne!(a.version(), b.version());
    }

    #[test]
    fn test_property_read_applies_converter_then_coercion() {
        let model = Model::from_toml_str(MODEL).unwrap();
        let vip = model.entity("Customer").unwrap().property("IsVip").unwrap();
        assert_eq!(vip.read(Value::Int(1)).unwrap(), Value::Bool(true));
        assert_eq!(coerce(Value::Int(3), ValueType::Float).unwrap(), Value::Float(3.0));
        assert!(coerce(Value::Text("x".into()), ValueType::Bool).is_err());
    }
}
