//! Row shapers.
//!
//! A [`Shaper`] is built once at translation time next to the SELECT whose
//! projection it reads, and turns one result row into a [`Shaped`] value.
//! Entities go through the identity map: a key seen before yields the
//! tracked instance without re-reading its columns.

use crate::error::{RelqError, RelqResult};
use crate::metadata::{EntityType, NavigationKind, ValueConverter, coerce};
use crate::tracking::{EntityId, IdentityMap, UnitOfWork};
use crate::value::{Value, ValueBuffer, ValueType};
use std::fmt;
use std::sync::Arc;

/// The value one row shapes into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shaped {
    Null,
    Value(Value),
    Entity(EntityId),
    Record(Vec<(Arc<str>, Shaped)>),
}

impl Shaped {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Shaped::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Shaped::Entity(id) => Some(*id),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Shaped> {
        match self {
            Shaped::Record(fields) => fields.iter().find(|(n, _)| &**n == name).map(|(_, s)| s),
            _ => None,
        }
    }

    /// JSON rendering with entity properties read from `uow`. Loaded
    /// navigations are nested; an entity already being rendered further up
    /// appears as its key values.
    pub fn to_json(&self, uow: &UnitOfWork) -> serde_json::Value {
        match self {
            Shaped::Null => serde_json::Value::Null,
            Shaped::Value(v) => value_json(v),
            Shaped::Entity(id) => entity_json(*id, uow, &mut Vec::new()),
            Shaped::Record(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(name, field)| (name.to_string(), field.to_json(uow)))
                    .collect(),
            ),
        }
    }
}

fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::Number((*n).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
    }
}

fn entity_json(id: EntityId, uow: &UnitOfWork, path: &mut Vec<EntityId>) -> serde_json::Value {
    let entry = uow.entry(id);
    if path.contains(&id) {
        return serde_json::Value::Array(entry.key.iter().map(value_json).collect());
    }
    path.push(id);
    let mut map = serde_json::Map::new();
    for (property, value) in entry.entity.properties.iter().zip(entry.values()) {
        map.insert(property.name.to_string(), value_json(value));
    }
    for nav in &entry.entity.navigations {
        match nav.kind {
            NavigationKind::Reference => {
                if let Some(target) = entry.reference(&nav.name) {
                    map.insert(nav.name.to_string(), entity_json(target, uow, path));
                }
            }
            NavigationKind::Collection if entry.is_loaded(&nav.name) => {
                let items = entry
                    .collection(&nav.name)
                    .iter()
                    .map(|child| entity_json(*child, uow, path))
                    .collect();
                map.insert(nav.name.to_string(), serde_json::Value::Array(items));
            }
            NavigationKind::Collection => {}
        }
    }
    path.pop();
    serde_json::Value::Object(map)
}

/// A reference navigation loaded through a join.
#[derive(Debug, Clone)]
pub struct IncludeShaper {
    pub navigation: Arc<str>,
    pub shaper: EntityShaper,
}

/// An entity whose columns occupy `start..start + properties.len()`.
#[derive(Debug, Clone)]
pub struct EntityShaper {
    pub entity: Arc<EntityType>,
    pub start: usize,
    /// True when the columns come from an outer join and may all be NULL.
    pub nullable: bool,
    pub includes: Vec<IncludeShaper>,
    /// Collection navigations loaded in full by split commands.
    pub collections: Vec<Arc<str>>,
}

impl EntityShaper {
    pub fn new(entity: Arc<EntityType>, start: usize, nullable: bool) -> Self {
        Self {
            entity,
            start,
            nullable,
            includes: Vec::new(),
            collections: Vec::new(),
        }
    }

    /// Absolute column indexes of the key.
    pub fn key_indexes(&self) -> Vec<usize> {
        self.entity.key.iter().map(|&i| self.start + i).collect()
    }

    fn width(&self) -> usize {
        let own = self.start + self.entity.properties.len();
        self.includes
            .iter()
            .map(|inc| inc.shaper.width())
            .fold(own, usize::max)
    }

    /// Materialize (or find) the entity in `row`; `None` for an all-NULL key
    /// of an outer-joined entity.
    pub fn shape(
        &self,
        row: &ValueBuffer,
        map: &mut (impl IdentityMap + ?Sized),
    ) -> RelqResult<Option<EntityId>> {
        let entity = &self.entity;
        let mut key = Vec::with_capacity(entity.key.len());
        for &i in &entity.key {
            key.push(entity.properties[i].read(row.get(self.start + i).clone())?);
        }
        if key.iter().any(Value::is_null) {
            if self.nullable {
                return Ok(None);
            }
            return Err(RelqError::Internal(format!(
                "NULL key for '{}' read from a non-optional source",
                entity.name
            )));
        }

        let id = match map.try_get_tracked(&entity.name, &key) {
            Some(id) => id,
            None => {
                let mut values = Vec::with_capacity(entity.properties.len());
                for (i, property) in entity.properties.iter().enumerate() {
                    values.push(property.read(row.get(self.start + i).clone())?);
                }
                let original = row.slice(self.start, entity.properties.len());
                map.start_tracking(entity, values, original)?
            }
        };

        for include in &self.includes {
            if let Some(child) = include.shaper.shape(row, map)? {
                map.link(id, &include.navigation, child)?;
            }
        }
        for navigation in &self.collections {
            map.mark_loaded(id, navigation);
        }
        Ok(Some(id))
    }
}

/// How to turn a row into a [`Shaped`] value.
#[derive(Clone)]
pub enum Shaper {
    Scalar {
        index: usize,
        ty: Option<ValueType>,
        converter: Option<Arc<dyn ValueConverter>>,
    },
    Entity(EntityShaper),
    Composite {
        fields: Vec<(Arc<str>, Shaper)>,
    },
}

impl fmt::Debug for Shaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shaper::Scalar {
                index,
                ty,
                converter,
            } => {
                write!(f, "Scalar(#{}", index)?;
                if let Some(ty) = ty {
                    write!(f, ": {}", ty)?;
                }
                if let Some(c) = converter {
                    write!(f, " via {}", c.name())?;
                }
                write!(f, ")")
            }
            Shaper::Entity(e) => {
                write!(f, "Entity({} @{}", e.entity.name, e.start)?;
                for inc in &e.includes {
                    write!(f, ", {} -> {:?}", inc.navigation, Shaper::Entity(inc.shaper.clone()))?;
                }
                for c in &e.collections {
                    write!(f, ", {}[*]", c)?;
                }
                write!(f, ")")
            }
            Shaper::Composite { fields } => {
                let mut s = f.debug_struct("Record");
                for (name, shaper) in fields {
                    s.field(name, shaper);
                }
                s.finish()
            }
        }
    }
}

impl Shaper {
    /// Number of leading projection columns this shaper reads.
    pub fn width(&self) -> usize {
        match self {
            Shaper::Scalar { index, .. } => index + 1,
            Shaper::Entity(e) => e.width(),
            Shaper::Composite { fields } => fields.iter().map(|(_, s)| s.width()).max().unwrap_or(0),
        }
    }

    /// The entity shaper of an entity projection.
    pub fn as_entity(&self) -> Option<&EntityShaper> {
        match self {
            Shaper::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn shape(
        &self,
        row: &ValueBuffer,
        map: &mut (impl IdentityMap + ?Sized),
    ) -> RelqResult<Shaped> {
        match self {
            Shaper::Scalar {
                index,
                ty,
                converter,
            } => {
                let mut value = row.get(*index).clone();
                if let Some(converter) = converter {
                    value = converter.from_provider(value)?;
                }
                if let Some(ty) = ty {
                    value = coerce(value, *ty)?;
                }
                Ok(match value {
                    Value::Null => Shaped::Null,
                    v => Shaped::Value(v),
                })
            }
            Shaper::Entity(e) => Ok(match e.shape(row, map)? {
                Some(id) => Shaped::Entity(id),
                None => Shaped::Null,
            }),
            Shaper::Composite { fields } => {
                let mut shaped = Vec::with_capacity(fields.len());
                for (name, shaper) in fields {
                    shaped.push((name.clone(), shaper.shape(row, map)?));
                }
                Ok(Shaped::Record(shaped))
            }
        }
    }
}

/// Check a result set's column count against the compiled projection.
pub fn check_columns(expected: usize, actual: usize) -> RelqResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(RelqError::ShapeMismatch { expected, actual })
    }
}
