//! Identity map and navigation fixup.
//!
//! A [`UnitOfWork`] owns every entity materialized in it, stored in an
//! arena and addressed by [`EntityId`]. Navigations are kept as ids, so
//! cyclic graphs (a customer whose orders point back at it) are plain data.
//! Fixup is driven by foreign-key values as entities start being tracked,
//! never by walking the graph.

use crate::error::{RelqError, RelqResult};
use crate::metadata::{EntityType, Model, NavigationKind};
use crate::value::{Value, ValueBuffer};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Handle of a tracked entity within one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What the materializer needs from a change tracker.
pub trait IdentityMap {
    /// The entity already tracked under `key`, if any.
    fn try_get_tracked(&self, entity: &str, key: &[Value]) -> Option<EntityId>;

    /// Track a newly materialized entity. `values` are model values in
    /// property order, `original` the raw provider values they came from.
    fn start_tracking(
        &mut self,
        entity: &Arc<EntityType>,
        values: Vec<Value>,
        original: ValueBuffer,
    ) -> RelqResult<EntityId>;

    /// Connect two entities through `navigation` declared on `from`'s type.
    fn link(&mut self, from: EntityId, navigation: &str, to: EntityId) -> RelqResult<()>;

    /// Record that a collection navigation of `id` was loaded in full.
    fn mark_loaded(&mut self, id: EntityId, navigation: &str);
}

/// One tracked entity.
#[derive(Debug, Clone)]
pub struct EntityEntry {
    pub entity: Arc<EntityType>,
    pub key: Vec<Value>,
    values: Vec<Value>,
    original: ValueBuffer,
    references: HashMap<Arc<str>, EntityId>,
    collections: HashMap<Arc<str>, Vec<EntityId>>,
    loaded: HashSet<Arc<str>>,
}

impl EntityEntry {
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.entity
            .property_index(property)
            .map(|i| &self.values[i])
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Raw provider values as they were read.
    pub fn original(&self) -> &ValueBuffer {
        &self.original
    }

    pub fn reference(&self, navigation: &str) -> Option<EntityId> {
        self.references.get(navigation).copied()
    }

    pub fn collection(&self, navigation: &str) -> &[EntityId] {
        self.collections
            .get(navigation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_loaded(&self, navigation: &str) -> bool {
        self.loaded.contains(navigation)
    }
}

/// A foreign-key relationship and the navigations that expose it.
#[derive(Debug)]
struct Relationship {
    dependent: Arc<str>,
    principal: Arc<str>,
    foreign_key: Vec<usize>,
    /// Reference navigations on the dependent pointing at the principal.
    dependent_navigations: Vec<Arc<str>>,
    /// Navigations on the principal pointing at dependents.
    principal_navigations: Vec<(Arc<str>, NavigationKind)>,
}

/// Identity map plus relationship fixup for one logical unit of work.
#[derive(Debug)]
pub struct UnitOfWork {
    entries: Vec<EntityEntry>,
    identity: HashMap<(Arc<str>, Vec<Value>), EntityId>,
    relationships: Vec<Relationship>,
    /// (relationship, foreign key values) -> dependents carrying them
    dependents: HashMap<(usize, Vec<Value>), Vec<EntityId>>,
    links: HashSet<(usize, EntityId, EntityId)>,
}

impl UnitOfWork {
    pub fn new(model: &Model) -> Self {
        let mut relationships: Vec<Relationship> = Vec::new();
        for entity in model.entities() {
            for nav in &entity.navigations {
                let dependent = nav.dependent().clone();
                let principal = nav.principal().clone();
                let index = match relationships.iter().position(|r| {
                    r.dependent == dependent
                        && r.principal == principal
                        && r.foreign_key == nav.foreign_key
                }) {
                    Some(i) => i,
                    None => {
                        relationships.push(Relationship {
                            dependent: dependent.clone(),
                            principal: principal.clone(),
                            foreign_key: nav.foreign_key.clone(),
                            dependent_navigations: Vec::new(),
                            principal_navigations: Vec::new(),
                        });
                        relationships.len() - 1
                    }
                };
                let rel = &mut relationships[index];
                if nav.foreign_key_on_target {
                    rel.principal_navigations.push((nav.name.clone(), nav.kind));
                } else {
                    rel.dependent_navigations.push(nav.name.clone());
                }
            }
        }
        Self {
            entries: Vec::new(),
            identity: HashMap::new(),
            relationships,
            dependents: HashMap::new(),
            links: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: EntityId) -> &EntityEntry {
        &self.entries[id.0]
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntityId, &EntityEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (EntityId(i), e))
    }

    pub fn find(&self, entity: &str, key: &[Value]) -> Option<EntityId> {
        self.identity
            .get(&(Arc::from(entity), key.to_vec()))
            .copied()
    }

    pub fn property_value(&self, id: EntityId, property: &str) -> RelqResult<Value> {
        let entry = self
            .entries
            .get(id.0)
            .ok_or_else(|| RelqError::Internal(format!("unknown entity {:?}", id)))?;
        entry.get(property).cloned().ok_or_else(|| {
            RelqError::Metadata(format!("'{}' has no property '{}'", entry.entity.name, property))
        })
    }

    /// Caller mutation of a tracked property.
    pub fn set_value(&mut self, id: EntityId, property: &str, value: Value) -> RelqResult<()> {
        let entry = &mut self.entries[id.0];
        let index = entry.entity.property_index(property).ok_or_else(|| {
            RelqError::Metadata(format!("'{}' has no property '{}'", entry.entity.name, property))
        })?;
        entry.values[index] = value;
        Ok(())
    }

    /// Names of properties whose current value differs from what was read.
    pub fn modified_properties(&self, id: EntityId) -> RelqResult<Vec<Arc<str>>> {
        let entry = &self.entries[id.0];
        let mut modified = Vec::new();
        for (i, property) in entry.entity.properties.iter().enumerate() {
            if property.read(entry.original.get(i).clone())? != entry.values[i] {
                modified.push(property.name.clone());
            }
        }
        Ok(modified)
    }

    /// Re-run relationship fixup over every tracked entity. Idempotent.
    pub fn fixup(&mut self) {
        for i in 0..self.entries.len() {
            self.fixup_entity(EntityId(i));
        }
    }

    fn foreign_key_values(&self, id: EntityId, rel: usize) -> Option<Vec<Value>> {
        let entry = &self.entries[id.0];
        let values: Vec<Value> = self.relationships[rel]
            .foreign_key
            .iter()
            .map(|&i| entry.values[i].clone())
            .collect();
        (!values.iter().any(Value::is_null)).then_some(values)
    }

    fn fixup_entity(&mut self, id: EntityId) {
        let name = self.entries[id.0].entity.name.clone();
        for rel in 0..self.relationships.len() {
            if self.relationships[rel].dependent == name {
                if let Some(fk) = self.foreign_key_values(id, rel) {
                    let principal = self.find(&self.relationships[rel].principal.clone(), &fk);
                    if let Some(principal) = principal {
                        self.connect(rel, principal, id);
                    }
                }
            }
            if self.relationships[rel].principal == name {
                let key = self.entries[id.0].key.clone();
                if let Some(dependents) = self.dependents.get(&(rel, key)).cloned() {
                    for dependent in dependents {
                        self.connect(rel, id, dependent);
                    }
                }
            }
        }
    }

    /// Set navigations on both ends, once per pair.
    fn connect(&mut self, rel: usize, principal: EntityId, dependent: EntityId) {
        if !self.links.insert((rel, principal, dependent)) {
            return;
        }
        let relationship = &self.relationships[rel];
        for nav in &relationship.dependent_navigations {
            self.entries[dependent.0]
                .references
                .insert(nav.clone(), principal);
        }
        for (nav, kind) in &relationship.principal_navigations {
            let entry = &mut self.entries[principal.0];
            match kind {
                NavigationKind::Collection => {
                    entry.collections.entry(nav.clone()).or_default().push(dependent)
                }
                NavigationKind::Reference => {
                    entry.references.insert(nav.clone(), dependent);
                }
            }
        }
        tracing::trace!(
            "fixup {} {:?} <- {} {:?}",
            relationship.principal,
            principal,
            relationship.dependent,
            dependent
        );
    }
}

impl IdentityMap for UnitOfWork {
    fn try_get_tracked(&self, entity: &str, key: &[Value]) -> Option<EntityId> {
        self.find(entity, key)
    }

    fn start_tracking(
        &mut self,
        entity: &Arc<EntityType>,
        values: Vec<Value>,
        original: ValueBuffer,
    ) -> RelqResult<EntityId> {
        if values.len() != entity.properties.len() {
            return Err(RelqError::ShapeMismatch {
                expected: entity.properties.len(),
                actual: values.len(),
            });
        }
        let key: Vec<Value> = entity.key.iter().map(|&i| values[i].clone()).collect();
        let identity = (entity.name.clone(), key.clone());
        if let Some(&existing) = self.identity.get(&identity) {
            return Ok(existing);
        }
        let id = EntityId(self.entries.len());
        self.entries.push(EntityEntry {
            entity: entity.clone(),
            key,
            values,
            original,
            references: HashMap::new(),
            collections: HashMap::new(),
            loaded: HashSet::new(),
        });
        self.identity.insert(identity, id);
        for rel in 0..self.relationships.len() {
            if self.relationships[rel].dependent == entity.name {
                if let Some(fk) = self.foreign_key_values(id, rel) {
                    self.dependents.entry((rel, fk)).or_default().push(id);
                }
            }
        }
        tracing::debug!("Tracking {} {:?}", entity.name, self.entries[id.0].key);
        self.fixup_entity(id);
        Ok(id)
    }

    fn link(&mut self, from: EntityId, navigation: &str, to: EntityId) -> RelqResult<()> {
        let from_entity = self.entries[from.0].entity.clone();
        let nav = from_entity.navigation(navigation).ok_or_else(|| {
            RelqError::Metadata(format!(
                "'{}' has no navigation '{}'",
                from_entity.name, navigation
            ))
        })?;
        let rel = self
            .relationships
            .iter()
            .position(|r| {
                &r.dependent == nav.dependent()
                    && &r.principal == nav.principal()
                    && r.foreign_key == nav.foreign_key
            })
            .ok_or_else(|| RelqError::Internal(format!("no relationship for '{}'", navigation)))?;
        if nav.foreign_key_on_target {
            self.connect(rel, from, to);
        } else {
            self.connect(rel, to, from);
        }
        Ok(())
    }

    fn mark_loaded(&mut self, id: EntityId, navigation: &str) {
        self.entries[id.0].loaded.insert(navigation.into());
    }
}
