//! Identity registry: permanent external ids to the containers, geometry tags and
//! constraint names that currently represent them in the mechanical model.

use std::collections::BTreeMap;

use crate::error::SyncError;
use crate::kernel::GeometryTag;
use crate::mechanical::ContainerId;
use crate::model::diff::EntityClass;

#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    pub class: EntityClass,
    pub container: ContainerId,
    /// Geometry owned directly by this entity (one per edge for closed shapes).
    pub tags: Vec<GeometryTag>,
    /// Names of constraints created for this entity.
    pub constraints: Vec<String>,
    /// Owning entity, for pads.
    pub parent: Option<String>,
}

impl Registration {
    pub fn new(class: EntityClass, container: ContainerId) -> Self {
        Self {
            class,
            container,
            tags: Vec::new(),
            constraints: Vec::new(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct Registry {
    entries: BTreeMap<String, Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `external_id`, returning the registration it replaced.
    pub fn register(
        &mut self,
        external_id: impl Into<String>,
        registration: Registration,
    ) -> Option<Registration> {
        self.entries.insert(external_id.into(), registration)
    }

    pub fn unregister(&mut self, external_id: &str) -> Option<Registration> {
        self.entries.remove(external_id)
    }

    pub fn resolve(&self, external_id: &str) -> Option<&Registration> {
        self.entries.get(external_id)
    }

    pub fn resolve_mut(&mut self, external_id: &str) -> Option<&mut Registration> {
        self.entries.get_mut(external_id)
    }

    /// Like [`Registry::resolve`] but fails with `UnknownEntity` for `class`.
    pub fn require(
        &self,
        class: EntityClass,
        external_id: &str,
    ) -> Result<&Registration, SyncError> {
        self.resolve(external_id)
            .filter(|registration| registration.class == class)
            .ok_or_else(|| SyncError::UnknownEntity {
                class,
                external_id: external_id.to_string(),
            })
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.entries.contains_key(external_id)
    }

    /// External ids whose registration names `parent` as owner.
    pub fn children_of(&self, parent: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, registration)| registration.parent.as_deref() == Some(parent))
            .map(|(external_id, _)| external_id.clone())
            .collect()
    }

    /// Tags owned by `external_id` and by every entity it owns.
    pub fn owned_tags(&self, external_id: &str) -> Vec<GeometryTag> {
        let mut tags = self
            .resolve(external_id)
            .map(|registration| registration.tags.clone())
            .unwrap_or_default();
        for child in self.children_of(external_id) {
            tags.extend(self.owned_tags(&child));
        }
        tags
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Registration)> {
        self.entries
            .iter()
            .map(|(external_id, registration)| (external_id.as_str(), registration))
    }
}

#[cfg(test)]
mod tests {
    use super::{Registration, Registry};
    use crate::error::SyncError;
    use crate::kernel::GeometryTag;
    use crate::mechanical::{Container, ContainerRole, Containers};
    use crate::model::diff::EntityClass;

    #[test]
    fn owned_tags_include_children() {
        let mut containers = Containers::new();
        let footprint = containers.insert(Container::new("F1", ContainerRole::PadGroup), None);

        let mut registry = Registry::new();
        registry.register("F1", Registration::new(EntityClass::Footprints, footprint));

        let mut pad = Registration::new(EntityClass::Pads, footprint).with_parent("F1");
        pad.tags.push(GeometryTag(7));
        registry.register("P1", pad);

        assert_eq!(registry.children_of("F1"), vec!["P1".to_string()]);
        assert_eq!(registry.owned_tags("F1"), vec![GeometryTag(7)]);
    }

    #[test]
    fn require_checks_class() {
        let mut containers = Containers::new();
        let container = containers.insert(Container::new("V1", ContainerRole::Vias), None);

        let mut registry = Registry::new();
        registry.register("V1", Registration::new(EntityClass::Vias, container));

        assert!(registry.require(EntityClass::Vias, "V1").is_ok());
        assert!(matches!(
            registry.require(EntityClass::Drawings, "V1"),
            Err(SyncError::UnknownEntity { class: EntityClass::Drawings, .. })
        ));
    }
}
