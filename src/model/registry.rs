//! Flat arena of entities indexed by stable [`EntityId`]s
//!
//! Every cross-entity link (impacts, source problems, rule leaves, graph
//! edges) stores ids into this arena, never references.

use fxhash::FxHashMap;

use super::entity::{CheckableEntity, CheckSettings, EntityId};
use super::state::EntityKind;

#[derive(Debug, Default, Clone)]
pub struct Registry {
    entities: Vec<CheckableEntity>,
    hosts: FxHashMap<String, EntityId>,
    services: FxHashMap<(String, String), EntityId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host; returns the existing id when the name is taken
    pub fn add_host(&mut self, name: &str, settings: CheckSettings) -> EntityId {
        if let Some(id) = self.hosts.get(name) {
            return *id;
        }
        let id = EntityId(self.entities.len());
        self.entities.push(CheckableEntity::host(id, name, settings));
        self.hosts.insert(name.to_string(), id);
        id
    }

    /// Register a service on an existing host
    pub fn add_service(
        &mut self,
        host: EntityId,
        description: &str,
        settings: CheckSettings,
    ) -> Option<EntityId> {
        let host_name = self.get(host)?.host_name.clone();
        let key = (host_name.clone(), description.to_string());
        if let Some(id) = self.services.get(&key) {
            return Some(*id);
        }
        let id = EntityId(self.entities.len());
        self.entities
            .push(CheckableEntity::service(id, host, host_name, description, settings));
        self.services.insert(key, id);
        Some(id)
    }

    pub fn get(&self, id: EntityId) -> Option<&CheckableEntity> {
        self.entities.get(id.0)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut CheckableEntity> {
        self.entities.get_mut(id.0)
    }

    pub fn host_id(&self, name: &str) -> Option<EntityId> {
        self.hosts.get(name).copied()
    }

    pub fn service_id(&self, host: &str, description: &str) -> Option<EntityId> {
        self.services
            .get(&(host.to_string(), description.to_string()))
            .copied()
    }

    /// Resolve `host` or `host/service`
    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        match name.split_once('/') {
            Some((host, service)) => self.service_id(host, service),
            None => self.host_id(name),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckableEntity> {
        self.entities.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CheckableEntity> {
        self.entities.iter_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().map(|e| e.id)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &CheckableEntity> {
        self.entities.iter().filter(|e| e.kind == EntityKind::Host)
    }

    /// Services attached to a host, in registration order
    pub fn services_of(&self, host: EntityId) -> impl Iterator<Item = &CheckableEntity> {
        self.entities
            .iter()
            .filter(move |e| e.kind == EntityKind::Service && e.host == Some(host))
    }

    /// Mutable access to two distinct entities at once
    pub fn pair_mut(
        &mut self,
        a: EntityId,
        b: EntityId,
    ) -> Option<(&mut CheckableEntity, &mut CheckableEntity)> {
        if a == b || a.0 >= self.entities.len() || b.0 >= self.entities.len() {
            return None;
        }
        if a.0 < b.0 {
            let (left, right) = self.entities.split_at_mut(b.0);
            Some((&mut left[a.0], &mut right[0]))
        } else {
            let (left, right) = self.entities.split_at_mut(a.0);
            Some((&mut right[0], &mut left[b.0]))
        }
    }
}
