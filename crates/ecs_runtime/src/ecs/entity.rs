use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::snapshot::{ComponentSnapshot, EntitySnapshot};
use super::world::{PendingOps, WorldId};
use super::{Behavior, Component, Dependency, EcsError, Handle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Created but not yet applied to a world. Mutations are staged and no
    /// lifecycle callbacks fire.
    Detached,
    Live,
    Removed,
}

struct ComponentEntry {
    dependency: Dependency,
    requires: Vec<Dependency>,
    erased: Handle<dyn Component>,
    any: Rc<dyn Any>,
}

struct BehaviorEntry {
    dependency: Dependency,
    requires: Vec<Dependency>,
    erased: Handle<dyn Behavior>,
    any: Rc<dyn Any>,
}

/// Identity plus attached components and behaviors.
pub struct Entity {
    id: EntityId,
    world: WorldId,
    state: EntityState,
    components: Vec<ComponentEntry>,
    behaviors: Vec<BehaviorEntry>,
    pending: Weak<RefCell<PendingOps>>,
}

impl Entity {
    pub(crate) fn new(id: EntityId, world: WorldId, pending: Weak<RefCell<PendingOps>>) -> Self {
        Self {
            id,
            world,
            state: EntityState::Detached,
            components: Vec::new(),
            behaviors: Vec::new(),
            pending,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub(crate) fn world_id(&self) -> WorldId {
        self.world
    }

    /// Live and not marked for removal.
    pub fn is_active(&self) -> bool {
        if self.state != EntityState::Live {
            return false;
        }
        match self.pending.upgrade() {
            Some(pending) => !pending.borrow().is_removal_pending(self.id),
            None => false,
        }
    }

    /// Requests removal from the owning world. Takes effect immediately for
    /// dispatch and queries; the purge happens at the end of the world's
    /// update pass.
    pub fn remove_from_world(&self) -> bool {
        if self.state != EntityState::Live {
            return false;
        }
        match self.pending.upgrade() {
            Some(pending) => pending.borrow_mut().mark_for_removal(self.id),
            None => false,
        }
    }

    pub fn add_component<C: Component>(&mut self, component: C) -> Result<Handle<C>, EcsError> {
        self.ensure_not_removed()?;
        let dependency = Dependency::of::<C>();
        if self.component_index(dependency.type_id).is_some() {
            return Err(EcsError::DuplicateComponent {
                entity: self.id,
                type_name: dependency.type_name,
            });
        }

        let requires = component.required_components();
        if self.state == EntityState::Live {
            if let Some(missing) = requires
                .iter()
                .find(|required| self.component_index(required.type_id).is_none())
            {
                return Err(EcsError::MissingDependency {
                    entity: self.id,
                    dependent: dependency.type_name,
                    missing: missing.type_name,
                });
            }
        }

        let handle = Handle::new(component);
        let erased: Handle<dyn Component> = Handle {
            inner: handle.inner.clone(),
        };
        handle.set_owner(Some(self.id));
        self.components.push(ComponentEntry {
            dependency,
            requires,
            erased: erased.clone(),
            any: handle.as_any(),
        });

        if self.state == EntityState::Live {
            self.notify_component_added(&erased);
        }
        Ok(handle)
    }

    pub fn add_behavior<B: Behavior>(&mut self, behavior: B) -> Result<Handle<B>, EcsError> {
        let handle = Handle::new(behavior);
        self.attach_behavior(handle.clone())?;
        Ok(handle)
    }

    /// Attaches an existing behavior handle, e.g. one previously removed from
    /// another entity. Fails while the handle is still owned elsewhere.
    pub fn attach_behavior<B: Behavior>(&mut self, handle: Handle<B>) -> Result<(), EcsError> {
        self.ensure_not_removed()?;
        let dependency = Dependency::of::<B>();
        if let Some(owner) = handle.owner() {
            if owner == self.id {
                return Err(EcsError::DuplicateBehavior {
                    entity: self.id,
                    type_name: dependency.type_name,
                });
            }
            return Err(EcsError::AlreadyAttached {
                type_name: dependency.type_name,
                owner,
            });
        }
        if self.behavior_index(dependency.type_id).is_some() {
            return Err(EcsError::DuplicateBehavior {
                entity: self.id,
                type_name: dependency.type_name,
            });
        }

        let requires = {
            let mut behavior = handle.try_borrow_mut()?;
            let behavior: &mut dyn Behavior = &mut *behavior;
            if self.state == EntityState::Live {
                self.inject(behavior, dependency.type_name)?;
            }
            declared_dependencies(behavior)
        };

        let erased: Handle<dyn Behavior> = Handle {
            inner: handle.inner.clone(),
        };
        handle.set_owner(Some(self.id));
        self.behaviors.push(BehaviorEntry {
            dependency,
            requires,
            erased: erased.clone(),
            any: handle.as_any(),
        });

        if self.state == EntityState::Live {
            self.notify_behavior_added(&erased);
        }
        Ok(())
    }

    /// `Ok(None)` when no component of that type is attached.
    pub fn remove_component<C: Component>(&mut self) -> Result<Option<Handle<C>>, EcsError> {
        self.ensure_not_removed()?;
        let dependency = Dependency::of::<C>();
        let Some(index) = self.component_index(dependency.type_id) else {
            return Ok(None);
        };
        self.ensure_not_required(dependency)?;

        let entry = self.components.remove(index);
        if self.state == EntityState::Live {
            match entry.erased.try_borrow_mut() {
                Ok(mut component) => component.on_removed(self),
                Err(error) => warn!(entity = %self.id, error = %error, "component_detach_skipped"),
            }
        }
        entry.erased.set_owner(None);
        Ok(Handle::<C>::from_any(&entry.any))
    }

    /// `Ok(None)` when no behavior of that type is attached.
    pub fn remove_behavior<B: Behavior>(&mut self) -> Result<Option<Handle<B>>, EcsError> {
        self.ensure_not_removed()?;
        let dependency = Dependency::of::<B>();
        let Some(index) = self.behavior_index(dependency.type_id) else {
            return Ok(None);
        };
        self.ensure_not_required(dependency)?;

        let entry = self.behaviors.remove(index);
        self.release_behavior(&entry, self.state == EntityState::Live);
        Ok(Handle::<B>::from_any(&entry.any))
    }

    pub fn component<C: Component>(&self) -> Option<Handle<C>> {
        self.component_index(TypeId::of::<C>())
            .and_then(|index| Handle::<C>::from_any(&self.components[index].any))
    }

    pub fn behavior<B: Behavior>(&self) -> Option<Handle<B>> {
        self.behavior_index(TypeId::of::<B>())
            .and_then(|index| Handle::<B>::from_any(&self.behaviors[index].any))
    }

    pub fn has_component<C: Component>(&self) -> bool {
        self.component_index(TypeId::of::<C>()).is_some()
    }

    pub fn has_behavior<B: Behavior>(&self) -> bool {
        self.behavior_index(TypeId::of::<B>()).is_some()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn behavior_count(&self) -> usize {
        self.behaviors.len()
    }

    /// Component type names in attachment order.
    pub fn component_types(&self) -> Vec<&'static str> {
        self.components
            .iter()
            .map(|entry| entry.dependency.type_name)
            .collect()
    }

    /// Behavior type names in attachment order.
    pub fn behavior_types(&self) -> Vec<&'static str> {
        self.behaviors
            .iter()
            .map(|entry| entry.dependency.type_name)
            .collect()
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            id: self.id,
            components: self
                .components
                .iter()
                .map(|entry| ComponentSnapshot {
                    type_name: entry.dependency.type_name.to_string(),
                    data: entry
                        .erased
                        .try_borrow()
                        .ok()
                        .and_then(|component| component.snapshot()),
                })
                .collect(),
            behaviors: self
                .behaviors
                .iter()
                .map(|entry| entry.dependency.type_name.to_string())
                .collect(),
        }
    }

    pub(crate) fn behavior_handle(&self, index: usize) -> Option<(Handle<dyn Behavior>, &'static str)> {
        self.behaviors
            .get(index)
            .map(|entry| (entry.erased.clone(), entry.dependency.type_name))
    }

    /// Checks every staged item against the staged set, without side effects.
    pub(crate) fn validate_dependencies(&self) -> Result<(), EcsError> {
        for entry in &self.components {
            for required in &entry.requires {
                if self.component_index(required.type_id).is_none() {
                    return Err(EcsError::MissingDependency {
                        entity: self.id,
                        dependent: entry.dependency.type_name,
                        missing: required.type_name,
                    });
                }
            }
        }
        for entry in &self.behaviors {
            for required in &entry.requires {
                if self.resolve(required.type_id).is_none() {
                    return Err(EcsError::MissingDependency {
                        entity: self.id,
                        dependent: entry.dependency.type_name,
                        missing: required.type_name,
                    });
                }
            }
        }
        Ok(())
    }

    /// Turns a detached entity live: components first, then behaviors, each
    /// in declaration order. Fails without side effects when a dependency is
    /// missing or any attached value is currently borrowed.
    pub(crate) fn attach_all(&mut self) -> Result<(), EcsError> {
        self.validate_dependencies()?;
        for entry in &self.components {
            drop(entry.erased.try_borrow_mut()?);
        }
        let behaviors: Vec<(Handle<dyn Behavior>, &'static str)> = self
            .behaviors
            .iter()
            .map(|entry| (entry.erased.clone(), entry.dependency.type_name))
            .collect();
        for (handle, _) in &behaviors {
            drop(handle.try_borrow_mut()?);
        }

        for (index, (handle, type_name)) in behaviors.iter().enumerate() {
            let injected = handle
                .try_borrow_mut()
                .and_then(|mut behavior| self.inject(&mut *behavior, *type_name));
            if let Err(error) = injected {
                for (bound, _) in &behaviors[..index] {
                    if let Ok(mut behavior) = bound.try_borrow_mut() {
                        for slot in behavior.injection_slots() {
                            slot.unbind();
                        }
                    }
                }
                return Err(error);
            }
        }

        self.state = EntityState::Live;
        for index in 0..self.components.len() {
            let component = self.components[index].erased.clone();
            self.notify_component_added(&component);
        }
        for (handle, _) in &behaviors {
            self.notify_behavior_added(handle);
        }
        Ok(())
    }

    fn notify_component_added(&self, component: &Handle<dyn Component>) {
        match component.try_borrow_mut() {
            Ok(mut component) => component.on_added(self),
            Err(error) => warn!(entity = %self.id, error = %error, "component_attach_skipped"),
        }
    }

    fn notify_behavior_added(&self, behavior: &Handle<dyn Behavior>) {
        match behavior.try_borrow_mut() {
            Ok(mut behavior) => behavior.on_added(self),
            Err(error) => warn!(entity = %self.id, error = %error, "behavior_attach_skipped"),
        }
    }

    /// Detaches everything: behaviors in reverse attachment order, then
    /// components in reverse order. Each `on_removed` fires exactly once.
    pub(crate) fn detach_all(&mut self) {
        let was_live = self.state == EntityState::Live;
        self.state = EntityState::Removed;

        while let Some(entry) = self.behaviors.pop() {
            self.release_behavior(&entry, was_live);
        }
        while let Some(entry) = self.components.pop() {
            if was_live {
                match entry.erased.try_borrow_mut() {
                    Ok(mut component) => component.on_removed(self),
                    Err(error) => {
                        warn!(entity = %self.id, error = %error, "component_detach_skipped")
                    }
                }
            }
            entry.erased.set_owner(None);
        }
    }

    fn release_behavior(&self, entry: &BehaviorEntry, notify: bool) {
        match entry.erased.try_borrow_mut() {
            Ok(mut behavior) => {
                if notify {
                    behavior.on_removed(self);
                }
                for slot in behavior.injection_slots() {
                    slot.unbind();
                }
            }
            Err(error) => warn!(entity = %self.id, error = %error, "behavior_detach_skipped"),
        }
        entry.erased.set_owner(None);
    }

    fn inject(&self, behavior: &mut dyn Behavior, dependent: &'static str) -> Result<(), EcsError> {
        let mut slots = behavior.injection_slots();
        let mut resolved = Vec::with_capacity(slots.len());
        for slot in &slots {
            let dependency = slot.dependency();
            match self.resolve(dependency.type_id) {
                Some(any) => resolved.push(any),
                None => {
                    return Err(EcsError::MissingDependency {
                        entity: self.id,
                        dependent,
                        missing: dependency.type_name,
                    })
                }
            }
        }

        for (index, any) in resolved.iter().enumerate() {
            if !slots[index].bind(any) {
                let missing = slots[index].dependency().type_name;
                for slot in slots.iter_mut() {
                    slot.unbind();
                }
                return Err(EcsError::MissingDependency {
                    entity: self.id,
                    dependent,
                    missing,
                });
            }
        }
        Ok(())
    }

    fn resolve(&self, type_id: TypeId) -> Option<Rc<dyn Any>> {
        if let Some(index) = self.component_index(type_id) {
            return Some(self.components[index].any.clone());
        }
        self.behavior_index(type_id)
            .map(|index| self.behaviors[index].any.clone())
    }

    fn ensure_not_removed(&self) -> Result<(), EcsError> {
        if self.state == EntityState::Removed {
            return Err(EcsError::EntityRemoved { entity: self.id });
        }
        Ok(())
    }

    fn ensure_not_required(&self, target: Dependency) -> Result<(), EcsError> {
        let dependent = self
            .components
            .iter()
            .filter(|entry| entry.dependency != target)
            .find(|entry| entry.requires.contains(&target))
            .map(|entry| entry.dependency.type_name)
            .or_else(|| {
                self.behaviors
                    .iter()
                    .filter(|entry| entry.dependency != target)
                    .find(|entry| entry.requires.contains(&target))
                    .map(|entry| entry.dependency.type_name)
            });
        match dependent {
            Some(dependent) => Err(EcsError::RequiredBy {
                entity: self.id,
                type_name: target.type_name,
                dependent,
            }),
            None => Ok(()),
        }
    }

    fn component_index(&self, type_id: TypeId) -> Option<usize> {
        self.components
            .iter()
            .position(|entry| entry.dependency.type_id == type_id)
    }

    fn behavior_index(&self, type_id: TypeId) -> Option<usize> {
        self.behaviors
            .iter()
            .position(|entry| entry.dependency.type_id == type_id)
    }
}

fn declared_dependencies(behavior: &mut dyn Behavior) -> Vec<Dependency> {
    behavior
        .injection_slots()
        .iter()
        .map(|slot| slot.dependency())
        .collect()
}

impl Drop for Entity {
    fn drop(&mut self) {
        for entry in &self.components {
            if entry.erased.owner() == Some(self.id) {
                entry.erased.set_owner(None);
            }
        }
        for entry in &self.behaviors {
            if entry.erased.owner() == Some(self.id) {
                entry.erased.set_owner(None);
            }
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("components", &self.component_types())
            .field("behaviors", &self.behavior_types())
            .finish()
    }
}
