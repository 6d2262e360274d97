use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, warn};

use super::snapshot::WorldSnapshot;
use super::{
    Behavior, BehaviorError, Component, EcsError, Entity, EntityId, EntityIdAllocator, EntityState,
};

static NEXT_WORLD_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorldId(u64);

impl WorldId {
    fn next() -> Self {
        Self(NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Add/remove buffers shared between a world and its command handles.
#[derive(Debug, Default)]
pub(crate) struct PendingOps {
    allocator: EntityIdAllocator,
    adds: Vec<Entity>,
    removals: Vec<EntityId>,
    removal_set: HashSet<EntityId>,
    live_ids: HashSet<EntityId>,
}

enum RemovalRequest {
    Cancelled(Entity),
    Marked,
    Ignored,
}

impl PendingOps {
    pub(crate) fn is_removal_pending(&self, id: EntityId) -> bool {
        self.removal_set.contains(&id)
    }

    pub(crate) fn mark_for_removal(&mut self, id: EntityId) -> bool {
        if !self.live_ids.contains(&id) || !self.removal_set.insert(id) {
            return false;
        }
        self.removals.push(id);
        true
    }

    fn request_removal(&mut self, id: EntityId) -> RemovalRequest {
        if let Some(index) = self.adds.iter().position(|entity| entity.id() == id) {
            return RemovalRequest::Cancelled(self.adds.remove(index));
        }
        if self.mark_for_removal(id) {
            RemovalRequest::Marked
        } else {
            RemovalRequest::Ignored
        }
    }

    fn enqueue(&mut self, world: WorldId, entity: Entity) -> Result<EntityId, (EcsError, Entity)> {
        let id = entity.id();
        if entity.world_id() != world {
            return Err((EcsError::ForeignEntity { entity: id }, entity));
        }
        match entity.state() {
            EntityState::Detached => {}
            EntityState::Live => {
                return Err((EcsError::DuplicateEntity { entity: id }, entity));
            }
            EntityState::Removed => {
                return Err((EcsError::EntityRemoved { entity: id }, entity));
            }
        }
        if self.live_ids.contains(&id) || self.adds.iter().any(|pending| pending.id() == id) {
            return Err((EcsError::DuplicateEntity { entity: id }, entity));
        }
        if let Err(error) = entity.validate_dependencies() {
            return Err((error, entity));
        }
        self.adds.push(entity);
        Ok(id)
    }
}

fn enqueue_entity(
    pending: &RefCell<PendingOps>,
    world: WorldId,
    entity: Entity,
) -> Result<EntityId, EcsError> {
    let result = pending.borrow_mut().enqueue(world, entity);
    match result {
        Ok(id) => {
            debug!(entity = %id, "entity_queued");
            Ok(id)
        }
        Err((error, rejected)) => {
            warn!(entity = %rejected.id(), error = %error, "entity_add_rejected");
            drop(rejected);
            Err(error)
        }
    }
}

fn request_removal(pending: &RefCell<PendingOps>, id: EntityId) -> bool {
    let request = pending.borrow_mut().request_removal(id);
    match request {
        RemovalRequest::Cancelled(entity) => {
            debug!(entity = %id, "entity_add_cancelled");
            drop(entity);
            true
        }
        RemovalRequest::Marked => {
            debug!(entity = %id, "entity_removal_requested");
            true
        }
        RemovalRequest::Ignored => false,
    }
}

/// Cloneable handle for mutating a world from inside callbacks, where the
/// world itself is already borrowed by its update pass.
#[derive(Debug, Clone)]
pub struct WorldCommands {
    world: WorldId,
    pending: Weak<RefCell<PendingOps>>,
}

impl WorldCommands {
    pub fn create_entity(&self) -> Result<Entity, EcsError> {
        let pending = self.pending.upgrade().ok_or(EcsError::WorldDropped)?;
        let id = pending.borrow_mut().allocator.allocate();
        Ok(Entity::new(id, self.world, self.pending.clone()))
    }

    /// Queues `entity`; it becomes live at the start of the next update.
    pub fn add_entity(&self, entity: Entity) -> Result<EntityId, EcsError> {
        let pending = self.pending.upgrade().ok_or(EcsError::WorldDropped)?;
        enqueue_entity(&pending, self.world, entity)
    }

    pub fn remove_entity(&self, id: EntityId) -> bool {
        match self.pending.upgrade() {
            Some(pending) => request_removal(&pending, id),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub added: usize,
    pub dispatched: usize,
    pub removed: usize,
}

#[derive(Debug)]
pub struct BehaviorFailure {
    pub entity: EntityId,
    pub behavior: &'static str,
    pub error: BehaviorError,
}

/// Every behavior failure of one update pass. The pass itself completed:
/// additions and removals were applied as usual.
#[derive(Debug, Error)]
#[error("{} behavior update(s) failed in frame {}", .failures.len(), .stats.frame)]
pub struct FrameError {
    pub failures: Vec<BehaviorFailure>,
    pub stats: FrameStats,
}

/// Owner of the live entity set.
///
/// Additions and removals are buffered and applied during [`World::update`]:
/// pending additions at the start of the pass, removals at the end. An
/// entity marked for removal stops receiving updates and disappears from
/// queries immediately.
#[derive(Debug)]
pub struct World {
    id: WorldId,
    entities: Vec<Entity>,
    pending: Rc<RefCell<PendingOps>>,
    frame: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            id: WorldId::next(),
            entities: Vec::new(),
            pending: Rc::new(RefCell::new(PendingOps::default())),
            frame: 0,
        }
    }

    pub fn commands(&self) -> WorldCommands {
        WorldCommands {
            world: self.id,
            pending: Rc::downgrade(&self.pending),
        }
    }

    pub fn create_entity(&mut self) -> Entity {
        let id = self.pending.borrow_mut().allocator.allocate();
        Entity::new(id, self.id, Rc::downgrade(&self.pending))
    }

    /// Validates `entity` and queues it. On error nothing is queued.
    pub fn add_entity(&mut self, entity: Entity) -> Result<EntityId, EcsError> {
        enqueue_entity(&self.pending, self.id, entity)
    }

    /// Cancels a pending addition or marks a live entity for removal.
    /// Returns `false` for unknown ids and repeated requests.
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        request_removal(&self.pending, id)
    }

    /// One frame: apply pending additions, dispatch `on_update` to every
    /// active entity's behaviors in attachment order, purge removals.
    pub fn update(&mut self, tpf: f64) -> Result<FrameStats, FrameError> {
        let mut stats = FrameStats {
            frame: self.frame,
            ..FrameStats::default()
        };
        stats.added = self.apply_pending_adds();

        let mut failures = Vec::new();
        for entity in &self.entities {
            for index in 0..entity.behavior_count() {
                if self.is_removal_pending(entity.id()) {
                    break;
                }
                let Some((handle, behavior)) = entity.behavior_handle(index) else {
                    break;
                };
                let result = match handle.try_borrow_mut() {
                    Ok(mut target) => target.on_update(entity, tpf),
                    Err(error) => Err(BehaviorError::from(error)),
                };
                stats.dispatched += 1;
                if let Err(error) = result {
                    warn!(entity = %entity.id(), behavior, error = %error, "behavior_update_failed");
                    failures.push(BehaviorFailure {
                        entity: entity.id(),
                        behavior,
                        error,
                    });
                }
            }
        }

        stats.removed = self.purge_pending_removals();
        self.frame = self.frame.saturating_add(1);

        if failures.is_empty() {
            Ok(stats)
        } else {
            Err(FrameError { failures, stats })
        }
    }

    /// Drops pending additions and purges every live entity, firing detach
    /// callbacks. Returns the number of purged entities.
    pub fn clear(&mut self) -> usize {
        let cancelled = std::mem::take(&mut self.pending.borrow_mut().adds);
        drop(cancelled);

        let ids: Vec<EntityId> = self.entities.iter().map(Entity::id).collect();
        for id in ids {
            self.pending.borrow_mut().mark_for_removal(id);
        }
        self.purge_pending_removals()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn entity_count(&self) -> usize {
        self.entities().count()
    }

    pub fn pending_add_count(&self) -> usize {
        self.pending.borrow().adds.len()
    }

    pub fn is_removal_pending(&self, id: EntityId) -> bool {
        self.pending.borrow().is_removal_pending(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities
            .iter()
            .filter(move |entity| !self.is_removal_pending(entity.id()))
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities().find(|entity| entity.id() == id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        if self.is_removal_pending(id) {
            return None;
        }
        self.entities.iter_mut().find(|entity| entity.id() == id)
    }

    pub fn with_component<C: Component>(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities().filter(|entity| entity.has_component::<C>())
    }

    pub fn with_behavior<B: Behavior>(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities().filter(|entity| entity.has_behavior::<B>())
    }

    pub fn find_entity<P>(&self, mut predicate: P) -> Option<&Entity>
    where
        P: FnMut(&Entity) -> bool,
    {
        self.entities().find(|entity| predicate(entity))
    }

    pub fn entities_matching<P>(&self, mut predicate: P) -> Vec<&Entity>
    where
        P: FnMut(&Entity) -> bool,
    {
        self.entities().filter(|entity| predicate(entity)).collect()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            entities: self.entities().map(Entity::snapshot).collect(),
        }
    }

    /// Entities whose values are borrowed elsewhere stay queued for the next
    /// pass; other attach failures drop the entity.
    fn apply_pending_adds(&mut self) -> usize {
        let adds = std::mem::take(&mut self.pending.borrow_mut().adds);
        let mut deferred = Vec::new();
        let mut added = 0;
        for mut entity in adds {
            let id = entity.id();
            self.pending.borrow_mut().live_ids.insert(id);
            let attached = entity.attach_all();
            if attached.is_err() {
                self.pending.borrow_mut().live_ids.remove(&id);
            }
            match attached {
                Ok(()) => {
                    debug!(
                        entity = %id,
                        components = entity.component_count(),
                        behaviors = entity.behavior_count(),
                        "entity_added"
                    );
                    self.entities.push(entity);
                    added += 1;
                }
                Err(error @ EcsError::BorrowConflict { .. }) => {
                    debug!(entity = %id, error = %error, "entity_attach_deferred");
                    deferred.push(entity);
                }
                Err(error) => {
                    warn!(entity = %id, error = %error, "entity_attach_failed");
                }
            }
        }
        if !deferred.is_empty() {
            let mut pending = self.pending.borrow_mut();
            deferred.append(&mut pending.adds);
            pending.adds = deferred;
        }
        added
    }

    fn purge_pending_removals(&mut self) -> usize {
        let removals = std::mem::take(&mut self.pending.borrow_mut().removals);
        let mut removed = 0;
        for id in removals {
            if let Some(index) = self.entities.iter().position(|entity| entity.id() == id) {
                let mut entity = self.entities.remove(index);
                entity.detach_all();
                removed += 1;
                debug!(entity = %id, "entity_removed");
            }
            let mut pending = self.pending.borrow_mut();
            pending.removal_set.remove(&id);
            pending.live_ids.remove(&id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::ecs::{BehaviorResult, Dependency, Inject, InjectSlot};

    type Log = Rc<RefCell<Vec<String>>>;

    fn new_log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.borrow().clone()
    }

    #[derive(Debug, Default)]
    struct Counter {
        value: u32,
    }

    impl Component for Counter {
        fn snapshot(&self) -> Option<serde_json::Value> {
            Some(json!({ "value": self.value }))
        }
    }

    #[derive(Debug, Default)]
    struct Marker;

    impl Component for Marker {}

    #[derive(Default)]
    struct Increment {
        counter: Inject<Counter>,
    }

    impl Behavior for Increment {
        fn injection_slots(&mut self) -> Vec<&mut dyn InjectSlot> {
            vec![&mut self.counter]
        }

        fn on_update(&mut self, _entity: &Entity, _tpf: f64) -> BehaviorResult {
            self.counter.get_mut()?.value += 1;
            Ok(())
        }
    }

    struct Recorder {
        name: &'static str,
        log: Log,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Rc::clone(log),
            }
        }
    }

    impl Behavior for Recorder {
        fn on_added(&mut self, _entity: &Entity) {
            self.log.borrow_mut().push(format!("added:{}", self.name));
        }

        fn on_update(&mut self, _entity: &Entity, _tpf: f64) -> BehaviorResult {
            self.log.borrow_mut().push(format!("update:{}", self.name));
            Ok(())
        }

        fn on_removed(&mut self, _entity: &Entity) {
            self.log.borrow_mut().push(format!("removed:{}", self.name));
        }
    }

    struct SecondRecorder(Recorder);

    impl Behavior for SecondRecorder {
        fn on_added(&mut self, entity: &Entity) {
            self.0.on_added(entity);
        }

        fn on_update(&mut self, entity: &Entity, tpf: f64) -> BehaviorResult {
            self.0.on_update(entity, tpf)
        }

        fn on_removed(&mut self, entity: &Entity) {
            self.0.on_removed(entity);
        }
    }

    struct LoggedComponent {
        name: &'static str,
        log: Log,
    }

    impl Component for LoggedComponent {
        fn on_added(&mut self, _entity: &Entity) {
            self.log.borrow_mut().push(format!("component_added:{}", self.name));
        }

        fn on_removed(&mut self, _entity: &Entity) {
            self.log
                .borrow_mut()
                .push(format!("component_removed:{}", self.name));
        }
    }

    struct RemoveTarget {
        commands: WorldCommands,
        target: EntityId,
    }

    impl Behavior for RemoveTarget {
        fn on_update(&mut self, _entity: &Entity, _tpf: f64) -> BehaviorResult {
            self.commands.remove_entity(self.target);
            Ok(())
        }
    }

    struct SelfDestruct;

    impl Behavior for SelfDestruct {
        fn on_update(&mut self, entity: &Entity, _tpf: f64) -> BehaviorResult {
            entity.remove_from_world();
            Ok(())
        }
    }

    struct Failing;

    impl Behavior for Failing {
        fn on_update(&mut self, _entity: &Entity, _tpf: f64) -> BehaviorResult {
            Err(BehaviorError::failed("boom"))
        }
    }

    struct Spawner {
        commands: WorldCommands,
        spawned: bool,
    }

    impl Behavior for Spawner {
        fn on_update(&mut self, _entity: &Entity, _tpf: f64) -> BehaviorResult {
            if !self.spawned {
                let mut child = self.commands.create_entity()?;
                child.add_component(Marker)?;
                self.commands.add_entity(child)?;
                self.spawned = true;
            }
            Ok(())
        }
    }

    #[test]
    fn three_updates_increment_counter_to_three() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        let counter = entity.add_component(Counter::default()).expect("counter");
        entity.add_behavior(Increment::default()).expect("increment");
        world.add_entity(entity).expect("add");

        for _ in 0..3 {
            world.update(1.0 / 60.0).expect("update");
        }

        assert_eq!(counter.borrow().value, 3);
    }

    #[test]
    fn missing_dependency_rejects_add_and_world_stays_empty() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        let increment = entity.add_behavior(Increment::default()).expect("staged");

        let error = world.add_entity(entity).expect_err("missing counter");
        assert!(matches!(error, EcsError::MissingDependency { .. }));

        world.update(1.0 / 60.0).expect("update");
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.pending_add_count(), 0);
        assert_eq!(increment.owner(), None);
    }

    #[test]
    fn removed_entity_is_not_updated_and_detach_fires_once() {
        let log = new_log();
        let mut world = World::new();
        let mut entity = world.create_entity();
        entity.add_behavior(Recorder::new("b", &log)).expect("recorder");
        let id = world.add_entity(entity).expect("add");

        world.update(1.0 / 60.0).expect("first update");
        assert!(world.remove_entity(id));
        world.update(1.0 / 60.0).expect("second update");
        world.update(1.0 / 60.0).expect("third update");

        assert_eq!(entries(&log), vec!["added:b", "update:b", "removed:b"]);
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn entities_added_same_frame_attach_in_declaration_order() {
        let log = new_log();
        let mut world = World::new();
        let mut ids = Vec::new();
        for (component, behavior) in [("c1", "b1"), ("c2", "b2")] {
            let mut entity = world.create_entity();
            entity
                .add_behavior(Recorder::new(behavior, &log))
                .expect("recorder");
            entity
                .add_component(LoggedComponent {
                    name: component,
                    log: Rc::clone(&log),
                })
                .expect("component");
            ids.push(world.add_entity(entity).expect("add"));
        }
        assert_eq!(world.entity_count(), 0);

        let stats = world.update(0.5).expect("update");

        assert_eq!(stats.added, 2);
        assert_eq!(
            world.entities().map(Entity::id).collect::<Vec<_>>(),
            ids
        );
        assert_eq!(
            entries(&log),
            vec![
                "component_added:c1",
                "added:b1",
                "component_added:c2",
                "added:b2",
                "update:b1",
                "update:b2",
            ]
        );
    }

    #[test]
    fn failed_injection_on_live_entity_leaves_behavior_set_unchanged() {
        let mut world = World::new();
        let entity = world.create_entity();
        let id = world.add_entity(entity).expect("add");
        world.update(0.1).expect("update");

        let live = world.get_mut(id).expect("live");
        let error = live
            .add_behavior(Increment::default())
            .expect_err("counter missing");

        assert!(matches!(error, EcsError::MissingDependency { .. }));
        assert_eq!(live.behavior_count(), 0);
        assert!(!live.has_behavior::<Increment>());
    }

    #[test]
    fn injection_binds_before_on_added_on_live_entity() {
        let mut world = World::new();
        let entity = world.create_entity();
        let id = world.add_entity(entity).expect("add");
        world.update(0.1).expect("update");

        let live = world.get_mut(id).expect("live");
        let counter = live.add_component(Counter { value: 7 }).expect("counter");
        let increment = live.add_behavior(Increment::default()).expect("increment");

        assert!(increment.borrow().counter.is_bound());
        assert!(increment
            .borrow()
            .counter
            .handle()
            .expect("bound")
            .ptr_eq(&counter));
    }

    #[test]
    fn mid_frame_removal_stops_updates_for_rest_of_frame() {
        let log = new_log();
        let mut world = World::new();
        let commands = world.commands();

        let mut first = world.create_entity();
        let first_id = first.id();
        let mut second = world.create_entity();
        second
            .add_behavior(Recorder::new("victim", &log))
            .expect("recorder");
        let second_id = second.id();
        first
            .add_behavior(RemoveTarget {
                commands,
                target: second_id,
            })
            .expect("remover");
        world.add_entity(first).expect("first");
        world.add_entity(second).expect("second");

        world.update(0.1).expect("update");

        assert_eq!(entries(&log), vec!["added:victim", "removed:victim"]);
        assert!(world.get(first_id).is_some());
        assert!(world.get(second_id).is_none());
    }

    #[test]
    fn self_removal_skips_remaining_behaviors_of_entity() {
        let log = new_log();
        let mut world = World::new();
        let mut entity = world.create_entity();
        entity.add_behavior(SelfDestruct).expect("self destruct");
        entity
            .add_behavior(SecondRecorder(Recorder::new("after", &log)))
            .expect("recorder");
        world.add_entity(entity).expect("add");

        let stats = world.update(0.1).expect("update");

        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.removed, 1);
        assert_eq!(entries(&log), vec!["added:after", "removed:after"]);
    }

    #[test]
    fn removing_pending_add_cancels_without_callbacks() {
        let log = new_log();
        let mut world = World::new();
        let mut entity = world.create_entity();
        let recorder = entity.add_behavior(Recorder::new("p", &log)).expect("recorder");
        let id = world.add_entity(entity).expect("add");

        assert!(world.remove_entity(id));
        assert!(!world.remove_entity(id));
        world.update(0.1).expect("update");

        assert!(entries(&log).is_empty());
        assert_eq!(world.entity_count(), 0);
        assert_eq!(recorder.owner(), None);
    }

    #[test]
    fn behavior_reattach_requires_removal_first() {
        let log = new_log();
        let mut world = World::new();
        let mut first = world.create_entity();
        let recorder = first.add_behavior(Recorder::new("p", &log)).expect("recorder");
        let first_id = world.add_entity(first).expect("first");
        let second = world.create_entity();
        let second_id = world.add_entity(second).expect("second");
        world.update(0.1).expect("update");

        let error = world
            .get_mut(second_id)
            .expect("second live")
            .attach_behavior(recorder.clone())
            .expect_err("still owned by first");
        assert_eq!(
            error,
            EcsError::AlreadyAttached {
                type_name: std::any::type_name::<Recorder>(),
                owner: first_id,
            }
        );

        let detached = world
            .get_mut(first_id)
            .expect("first live")
            .remove_behavior::<Recorder>()
            .expect("not required")
            .expect("present");
        assert!(detached.ptr_eq(&recorder));
        assert_eq!(recorder.owner(), None);

        world
            .get_mut(second_id)
            .expect("second live")
            .attach_behavior(recorder.clone())
            .expect("free to attach");
        assert_eq!(recorder.owner(), Some(second_id));
        assert_eq!(
            entries(&log),
            vec!["added:p", "update:p", "removed:p", "added:p"]
        );
    }

    #[test]
    fn queries_hide_entities_marked_for_removal() {
        let mut world = World::new();
        let mut tagged = world.create_entity();
        tagged.add_component(Marker).expect("marker");
        let tagged_id = world.add_entity(tagged).expect("tagged");
        let plain = world.create_entity();
        world.add_entity(plain).expect("plain");
        world.update(0.1).expect("update");
        assert_eq!(world.with_component::<Marker>().count(), 1);

        assert!(world.remove_entity(tagged_id));

        assert_eq!(world.with_component::<Marker>().count(), 0);
        assert!(world.get(tagged_id).is_none());
        assert!(world.get_mut(tagged_id).is_none());
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn failing_behavior_keeps_buffers_consistent() {
        let log = new_log();
        let mut world = World::new();
        let mut broken = world.create_entity();
        broken.add_behavior(Failing).expect("failing");
        let broken_id = world.add_entity(broken).expect("broken");
        let mut healthy = world.create_entity();
        healthy.add_behavior(Recorder::new("h", &log)).expect("recorder");
        world.add_entity(healthy).expect("healthy");
        world.update(0.1).expect_err("first frame fails");

        assert!(world.remove_entity(broken_id));
        let stats = world.update(0.1).expect("removed entity is not dispatched");

        assert_eq!(stats.removed, 1);

        assert!(world.get(broken_id).is_none());
        assert_eq!(world.entity_count(), 1);
        assert_eq!(entries(&log), vec!["added:h", "update:h", "update:h"]);
    }

    #[test]
    fn frame_error_reports_each_failure_and_completes_pass() {
        let log = new_log();
        let mut world = World::new();
        let mut broken = world.create_entity();
        broken.add_behavior(Failing).expect("failing");
        let broken_id = world.add_entity(broken).expect("broken");
        let mut healthy = world.create_entity();
        healthy.add_behavior(Recorder::new("h", &log)).expect("recorder");
        world.add_entity(healthy).expect("healthy");

        let error = world.update(0.1).expect_err("failure surfaced");

        assert_eq!(error.failures.len(), 1);
        assert_eq!(error.failures[0].entity, broken_id);
        assert_eq!(error.failures[0].behavior, std::any::type_name::<Failing>());
        assert_eq!(error.stats.added, 2);
        assert_eq!(entries(&log), vec!["added:h", "update:h"]);
        assert_eq!(world.frame(), 1);
    }

    #[test]
    fn entity_spawned_during_update_goes_live_next_frame() {
        let mut world = World::new();
        let mut spawner = world.create_entity();
        spawner
            .add_behavior(Spawner {
                commands: world.commands(),
                spawned: false,
            })
            .expect("spawner");
        world.add_entity(spawner).expect("add");

        world.update(0.1).expect("first");
        assert_eq!(world.with_component::<Marker>().count(), 0);
        assert_eq!(world.pending_add_count(), 1);

        world.update(0.1).expect("second");
        assert_eq!(world.with_component::<Marker>().count(), 1);
    }

    #[test]
    fn foreign_entity_is_rejected() {
        let mut home = World::new();
        let mut other = World::new();
        let entity = home.create_entity();
        let id = entity.id();

        let error = other.add_entity(entity).expect_err("foreign");

        assert_eq!(error, EcsError::ForeignEntity { entity: id });
        assert_eq!(other.pending_add_count(), 0);
    }

    #[test]
    fn component_required_by_behavior_cannot_be_removed() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        entity.add_component(Counter::default()).expect("counter");
        entity.add_behavior(Increment::default()).expect("increment");
        let id = world.add_entity(entity).expect("add");
        world.update(0.1).expect("update");

        let live = world.get_mut(id).expect("live");
        let error = live.remove_component::<Counter>().expect_err("required");

        assert!(matches!(error, EcsError::RequiredBy { .. }));
        assert!(live.has_component::<Counter>());
        assert!(live.remove_component::<Marker>().expect("absent").is_none());
    }

    #[test]
    fn duplicate_component_type_is_rejected() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        entity.add_component(Counter::default()).expect("first");

        let error = entity
            .add_component(Counter { value: 2 })
            .expect_err("duplicate");

        assert!(matches!(error, EcsError::DuplicateComponent { .. }));
        assert_eq!(entity.component_count(), 1);
    }

    #[test]
    fn clear_purges_live_and_pending_entities() {
        let log = new_log();
        let mut world = World::new();
        let mut live = world.create_entity();
        live.add_behavior(Recorder::new("live", &log)).expect("recorder");
        world.add_entity(live).expect("live");
        world.update(0.1).expect("update");
        let mut queued = world.create_entity();
        queued
            .add_behavior(Recorder::new("queued", &log))
            .expect("recorder");
        world.add_entity(queued).expect("queued");

        assert_eq!(world.clear(), 1);

        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.pending_add_count(), 0);
        assert_eq!(
            entries(&log),
            vec!["added:live", "update:live", "removed:live"]
        );
    }

    #[test]
    fn snapshot_lists_live_entities_with_component_data() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        entity.add_component(Counter { value: 4 }).expect("counter");
        entity.add_component(Marker).expect("marker");
        let id = world.add_entity(entity).expect("add");
        world.update(0.1).expect("update");

        let snapshot = world.snapshot();
        let entity = snapshot.entity(id).expect("entity");

        assert_eq!(entity.components.len(), 2);
        assert_eq!(
            entity
                .component(std::any::type_name::<Counter>())
                .and_then(|component| component.data.clone()),
            Some(json!({ "value": 4 }))
        );
        assert_eq!(
            entity
                .component(std::any::type_name::<Marker>())
                .and_then(|component| component.data.clone()),
            None
        );
    }

    #[derive(Default)]
    struct Doubler {
        counter: Inject<Counter>,
        increment: Inject<Increment>,
    }

    impl Behavior for Doubler {
        fn injection_slots(&mut self) -> Vec<&mut dyn InjectSlot> {
            vec![&mut self.counter, &mut self.increment]
        }

        fn on_update(&mut self, _entity: &Entity, _tpf: f64) -> BehaviorResult {
            self.increment.handle()?;
            self.counter.get_mut()?.value += 10;
            Ok(())
        }
    }

    struct Armor;

    impl Component for Armor {
        fn required_components(&self) -> Vec<Dependency> {
            vec![Dependency::of::<Counter>()]
        }
    }

    #[test]
    fn behavior_can_inject_another_behavior() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        let doubler = entity.add_behavior(Doubler::default()).expect("doubler");
        let counter = entity.add_component(Counter::default()).expect("counter");
        let increment = entity.add_behavior(Increment::default()).expect("increment");
        world.add_entity(entity).expect("add");

        world.update(0.1).expect("frame");

        assert_eq!(counter.borrow().value, 10 + 1);
        let doubler = doubler.borrow();
        let injected = doubler.increment.handle().expect("injected increment");
        assert!(injected.ptr_eq(&increment));
    }

    #[test]
    fn missing_behavior_dependency_rejects_live_attach() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        entity.add_component(Counter::default()).expect("counter");
        let id = world.add_entity(entity).expect("add");
        world.update(0.1).expect("frame");

        let live = world.get_mut(id).expect("live entity");
        let error = live
            .add_behavior(Doubler::default())
            .expect_err("increment missing");

        assert_eq!(
            error,
            EcsError::MissingDependency {
                entity: id,
                dependent: std::any::type_name::<Doubler>(),
                missing: std::any::type_name::<Increment>(),
            }
        );
        assert_eq!(live.behavior_count(), 0);
    }

    #[test]
    fn required_component_is_checked_when_adding_entity() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        let id = entity.id();
        entity.add_component(Armor).expect("staged");

        let error = world.add_entity(entity).expect_err("counter missing");

        assert_eq!(
            error,
            EcsError::MissingDependency {
                entity: id,
                dependent: std::any::type_name::<Armor>(),
                missing: std::any::type_name::<Counter>(),
            }
        );
        assert_eq!(world.pending_add_count(), 0);
        world.update(0.1).expect("frame");
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn required_component_is_checked_on_live_entity() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        entity.add_component(Marker).expect("marker");
        let id = world.add_entity(entity).expect("add");
        world.update(0.1).expect("frame");

        let live = world.get_mut(id).expect("live entity");
        let error = live.add_component(Armor).expect_err("counter missing");
        assert!(matches!(error, EcsError::MissingDependency { .. }));
        assert!(!live.has_component::<Armor>());

        live.add_component(Counter::default()).expect("counter");
        live.add_component(Armor).expect("armor");
        assert_eq!(live.component_count(), 3);
    }

    #[test]
    fn borrowed_component_defers_the_add_until_released() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        let counter = entity.add_component(Counter::default()).expect("counter");
        entity.add_behavior(Increment::default()).expect("increment");
        let id = world.add_entity(entity).expect("add");

        let guard = counter.borrow();
        let stats = world.update(0.1).expect("frame with borrowed component");
        drop(guard);

        assert_eq!(stats.added, 0);
        assert!(world.get(id).is_none());
        assert_eq!(world.pending_add_count(), 1);

        let stats = world.update(0.1).expect("frame");
        assert_eq!(stats.added, 1);
        assert_eq!(counter.borrow().value, 1);
    }

    #[test]
    fn borrowed_behavior_defers_without_callbacks() {
        let log = new_log();
        let mut world = World::new();
        let mut entity = world.create_entity();
        let recorder = entity
            .add_behavior(Recorder::new("held", &log))
            .expect("recorder");
        world.add_entity(entity).expect("add");

        let guard = recorder.borrow();
        world.update(0.1).expect("deferred frame");
        drop(guard);
        assert!(entries(&log).is_empty());
        assert_eq!(world.entity_count(), 0);

        world.update(0.1).expect("frame");
        assert_eq!(entries(&log), vec!["added:held", "update:held"]);
    }
}
