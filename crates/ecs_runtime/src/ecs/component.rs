use std::any::{Any, TypeId};
use std::fmt;

use super::Entity;

/// A type an attached component or behavior needs to find on its entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
}

impl Dependency {
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Typed data attached to exactly one entity.
///
/// Lifecycle hooks run synchronously while the owning world applies its
/// add/remove phases (or while a live entity is mutated directly).
pub trait Component: Any {
    /// Component types that must already be attached for this one to attach.
    fn required_components(&self) -> Vec<Dependency> {
        Vec::new()
    }

    fn on_added(&mut self, _entity: &Entity) {}

    fn on_removed(&mut self, _entity: &Entity) {}

    /// Plain data view for external serializers. `None` keeps the
    /// component out of snapshots' data (its type name is still listed).
    fn snapshot(&self) -> Option<serde_json::Value> {
        None
    }
}
