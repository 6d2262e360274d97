use std::any::Any;
use std::cell::{Ref, RefMut};
use std::rc::Rc;

use thiserror::Error;

use super::{Dependency, EcsError, Entity, Handle};

#[derive(Debug, Error)]
pub enum BehaviorError {
    #[error(transparent)]
    Ecs(#[from] EcsError),
    #[error("{0}")]
    Failed(String),
}

impl BehaviorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type BehaviorResult = Result<(), BehaviorError>;

/// Per-frame logic bound to one entity.
///
/// Dependencies are declared as [`Inject`] fields and listed by
/// [`Behavior::injection_slots`]. They are bound before `on_added` runs and
/// unbound after `on_removed`.
pub trait Behavior: Any {
    fn injection_slots(&mut self) -> Vec<&mut dyn InjectSlot> {
        Vec::new()
    }

    fn on_added(&mut self, _entity: &Entity) {}

    fn on_update(&mut self, entity: &Entity, tpf: f64) -> BehaviorResult;

    fn on_removed(&mut self, _entity: &Entity) {}
}

/// A field that receives a component or behavior handle at attach time.
pub trait InjectSlot {
    fn dependency(&self) -> Dependency;
    /// Returns `false` if `resolved` is not a handle of the slot's type.
    fn bind(&mut self, resolved: &Rc<dyn Any>) -> bool;
    fn unbind(&mut self);
}

/// Injected dependency of type `T` (a component or another behavior).
pub struct Inject<T: 'static> {
    handle: Option<Handle<T>>,
}

impl<T: 'static> Inject<T> {
    pub fn new() -> Self {
        Self { handle: None }
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Result<&Handle<T>, EcsError> {
        self.handle.as_ref().ok_or(EcsError::NotInjected {
            type_name: std::any::type_name::<T>(),
        })
    }

    pub fn get(&self) -> Result<Ref<'_, T>, EcsError> {
        self.handle()?.try_borrow()
    }

    pub fn get_mut(&self) -> Result<RefMut<'_, T>, EcsError> {
        self.handle()?.try_borrow_mut()
    }
}

impl<T: 'static> Default for Inject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> InjectSlot for Inject<T> {
    fn dependency(&self) -> Dependency {
        Dependency::of::<T>()
    }

    fn bind(&mut self, resolved: &Rc<dyn Any>) -> bool {
        match Handle::<T>::from_any(resolved) {
            Some(handle) => {
                self.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    fn unbind(&mut self) {
        self.handle = None;
    }
}
