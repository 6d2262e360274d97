use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use super::{EcsError, EntityId};

pub(crate) struct Slot<T: ?Sized> {
    owner: Cell<Option<EntityId>>,
    value: RefCell<T>,
}

/// Shared reference to a component or behavior attached to an entity.
///
/// Handles are cheap to clone and single-threaded. The entity owns the
/// attachment; a handle only keeps the value alive and remembers which
/// entity it currently belongs to.
pub struct Handle<T: ?Sized + 'static> {
    pub(crate) inner: Rc<Slot<T>>,
}

impl<T: 'static> Handle<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(Slot {
                owner: Cell::new(None),
                value: RefCell::new(value),
            }),
        }
    }

    pub(crate) fn as_any(&self) -> Rc<dyn Any> {
        self.inner.clone()
    }

    pub(crate) fn from_any(any: &Rc<dyn Any>) -> Option<Self> {
        any.clone()
            .downcast::<Slot<T>>()
            .ok()
            .map(|inner| Self { inner })
    }
}

impl<T: ?Sized + 'static> Handle<T> {
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.value.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.value.borrow_mut()
    }

    pub fn try_borrow(&self) -> Result<Ref<'_, T>, EcsError> {
        self.inner
            .value
            .try_borrow()
            .map_err(|_| EcsError::BorrowConflict {
                type_name: std::any::type_name::<T>(),
            })
    }

    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, T>, EcsError> {
        self.inner
            .value
            .try_borrow_mut()
            .map_err(|_| EcsError::BorrowConflict {
                type_name: std::any::type_name::<T>(),
            })
    }

    /// Entity this value is attached (or staged) to.
    pub fn owner(&self) -> Option<EntityId> {
        self.inner.owner.get()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_owner(&self, owner: Option<EntityId>) {
        self.inner.owner.set(owner);
    }
}

impl<T: ?Sized + 'static> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("type", &std::any::type_name::<T>())
            .field("owner", &self.owner())
            .finish()
    }
}
