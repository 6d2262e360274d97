//! Entities, their components and behaviors, and the world that owns them.

mod behavior;
mod component;
mod entity;
mod error;
mod handle;
mod snapshot;
mod world;

pub use behavior::{Behavior, BehaviorError, BehaviorResult, Inject, InjectSlot};
pub use component::{Component, Dependency};
pub use entity::{Entity, EntityId, EntityIdAllocator, EntityState};
pub use error::EcsError;
pub use handle::Handle;
pub use snapshot::{ComponentSnapshot, EntitySnapshot, WorldSnapshot};
pub use world::{BehaviorFailure, FrameError, FrameStats, World, WorldCommands};
