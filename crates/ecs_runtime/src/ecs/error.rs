use thiserror::Error;

use super::EntityId;

/// Configuration and invariant errors raised while building or mutating
/// entities. All of them are recoverable: the rejected operation leaves
/// the entity and the world exactly as they were.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    #[error("entity {entity} already has a component of type {type_name}")]
    DuplicateComponent {
        entity: EntityId,
        type_name: &'static str,
    },
    #[error("entity {entity} already has a behavior of type {type_name}")]
    DuplicateBehavior {
        entity: EntityId,
        type_name: &'static str,
    },
    #[error("{type_name} is already attached to entity {owner}")]
    AlreadyAttached {
        type_name: &'static str,
        owner: EntityId,
    },
    #[error("{dependent} on entity {entity} requires {missing}, which is not attached")]
    MissingDependency {
        entity: EntityId,
        dependent: &'static str,
        missing: &'static str,
    },
    #[error("cannot remove {type_name} from entity {entity}: required by {dependent}")]
    RequiredBy {
        entity: EntityId,
        type_name: &'static str,
        dependent: &'static str,
    },
    #[error("entity {entity} was created by a different world")]
    ForeignEntity { entity: EntityId },
    #[error("entity {entity} is already live or queued in this world")]
    DuplicateEntity { entity: EntityId },
    #[error("entity {entity} has been removed")]
    EntityRemoved { entity: EntityId },
    #[error("dependency {type_name} has not been injected")]
    NotInjected { type_name: &'static str },
    #[error("the owning world has been dropped")]
    WorldDropped,
    #[error("{type_name} is already borrowed")]
    BorrowConflict { type_name: &'static str },
}
