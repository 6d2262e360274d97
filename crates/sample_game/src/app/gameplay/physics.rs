use ecs_runtime::{PhysicsStep, World};
use tracing::warn;

use super::components::{Position, Velocity};

/// Explicit Euler integration of `Velocity` into `Position`, clamped to a
/// square arena centred on the origin.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Integrator {
    half_extent: f64,
}

impl Integrator {
    pub(crate) fn new(half_extent: f64) -> Self {
        Self {
            half_extent: half_extent.abs(),
        }
    }
}

impl PhysicsStep for Integrator {
    fn step(&mut self, world: &mut World, tpf: f64) {
        for entity in world.with_component::<Velocity>() {
            let (Some(position), Some(velocity)) = (
                entity.component::<Position>(),
                entity.component::<Velocity>(),
            ) else {
                continue;
            };
            let (Ok(mut position), Ok(velocity)) =
                (position.try_borrow_mut(), velocity.try_borrow())
            else {
                warn!(entity = %entity.id(), "physics_borrow_skipped");
                continue;
            };
            position.x = (position.x + velocity.x * tpf).clamp(-self.half_extent, self.half_extent);
            position.y = (position.y + velocity.y * tpf).clamp(-self.half_extent, self.half_extent);
        }
    }
}
