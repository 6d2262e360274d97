use ecs_runtime::{
    Behavior, BehaviorResult, EcsError, Entity, EntityId, Inject, InjectSlot, WorldCommands,
};
use tracing::debug;

use super::components::{Coin, Intent, Lifetime, Position, Velocity};

pub(crate) const COIN_LIFETIME_SECONDS: f64 = 6.0;
const GOLDEN_ANGLE_RADIANS: f64 = 2.399_963_229_728_653;

/// Turns the entity's intent into a velocity of fixed magnitude.
pub(crate) struct Drive {
    speed: f64,
    intent: Inject<Intent>,
    velocity: Inject<Velocity>,
}

impl Drive {
    pub(crate) fn new(speed: f64) -> Self {
        Self {
            speed,
            intent: Inject::new(),
            velocity: Inject::new(),
        }
    }
}

impl Behavior for Drive {
    fn injection_slots(&mut self) -> Vec<&mut dyn InjectSlot> {
        vec![&mut self.intent, &mut self.velocity]
    }

    fn on_update(&mut self, _entity: &Entity, _tpf: f64) -> BehaviorResult {
        let intent = *self.intent.get()?;
        let mut velocity = self.velocity.get_mut()?;
        let length = intent.x.hypot(intent.y);
        if length <= f64::EPSILON {
            *velocity = Velocity::default();
        } else {
            velocity.x = intent.x / length * self.speed;
            velocity.y = intent.y / length * self.speed;
        }
        Ok(())
    }
}

/// Counts the entity's `Lifetime` down and removes it at zero.
pub(crate) struct Expire {
    lifetime: Inject<Lifetime>,
}

impl Expire {
    pub(crate) fn new() -> Self {
        Self {
            lifetime: Inject::new(),
        }
    }
}

impl Behavior for Expire {
    fn injection_slots(&mut self) -> Vec<&mut dyn InjectSlot> {
        vec![&mut self.lifetime]
    }

    fn on_update(&mut self, entity: &Entity, tpf: f64) -> BehaviorResult {
        let mut lifetime = self.lifetime.get_mut()?;
        lifetime.remaining -= tpf;
        if lifetime.remaining <= 0.0 && entity.remove_from_world() {
            debug!(entity = %entity.id(), "entity_expired");
        }
        Ok(())
    }
}

/// Drops a coin every `interval` seconds on a spiral around the origin.
pub(crate) struct CoinSpawner {
    commands: WorldCommands,
    interval: f64,
    elapsed: f64,
    spawned: u32,
}

impl CoinSpawner {
    pub(crate) fn new(commands: WorldCommands, interval: f64) -> Self {
        Self {
            commands,
            interval: interval.max(f64::EPSILON),
            elapsed: 0.0,
            spawned: 0,
        }
    }
}

impl Behavior for CoinSpawner {
    fn on_update(&mut self, _entity: &Entity, tpf: f64) -> BehaviorResult {
        self.elapsed += tpf;
        while self.elapsed >= self.interval {
            self.elapsed -= self.interval;
            let position = spiral_position(self.spawned);
            let id = spawn_coin(&self.commands, position, 1)?;
            self.spawned += 1;
            debug!(
                entity = %id,
                x = position.x,
                y = position.y,
                total = self.spawned,
                "coin_spawned"
            );
        }
        Ok(())
    }
}

fn spiral_position(index: u32) -> Position {
    let angle = f64::from(index) * GOLDEN_ANGLE_RADIANS;
    let radius = 2.0 + f64::from(index % 4);
    Position::new(angle.cos() * radius, angle.sin() * radius)
}

pub(crate) fn spawn_coin(
    commands: &WorldCommands,
    position: Position,
    value: u32,
) -> Result<EntityId, EcsError> {
    let mut coin = commands.create_entity()?;
    coin.add_component(position)?;
    coin.add_component(Coin { value })?;
    coin.add_component(Lifetime {
        remaining: COIN_LIFETIME_SECONDS,
    })?;
    coin.add_behavior(Expire::new())?;
    commands.add_entity(coin)
}

#[cfg(test)]
mod tests {
    use ecs_runtime::World;

    use super::*;

    #[test]
    fn drive_normalizes_intent_to_speed() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        entity.add_component(Position::default()).expect("position");
        entity
            .add_component(Intent { x: 3.0, y: 4.0 })
            .expect("intent");
        let velocity = entity.add_component(Velocity::default()).expect("velocity");
        entity.add_behavior(Drive::new(2.0)).expect("drive");
        world.add_entity(entity).expect("add");

        world.update(0.1).expect("frame");

        let velocity = *velocity.borrow();
        assert!((velocity.x - 1.2).abs() < 1e-9);
        assert!((velocity.y - 1.6).abs() < 1e-9);
    }

    #[test]
    fn drive_without_velocity_is_rejected() {
        let mut world = World::new();
        let mut entity = world.create_entity();
        entity.add_component(Intent::default()).expect("intent");
        entity.add_behavior(Drive::new(1.0)).expect("drive");

        let error = world.add_entity(entity).expect_err("missing velocity");

        assert!(matches!(error, EcsError::MissingDependency { .. }));
    }

    #[test]
    fn expired_coin_leaves_the_world() {
        let mut world = World::new();
        let commands = world.commands();
        let id = spawn_coin(&commands, Position::default(), 1).expect("coin");
        world.update(0.0).expect("spawn frame");
        assert!(world.get(id).is_some());

        world.update(COIN_LIFETIME_SECONDS - 1.0).expect("frame");
        assert!(world.get(id).is_some());
        world.update(1.0).expect("expire frame");

        assert!(world.get(id).is_none());
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn spawner_emits_one_coin_per_interval() {
        let mut world = World::new();
        let mut spawner = world.create_entity();
        spawner
            .add_behavior(CoinSpawner::new(world.commands(), 0.5))
            .expect("spawner");
        world.add_entity(spawner).expect("add");

        for _ in 0..5 {
            world.update(0.25).expect("frame");
        }

        assert_eq!(world.with_component::<Coin>().count(), 2);
    }
}
