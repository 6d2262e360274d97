use ecs_runtime::{Component, Dependency};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Position {
    pub(crate) x: f64,
    pub(crate) y: f64,
}

impl Position {
    pub(crate) fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub(crate) fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl Component for Position {
    fn snapshot(&self) -> Option<Value> {
        serde_json::to_value(self).ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Velocity {
    pub(crate) x: f64,
    pub(crate) y: f64,
}

impl Component for Velocity {
    fn required_components(&self) -> Vec<Dependency> {
        vec![Dependency::of::<Position>()]
    }

    fn snapshot(&self) -> Option<Value> {
        serde_json::to_value(self).ok()
    }
}

/// Desired movement direction. Not normalized; `Drive` does that.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Intent {
    pub(crate) x: f64,
    pub(crate) y: f64,
}

impl Component for Intent {}

/// Manual steering accumulated from held input this frame. Consumed by the
/// game's update hook, which falls back to autopilot when it is idle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Steering {
    pub(crate) x: f64,
    pub(crate) y: f64,
}

impl Steering {
    pub(crate) fn is_idle(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

impl Component for Steering {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Wallet {
    pub(crate) coins: u32,
}

impl Component for Wallet {
    fn snapshot(&self) -> Option<Value> {
        serde_json::to_value(self).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Player;

impl Component for Player {
    fn required_components(&self) -> Vec<Dependency> {
        vec![Dependency::of::<Position>(), Dependency::of::<Wallet>()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct Coin {
    pub(crate) value: u32,
}

impl Component for Coin {
    fn required_components(&self) -> Vec<Dependency> {
        vec![Dependency::of::<Position>()]
    }

    fn snapshot(&self) -> Option<Value> {
        serde_json::to_value(self).ok()
    }
}

/// Seconds left before the entity removes itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Lifetime {
    pub(crate) remaining: f64,
}

impl Component for Lifetime {}
