use serde_json::Value;
use tracing::debug;

use crate::ecs::World;
use crate::GameSettings;

use super::{GameVars, InputBindings, StateTransition};

/// External physics collaborator, stepped by the Play state before entity
/// behaviors run.
pub trait PhysicsStep {
    fn step(&mut self, world: &mut World, tpf: f64);
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadRequest {
    NewGame,
    Save(Value),
}

/// Services handed to every state hook and pipeline callback.
pub struct AppContext {
    pub world: World,
    pub vars: GameVars,
    pub input: InputBindings,
    pub settings: GameSettings,
    physics: Option<Box<dyn PhysicsStep>>,
    tick: u64,
    requested_transition: Option<StateTransition>,
    load_request: Option<LoadRequest>,
}

impl AppContext {
    pub fn new(settings: GameSettings) -> Self {
        Self {
            world: World::new(),
            vars: GameVars::new(),
            input: InputBindings::new(),
            settings,
            physics: None,
            tick: 0,
            requested_transition: None,
            load_request: None,
        }
    }

    /// Buffers a transition to apply after the current update pass. Only
    /// one is honoured per frame; a later request replaces an earlier one.
    pub fn request_transition(&mut self, transition: StateTransition) {
        if let Some(previous) = self.requested_transition.replace(transition) {
            debug!(?previous, replacement = ?transition, "transition_request_replaced");
        }
    }

    pub fn pending_transition(&self) -> Option<StateTransition> {
        self.requested_transition
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn set_physics(&mut self, physics: impl PhysicsStep + 'static) {
        self.physics = Some(Box::new(physics));
    }

    pub fn has_physics(&self) -> bool {
        self.physics.is_some()
    }

    pub(crate) fn take_transition(&mut self) -> Option<StateTransition> {
        self.requested_transition.take()
    }

    pub(crate) fn advance_tick(&mut self) {
        self.tick = self.tick.saturating_add(1);
    }

    pub(crate) fn set_load_request(&mut self, request: LoadRequest) {
        self.load_request = Some(request);
    }

    pub(crate) fn take_load_request(&mut self) -> Option<LoadRequest> {
        self.load_request.take()
    }

    pub(crate) fn step_physics(&mut self, tpf: f64) {
        if let Some(physics) = self.physics.as_mut() {
            physics.step(&mut self.world, tpf);
        }
    }

    /// Handlers see `self.input` as it stands, and may bind new actions.
    pub(crate) fn dispatch_input(&mut self) {
        InputBindings::dispatch(self);
    }

    /// Drops everything owned by the previous game.
    pub(crate) fn reset_game(&mut self) {
        let purged = self.world.clear();
        self.vars.clear();
        self.physics = None;
        debug!(purged, "game_state_reset");
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("world", &self.world)
            .field("vars", &self.vars)
            .field("input", &self.input)
            .field("physics", &self.physics.is_some())
            .field("tick", &self.tick)
            .field("requested_transition", &self.requested_transition)
            .finish()
    }
}
