//! Entity/component runtime with behavior dependency injection and an
//! application state machine driven by a frame loop.

pub mod app;
pub mod ecs;
mod settings;

pub use app::{
    run_loop, AppBuilder, AppContext, AppError, AppState, AppStateKey, AppStateMachine,
    FailurePolicy, FrameClock, FrameSource, GameVars, InputBindings, InputError, ListenerId,
    LoadRequest, LoopConfig, LoopMetricsSnapshot, LoopSummary, MetricsHandle, MouseButton,
    PhysicsStep, PlayEvent, RealtimeFrameSource, SceneHandle, StateTransition, SteppedFrameSource, TickStatus, Timestep,
    Trigger, UserAction, VarError, VarKind, VarValue, SLOW_FRAME_ENV_VAR,
};
pub use ecs::{
    Behavior, BehaviorError, BehaviorFailure, BehaviorResult, Component, ComponentSnapshot,
    Dependency, EcsError, Entity, EntityId, EntitySnapshot, EntityState, FrameError, FrameStats,
    Handle, Inject, InjectSlot, World, WorldCommands, WorldSnapshot,
};
pub use settings::{GameSettings, SettingsError};
