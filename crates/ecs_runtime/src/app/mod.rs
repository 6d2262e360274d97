mod context;
mod error;
mod input;
mod loop_runner;
mod metrics;
mod pipeline;
mod state;
mod state_machine;
mod states;
mod vars;

pub use context::{AppContext, LoadRequest, PhysicsStep};
pub use error::AppError;
pub use input::{InputBindings, InputError, MouseButton, Trigger, UserAction};
pub use loop_runner::{
    run_loop, FailurePolicy, FrameClock, FrameSource, LoopConfig, LoopSummary,
    RealtimeFrameSource, SteppedFrameSource, Timestep, SLOW_FRAME_ENV_VAR,
};
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
pub use pipeline::{AppBuilder, AppCallbacks, LoadStateFn, SaveStateFn, SetupFn, UpdateFn};
pub use state::{
    AppState, AppStateKey, ListenerId, PlayEvent, SceneHandle, StateTransition, TickStatus,
};
pub use state_machine::AppStateMachine;
pub use vars::{GameVars, VarError, VarKind, VarValue};
