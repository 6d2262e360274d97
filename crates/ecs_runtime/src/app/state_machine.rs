use std::fmt;

use serde_json::{json, Value};
use tracing::{debug, info};

use super::pipeline::SharedCallbacks;
use super::state::Listeners;
use super::{
    AppContext, AppError, AppState, AppStateKey, ListenerId, LoadRequest, PlayEvent, SceneHandle,
    StateTransition, TickStatus,
};

struct StateRuntime {
    state: Box<dyn AppState>,
}

struct StateSet {
    loading: StateRuntime,
    main_menu: StateRuntime,
    play: StateRuntime,
    paused: StateRuntime,
}

impl StateSet {
    fn runtime_mut(&mut self, key: AppStateKey) -> &mut StateRuntime {
        match key {
            AppStateKey::Loading => &mut self.loading,
            AppStateKey::MainMenu => &mut self.main_menu,
            AppStateKey::Play => &mut self.play,
            AppStateKey::Paused => &mut self.paused,
        }
    }

    fn runtime_ref(&self, key: AppStateKey) -> &StateRuntime {
        match key {
            AppStateKey::Loading => &self.loading,
            AppStateKey::MainMenu => &self.main_menu,
            AppStateKey::Play => &self.play,
            AppStateKey::Paused => &self.paused,
        }
    }
}

/// Stack of application states with one current state on top.
///
/// `transition` applies immediately. Transitions requested from inside an
/// update through [`AppContext::request_transition`] are applied after the
/// update pass returns, one per frame, the last request winning.
pub struct AppStateMachine {
    states: StateSet,
    stack: Vec<AppStateKey>,
    context: AppContext,
    callbacks: SharedCallbacks,
    exit_listeners: Listeners<dyn FnMut()>,
    play_listeners: Listeners<dyn FnMut(PlayEvent)>,
    exited: bool,
}

impl AppStateMachine {
    pub(crate) fn new(
        loading: Box<dyn AppState>,
        main_menu: Box<dyn AppState>,
        play: Box<dyn AppState>,
        paused: Box<dyn AppState>,
        context: AppContext,
        callbacks: SharedCallbacks,
    ) -> Self {
        Self {
            states: StateSet {
                loading: StateRuntime { state: loading },
                main_menu: StateRuntime { state: main_menu },
                play: StateRuntime { state: play },
                paused: StateRuntime { state: paused },
            },
            stack: Vec::new(),
            context,
            callbacks,
            exit_listeners: Listeners::new(),
            play_listeners: Listeners::new(),
            exited: false,
        }
    }

    pub(crate) fn start(&mut self) -> Result<(), AppError> {
        self.enter(AppStateKey::Loading)
    }

    pub fn current(&self) -> Option<AppStateKey> {
        self.stack.last().copied()
    }

    /// Bottom to top.
    pub fn stack(&self) -> &[AppStateKey] {
        &self.stack
    }

    pub fn current_scene(&self) -> Option<SceneHandle> {
        self.current()
            .map(|key| self.states.runtime_ref(key).state.scene())
    }

    pub fn is_exited(&self) -> bool {
        self.exited
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut AppContext {
        &mut self.context
    }

    /// Runs once, after the stack is torn down on exit.
    pub fn add_exit_listener(&mut self, listener: impl FnMut() + 'static) -> ListenerId {
        self.exit_listeners.add(Box::new(listener))
    }

    pub fn remove_exit_listener(&mut self, id: ListenerId) -> bool {
        self.exit_listeners.remove(id)
    }

    /// Runs after Play's `on_enter` and after its `on_exit`.
    pub fn add_play_listener(&mut self, listener: impl FnMut(PlayEvent) + 'static) -> ListenerId {
        self.play_listeners.add(Box::new(listener))
    }

    pub fn remove_play_listener(&mut self, id: ListenerId) -> bool {
        self.play_listeners.remove(id)
    }

    /// Dispatches one frame to the current state, then applies the
    /// transition it requested, if any.
    pub fn on_update(&mut self, tpf: f64) -> Result<TickStatus, AppError> {
        let Some(key) = self.current().filter(|_| !self.exited) else {
            return Ok(TickStatus::Exited);
        };
        self.context.advance_tick();
        let update = self
            .states
            .runtime_mut(key)
            .state
            .on_update(&mut self.context, tpf);

        let applied = match self.context.take_transition() {
            Some(transition) => self.apply(transition),
            None => Ok(()),
        };
        update?;
        applied?;

        Ok(if self.exited {
            TickStatus::Exited
        } else {
            TickStatus::Running
        })
    }

    pub fn transition(&mut self, transition: StateTransition) -> Result<(), AppError> {
        self.apply(transition)
    }

    /// Unwinds to Loading with a new-game request.
    pub fn start_new_game(&mut self) -> Result<(), AppError> {
        self.context.set_load_request(LoadRequest::NewGame);
        self.reset_to(AppStateKey::Loading)
    }

    /// Unwinds to Loading; the pipeline hands `data` to `load_state`.
    pub fn load_save(&mut self, data: Value) -> Result<(), AppError> {
        self.context.set_load_request(LoadRequest::Save(data));
        self.reset_to(AppStateKey::Loading)
    }

    pub fn open_main_menu(&mut self) -> Result<(), AppError> {
        self.reset_to(AppStateKey::MainMenu)
    }

    /// Returns `false` unless Play is current.
    pub fn pause(&mut self) -> Result<bool, AppError> {
        if self.current() != Some(AppStateKey::Play) {
            return Ok(false);
        }
        self.apply(StateTransition::Push(AppStateKey::Paused))?;
        Ok(true)
    }

    /// Returns `false` unless Paused is current.
    pub fn resume(&mut self) -> Result<bool, AppError> {
        if self.current() != Some(AppStateKey::Paused) {
            return Ok(false);
        }
        self.apply(StateTransition::Pop)?;
        Ok(true)
    }

    pub fn exit(&mut self) {
        self.shutdown();
    }

    /// Save data from the `save_state` callback, or a snapshot of the world
    /// and game variables when none is registered.
    pub fn save_state(&self) -> Result<Value, AppError> {
        let mut callbacks = self.callbacks.borrow_mut();
        if let Some(save_state) = callbacks.save_state.as_mut() {
            return save_state(&self.context);
        }
        let world = serde_json::to_value(self.context.world.snapshot())
            .map_err(AppError::EncodeState)?;
        Ok(json!({
            "world": world,
            "vars": self.context.vars.to_json(),
        }))
    }

    fn apply(&mut self, transition: StateTransition) -> Result<(), AppError> {
        if self.exited {
            debug!(%transition, "transition_after_exit_ignored");
            return Ok(());
        }
        debug!(%transition, current = ?self.current(), "transition_applying");
        match transition {
            StateTransition::Set(key) => {
                if self.current() == Some(key) {
                    return Ok(());
                }
                self.ensure_not_stacked(key, transition)?;
                if let Some(current) = self.stack.pop() {
                    self.leave(current);
                }
                self.enter(key)
            }
            StateTransition::Push(key) => {
                self.ensure_not_stacked(key, transition)?;
                if let Some(current) = self.current() {
                    self.states
                        .runtime_mut(current)
                        .state
                        .on_pause(&mut self.context);
                    debug!(state = ?current, "state_paused");
                }
                self.enter(key)
            }
            StateTransition::Pop => {
                if self.stack.len() < 2 {
                    return Err(AppError::InvalidTransition {
                        current: self.current(),
                        transition,
                    });
                }
                if let Some(current) = self.stack.pop() {
                    self.leave(current);
                }
                if let Some(resumed) = self.current() {
                    self.states
                        .runtime_mut(resumed)
                        .state
                        .on_resume(&mut self.context);
                    debug!(state = ?resumed, "state_resumed");
                }
                Ok(())
            }
            StateTransition::Exit => {
                self.shutdown();
                Ok(())
            }
        }
    }

    fn reset_to(&mut self, key: AppStateKey) -> Result<(), AppError> {
        if self.exited {
            return Err(AppError::InvalidTransition {
                current: None,
                transition: StateTransition::Set(key),
            });
        }
        while let Some(current) = self.stack.pop() {
            self.leave(current);
        }
        self.enter(key)
    }

    fn ensure_not_stacked(
        &self,
        key: AppStateKey,
        transition: StateTransition,
    ) -> Result<(), AppError> {
        if self.stack.contains(&key) {
            return Err(AppError::InvalidTransition {
                current: self.current(),
                transition,
            });
        }
        Ok(())
    }

    fn enter(&mut self, key: AppStateKey) -> Result<(), AppError> {
        self.stack.push(key);
        let runtime = self.states.runtime_mut(key);
        let scene = runtime.state.scene();
        runtime.state.on_enter(&mut self.context)?;
        info!(state = ?key, scene = scene.id(), depth = self.stack.len(), "state_entered");
        if key == AppStateKey::Play {
            self.notify_play(PlayEvent::Entered);
        }
        Ok(())
    }

    fn leave(&mut self, key: AppStateKey) {
        self.states
            .runtime_mut(key)
            .state
            .on_exit(&mut self.context);
        info!(state = ?key, "state_exited");
        if key == AppStateKey::Play {
            self.notify_play(PlayEvent::Exited);
        }
    }

    fn notify_play(&mut self, event: PlayEvent) {
        for listener in self.play_listeners.iter_mut() {
            listener(event);
        }
    }

    fn shutdown(&mut self) {
        if self.exited {
            return;
        }
        while let Some(current) = self.stack.pop() {
            self.leave(current);
        }
        let purged = self.context.world.clear();
        self.exited = true;
        for listener in self.exit_listeners.iter_mut() {
            listener();
        }
        info!(purged, tick = self.context.tick(), "app_exited");
    }
}

impl fmt::Debug for AppStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppStateMachine")
            .field("stack", &self.stack)
            .field("exited", &self.exited)
            .field("exit_listeners", &self.exit_listeners.len())
            .field("play_listeners", &self.play_listeners.len())
            .field("context", &self.context)
            .finish()
    }
}
