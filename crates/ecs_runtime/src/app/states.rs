use tracing::info;

use super::pipeline::{run_setup, run_update, SharedCallbacks};
use super::{
    AppContext, AppError, AppState, AppStateKey, LoadRequest, SceneHandle, StateTransition,
};

/// Runs the load pipeline on its first update, then moves to Play (or to
/// MainMenu when nothing was requested and menus are enabled).
pub(crate) struct LoadingState {
    callbacks: SharedCallbacks,
}

impl LoadingState {
    pub(crate) fn new(callbacks: SharedCallbacks) -> Self {
        Self { callbacks }
    }

    fn load(&mut self, context: &mut AppContext, request: &LoadRequest) -> Result<(), AppError> {
        context.reset_game();
        let mut callbacks = self.callbacks.borrow_mut();
        run_setup(&mut callbacks.init_game_vars, "init_game_vars", context)?;
        match request {
            LoadRequest::NewGame => run_setup(&mut callbacks.init_game, "init_game", context)?,
            LoadRequest::Save(data) => {
                let load_state = callbacks
                    .load_state
                    .as_mut()
                    .ok_or(AppError::MissingCallback {
                        stage: "load_state",
                    })?;
                load_state(context, data)?;
            }
        }
        run_setup(&mut callbacks.init_physics, "init_physics", context)?;
        run_setup(&mut callbacks.init_ui, "init_ui", context)?;
        info!(
            from_save = matches!(request, LoadRequest::Save(_)),
            queued_entities = context.world.pending_add_count(),
            vars = context.vars.len(),
            "game_loaded"
        );
        Ok(())
    }
}

impl AppState for LoadingState {
    fn scene(&self) -> SceneHandle {
        SceneHandle::for_key(AppStateKey::Loading)
    }

    fn on_update(&mut self, context: &mut AppContext, _tpf: f64) -> Result<(), AppError> {
        let request = match context.take_load_request() {
            Some(request) => request,
            None if context.settings.menu_enabled => {
                context.request_transition(StateTransition::Set(AppStateKey::MainMenu));
                return Ok(());
            }
            None => LoadRequest::NewGame,
        };
        if let Err(error) = self.load(context, &request) {
            // A failed load keeps its request; the next frame retries it.
            context.set_load_request(request);
            return Err(error);
        }
        context.request_transition(StateTransition::Set(AppStateKey::Play));
        Ok(())
    }
}

/// Input dispatch, physics, the world's update pass, then game hooks.
pub(crate) struct PlayState {
    callbacks: SharedCallbacks,
}

impl PlayState {
    pub(crate) fn new(callbacks: SharedCallbacks) -> Self {
        Self { callbacks }
    }
}

impl AppState for PlayState {
    fn scene(&self) -> SceneHandle {
        SceneHandle::for_key(AppStateKey::Play)
    }

    fn on_pause(&mut self, context: &mut AppContext) {
        context.input.release_all();
    }

    fn on_update(&mut self, context: &mut AppContext, tpf: f64) -> Result<(), AppError> {
        context.dispatch_input();
        context.step_physics(tpf);
        let frame = context.world.update(tpf);

        let mut callbacks = self.callbacks.borrow_mut();
        run_update(&mut callbacks.on_update, context, tpf)?;
        run_update(&mut callbacks.on_post_update, context, tpf)?;

        frame.map(|_| ()).map_err(AppError::from)
    }
}

/// Menu and pause screens: nothing to simulate.
pub(crate) struct IdleState {
    key: AppStateKey,
}

impl IdleState {
    pub(crate) fn new(key: AppStateKey) -> Self {
        Self { key }
    }
}

impl AppState for IdleState {
    fn scene(&self) -> SceneHandle {
        SceneHandle::for_key(self.key)
    }

    fn on_update(&mut self, _context: &mut AppContext, _tpf: f64) -> Result<(), AppError> {
        Ok(())
    }
}
