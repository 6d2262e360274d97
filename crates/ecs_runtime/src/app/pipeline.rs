use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, info};

use crate::GameSettings;

use super::states::{IdleState, LoadingState, PlayState};
use super::{AppContext, AppError, AppState, AppStateKey, AppStateMachine};

pub type SetupFn = Box<dyn FnMut(&mut AppContext) -> Result<(), AppError>>;
pub type UpdateFn = Box<dyn FnMut(&mut AppContext, f64) -> Result<(), AppError>>;
pub type LoadStateFn = Box<dyn FnMut(&mut AppContext, &Value) -> Result<(), AppError>>;
pub type SaveStateFn = Box<dyn FnMut(&AppContext) -> Result<Value, AppError>>;

/// Game hooks run by the built-in states.
///
/// Loading runs `init_game_vars`, then `init_game` (new game) or
/// `load_state` (save), then `init_physics` and `init_ui`. Play runs
/// `on_update` and `on_post_update` after the world's update pass.
#[derive(Default)]
pub struct AppCallbacks {
    pub(crate) init_settings: Option<Box<dyn FnOnce(&mut GameSettings)>>,
    pub(crate) init_input: Option<SetupFn>,
    pub(crate) init_game_vars: Option<SetupFn>,
    pub(crate) init_game: Option<SetupFn>,
    pub(crate) load_state: Option<LoadStateFn>,
    pub(crate) init_physics: Option<SetupFn>,
    pub(crate) init_ui: Option<SetupFn>,
    pub(crate) on_update: Option<UpdateFn>,
    pub(crate) on_post_update: Option<UpdateFn>,
    pub(crate) save_state: Option<SaveStateFn>,
}

pub(crate) type SharedCallbacks = Rc<RefCell<AppCallbacks>>;

pub(crate) fn run_setup(
    slot: &mut Option<SetupFn>,
    stage: &'static str,
    context: &mut AppContext,
) -> Result<(), AppError> {
    if let Some(callback) = slot.as_mut() {
        callback(context)?;
        debug!(stage, "pipeline_stage_done");
    }
    Ok(())
}

pub(crate) fn run_update(
    slot: &mut Option<UpdateFn>,
    context: &mut AppContext,
    tpf: f64,
) -> Result<(), AppError> {
    match slot.as_mut() {
        Some(callback) => callback(context, tpf),
        None => Ok(()),
    }
}

impl fmt::Debug for AppCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<&str> = [
            ("init_settings", self.init_settings.is_some()),
            ("init_input", self.init_input.is_some()),
            ("init_game_vars", self.init_game_vars.is_some()),
            ("init_game", self.init_game.is_some()),
            ("load_state", self.load_state.is_some()),
            ("init_physics", self.init_physics.is_some()),
            ("init_ui", self.init_ui.is_some()),
            ("on_update", self.on_update.is_some()),
            ("on_post_update", self.on_post_update.is_some()),
            ("save_state", self.save_state.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect();
        f.debug_struct("AppCallbacks")
            .field("registered", &registered)
            .finish()
    }
}

/// Assembles an [`AppStateMachine`] from settings, callbacks and optional
/// state overrides.
#[derive(Default)]
pub struct AppBuilder {
    settings: GameSettings,
    callbacks: AppCallbacks,
    main_menu: Option<Box<dyn AppState>>,
    paused: Option<Box<dyn AppState>>,
}

impl AppBuilder {
    pub fn new(settings: GameSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn init_settings(mut self, callback: impl FnOnce(&mut GameSettings) + 'static) -> Self {
        self.callbacks.init_settings = Some(Box::new(callback));
        self
    }

    /// Runs once at build time; bindings survive new games.
    pub fn init_input(
        mut self,
        callback: impl FnMut(&mut AppContext) -> Result<(), AppError> + 'static,
    ) -> Self {
        self.callbacks.init_input = Some(Box::new(callback));
        self
    }

    pub fn init_game_vars(
        mut self,
        callback: impl FnMut(&mut AppContext) -> Result<(), AppError> + 'static,
    ) -> Self {
        self.callbacks.init_game_vars = Some(Box::new(callback));
        self
    }

    pub fn init_game(
        mut self,
        callback: impl FnMut(&mut AppContext) -> Result<(), AppError> + 'static,
    ) -> Self {
        self.callbacks.init_game = Some(Box::new(callback));
        self
    }

    pub fn load_state(
        mut self,
        callback: impl FnMut(&mut AppContext, &Value) -> Result<(), AppError> + 'static,
    ) -> Self {
        self.callbacks.load_state = Some(Box::new(callback));
        self
    }

    pub fn init_physics(
        mut self,
        callback: impl FnMut(&mut AppContext) -> Result<(), AppError> + 'static,
    ) -> Self {
        self.callbacks.init_physics = Some(Box::new(callback));
        self
    }

    pub fn init_ui(
        mut self,
        callback: impl FnMut(&mut AppContext) -> Result<(), AppError> + 'static,
    ) -> Self {
        self.callbacks.init_ui = Some(Box::new(callback));
        self
    }

    pub fn on_update(
        mut self,
        callback: impl FnMut(&mut AppContext, f64) -> Result<(), AppError> + 'static,
    ) -> Self {
        self.callbacks.on_update = Some(Box::new(callback));
        self
    }

    pub fn on_post_update(
        mut self,
        callback: impl FnMut(&mut AppContext, f64) -> Result<(), AppError> + 'static,
    ) -> Self {
        self.callbacks.on_post_update = Some(Box::new(callback));
        self
    }

    pub fn save_state(
        mut self,
        callback: impl FnMut(&AppContext) -> Result<Value, AppError> + 'static,
    ) -> Self {
        self.callbacks.save_state = Some(Box::new(callback));
        self
    }

    /// Replaces the built-in idle state used for `MainMenu` or `Paused`.
    /// Loading and Play always run the pipeline and are not replaceable.
    pub fn state(mut self, key: AppStateKey, state: Box<dyn AppState>) -> Self {
        match key {
            AppStateKey::MainMenu => self.main_menu = Some(state),
            AppStateKey::Paused => self.paused = Some(state),
            AppStateKey::Loading | AppStateKey::Play => {
                debug!(state = ?key, "state_override_ignored");
            }
        }
        self
    }

    /// Applies `init_settings`, runs `init_input`, then enters Loading.
    pub fn build(mut self) -> Result<AppStateMachine, AppError> {
        if let Some(init_settings) = self.callbacks.init_settings.take() {
            init_settings(&mut self.settings);
        }
        info!(
            title = self.settings.title.as_str(),
            version = self.settings.version.as_str(),
            menu_enabled = self.settings.menu_enabled,
            "settings_applied"
        );

        let mut context = AppContext::new(self.settings);
        run_setup(&mut self.callbacks.init_input, "init_input", &mut context)?;

        let callbacks: SharedCallbacks = Rc::new(RefCell::new(self.callbacks));
        let main_menu = self
            .main_menu
            .unwrap_or_else(|| Box::new(IdleState::new(AppStateKey::MainMenu)));
        let paused = self
            .paused
            .unwrap_or_else(|| Box::new(IdleState::new(AppStateKey::Paused)));

        let mut machine = AppStateMachine::new(
            Box::new(LoadingState::new(Rc::clone(&callbacks))),
            main_menu,
            Box::new(PlayState::new(Rc::clone(&callbacks))),
            paused,
            context,
            callbacks,
        );
        machine.start()?;
        Ok(machine)
    }
}
