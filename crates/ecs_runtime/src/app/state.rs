use std::fmt;

use super::{AppContext, AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppStateKey {
    Loading,
    MainMenu,
    Play,
    Paused,
}

impl AppStateKey {
    pub const ALL: [AppStateKey; 4] = [
        AppStateKey::Loading,
        AppStateKey::MainMenu,
        AppStateKey::Play,
        AppStateKey::Paused,
    ];
}

/// Opaque id of the scene a state presents. The renderer (not part of this
/// crate) maps it to whatever it draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle(u32);

impl SceneHandle {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub(crate) const fn for_key(key: AppStateKey) -> Self {
        match key {
            AppStateKey::Loading => Self(0),
            AppStateKey::MainMenu => Self(1),
            AppStateKey::Play => Self(2),
            AppStateKey::Paused => Self(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// Replaces the current state.
    Set(AppStateKey),
    /// Suspends the current state and enters a new one on top of it.
    Push(AppStateKey),
    /// Leaves the current state and resumes the one below.
    Pop,
    Exit,
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateTransition::Set(key) => write!(f, "set {key:?}"),
            StateTransition::Push(key) => write!(f, "push {key:?}"),
            StateTransition::Pop => f.write_str("pop"),
            StateTransition::Exit => f.write_str("exit"),
        }
    }
}

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Play entering or leaving the stack. Pausing and resuming keep Play on the
/// stack and do not count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayEvent {
    Entered,
    Exited,
}

pub(crate) struct Listeners<F: ?Sized> {
    next_id: u64,
    entries: Vec<(ListenerId, Box<F>)>,
}

impl<F: ?Sized> Listeners<F> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, listener: Box<F>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<F>> {
        self.entries.iter_mut().map(|(_, listener)| listener)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Running,
    Exited,
}

/// One application state. Only the state on top of the stack receives
/// `on_update`; the others stay suspended between `on_pause` and `on_resume`.
pub trait AppState {
    fn scene(&self) -> SceneHandle;

    fn on_enter(&mut self, _context: &mut AppContext) -> Result<(), AppError> {
        Ok(())
    }

    fn on_exit(&mut self, _context: &mut AppContext) {}

    fn on_pause(&mut self, _context: &mut AppContext) {}

    fn on_resume(&mut self, _context: &mut AppContext) {}

    fn on_update(&mut self, context: &mut AppContext, tpf: f64) -> Result<(), AppError>;
}
