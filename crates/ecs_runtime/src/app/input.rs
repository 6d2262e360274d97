use std::collections::HashSet;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use super::AppContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Physical input an action is bound to. Key names are whatever the host
/// window layer reports (`"W"`, `"Escape"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Trigger {
    Key(String),
    Mouse(MouseButton),
}

impl Trigger {
    pub fn key(name: impl Into<String>) -> Self {
        Trigger::Key(name.into())
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Key(name) => write!(f, "key:{name}"),
            Trigger::Mouse(button) => write!(f, "mouse:{button:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("input action '{name}' is already registered")]
    DuplicateAction { name: String },
    #[error("trigger {trigger} is already bound to '{action}'")]
    DuplicateTrigger { trigger: Trigger, action: String },
}

type Handler = Box<dyn FnMut(&mut AppContext)>;

/// Named action with optional begin/hold/end handlers.
///
/// Handlers run with the full context. `context.input` stays populated
/// while they run and reports the triggers that are held. The only gap is
/// the running handler's own slot, which is empty until it returns.
pub struct UserAction {
    name: String,
    on_begin: Option<Handler>,
    on_action: Option<Handler>,
    on_end: Option<Handler>,
}

impl UserAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_begin: None,
            on_action: None,
            on_end: None,
        }
    }

    pub fn on_begin(mut self, handler: impl FnMut(&mut AppContext) + 'static) -> Self {
        self.on_begin = Some(Box::new(handler));
        self
    }

    /// Runs every dispatch while the trigger is held, including the first.
    pub fn on_action(mut self, handler: impl FnMut(&mut AppContext) + 'static) -> Self {
        self.on_action = Some(Box::new(handler));
        self
    }

    pub fn on_end(mut self, handler: impl FnMut(&mut AppContext) + 'static) -> Self {
        self.on_end = Some(Box::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Begin,
    Hold,
    End,
}

struct Binding {
    trigger: Trigger,
    action: UserAction,
    is_down: bool,
    pressed_edge: bool,
    released_edge: bool,
}

/// Trigger → action registration table.
///
/// The host reports presses and releases; the Play state dispatches once per
/// frame. Edges are consumed by the dispatch that observes them.
#[derive(Default)]
pub struct InputBindings {
    bindings: Vec<Binding>,
}

impl InputBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, action: UserAction, trigger: Trigger) -> Result<(), InputError> {
        if self.bindings.iter().any(|binding| binding.action.name == action.name) {
            return Err(InputError::DuplicateAction { name: action.name });
        }
        if let Some(existing) = self.bindings.iter().find(|binding| binding.trigger == trigger) {
            return Err(InputError::DuplicateTrigger {
                trigger,
                action: existing.action.name.clone(),
            });
        }
        debug!(action = action.name.as_str(), trigger = %trigger, "input_bound");
        self.bindings.push(Binding {
            trigger,
            action,
            is_down: false,
            pressed_edge: false,
            released_edge: false,
        });
        Ok(())
    }

    /// Returns `false` when nothing is bound to `trigger`.
    pub fn press(&mut self, trigger: &Trigger) -> bool {
        match self.binding_mut(trigger) {
            Some(binding) => {
                if !binding.is_down {
                    binding.pressed_edge = true;
                }
                binding.is_down = true;
                true
            }
            None => false,
        }
    }

    pub fn release(&mut self, trigger: &Trigger) -> bool {
        match self.binding_mut(trigger) {
            Some(binding) => {
                if binding.is_down {
                    binding.released_edge = true;
                }
                binding.is_down = false;
                true
            }
            None => false,
        }
    }

    /// Releases every held trigger, e.g. when the game loses focus.
    pub fn release_all(&mut self) {
        for binding in &mut self.bindings {
            if binding.is_down {
                binding.released_edge = true;
            }
            binding.is_down = false;
        }
    }

    pub fn is_action_active(&self, name: &str) -> bool {
        self.bindings
            .iter()
            .any(|binding| binding.action.name == name && binding.is_down)
    }

    pub fn action_names(&self) -> HashSet<&str> {
        self.bindings
            .iter()
            .map(|binding| binding.action.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Fires the handlers for every edge and held trigger seen since the
    /// last dispatch, in binding order.
    pub(crate) fn dispatch(context: &mut AppContext) {
        for (name, phase) in context.input.take_fired() {
            let Some(mut handler) = context.input.take_handler(&name, phase) else {
                continue;
            };
            handler(context);
            if let Some(slot) = context.input.handler_slot(&name, phase) {
                *slot = Some(handler);
            }
        }
    }

    fn take_fired(&mut self) -> Vec<(String, Phase)> {
        let mut fired = Vec::new();
        for binding in &mut self.bindings {
            let name = &binding.action.name;
            if std::mem::take(&mut binding.pressed_edge) {
                fired.push((name.clone(), Phase::Begin));
            }
            if binding.is_down {
                fired.push((name.clone(), Phase::Hold));
            }
            if std::mem::take(&mut binding.released_edge) {
                fired.push((name.clone(), Phase::End));
            }
        }
        fired
    }

    fn take_handler(&mut self, name: &str, phase: Phase) -> Option<Handler> {
        self.handler_slot(name, phase)?.take()
    }

    fn handler_slot(&mut self, name: &str, phase: Phase) -> Option<&mut Option<Handler>> {
        let action = &mut self
            .bindings
            .iter_mut()
            .find(|binding| binding.action.name == name)?
            .action;
        Some(match phase {
            Phase::Begin => &mut action.on_begin,
            Phase::Hold => &mut action.on_action,
            Phase::End => &mut action.on_end,
        })
    }

    fn binding_mut(&mut self, trigger: &Trigger) -> Option<&mut Binding> {
        self.bindings
            .iter_mut()
            .find(|binding| binding.trigger == *trigger)
    }
}

impl fmt::Debug for InputBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.bindings
                    .iter()
                    .map(|binding| (binding.action.name.as_str(), &binding.trigger)),
            )
            .finish()
    }
}
