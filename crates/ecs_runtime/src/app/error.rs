use thiserror::Error;

use crate::ecs::{EcsError, FrameError};
use crate::SettingsError;

use super::{AppStateKey, InputError, StateTransition, VarError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Ecs(#[from] EcsError),
    #[error(transparent)]
    Var(#[from] VarError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("{stage} callback failed: {message}")]
    Callback {
        stage: &'static str,
        message: String,
    },
    #[error("{stage} callback is required to load a save")]
    MissingCallback { stage: &'static str },
    #[error("cannot apply {transition} while in {current:?}")]
    InvalidTransition {
        current: Option<AppStateKey>,
        transition: StateTransition,
    },
    #[error("failed to encode game state: {0}")]
    EncodeState(#[source] serde_json::Error),
}

impl AppError {
    pub fn callback(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Callback {
            stage,
            message: message.into(),
        }
    }
}
