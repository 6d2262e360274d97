use std::path::PathBuf;

use ecs_runtime::{AppError, AppStateMachine, GameSettings, LoopConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use super::gameplay;

const SETTINGS_PATH_ENV_VAR: &str = "SAMPLE_GAME_SETTINGS";
const FRAME_LIMIT_ENV_VAR: &str = "SAMPLE_GAME_FRAMES";
const DEFAULT_FRAME_LIMIT: u64 = 600;

pub(crate) struct AppWiring {
    pub(crate) machine: AppStateMachine,
    pub(crate) config: LoopConfig,
    pub(crate) frame_limit: u64,
}

pub(crate) fn build_app() -> Result<AppWiring, AppError> {
    init_tracing();
    info!("=== Coin Collector Startup ===");

    let settings = load_settings()?;
    let config = settings.loop_config.clone();
    let frame_limit = parse_frame_limit_from_env();
    let machine = gameplay::app_builder(settings).build()?;

    Ok(AppWiring {
        machine,
        config,
        frame_limit,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn load_settings() -> Result<GameSettings, AppError> {
    let Some(path) = std::env::var_os(SETTINGS_PATH_ENV_VAR).map(PathBuf::from) else {
        return Ok(GameSettings::default());
    };
    let settings = GameSettings::load(&path)?;
    info!(path = %path.display(), "settings_loaded");
    Ok(settings)
}

fn parse_frame_limit_from_env() -> u64 {
    let Ok(raw) = std::env::var(FRAME_LIMIT_ENV_VAR) else {
        return DEFAULT_FRAME_LIMIT;
    };
    match raw.trim().parse::<u64>() {
        Ok(limit) => limit,
        Err(error) => {
            warn!(
                var = FRAME_LIMIT_ENV_VAR,
                value = raw.as_str(),
                error = %error,
                default = DEFAULT_FRAME_LIMIT,
                "invalid_frame_limit"
            );
            DEFAULT_FRAME_LIMIT
        }
    }
}
