mod behaviors;
mod components;
mod physics;

use ecs_runtime::{
    AppBuilder, AppContext, AppError, AppStateKey, Entity, GameSettings, StateTransition, Trigger,
    UserAction, World,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use behaviors::{CoinSpawner, Drive};
use components::{Coin, Intent, Player, Position, Steering, Velocity, Wallet};
use physics::Integrator;

pub(crate) const SCORE_VAR: &str = "score";
const PLAYER_SPEED_UNITS_PER_SECOND: f64 = 4.0;
const PICKUP_RADIUS_UNITS: f64 = 0.5;
const ARENA_HALF_EXTENT_UNITS: f64 = 8.0;
const COIN_SPAWN_INTERVAL_SECONDS: f64 = 1.5;
const SAVE_VERSION: u32 = 1;
const MOVE_BINDINGS: [(&str, &str, f64, f64); 4] = [
    ("move_up", "W", 0.0, 1.0),
    ("move_left", "A", -1.0, 0.0),
    ("move_down", "S", 0.0, -1.0),
    ("move_right", "D", 1.0, 0.0),
];

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SaveGame {
    save_version: u32,
    player: SavedPlayer,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SavedPlayer {
    position: Position,
    coins: u32,
}

/// Coin collector: the player drifts toward the nearest coin unless steered
/// with WASD. `P` pauses, `Escape` quits.
pub(crate) fn app_builder(settings: GameSettings) -> AppBuilder {
    AppBuilder::new(settings)
        // Headless build: there is no menu UI to leave.
        .init_settings(|settings| settings.menu_enabled = false)
        .init_input(bind_input)
        .init_game_vars(|context| {
            context.vars.define(SCORE_VAR, 0_i64)?;
            Ok(())
        })
        .init_game(|context| spawn_level(context, Position::default(), 0))
        .load_state(load_game)
        .init_physics(|context| {
            context.set_physics(Integrator::new(ARENA_HALF_EXTENT_UNITS));
            Ok(())
        })
        .on_update(|context, _tpf| {
            steer_player(context)?;
            collect_coins(context)?;
            Ok(())
        })
        .on_post_update(|context, _tpf| sync_score(context))
        .save_state(save_game)
}

fn bind_input(context: &mut AppContext) -> Result<(), AppError> {
    for (name, key, dx, dy) in MOVE_BINDINGS {
        context.input.bind(
            UserAction::new(name).on_action(move |context| nudge(context, dx, dy)),
            Trigger::key(key),
        )?;
    }
    let pause = UserAction::new("pause").on_begin(|context| {
        context.request_transition(StateTransition::Push(AppStateKey::Paused));
    });
    context.input.bind(pause, Trigger::key("P"))?;
    let quit = UserAction::new("quit").on_begin(|context| {
        context.request_transition(StateTransition::Exit);
    });
    context.input.bind(quit, Trigger::key("Escape"))?;
    Ok(())
}

fn player(world: &World) -> Option<&Entity> {
    world.with_component::<Player>().next()
}

fn nudge(context: &mut AppContext, dx: f64, dy: f64) {
    let Some(steering) = player(&context.world).and_then(|player| player.component::<Steering>())
    else {
        return;
    };
    if let Ok(mut steering) = steering.try_borrow_mut() {
        steering.x += dx;
        steering.y += dy;
    };
}

fn spawn_level(context: &mut AppContext, position: Position, coins: u32) -> Result<(), AppError> {
    let mut player = context.world.create_entity();
    player.add_component(position)?;
    player.add_component(Wallet { coins })?;
    player.add_component(Velocity::default())?;
    player.add_component(Intent::default())?;
    player.add_component(Steering::default())?;
    player.add_component(Player)?;
    player.add_behavior(Drive::new(PLAYER_SPEED_UNITS_PER_SECOND))?;
    let player_id = context.world.add_entity(player)?;

    let mut spawner = context.world.create_entity();
    spawner.add_behavior(CoinSpawner::new(
        context.world.commands(),
        COIN_SPAWN_INTERVAL_SECONDS,
    ))?;
    context.world.add_entity(spawner)?;
    debug!(player = %player_id, x = position.x, y = position.y, coins, "level_spawned");
    Ok(())
}

fn nearest_coin(world: &World, from: &Position) -> Option<Position> {
    world
        .with_component::<Coin>()
        .filter_map(|coin| coin.component::<Position>())
        .filter_map(|position| position.try_borrow().ok().map(|position| *position))
        .min_by(|a, b| a.distance_to(from).total_cmp(&b.distance_to(from)))
}

/// Manual steering wins; otherwise head for the nearest coin, or stop.
fn steer_player(context: &mut AppContext) -> Result<(), AppError> {
    let Some(player) = player(&context.world) else {
        return Ok(());
    };
    let (Some(position), Some(intent), Some(steering)) = (
        player.component::<Position>(),
        player.component::<Intent>(),
        player.component::<Steering>(),
    ) else {
        return Ok(());
    };

    let here = *position.try_borrow()?;
    let manual = std::mem::take(&mut *steering.try_borrow_mut()?);
    let next = if manual.is_idle() {
        nearest_coin(&context.world, &here)
            .map(|coin| Intent {
                x: coin.x - here.x,
                y: coin.y - here.y,
            })
            .unwrap_or_default()
    } else {
        Intent {
            x: manual.x,
            y: manual.y,
        }
    };
    *intent.try_borrow_mut()? = next;
    Ok(())
}

fn collect_coins(context: &mut AppContext) -> Result<u32, AppError> {
    let Some(player) = player(&context.world) else {
        return Ok(0);
    };
    let (Some(position), Some(wallet)) = (
        player.component::<Position>(),
        player.component::<Wallet>(),
    ) else {
        return Ok(0);
    };
    let here = *position.try_borrow()?;

    let mut in_reach = Vec::new();
    for coin in context.world.with_component::<Coin>() {
        let (Some(coin_position), Some(coin_value)) =
            (coin.component::<Position>(), coin.component::<Coin>())
        else {
            continue;
        };
        if coin_position.try_borrow()?.distance_to(&here) <= PICKUP_RADIUS_UNITS {
            in_reach.push((coin.id(), coin_value.try_borrow()?.value));
        }
    }

    let mut gained = 0;
    for (id, value) in in_reach {
        if context.world.remove_entity(id) {
            gained += value;
        }
    }
    if gained > 0 {
        let mut wallet = wallet.try_borrow_mut()?;
        wallet.coins += gained;
        info!(gained, total = wallet.coins, "coins_collected");
    }
    Ok(gained)
}

fn sync_score(context: &mut AppContext) -> Result<(), AppError> {
    let Some(wallet) = player(&context.world).and_then(|player| player.component::<Wallet>())
    else {
        return Ok(());
    };
    let coins = wallet.try_borrow()?.coins;
    context.vars.set(SCORE_VAR, i64::from(coins))?;
    Ok(())
}

fn save_game(context: &AppContext) -> Result<Value, AppError> {
    let player = player(&context.world)
        .ok_or_else(|| AppError::callback("save_state", "no player entity in the world"))?;
    let (Some(position), Some(wallet)) = (
        player.component::<Position>(),
        player.component::<Wallet>(),
    ) else {
        return Err(AppError::callback("save_state", "player is missing position or wallet"));
    };
    let save = SaveGame {
        save_version: SAVE_VERSION,
        player: SavedPlayer {
            position: *position.try_borrow()?,
            coins: wallet.try_borrow()?.coins,
        },
    };
    serde_json::to_value(&save).map_err(AppError::EncodeState)
}

fn parse_save(data: &Value) -> Result<SaveGame, String> {
    let save: SaveGame = serde_path_to_error::deserialize(data).map_err(|error| {
        let path = error.path().to_string();
        let source = error.into_inner();
        if path.is_empty() || path == "." {
            format!("parse save json: {source}")
        } else {
            format!("parse save json at {path}: {source}")
        }
    })?;
    if save.save_version != SAVE_VERSION {
        return Err(format!(
            "unsupported save_version {} (expected {SAVE_VERSION})",
            save.save_version
        ));
    }
    Ok(save)
}

fn load_game(context: &mut AppContext, data: &Value) -> Result<(), AppError> {
    let save = parse_save(data).map_err(|message| AppError::callback("load_state", message))?;
    let SavedPlayer { position, coins } = save.player;
    spawn_level(context, position, coins)?;
    context.vars.set(SCORE_VAR, i64::from(coins))?;
    info!(coins, x = position.x, y = position.y, "save_loaded");
    Ok(())
}
