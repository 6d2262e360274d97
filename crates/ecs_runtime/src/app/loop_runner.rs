use std::env;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::metrics::MetricsAccumulator;
use super::{AppError, AppStateMachine, MetricsHandle, TickStatus};

pub const SLOW_FRAME_ENV_VAR: &str = "ECS_RUNTIME_SLOW_FRAME_MS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timestep {
    /// One update per frame with the measured (clamped) frame delta.
    Variable,
    /// Updates at `target_tps`, at most `max_ticks_per_frame` per frame.
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the loop and return the first error.
    Halt,
    /// Log behavior failures and keep running. Other errors still halt.
    LogAndContinue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    pub timestep: Timestep,
    pub target_tps: u32,
    pub max_frame_delta_ms: u64,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval_ms: u64,
    pub failure_policy: FailurePolicy,
    pub max_render_fps: Option<u32>,
    pub simulated_slow_frame_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            timestep: Timestep::Variable,
            target_tps: 60,
            max_frame_delta_ms: 250,
            max_ticks_per_frame: 5,
            metrics_log_interval_ms: 1000,
            failure_policy: FailurePolicy::Halt,
            max_render_fps: None,
            simulated_slow_frame_ms: 0,
        }
    }
}

impl LoopConfig {
    pub fn fixed_step(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_tps.max(1) as f64)
    }

    pub fn max_frame_delta(&self) -> Duration {
        normalize_non_zero_duration(
            Duration::from_millis(self.max_frame_delta_ms),
            Duration::from_millis(250),
        )
    }

    pub fn metrics_log_interval(&self) -> Duration {
        normalize_non_zero_duration(
            Duration::from_millis(self.metrics_log_interval_ms),
            Duration::from_secs(1),
        )
    }

    pub fn render_fps_cap(&self) -> Option<u32> {
        self.max_render_fps.filter(|value| *value > 0)
    }
}

/// Monotonic frame timestamps, measured from an arbitrary origin.
/// `None` ends the loop.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Duration>;
}

/// Wall clock, optionally paced to a frame cap.
#[derive(Debug)]
pub struct RealtimeFrameSource {
    origin: Instant,
    frame_target: Option<Duration>,
    last_frame: Option<Instant>,
    frame_limit: Option<u64>,
    frames: u64,
}

impl RealtimeFrameSource {
    pub fn new(max_render_fps: Option<u32>) -> Self {
        Self {
            origin: Instant::now(),
            frame_target: target_frame_duration(max_render_fps.filter(|fps| *fps > 0)),
            last_frame: None,
            frame_limit: None,
            frames: 0,
        }
    }

    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }
}

impl FrameSource for RealtimeFrameSource {
    fn next_frame(&mut self) -> Option<Duration> {
        if self.frame_limit.is_some_and(|limit| self.frames >= limit) {
            return None;
        }
        if let Some(last_frame) = self.last_frame {
            let cap_sleep = compute_cap_sleep(last_frame.elapsed(), self.frame_target);
            if cap_sleep > Duration::ZERO {
                thread::sleep(cap_sleep);
            }
        }
        let now = Instant::now();
        self.last_frame = Some(now);
        self.frames = self.frames.saturating_add(1);
        Some(now.saturating_duration_since(self.origin))
    }
}

/// Deterministic timestamps `0, step, 2 * step, ...` for headless runs and
/// tests.
#[derive(Debug, Clone)]
pub struct SteppedFrameSource {
    step: Duration,
    next: Duration,
    remaining: u64,
}

impl SteppedFrameSource {
    pub fn new(step: Duration, frames: u64) -> Self {
        Self {
            step,
            next: Duration::ZERO,
            remaining: frames,
        }
    }
}

impl FrameSource for SteppedFrameSource {
    fn next_frame(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let timestamp = self.next;
        self.next = self.next.saturating_add(self.step);
        Some(timestamp)
    }
}

/// Converts timestamps into frame deltas.
#[derive(Debug, Clone)]
pub struct FrameClock {
    nominal: Duration,
    max_frame_delta: Duration,
    last: Option<Duration>,
}

impl FrameClock {
    pub fn new(nominal: Duration, max_frame_delta: Duration) -> Self {
        Self {
            nominal,
            max_frame_delta,
            last: None,
        }
    }

    /// The first frame reports the nominal step; a timestamp older than the
    /// newest seen reports zero.
    pub fn tick(&mut self, timestamp: Duration) -> Duration {
        let raw = match self.last {
            None => self.nominal,
            Some(last) => timestamp.saturating_sub(last),
        };
        self.last = Some(self.last.map_or(timestamp, |last| last.max(timestamp)));
        clamp_frame_delta(raw, self.max_frame_delta)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: u64,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub exited: bool,
}

/// Drives `machine` until the frame source runs dry or the machine exits.
pub fn run_loop(
    machine: &mut AppStateMachine,
    source: &mut dyn FrameSource,
    config: &LoopConfig,
    metrics: &MetricsHandle,
) -> Result<LoopSummary, AppError> {
    let fixed_dt = config.fixed_step();
    let max_frame_delta = config.max_frame_delta();
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let slow_frame_delay = resolve_slow_frame_delay(config.simulated_slow_frame_ms);
    let mut clock = FrameClock::new(fixed_dt, max_frame_delta);
    info!(
        timestep = ?config.timestep,
        target_tps = config.target_tps,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        failure_policy = ?config.failure_policy,
        slow_frame_delay_ms = slow_frame_delay.as_millis() as u64,
        "loop_config"
    );

    let mut accumulator = Duration::ZERO;
    let mut metrics_accumulator =
        MetricsAccumulator::new(config.metrics_log_interval(), Instant::now());
    let mut summary = LoopSummary::default();

    while let Some(timestamp) = source.next_frame() {
        if slow_frame_delay > Duration::ZERO {
            // Debug perturbation only; frame pacing lives in the frame source.
            thread::sleep(slow_frame_delay);
        }
        let frame_dt = clock.tick(timestamp);
        summary.frames = summary.frames.saturating_add(1);

        let status = match config.timestep {
            Timestep::Variable => {
                metrics_accumulator.record_tick();
                run_tick(machine, frame_dt.as_secs_f64(), config.failure_policy, &mut summary)?
            }
            Timestep::Fixed => {
                accumulator = accumulator.saturating_add(frame_dt);
                let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
                accumulator = step_plan.remaining_accumulator;
                if step_plan.dropped_backlog > Duration::ZERO {
                    warn!(
                        dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                        max_ticks_per_frame, "sim_clamp_triggered"
                    );
                }

                let mut status = TickStatus::Running;
                for _ in 0..step_plan.ticks_to_run {
                    metrics_accumulator.record_tick();
                    status = run_tick(
                        machine,
                        fixed_dt.as_secs_f64(),
                        config.failure_policy,
                        &mut summary,
                    )?;
                    if status == TickStatus::Exited {
                        break;
                    }
                }
                status
            }
        };

        metrics_accumulator.record_frame(frame_dt);
        if let Some(snapshot) =
            metrics_accumulator.maybe_snapshot(Instant::now(), machine, &summary)
        {
            metrics.publish(snapshot);
            info!(
                fps = snapshot.fps,
                tps = snapshot.tps,
                frame_time_ms = snapshot.frame_time_ms,
                worst_frame_ms = snapshot.worst_frame_ms,
                entity_count = snapshot.entity_count,
                pending_adds = snapshot.pending_adds,
                failed_ticks = snapshot.failed_ticks,
                state = ?snapshot.state,
                "loop_metrics"
            );
        }

        if status == TickStatus::Exited {
            summary.exited = true;
            break;
        }
    }

    info!(
        frames = summary.frames,
        ticks = summary.ticks,
        failed_ticks = summary.failed_ticks,
        exited = summary.exited,
        "loop_finished"
    );
    Ok(summary)
}

fn run_tick(
    machine: &mut AppStateMachine,
    tpf: f64,
    policy: FailurePolicy,
    summary: &mut LoopSummary,
) -> Result<TickStatus, AppError> {
    summary.ticks = summary.ticks.saturating_add(1);
    match machine.on_update(tpf) {
        Ok(status) => Ok(status),
        Err(AppError::Frame(error)) if policy == FailurePolicy::LogAndContinue => {
            summary.failed_ticks = summary.failed_ticks.saturating_add(1);
            warn!(
                frame = error.stats.frame,
                failures = error.failures.len(),
                error = %error,
                "frame_failures_ignored"
            );
            Ok(if machine.is_exited() {
                TickStatus::Exited
            } else {
                TickStatus::Running
            })
        }
        Err(error) => {
            warn!(error = %error, state = ?machine.current(), "loop_halted");
            Err(error)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;
    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    let dropped_backlog = if accumulator >= fixed_dt {
        std::mem::take(&mut accumulator)
    } else {
        Duration::ZERO
    };
    StepPlan {
        ticks_to_run,
        remaining_accumulator: accumulator,
        dropped_backlog,
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

fn target_frame_duration(max_render_fps: Option<u32>) -> Option<Duration> {
    max_render_fps.map(|fps| Duration::from_secs_f64(1.0 / fps as f64))
}

fn compute_cap_sleep(elapsed: Duration, target: Option<Duration>) -> Duration {
    match target {
        Some(frame_target) if elapsed < frame_target => frame_target - elapsed,
        _ => Duration::ZERO,
    }
}

fn resolve_slow_frame_delay(config_slow_frame_ms: u64) -> Duration {
    match env::var(SLOW_FRAME_ENV_VAR) {
        Ok(value) => match value.parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!(
                    env_var = SLOW_FRAME_ENV_VAR,
                    value = value.as_str(),
                    "invalid slow-frame env var value; falling back to config"
                );
                Duration::from_millis(config_slow_frame_ms)
            }
        },
        Err(env::VarError::NotPresent) => Duration::from_millis(config_slow_frame_ms),
        Err(err) => {
            warn!(
                env_var = SLOW_FRAME_ENV_VAR,
                error = %err,
                "unable to read slow-frame env var; falling back to config"
            );
            Duration::from_millis(config_slow_frame_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::app::{AppBuilder, AppContext, AppStateKey, StateTransition};
    use crate::ecs::{Behavior, BehaviorError, BehaviorResult, Entity};
    use crate::GameSettings;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    struct Flaky;

    impl Behavior for Flaky {
        fn on_update(&mut self, _entity: &Entity, _tpf: f64) -> BehaviorResult {
            Err(BehaviorError::failed("flaky"))
        }
    }

    fn spawn_flaky(context: &mut AppContext) -> Result<(), AppError> {
        let mut entity = context.world.create_entity();
        entity.add_behavior(Flaky)?;
        context.world.add_entity(entity)?;
        Ok(())
    }

    fn fixed_config(target_tps: u32) -> LoopConfig {
        LoopConfig {
            timestep: Timestep::Fixed,
            target_tps,
            ..LoopConfig::default()
        }
    }

    #[test]
    fn clamp_frame_delta_caps_large_frame() {
        assert_eq!(clamp_frame_delta(ms(600), ms(250)), ms(250));
        assert_eq!(clamp_frame_delta(ms(16), ms(250)), ms(16));
    }

    #[test]
    fn plan_sim_steps_runs_expected_ticks_without_drop() {
        let plan = plan_sim_steps(ms(50), ms(16), 5);

        assert_eq!(plan.ticks_to_run, 3);
        assert_eq!(plan.remaining_accumulator, ms(2));
        assert_eq!(plan.dropped_backlog, Duration::ZERO);
    }

    #[test]
    fn plan_sim_steps_drops_backlog_when_tick_cap_hit() {
        let plan = plan_sim_steps(ms(120), ms(16), 3);

        assert_eq!(plan.ticks_to_run, 3);
        assert_eq!(plan.remaining_accumulator, Duration::ZERO);
        assert_eq!(plan.dropped_backlog, ms(72));
    }

    #[test]
    fn frame_clock_uses_nominal_step_first_then_deltas() {
        let mut clock = FrameClock::new(ms(16), ms(250));

        assert_eq!(clock.tick(ms(1000)), ms(16));
        assert_eq!(clock.tick(ms(1020)), ms(20));
        assert_eq!(clock.tick(ms(2000)), ms(250));
    }

    #[test]
    fn frame_clock_reports_zero_when_time_goes_backwards() {
        let mut clock = FrameClock::new(ms(16), ms(250));
        clock.tick(ms(100));

        assert_eq!(clock.tick(ms(90)), Duration::ZERO);
        assert_eq!(clock.tick(ms(110)), ms(10));
    }

    #[test]
    fn stepped_source_yields_bounded_timestamps() {
        let mut source = SteppedFrameSource::new(ms(10), 3);

        assert_eq!(source.next_frame(), Some(ms(0)));
        assert_eq!(source.next_frame(), Some(ms(10)));
        assert_eq!(source.next_frame(), Some(ms(20)));
        assert_eq!(source.next_frame(), None);
    }

    #[test]
    fn realtime_source_honours_frame_limit() {
        let mut source = RealtimeFrameSource::new(None).with_frame_limit(2);

        let first = source.next_frame().expect("first");
        let second = source.next_frame().expect("second");

        assert!(second >= first);
        assert_eq!(source.next_frame(), None);
    }

    #[test]
    fn cap_sleep_only_when_under_budget() {
        let target = target_frame_duration(Some(50));

        assert_eq!(target, Some(ms(20)));
        assert_eq!(compute_cap_sleep(ms(5), target), ms(15));
        assert_eq!(compute_cap_sleep(ms(25), target), Duration::ZERO);
        assert_eq!(compute_cap_sleep(ms(5), None), Duration::ZERO);
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let config = LoopConfig {
            max_frame_delta_ms: 0,
            metrics_log_interval_ms: 0,
            max_render_fps: Some(0),
            ..LoopConfig::default()
        };

        assert_eq!(config.max_frame_delta(), ms(250));
        assert_eq!(config.metrics_log_interval(), Duration::from_secs(1));
        assert_eq!(config.render_fps_cap(), None);
    }

    #[test]
    fn variable_timestep_runs_one_tick_per_frame() {
        let ticks = Rc::new(Cell::new(0));
        let counter = Rc::clone(&ticks);
        let mut machine = AppBuilder::new(GameSettings::default())
            .on_update(move |_, _| {
                counter.set(counter.get() + 1);
                Ok(())
            })
            .build()
            .expect("build");
        let mut source = SteppedFrameSource::new(ms(16), 5);

        let summary = run_loop(
            &mut machine,
            &mut source,
            &LoopConfig::default(),
            &MetricsHandle::default(),
        )
        .expect("loop");

        assert_eq!(summary.frames, 5);
        assert_eq!(summary.ticks, 5);
        assert!(!summary.exited);
        assert_eq!(ticks.get(), 4);
    }

    #[test]
    fn fixed_timestep_accumulates_frame_time() {
        let mut machine = AppBuilder::new(GameSettings::default())
            .build()
            .expect("build");
        let mut source = SteppedFrameSource::new(ms(40), 3);

        let summary = run_loop(
            &mut machine,
            &mut source,
            &fixed_config(50),
            &MetricsHandle::default(),
        )
        .expect("loop");

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.ticks, 5);
    }

    #[test]
    fn loop_stops_when_machine_exits() {
        let mut machine = AppBuilder::new(GameSettings::default())
            .on_update(|context, _| {
                context.request_transition(StateTransition::Exit);
                Ok(())
            })
            .build()
            .expect("build");
        let mut source = SteppedFrameSource::new(ms(16), 10);

        let summary = run_loop(
            &mut machine,
            &mut source,
            &LoopConfig::default(),
            &MetricsHandle::default(),
        )
        .expect("loop");

        assert!(summary.exited);
        assert_eq!(summary.frames, 2);
        assert!(machine.is_exited());
    }

    #[test]
    fn halt_policy_returns_behavior_failures() {
        let mut machine = AppBuilder::new(GameSettings::default())
            .init_game(spawn_flaky)
            .build()
            .expect("build");
        let mut source = SteppedFrameSource::new(ms(16), 10);

        let error = run_loop(
            &mut machine,
            &mut source,
            &LoopConfig::default(),
            &MetricsHandle::default(),
        )
        .expect_err("halt");

        assert!(matches!(error, AppError::Frame(_)));
        assert_eq!(machine.context().world.frame(), 1);
    }

    #[test]
    fn log_and_continue_keeps_running_after_failures() {
        let mut machine = AppBuilder::new(GameSettings::default())
            .init_game(spawn_flaky)
            .build()
            .expect("build");
        let mut source = SteppedFrameSource::new(ms(16), 4);
        let config = LoopConfig {
            failure_policy: FailurePolicy::LogAndContinue,
            ..LoopConfig::default()
        };

        let summary = run_loop(&mut machine, &mut source, &config, &MetricsHandle::default())
            .expect("loop");

        assert_eq!(summary.ticks, 4);
        assert_eq!(summary.failed_ticks, 3);
        assert_eq!(machine.context().world.entity_count(), 1);
    }

    #[test]
    fn published_metrics_carry_state_and_world_counts() {
        let mut machine = AppBuilder::new(GameSettings::default())
            .init_game(spawn_flaky)
            .build()
            .expect("build");
        let mut source = SteppedFrameSource::new(ms(16), 4);
        let config = LoopConfig {
            failure_policy: FailurePolicy::LogAndContinue,
            metrics_log_interval_ms: 1,
            simulated_slow_frame_ms: 2,
            ..LoopConfig::default()
        };
        let metrics = MetricsHandle::default();

        run_loop(&mut machine, &mut source, &config, &metrics).expect("loop");

        let history = metrics.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].state, Some(AppStateKey::Play));
        assert_eq!(history[0].pending_adds, 1);
        let latest = metrics.snapshot();
        assert_eq!(latest, history[3]);
        assert_eq!(latest.state, Some(AppStateKey::Play));
        assert_eq!(latest.entity_count, 1);
        assert_eq!(latest.pending_adds, 0);
        assert_eq!(latest.failed_ticks, 3);
        assert_eq!(latest.world_frame, 3);
        assert_eq!(latest.total_frames, 4);
    }
}
