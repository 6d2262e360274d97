use std::collections::VecDeque;
use std::sync::{Arc, Once, RwLock};
use std::time::{Duration, Instant};

use tracing::warn;

use super::{AppStateKey, AppStateMachine, LoopSummary};

const HISTORY_LEN: usize = 32;

static POISON_WARNING: Once = Once::new();

/// Loop timing plus what the application looked like when the interval
/// closed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopMetricsSnapshot {
    pub fps: f32,
    pub tps: f32,
    pub frame_time_ms: f32,
    pub worst_frame_ms: f32,
    pub entity_count: usize,
    pub pending_adds: usize,
    pub world_frame: u64,
    pub state: Option<AppStateKey>,
    pub failed_ticks: u64,
    pub total_frames: u64,
}

#[derive(Debug, Default)]
struct MetricsLog {
    latest: LoopMetricsSnapshot,
    history: VecDeque<LoopMetricsSnapshot>,
}

/// Published loop metrics, readable from any thread while the loop runs.
/// Keeps the most recent snapshots, oldest first.
#[derive(Clone, Debug, Default)]
pub struct MetricsHandle {
    log: Arc<RwLock<MetricsLog>>,
}

impl MetricsHandle {
    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        self.read(|log| log.latest)
    }

    pub fn history(&self) -> Vec<LoopMetricsSnapshot> {
        self.read(|log| log.history.iter().copied().collect())
    }

    pub(crate) fn publish(&self, snapshot: LoopMetricsSnapshot) {
        self.write(|log| {
            log.latest = snapshot;
            if log.history.len() == HISTORY_LEN {
                log.history.pop_front();
            }
            log.history.push_back(snapshot);
        });
    }

    fn read<R>(&self, view: impl FnOnce(&MetricsLog) -> R) -> R {
        let guard = self.log.read().unwrap_or_else(|poisoned| {
            warn_poisoned("read");
            poisoned.into_inner()
        });
        view(&guard)
    }

    fn write(&self, update: impl FnOnce(&mut MetricsLog)) {
        let mut guard = self.log.write().unwrap_or_else(|poisoned| {
            warn_poisoned("write");
            poisoned.into_inner()
        });
        update(&mut guard);
    }
}

// A panicking reader cannot leave a half-written snapshot behind, so the
// inner value stays usable.
fn warn_poisoned(operation: &'static str) {
    POISON_WARNING.call_once(|| warn!(operation, "metrics_lock_poisoned"));
}

#[derive(Debug)]
pub(crate) struct MetricsAccumulator {
    interval: Duration,
    interval_start: Instant,
    frames: u32,
    ticks: u32,
    frame_time_sum: Duration,
    worst_frame: Duration,
    total_frames: u64,
}

impl MetricsAccumulator {
    pub(crate) fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            interval_start: now,
            frames: 0,
            ticks: 0,
            frame_time_sum: Duration::ZERO,
            worst_frame: Duration::ZERO,
            total_frames: 0,
        }
    }

    pub(crate) fn record_frame(&mut self, frame_dt: Duration) {
        self.frames = self.frames.saturating_add(1);
        self.total_frames = self.total_frames.saturating_add(1);
        self.frame_time_sum = self.frame_time_sum.saturating_add(frame_dt);
        self.worst_frame = self.worst_frame.max(frame_dt);
    }

    pub(crate) fn record_tick(&mut self) {
        self.ticks = self.ticks.saturating_add(1);
    }

    /// Closes the interval once it has elapsed, sampling the machine's
    /// current state and world.
    pub(crate) fn maybe_snapshot(
        &mut self,
        now: Instant,
        machine: &AppStateMachine,
        summary: &LoopSummary,
    ) -> Option<LoopMetricsSnapshot> {
        let elapsed = now.saturating_duration_since(self.interval_start);
        if elapsed < self.interval {
            return None;
        }

        let seconds = elapsed.as_secs_f32().max(f32::EPSILON);
        let frame_time_ms = match self.frames {
            0 => 0.0,
            frames => self.frame_time_sum.as_secs_f32() * 1000.0 / frames as f32,
        };
        let world = &machine.context().world;
        let snapshot = LoopMetricsSnapshot {
            fps: self.frames as f32 / seconds,
            tps: self.ticks as f32 / seconds,
            frame_time_ms,
            worst_frame_ms: self.worst_frame.as_secs_f32() * 1000.0,
            entity_count: world.entity_count(),
            pending_adds: world.pending_add_count(),
            world_frame: world.frame(),
            state: machine.current(),
            failed_ticks: summary.failed_ticks,
            total_frames: self.total_frames,
        };

        self.interval_start = now;
        self.frames = 0;
        self.ticks = 0;
        self.frame_time_sum = Duration::ZERO;
        self.worst_frame = Duration::ZERO;
        Some(snapshot)
    }
}
