use std::process::ExitCode;

use ecs_runtime::{run_loop, MetricsHandle, RealtimeFrameSource};
use tracing::{error, info, warn};

use super::bootstrap::AppWiring;

const DEFAULT_RENDER_FPS: u32 = 60;

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring {
        mut machine,
        config,
        frame_limit,
    } = app;
    let metrics = MetricsHandle::default();
    let fps_cap = config.render_fps_cap().unwrap_or(DEFAULT_RENDER_FPS);
    let mut source = RealtimeFrameSource::new(Some(fps_cap)).with_frame_limit(frame_limit);

    let summary = match run_loop(&mut machine, &mut source, &config, &metrics) {
        Ok(summary) => summary,
        Err(err) => {
            error!(error = %err, "loop_failed");
            machine.exit();
            return ExitCode::FAILURE;
        }
    };

    if !summary.exited {
        match machine.save_state() {
            Ok(save) => info!(save = %save, "final_state"),
            Err(err) => warn!(error = %err, "final_state_unavailable"),
        }
        machine.exit();
    }
    let last = metrics.snapshot();
    info!(
        frames = summary.frames,
        ticks = summary.ticks,
        failed_ticks = summary.failed_ticks,
        last_fps = last.fps,
        worst_frame_ms = last.worst_frame_ms,
        "shutdown"
    );
    ExitCode::SUCCESS
}
