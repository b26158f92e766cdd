// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use calloop::{EventLoop, LoopSignal, channel::Event};
use framepace::{
    Clock, Drawable, MonotonicClock, SchedulerKind, SimulatedDisplay, VblankEvent, VblankScheduler,
};
use tracing::{debug, error, info, warn};

mod config;
use config::Config;

/// Shared data of the demo's event loop
struct Pacer {
    display: SimulatedDisplay<Pacer>,
    scheduler: VblankScheduler<Pacer>,
    drawable: Drawable,
    loop_signal: LoopSignal,
    clock: MonotonicClock,
    target_frames: u64,
    frames: u64,
    missed: u64,
    early_callbacks: u64,
    last_msc: Option<u64>,
    should_stop: bool,
}

impl Pacer {
    fn on_vblank(&mut self, event: VblankEvent) {
        let now = self.clock.now_us();
        if now < event.ust {
            warn!(msc = event.msc, "Callback fired {} us before the end of vblank", event.ust - now);
            self.early_callbacks += 1;
        }

        if let Some(last) = self.last_msc {
            let skipped = event.msc.saturating_sub(last + 1);
            if skipped > 0 {
                debug!(msc = event.msc, skipped, "Missed vblanks");
                self.missed += skipped;
            }
        }
        self.last_msc = Some(event.msc);
        self.frames += 1;

        if self.frames >= self.target_frames {
            self.should_stop = true;
            return;
        }

        // this is where a compositor would render; the next frame goes out
        // at the end of the next vblank
        self.schedule_frame();
    }

    fn schedule_frame(&mut self) {
        let scheduler = self.scheduler.clone();
        if let Err(err) = scheduler.schedule(self.drawable, &self.display) {
            error!(?err, "Failed to schedule frame");
            self.should_stop = true;
        }
    }
}

fn main() {
    if let Err(err) = main_inner() {
        error!("Error occurred in main(): {:#}", err);
        std::process::exit(1);
    }
}

fn main_inner() -> Result<()> {
    init_logger()?;
    let config = Config::from_env().context("Failed to read configuration")?;
    info!(?config, "framepace starting up!");

    let summary = pace(&config)?;
    info!(
        frames = summary.frames,
        missed = summary.missed,
        early_callbacks = summary.early_callbacks,
        last_msc = summary.last_msc,
        "Event loop exited"
    );
    Ok(())
}

/// What a pacing run observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Summary {
    frames: u64,
    missed: u64,
    early_callbacks: u64,
    last_msc: u64,
}

fn pace(config: &Config) -> Result<Summary> {
    let mut event_loop: EventLoop<'static, Pacer> =
        EventLoop::try_new().context("Failed to initialize event loop")?;

    let (display, notices) = SimulatedDisplay::new(
        event_loop.handle(),
        config.refresh_interval(),
        config.early,
        config.faults,
    );
    let drawable = display.create_drawable();
    let scheduler = VblankScheduler::new(
        SchedulerKind::Present,
        event_loop.handle(),
        |event, pacer: &mut Pacer| pacer.on_vblank(event),
    );

    // route the display's notices to the scheduler of their drawable
    event_loop
        .handle()
        .insert_source(notices, |event, _, pacer| match event {
            Event::Msg(notice) => {
                if notice.drawable != pacer.drawable {
                    return;
                }
                let scheduler = pacer.scheduler.clone();
                let display = pacer.display.clone();
                scheduler.handle_completion_notice(&display, notice, pacer);
            }
            Event::Closed => {
                warn!("Display notice channel closed");
                pacer.should_stop = true;
            }
        })
        .map_err(|err| err.error)
        .context("Failed to init display notice source")?;

    let mut pacer = Pacer {
        display,
        scheduler,
        drawable,
        loop_signal: event_loop.get_signal(),
        clock: MonotonicClock,
        target_frames: config.frames,
        frames: 0,
        missed: 0,
        early_callbacks: 0,
        last_msc: None,
        should_stop: config.frames == 0,
    };

    if !pacer.should_stop {
        pacer.schedule_frame();
    }

    // nothing would ever wake the loop to notice
    if pacer.should_stop {
        info!("Nothing to pace, not starting event loop");
    } else {
        info!("Starting event loop");
        event_loop.run(None, &mut pacer, |pacer| {
            if pacer.should_stop {
                info!("Shutting down");
                pacer.loop_signal.stop();
                pacer.loop_signal.wakeup();
            }
        })?;
    }

    pacer.display.destroy_drawable(pacer.drawable);
    Ok(Summary {
        frames: pacer.frames,
        missed: pacer.missed,
        early_callbacks: pacer.early_callbacks,
        last_msc: pacer.scheduler.last_msc(),
    })
}

fn init_logger() -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framepace=info"));

    fmt().with_env_filter(filter).init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn config(frames: u64) -> Config {
        Config {
            refresh_hz: 250,
            frames,
            early: Duration::from_millis(1),
            ..Config::default()
        }
    }

    #[test]
    fn zero_frames_returns_without_running() {
        let start = Instant::now();
        let summary = pace(&config(0)).unwrap();
        assert_eq!(summary.frames, 0);
        assert_eq!(summary.last_msc, 0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn paces_requested_frames() {
        let summary = pace(&config(5)).unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.early_callbacks, 0);
        assert!(summary.last_msc >= 5);
    }
}
