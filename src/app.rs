//! The render loop and the shutdown sequence.
//!
//! Every tick builds one frame and hands it to a [`FrameSink`]. The loop
//! ends only when [`Shutdown`] is triggered (signal, key press, or a dead
//! terminal). Key presses never reach the loop: the event reader triggers
//! shutdown itself, so a tick stuck on a slow utility is cut short. After that the keep-awake child is stopped within the grace
//! period, and only then does [`App::run`] return.

use std::io;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::event::{AppEvent, EventReader};
use crate::keep_awake::KeepAwakeController;
use crate::refresh::RefreshLoop;
use crate::shutdown::Shutdown;
use crate::types::RenderFrame;

/// Where frames go: the terminal, or a recorder in tests.
pub trait FrameSink {
    fn draw(&mut self, frame: &RenderFrame) -> io::Result<()>;
}

pub struct App {
    refresh: RefreshLoop,
    keep_awake: KeepAwakeController,
    shutdown: Shutdown,
    grace: Duration,
    last_frame: Option<RenderFrame>,
}

impl App {
    pub fn new(refresh: RefreshLoop, keep_awake: KeepAwakeController, shutdown: Shutdown, grace: Duration) -> Self {
        Self {
            refresh,
            keep_awake,
            shutdown,
            grace,
            last_frame: None,
        }
    }

    pub fn keep_awake(&self) -> &KeepAwakeController {
        &self.keep_awake
    }

    pub fn refresh(&self) -> &RefreshLoop {
        &self.refresh
    }

    /// Run until shutdown, then stop the keep-awake child.
    pub async fn run<S: FrameSink>(&mut self, events: &mut EventReader, sink: &mut S) {
        self.startup().await;
        info!("render loop started");

        loop {
            let event = tokio::select! {
                biased;
                () = self.shutdown.triggered() => break,
                event = events.next() => event,
            };
            let Some(event) = event else {
                break;
            };

            match event {
                AppEvent::Tick => {
                    let status = self.keep_awake.check_health();
                    let frame = tokio::select! {
                        biased;
                        () = self.shutdown.triggered() => break,
                        frame = self.refresh.tick(status) => frame,
                    };
                    self.draw(sink, frame);
                }
                AppEvent::Resize => {
                    if let Some(frame) = self.last_frame.take() {
                        self.draw(sink, frame);
                    }
                }
            }
        }

        info!(ticks = self.refresh.ticks(), "render loop ended, shutting down");
        self.shutdown.trigger();
        self.keep_awake.stop(self.grace).await;
    }

    /// Restore cached snapshots and start the keep-awake child, unless
    /// shutdown arrives first.
    async fn startup(&mut self) {
        tokio::select! {
            biased;
            () = self.shutdown.triggered() => return,
            () = self.refresh.restore() => {}
        }
        tokio::select! {
            biased;
            () = self.shutdown.triggered() => {}
            result = self.keep_awake.start() => {
                if let Err(e) = result {
                    warn!(error = %e, "keep-awake not started");
                }
            }
        }
    }

    fn draw<S: FrameSink>(&mut self, sink: &mut S, frame: RenderFrame) {
        if let Err(e) = sink.draw(&frame) {
            error!(error = %e, "failed to draw, shutting down");
            self.shutdown.trigger();
        }
        self.last_frame = Some(frame);
    }
}
