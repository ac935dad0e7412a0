//! Cancelling at an arbitrary point of the render loop always ends the loop
//! and stops the keep-awake child within the grace period.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use futures::future::BoxFuture;
use futures::StreamExt;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use rand::Rng;

use coffee::collector::Collector;
use coffee::config::{Config, KeepAwakeConfig};
use coffee::errors::ProbeError;
use coffee::event::EventReader;
use coffee::keep_awake::ControllerState;
use coffee::probe::{CommandRunner, CommandSpec, NetworkProbe, PowerProbe};
use coffee::types::RenderFrame;
use coffee::{App, FrameSink, KeepAwakeController, KeepAwakeStatus, RefreshLoop, Shutdown};

const TRIALS: usize = 16;
const GRACE: Duration = Duration::from_millis(300);
/// Scheduling slack on top of the grace period.
const SLACK: Duration = Duration::from_millis(700);

/// Utilities that take a while and then fail, so cancellation often lands
/// while a probe is in flight.
struct SlowRunner {
    delay: Duration,
}

impl CommandRunner for SlowRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<String, ProbeError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Err(ProbeError::unavailable(&spec.program, "not on this host"))
        })
    }
}

#[derive(Default)]
struct PidRecorder {
    pids: Vec<u32>,
}

impl FrameSink for PidRecorder {
    fn draw(&mut self, frame: &RenderFrame) -> std::io::Result<()> {
        if let KeepAwakeStatus::Active { pid: Some(pid), .. } = frame.keep_awake {
            self.pids.push(pid);
        }
        Ok(())
    }
}

fn app(shutdown: &Shutdown, probe_delay: Duration, ignores_sigterm: bool) -> App {
    let runner: Arc<dyn CommandRunner> = Arc::new(SlowRunner { delay: probe_delay });
    let config = Config::default();
    let refresh = RefreshLoop::new(
        PowerProbe::new(Arc::clone(&runner), &config, None),
        NetworkProbe::new(Arc::clone(&runner), &config, None),
        Collector::new(),
        &config,
    );

    let (program, args) = if ignores_sigterm {
        ("sh", vec!["-c".to_string(), "trap '' TERM; exec sleep 60".to_string()])
    } else {
        ("sleep", vec!["60".to_string()])
    };
    let keep_awake = KeepAwakeController::new(
        KeepAwakeConfig {
            enabled: true,
            program: program.into(),
            args,
            power_settings: Vec::new(),
            max_restarts: 1,
        },
        runner,
        Duration::from_secs(1),
    );
    App::new(refresh, keep_awake, shutdown.clone(), GRACE)
}

fn is_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(pid), None).is_ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_at_random_points_always_shuts_down_in_time() {
    let mut rng = rand::thread_rng();

    for trial in 0..TRIALS {
        let tick = Duration::from_millis(rng.gen_range(5..60));
        let probe_delay = Duration::from_millis(rng.gen_range(0..120));
        let cancel_after = Duration::from_millis(rng.gen_range(0..400));
        let ignores_sigterm = rng.gen_bool(0.5);

        let shutdown = Shutdown::new();
        let mut app = app(&shutdown, probe_delay, ignores_sigterm);
        let mut events = EventReader::ticks(tick, &shutdown);
        let mut sink = PidRecorder::default();

        let canceller = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(cancel_after).await;
                shutdown.trigger();
                Instant::now()
            })
        };

        tokio::time::timeout(Duration::from_secs(10), app.run(&mut events, &mut sink))
            .await
            .unwrap_or_else(|_| panic!("trial {trial}: loop did not exit"));
        let returned = Instant::now();
        let triggered = canceller.await.unwrap();

        let shutdown_took = returned.saturating_duration_since(triggered);
        assert!(
            shutdown_took <= GRACE + SLACK,
            "trial {trial}: shutdown took {shutdown_took:?} (tick {tick:?}, probe {probe_delay:?}, cancel {cancel_after:?}, ignores TERM {ignores_sigterm})"
        );
        assert_eq!(app.keep_awake().state(), ControllerState::Stopped, "trial {trial}");
        for pid in sink.pids {
            assert!(!is_alive(pid), "trial {trial}: keep-awake pid {pid} still alive");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn key_press_during_slow_tick_quits_promptly() {
    let key_after = Duration::from_millis(300);
    let shutdown = Shutdown::new();
    let mut app = app(&shutdown, Duration::from_secs(3), false);

    let keys = futures::stream::once(async move {
        tokio::time::sleep(key_after).await;
        Ok::<_, std::io::Error>(Event::Key(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)))
    })
    .chain(futures::stream::pending());
    let mut events = EventReader::from_stream(Duration::from_millis(250), &shutdown, Box::pin(keys));
    let mut sink = PidRecorder::default();

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(10), app.run(&mut events, &mut sink))
        .await
        .expect("loop did not exit");
    let took = started.elapsed();

    assert!(shutdown.is_triggered());
    assert!(took < key_after + GRACE + SLACK, "quit took {took:?} with a utility stuck for 3s");
    assert_eq!(app.keep_awake().state(), ControllerState::Stopped);
}
