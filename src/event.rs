//! Tick and terminal events for the render loop.
//!
//! A background task merges a tick interval with the crossterm event
//! stream. Any key press requests shutdown right where it is read, so a
//! tick blocked on a slow utility cannot delay it. Ticks go through a
//! one-slot channel: while the loop is busy at most one tick waits, the
//! rest are dropped. The task ends on shutdown or when the reader is
//! dropped.

use std::time::Duration;

use crossterm::event::{Event as CrosstermEvent, EventStream, KeyEventKind};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tracing::{info, trace};

use crate::shutdown::Shutdown;

/// Events that the render loop receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// Time to build and draw a new frame.
    Tick,
    /// Terminal was resized; redraw the last frame.
    Resize,
}

pub struct EventReader {
    ticks: mpsc::Receiver<()>,
    resizes: mpsc::UnboundedReceiver<()>,
}

impl EventReader {
    /// Ticks every `tick_rate` plus key presses from the terminal.
    pub fn with_terminal(tick_rate: Duration, shutdown: &Shutdown) -> Self {
        Self::from_stream(tick_rate, shutdown, EventStream::new())
    }

    /// Ticks only, for running without a terminal attached.
    pub fn ticks(tick_rate: Duration, shutdown: &Shutdown) -> Self {
        Self::spawn::<EventStream>(tick_rate, shutdown, None)
    }

    /// Ticks plus terminal events from `input`.
    pub fn from_stream<S>(tick_rate: Duration, shutdown: &Shutdown, input: S) -> Self
    where
        S: Stream<Item = std::io::Result<CrosstermEvent>> + Unpin + Send + 'static,
    {
        Self::spawn(tick_rate, shutdown, Some(input))
    }

    fn spawn<S>(tick_rate: Duration, shutdown: &Shutdown, input: Option<S>) -> Self
    where
        S: Stream<Item = std::io::Result<CrosstermEvent>> + Unpin + Send + 'static,
    {
        let (tick_tx, ticks) = mpsc::channel(1);
        let (resize_tx, resizes) = mpsc::unbounded_channel();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let mut input = input;
            let mut interval = tokio::time::interval(tick_rate);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = shutdown.triggered() => break,

                    _ = interval.tick() => match tick_tx.try_send(()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(())) => trace!("render loop busy, tick dropped"),
                        Err(TrySendError::Closed(())) => break,
                    },

                    Some(Ok(event)) = next_input(&mut input) => match event {
                        CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => {
                            info!(key = ?key.code, "key pressed, shutting down");
                            shutdown.trigger();
                            break;
                        }
                        CrosstermEvent::Resize(..) => {
                            if resize_tx.send(()).is_err() {
                                break;
                            }
                        }
                        _ => {}
                    },
                }
            }
        });

        Self { ticks, resizes }
    }

    /// The next event, or `None` once the reader has stopped.
    pub async fn next(&mut self) -> Option<AppEvent> {
        tokio::select! {
            biased;
            Some(()) = self.resizes.recv() => Some(AppEvent::Resize),
            Some(()) = self.ticks.recv() => Some(AppEvent::Tick),
            else => None,
        }
    }
}

/// Next terminal event; pending forever when there is no terminal.
async fn next_input<S>(input: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match input {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyEvent, KeyEventState, KeyModifiers};
    use tokio::time::Instant;

    fn key(c: char, kind: KeyEventKind) -> CrosstermEvent {
        CrosstermEvent::Key(KeyEvent {
            code: KeyCode::Char(c),
            modifiers: KeyModifiers::NONE,
            kind,
            state: KeyEventState::NONE,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_arrive_until_shutdown() {
        let shutdown = Shutdown::new();
        let mut events = EventReader::ticks(Duration::from_millis(250), &shutdown);

        assert_eq!(events.next().await, Some(AppEvent::Tick));
        assert_eq!(events.next().await, Some(AppEvent::Tick));

        shutdown.trigger();
        // At most one tick may already be queued.
        let mut drained = 0;
        while events.next().await.is_some() {
            drained += 1;
        }
        assert!(drained <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_consumer_gets_one_tick_not_a_burst() {
        let shutdown = Shutdown::new();
        let tick = Duration::from_millis(250);
        let mut events = EventReader::ticks(tick, &shutdown);
        assert_eq!(events.next().await, Some(AppEvent::Tick));

        // The loop is stuck for about twelve tick periods.
        tokio::time::sleep(Duration::from_millis(3_100)).await;

        assert_eq!(events.next().await, Some(AppEvent::Tick));
        let started = Instant::now();
        let burst = tokio::time::timeout(Duration::from_millis(50), events.next()).await;
        assert!(burst.is_err(), "queued tick delivered right after the stall");

        assert_eq!(events.next().await, Some(AppEvent::Tick));
        assert!(started.elapsed() <= tick);
        shutdown.trigger();
    }

    #[tokio::test]
    async fn any_key_press_triggers_shutdown() {
        // 'r' included: no key is bound to anything but quitting.
        let input = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(key('q', KeyEventKind::Release)),
            Ok(key('r', KeyEventKind::Press)),
        ])
        .chain(futures::stream::pending());

        let shutdown = Shutdown::new();
        let mut events = EventReader::from_stream(Duration::from_secs(3_600), &shutdown, Box::pin(input));

        tokio::time::timeout(Duration::from_secs(1), shutdown.triggered())
            .await
            .unwrap();
        // The reader has stopped; only already-queued events remain.
        while events.next().await.is_some() {}
    }

    #[tokio::test]
    async fn key_release_alone_does_not_quit() {
        let input = futures::stream::iter(vec![Ok::<_, std::io::Error>(key('q', KeyEventKind::Release))])
            .chain(futures::stream::pending());

        let shutdown = Shutdown::new();
        let mut events = EventReader::from_stream(Duration::from_millis(10), &shutdown, Box::pin(input));

        for _ in 0..3 {
            assert_eq!(events.next().await, Some(AppEvent::Tick));
        }
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
    }

    #[tokio::test]
    async fn resize_is_forwarded() {
        let input = futures::stream::iter(vec![Ok::<_, std::io::Error>(CrosstermEvent::Resize(80, 24))])
            .chain(futures::stream::pending());

        let shutdown = Shutdown::new();
        let mut events = EventReader::from_stream(Duration::from_secs(3_600), &shutdown, Box::pin(input));

        let mut seen = Vec::new();
        while seen.len() < 2 {
            seen.push(events.next().await.unwrap());
        }
        assert!(seen.contains(&AppEvent::Resize));
        assert!(seen.contains(&AppEvent::Tick));
        shutdown.trigger();
    }
}
