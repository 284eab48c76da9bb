//! Delayed panel actions: exit delay, entry delay and siren auto-stop.
//!
//! A timer never touches panel state itself. When it elapses it posts a
//! [`TimerFired`] into the panel's mailbox, so its effect is ordered with
//! every sensor event and command. Starting a timer cancels whatever was
//! scheduled before, of any kind; a cancelled timer completes with
//! [`TimerOutcome::Cancelled`] and posts nothing. A timer that elapsed but
//! was cancelled before the panel dequeued it is recognised as stale by its
//! generation.

use std::time::Duration;

use strum::Display;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TimerKind {
    Arming,
    Pending,
    TriggerAutoStop,
}

/// How a timer task completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Elapsed,
    Cancelled,
}

/// Posted to the panel when a timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

struct Scheduled {
    kind: TimerKind,
    generation: u64,
    token: CancellationToken,
}

/// Body of a timer task: wait out `delay` unless cancelled first.
async fn run_timer<M: From<TimerFired>>(
    fired: TimerFired,
    delay: Duration,
    cancelled: CancellationToken,
    tx: mpsc::UnboundedSender<M>,
) -> TimerOutcome {
    tokio::select! {
        _ = cancelled.cancelled() => TimerOutcome::Cancelled,
        _ = tokio::time::sleep(delay) => {
            // The panel may already be gone; nothing left to act on then
            let _ = tx.send(M::from(fired));
            TimerOutcome::Elapsed
        }
    }
}

/// The panel's single slot of delayed work.
pub struct Timers<M> {
    scheduled: Option<Scheduled>,
    next_generation: u64,
    tx: mpsc::UnboundedSender<M>,
}

impl<M> std::fmt::Debug for Timers<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timers")
            .field("scheduled", &self.scheduled.as_ref().map(|s| (s.kind, s.generation)))
            .finish_non_exhaustive()
    }
}

impl<M> Timers<M>
where
    M: From<TimerFired> + Send + 'static,
{
    pub fn new(tx: mpsc::UnboundedSender<M>) -> Self {
        Self {
            scheduled: None,
            next_generation: 0,
            tx,
        }
    }

    /// Cancel everything, then schedule `kind` to fire after `delay`.
    pub fn start(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel_all();

        self.next_generation += 1;
        let generation = self.next_generation;
        let token = CancellationToken::new();
        tokio::spawn(run_timer(
            TimerFired { kind, generation },
            delay,
            token.clone(),
            self.tx.clone(),
        ));

        debug!("Timer {} #{} started ({:?})", kind, generation, delay);
        self.scheduled = Some(Scheduled {
            kind,
            generation,
            token,
        });
    }

    /// Cancel the scheduled timer, if any. Idempotent.
    pub fn cancel_all(&mut self) {
        if let Some(scheduled) = self.scheduled.take() {
            scheduled.token.cancel();
            debug!(
                "Timer {} #{} cancelled",
                scheduled.kind, scheduled.generation
            );
        }
    }

    /// Accept a fired timer if it is still the scheduled one.
    ///
    /// Returns `false` for stale timers, which must be ignored.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        match &self.scheduled {
            Some(s) if s.kind == fired.kind && s.generation == fired.generation => {
                self.scheduled = None;
                true
            }
            _ => {
                debug!("Ignoring stale timer {} #{}", fired.kind, fired.generation);
                false
            }
        }
    }

    /// Number of live timers (0 or 1).
    #[cfg(test)]
    pub fn live(&self) -> usize {
        usize::from(self.scheduled.is_some())
    }

    #[cfg(test)]
    pub fn scheduled_kind(&self) -> Option<TimerKind> {
        self.scheduled.as_ref().map(|s| s.kind)
    }
}

impl<M> Drop for Timers<M> {
    fn drop(&mut self) {
        if let Some(scheduled) = self.scheduled.take() {
            scheduled.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timers() -> (Timers<TimerFired>, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Timers::new(tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (mut timers, mut rx) = timers();
        let start = tokio::time::Instant::now();
        timers.start(TimerKind::Pending, Duration::from_secs(5));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.kind, TimerKind::Pending);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(timers.accept(fired));
        assert_eq!(timers.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_completes_without_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel::<TimerFired>();
        let token = CancellationToken::new();
        let fired = TimerFired {
            kind: TimerKind::Arming,
            generation: 1,
        };
        let task = tokio::spawn(run_timer(fired, Duration::from_secs(5), token.clone(), tx));
        token.cancel();

        assert_eq!(task.await.unwrap(), TimerOutcome::Cancelled);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        let (tx, mut rx) = mpsc::unbounded_channel::<TimerFired>();
        let outcome = run_timer(fired, Duration::from_secs(5), CancellationToken::new(), tx).await;
        assert_eq!(outcome, TimerOutcome::Elapsed);
        assert_eq!(rx.try_recv().unwrap(), fired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_replaces_any_kind() {
        let (mut timers, mut rx) = timers();
        timers.start(TimerKind::Arming, Duration::from_secs(5));
        timers.start(TimerKind::Pending, Duration::from_secs(10));
        timers.start(TimerKind::TriggerAutoStop, Duration::from_secs(1));
        assert_eq!(timers.live(), 1);
        assert_eq!(timers.scheduled_kind(), Some(TimerKind::TriggerAutoStop));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.kind, TimerKind::TriggerAutoStop);
        assert!(timers.accept(fired));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_is_idempotent() {
        let (mut timers, _rx) = timers();
        timers.cancel_all();
        timers.start(TimerKind::Pending, Duration::from_secs(5));
        timers.cancel_all();
        timers.cancel_all();
        assert_eq!(timers.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fire_is_rejected() {
        let (mut timers, mut rx) = timers();
        timers.start(TimerKind::Pending, Duration::from_secs(0));
        let fired = rx.recv().await.unwrap();

        // Cancelled after it was posted but before it was handled
        timers.start(TimerKind::Arming, Duration::from_secs(5));
        assert!(!timers.accept(fired));
        assert_eq!(timers.scheduled_kind(), Some(TimerKind::Arming));
    }
}
