use crate::application::lock_state;
use crate::application::oauth::NowProvider;
use crate::application::SharedState;
use crate::domain::models::ApplicationState;
use crate::domain::timer::{display_seconds, format_clock, MentalClock, StartOutcome, TickOutcome};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::LocalStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Side effect fired once when a focus session runs out.
pub trait TimerAlarm: Send + Sync {
    fn ring(&self);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerSnapshot {
    pub running: bool,
    pub remaining_seconds: i64,
    pub display: String,
    pub target: Option<DateTime<Utc>>,
}

struct TimerCore<L, A>
where
    L: LocalStore,
    A: TimerAlarm + ?Sized,
{
    clock: MentalClock,
    state: SharedState,
    local_store: Arc<L>,
    alarm: Arc<A>,
    updates: watch::Sender<TimerSnapshot>,
    now_provider: NowProvider,
}

impl<L, A> TimerCore<L, A>
where
    L: LocalStore,
    A: TimerAlarm + ?Sized,
{
    fn snapshot_at(&self, state: &ApplicationState, now: DateTime<Utc>) -> TimerSnapshot {
        snapshot_of(&self.clock, state, now)
    }

    fn tick(&self) -> Result<TickOutcome, InfraError> {
        let now = (self.now_provider)();
        let (outcome, snapshot) = {
            let mut state = lock_state(&self.state)?;
            let outcome = self.clock.tick(&mut state, now);
            if outcome == TickOutcome::Expired {
                self.local_store.save_best_effort(&state);
            }
            (outcome, self.snapshot_at(&state, now))
        };

        if outcome == TickOutcome::Expired {
            tracing::info!("focus session finished");
            self.alarm.ring();
        }
        self.updates.send_replace(snapshot);
        Ok(outcome)
    }
}

fn snapshot_of(clock: &MentalClock, state: &ApplicationState, now: DateTime<Utc>) -> TimerSnapshot {
    let remaining = clock.remaining(state, now);
    TimerSnapshot {
        running: state.timer_target.is_some(),
        remaining_seconds: display_seconds(remaining),
        display: format_clock(remaining),
        target: state.timer_target,
    }
}

/// Drives the Mental Clock: owns the periodic ticker, writes every change to
/// the local slot and publishes the remaining time on a watch channel.
pub struct FocusTimerService<L, A>
where
    L: LocalStore,
    A: TimerAlarm + ?Sized,
{
    core: Arc<TimerCore<L, A>>,
    tick_interval: StdDuration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<L, A> FocusTimerService<L, A>
where
    L: LocalStore + 'static,
    A: TimerAlarm + ?Sized + 'static,
{
    pub fn new(clock: MentalClock, state: SharedState, local_store: Arc<L>, alarm: Arc<A>) -> Self {
        Self::with_now_provider(clock, state, local_store, alarm, Arc::new(Utc::now))
    }

    pub fn with_now_provider(
        clock: MentalClock,
        state: SharedState,
        local_store: Arc<L>,
        alarm: Arc<A>,
        now_provider: NowProvider,
    ) -> Self {
        let initial = lock_state(&state)
            .map(|guard| snapshot_of(&clock, &guard, now_provider()))
            .unwrap_or_else(|_| snapshot_of(&clock, &ApplicationState::default(), now_provider()));
        let (updates, _) = watch::channel(initial);
        Self {
            core: Arc::new(TimerCore {
                clock,
                state,
                local_store,
                alarm,
                updates,
                now_provider,
            }),
            tick_interval: StdDuration::from_secs(1),
            ticker: Mutex::new(None),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: StdDuration) -> Self {
        self.tick_interval = tick_interval.max(StdDuration::from_millis(1));
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.core.updates.subscribe()
    }

    pub fn snapshot(&self) -> Result<TimerSnapshot, InfraError> {
        let state = lock_state(&self.core.state)?;
        Ok(self.core.snapshot_at(&state, (self.core.now_provider)()))
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker
            .lock()
            .map(|ticker| ticker.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Idempotent: a running session keeps its target.
    pub fn start(&self) -> Result<StartOutcome, InfraError> {
        let runtime = runtime_handle()?;
        let now = (self.core.now_provider)();
        let (outcome, snapshot) = {
            let mut state = lock_state(&self.core.state)?;
            let outcome = self.core.clock.start(&mut state, now);
            if matches!(outcome, StartOutcome::Started { .. }) {
                self.core.local_store.save_best_effort(&state);
            }
            (outcome, self.core.snapshot_at(&state, now))
        };

        if let StartOutcome::Started { target } = outcome {
            tracing::info!(target_at = %target, "focus session started");
        }
        self.core.updates.send_replace(snapshot);
        self.ensure_ticker(&runtime)?;
        Ok(outcome)
    }

    /// Forgets the session. Returns whether one was running.
    pub fn pause(&self) -> Result<bool, InfraError> {
        self.stop_ticker();
        let now = (self.core.now_provider)();
        let (was_running, snapshot) = {
            let mut state = lock_state(&self.core.state)?;
            let was_running = self.core.clock.pause(&mut state);
            if was_running {
                self.core.local_store.save_best_effort(&state);
            }
            (was_running, self.core.snapshot_at(&state, now))
        };

        if was_running {
            tracing::info!("focus session paused");
        }
        self.core.updates.send_replace(snapshot);
        Ok(was_running)
    }

    /// Pauses and returns the full duration now on display.
    pub fn reset(&self) -> Result<chrono::Duration, InfraError> {
        self.stop_ticker();
        let now = (self.core.now_provider)();
        let (full, had_target, snapshot) = {
            let mut state = lock_state(&self.core.state)?;
            let had_target = state.timer_target.is_some();
            let full = self.core.clock.reset(&mut state);
            if had_target {
                self.core.local_store.save_best_effort(&state);
            }
            (full, had_target, self.core.snapshot_at(&state, now))
        };

        if had_target {
            tracing::info!("focus session reset");
        }
        self.core.updates.send_replace(snapshot);
        Ok(full)
    }

    /// Restarts the ticker for a target persisted by an earlier run without
    /// setting a new one. Returns whether a session was resumed.
    pub fn resume(&self) -> Result<bool, InfraError> {
        let runtime = runtime_handle()?;
        let snapshot = self.snapshot()?;
        let running = snapshot.running;
        self.core.updates.send_replace(snapshot);
        if running {
            tracing::info!("resuming persisted focus session");
            self.ensure_ticker(&runtime)?;
        }
        Ok(running)
    }

    /// One recomputation step, as the ticker performs it.
    pub fn tick_once(&self) -> Result<TickOutcome, InfraError> {
        self.core.tick()
    }

    fn ensure_ticker(&self, runtime: &Handle) -> Result<(), InfraError> {
        let mut ticker = self
            .ticker
            .lock()
            .map_err(|error| InfraError::Internal(format!("ticker lock poisoned: {error}")))?;
        if ticker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let core = Arc::clone(&self.core);
        let period = self.tick_interval;
        *ticker = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match core.tick() {
                    Ok(TickOutcome::Running { .. }) => {}
                    Ok(TickOutcome::Idle | TickOutcome::Expired) => break,
                    Err(error) => {
                        tracing::error!(error = %error, "focus timer tick failed");
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop_ticker(&self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
    }
}

impl<L, A> Drop for FocusTimerService<L, A>
where
    L: LocalStore,
    A: TimerAlarm + ?Sized,
{
    fn drop(&mut self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
    }
}

fn runtime_handle() -> Result<Handle, InfraError> {
    Handle::try_current()
        .map_err(|error| InfraError::Internal(format!("focus timer needs an async runtime: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::local_store::InMemoryLocalStore;
    use chrono::Duration;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingAlarm {
        rings: AtomicUsize,
    }

    impl TimerAlarm for CountingAlarm {
        fn ring(&self) {
            self.rings.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        state: SharedState,
        local: Arc<InMemoryLocalStore>,
        alarm: Arc<CountingAlarm>,
        offset_seconds: Arc<AtomicI64>,
        timer: FocusTimerService<InMemoryLocalStore, CountingAlarm>,
    }

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn fixture(initial: ApplicationState) -> Fixture {
        let state: SharedState = Arc::new(Mutex::new(initial));
        let local = Arc::new(InMemoryLocalStore::default());
        let alarm = Arc::new(CountingAlarm::default());
        let offset_seconds = Arc::new(AtomicI64::new(0));
        let clock_offset = Arc::clone(&offset_seconds);
        let timer = FocusTimerService::with_now_provider(
            MentalClock::default(),
            Arc::clone(&state),
            Arc::clone(&local),
            Arc::clone(&alarm),
            Arc::new(move || base() + Duration::seconds(clock_offset.load(Ordering::SeqCst))),
        )
        .with_tick_interval(StdDuration::from_millis(5));
        Fixture {
            state,
            local,
            alarm,
            offset_seconds,
            timer,
        }
    }

    fn persisted_target(local: &InMemoryLocalStore) -> Option<DateTime<Utc>> {
        local
            .load()
            .expect("load")
            .and_then(|state| state.timer_target)
    }

    #[tokio::test]
    async fn start_persists_target_and_ticks() {
        let f = fixture(ApplicationState::default());

        let outcome = f.timer.start().expect("start");

        let target = base() + Duration::minutes(25);
        assert_eq!(outcome, StartOutcome::Started { target });
        assert_eq!(persisted_target(&f.local), Some(target));
        assert!(f.timer.is_ticking());
        assert_eq!(f.timer.snapshot().expect("snapshot").display, "25:00");
    }

    #[tokio::test]
    async fn second_start_keeps_original_target() {
        let f = fixture(ApplicationState::default());
        f.timer.start().expect("start");
        f.offset_seconds.store(90, Ordering::SeqCst);

        let outcome = f.timer.start().expect("start again");

        assert_eq!(
            outcome,
            StartOutcome::AlreadyRunning {
                target: base() + Duration::minutes(25)
            }
        );
        assert_eq!(f.timer.snapshot().expect("snapshot").display, "23:30");
    }

    #[tokio::test]
    async fn expiry_clears_target_and_rings_once() {
        let f = fixture(ApplicationState::default());
        f.timer.start().expect("start");
        f.offset_seconds.store(25 * 60, Ordering::SeqCst);

        let first = f.timer.tick_once().expect("tick");
        let second = f.timer.tick_once().expect("tick");

        assert_eq!(first, TickOutcome::Expired);
        assert_eq!(second, TickOutcome::Idle);
        assert_eq!(f.alarm.rings.load(Ordering::SeqCst), 1);
        assert_eq!(persisted_target(&f.local), None);
        assert_eq!(lock_state(&f.state).expect("state").timer_target, None);
    }

    #[tokio::test]
    async fn pause_discards_progress() {
        let f = fixture(ApplicationState::default());
        f.timer.start().expect("start");
        f.offset_seconds.store(600, Ordering::SeqCst);

        assert!(f.timer.pause().expect("pause"));
        assert!(!f.timer.is_ticking());
        assert_eq!(persisted_target(&f.local), None);

        let outcome = f.timer.start().expect("start again");
        assert_eq!(
            outcome,
            StartOutcome::Started {
                target: base() + Duration::seconds(600) + Duration::minutes(25)
            }
        );
    }

    #[tokio::test]
    async fn reset_shows_full_duration() {
        let f = fixture(ApplicationState::default());
        f.timer.start().expect("start");
        f.offset_seconds.store(300, Ordering::SeqCst);

        let full = f.timer.reset().expect("reset");

        assert_eq!(full, Duration::minutes(25));
        let snapshot = f.timer.snapshot().expect("snapshot");
        assert!(!snapshot.running);
        assert_eq!(snapshot.display, "25:00");
        assert_eq!(f.timer.subscribe().borrow().display, "25:00");
    }

    #[tokio::test]
    async fn resume_continues_persisted_target() {
        let target = base() + Duration::minutes(10);
        let f = fixture(ApplicationState {
            timer_target: Some(target),
            ..ApplicationState::default()
        });

        assert!(f.timer.resume().expect("resume"));

        let snapshot = f.timer.snapshot().expect("snapshot");
        assert_eq!(snapshot.target, Some(target));
        assert_eq!(snapshot.remaining_seconds, 600);
        assert!(f.timer.is_ticking());
    }

    #[tokio::test]
    async fn stale_target_expires_once_through_ticker() {
        let f = fixture(ApplicationState {
            timer_target: Some(base() - Duration::minutes(5)),
            ..ApplicationState::default()
        });
        let mut updates = f.timer.subscribe();

        assert!(f.timer.resume().expect("resume"));
        tokio::time::timeout(StdDuration::from_secs(2), async {
            loop {
                if !updates.borrow_and_update().running {
                    break;
                }
                updates.changed().await.expect("sender alive");
            }
        })
        .await
        .expect("timer expired");
        tokio::time::sleep(StdDuration::from_millis(30)).await;

        assert_eq!(f.alarm.rings.load(Ordering::SeqCst), 1);
        assert!(!f.timer.is_ticking());
        assert_eq!(persisted_target(&f.local), None);
    }

    #[tokio::test]
    async fn idle_resume_does_not_tick() {
        let f = fixture(ApplicationState::default());
        assert!(!f.timer.resume().expect("resume"));
        assert!(!f.timer.is_ticking());
    }

    #[test]
    fn start_without_runtime_leaves_state_untouched() {
        let f = fixture(ApplicationState::default());
        let error = f.timer.start().expect_err("no runtime");
        assert!(matches!(error, InfraError::Internal(_)));
        assert_eq!(lock_state(&f.state).expect("state").timer_target, None);
    }
}
