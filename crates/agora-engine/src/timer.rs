//! Session clock: periodic ticks, milestone detection and inactivity
//! tracking.
//!
//! The bookkeeping lives in [`TimerState::advance`], a pure function of the
//! elapsed time and the activity flag. [`SessionTimer`] only drives it from
//! a tokio interval and hands each [`TimerTick`] to a [`TickHandler`].

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::EngineError;

/// Percentages of the session duration that fire a milestone.
pub const MILESTONES: [u8; 4] = [25, 50, 75, 100];

/// Consecutive silent ticks that count as inactivity.
pub const INACTIVITY_TICKS: u32 = 2;

/// Mutable clock bookkeeping for one session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimerState {
    pub elapsed: Duration,
    pub remaining: Duration,
    pub milestones_fired: Vec<u8>,
    pub consecutive_silent_ticks: u32,
}

/// What one tick produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerTick {
    pub elapsed: Duration,
    pub remaining: Duration,
    /// Milestones crossed since the previous tick, ascending. Usually at
    /// most one; a long tick interval can cross several.
    pub milestones: Vec<u8>,
    pub inactive: bool,
    /// The session duration has been reached; no further ticks follow.
    pub finished: bool,
}

impl TimerState {
    pub fn new(duration: Duration) -> Self {
        Self {
            remaining: duration,
            ..Self::default()
        }
    }

    pub fn advance(
        &mut self,
        elapsed: Duration,
        duration: Duration,
        had_activity: bool,
    ) -> TimerTick {
        self.elapsed = elapsed.min(duration);
        self.remaining = duration.saturating_sub(elapsed);

        let mut milestones = Vec::new();
        for pct in MILESTONES {
            if self.milestones_fired.contains(&pct) {
                continue;
            }
            let threshold = duration.as_millis() * u128::from(pct) / 100;
            if elapsed.as_millis() >= threshold {
                self.milestones_fired.push(pct);
                milestones.push(pct);
            }
        }

        let mut inactive = false;
        if had_activity {
            self.consecutive_silent_ticks = 0;
        } else {
            self.consecutive_silent_ticks += 1;
            if self.consecutive_silent_ticks >= INACTIVITY_TICKS {
                inactive = true;
                self.consecutive_silent_ticks = 0;
            }
        }

        TimerTick {
            elapsed: self.elapsed,
            remaining: self.remaining,
            milestones,
            inactive,
            finished: elapsed >= duration,
        }
    }
}

/// Elapsed and remaining time in whole seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TimerSnapshot {
    pub elapsed: u64,
    pub remaining: u64,
}

impl TimerSnapshot {
    pub fn new(elapsed: Duration, remaining: Duration) -> Self {
        Self {
            elapsed: elapsed.as_secs(),
            remaining: remaining.as_secs(),
        }
    }
}

/// "Something happened since the last tick", set by producers and
/// consumed by the timer.
#[derive(Clone, Debug, Default)]
pub struct ActivityFlag(Arc<AtomicBool>);

impl ActivityFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Read and clear.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn on_tick(&self, tick: TimerTick);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerStatus {
    Idle,
    Running,
    Stopped,
}

/// Drives [`TimerState`] at a fixed interval until the duration is reached
/// or [`stop`](Self::stop) is called.
pub struct SessionTimer {
    status: Arc<Mutex<TimerStatus>>,
    state: Arc<Mutex<TimerState>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionTimer {
    pub fn new() -> Self {
        Self {
            status: Arc::new(Mutex::new(TimerStatus::Idle)),
            state: Arc::new(Mutex::new(TimerState::default())),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> TimerStatus {
        *self.status.lock()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let state = self.state.lock();
        TimerSnapshot::new(state.elapsed, state.remaining)
    }

    pub fn state(&self) -> TimerState {
        self.state.lock().clone()
    }

    /// Begin ticking. The first tick arrives one `interval` after the call.
    pub fn start(
        &self,
        duration: Duration,
        interval: Duration,
        activity: ActivityFlag,
        handler: Arc<dyn TickHandler>,
    ) -> Result<(), EngineError> {
        {
            let mut status = self.status.lock();
            if *status != TimerStatus::Idle {
                return Err(EngineError::TimerAlreadyStarted);
            }
            *status = TimerStatus::Running;
        }
        *self.state.lock() = TimerState::new(duration);

        let status = self.status.clone();
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let interval = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let mut ticker = time::interval_at(start + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let at = tokio::select! {
                    at = ticker.tick() => at,
                    () = cancel.cancelled() => {
                        debug!("timer cancelled");
                        return;
                    }
                };
                let elapsed = at.duration_since(start);
                let tick = state.lock().advance(elapsed, duration, activity.take());
                let finished = tick.finished;

                if AssertUnwindSafe(handler.on_tick(tick)).catch_unwind().await.is_err() {
                    error!("tick handler panicked");
                }
                if finished {
                    info!(duration_secs = duration.as_secs(), "session time elapsed");
                    *status.lock() = TimerStatus::Stopped;
                    return;
                }
            }
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Cancel future ticks. Safe to call repeatedly or before `start`.
    pub fn stop(&self) {
        self.cancel.cancel();
        *self.status.lock() = TimerStatus::Stopped;
        self.task.lock().take();
    }
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct Recorder(Mutex<Vec<TimerTick>>);

    #[async_trait]
    impl TickHandler for Recorder {
        async fn on_tick(&self, tick: TimerTick) {
            self.0.lock().push(tick);
        }
    }

    #[test]
    fn milestones_fire_once_each() {
        let duration = 10 * MIN;
        let mut state = TimerState::new(duration);
        let mut fired = Vec::new();
        // irregular ticks, some landing exactly on a threshold
        for secs in [100, 150, 151, 299, 300, 300, 460, 590, 600, 610] {
            fired.extend(state.advance(Duration::from_secs(secs), duration, true).milestones);
        }
        assert_eq!(fired, vec![25, 50, 75, 100]);
    }

    #[test]
    fn one_tick_can_cross_several_milestones() {
        let duration = 4 * MIN;
        let mut state = TimerState::new(duration);
        let tick = state.advance(Duration::from_secs(130), duration, true);
        assert_eq!(tick.milestones, vec![25, 50]);
        assert!(!tick.finished);
        let tick = state.advance(Duration::from_secs(240), duration, true);
        assert_eq!(tick.milestones, vec![75, 100]);
        assert!(tick.finished);
        assert_eq!(tick.remaining, Duration::ZERO);
    }

    #[test]
    fn inactivity_every_second_silent_tick() {
        let duration = 60 * MIN;
        let mut state = TimerState::new(duration);
        let pattern = [false, false, false, false, false, true, false, true, false, false];
        let inactive: Vec<bool> = pattern
            .iter()
            .enumerate()
            .map(|(i, &active)| state.advance(MIN * (i as u32 + 1), duration, active).inactive)
            .collect();
        assert_eq!(
            inactive,
            vec![false, true, false, true, false, false, false, false, false, true]
        );
    }

    #[test]
    fn activity_resets_silent_count() {
        let duration = 60 * MIN;
        let mut state = TimerState::new(duration);
        state.advance(MIN, duration, false);
        assert_eq!(state.consecutive_silent_ticks, 1);
        state.advance(2 * MIN, duration, true);
        assert_eq!(state.consecutive_silent_ticks, 0);
    }

    #[test]
    fn activity_flag_take_clears() {
        let flag = ActivityFlag::new();
        assert!(!flag.take());
        flag.clone().mark();
        assert!(flag.is_set());
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_duration_then_stops() {
        let timer = SessionTimer::new();
        let recorder = Arc::new(Recorder::default());
        timer
            .start(10 * MIN, MIN, ActivityFlag::new(), recorder.clone())
            .unwrap();
        assert_eq!(timer.status(), TimerStatus::Running);

        time::sleep(15 * MIN).await;

        let ticks = recorder.0.lock().clone();
        assert_eq!(ticks.len(), 10);
        assert_eq!(ticks[0].elapsed, MIN);
        assert_eq!(ticks[0].remaining, 9 * MIN);
        let milestones: Vec<(usize, Vec<u8>)> = ticks
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.milestones.is_empty())
            .map(|(i, t)| (i + 1, t.milestones.clone()))
            .collect();
        assert_eq!(
            milestones,
            vec![(3, vec![25]), (5, vec![50]), (8, vec![75]), (10, vec![100])]
        );
        assert!(ticks[9].finished);
        assert_eq!(timer.status(), TimerStatus::Stopped);
        assert_eq!(timer.snapshot(), TimerSnapshot { elapsed: 600, remaining: 0 });
        let state = timer.state();
        assert_eq!(state.milestones_fired, vec![25, 50, 75, 100]);
        assert_eq!(state.remaining, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_reports_inactivity() {
        let timer = SessionTimer::new();
        let recorder = Arc::new(Recorder::default());
        let activity = ActivityFlag::new();
        timer.start(60 * MIN, MIN, activity.clone(), recorder.clone()).unwrap();

        time::sleep(MIN + Duration::from_secs(1)).await;
        activity.mark();
        time::sleep(4 * MIN).await;

        let inactive: Vec<bool> = recorder.0.lock().iter().map(|t| t.inactive).collect();
        // tick 1 silent, tick 2 active, ticks 3-4 silent, tick 5 silent
        assert_eq!(inactive, vec![false, false, false, true, false]);
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_rejected() {
        let timer = SessionTimer::new();
        let recorder = Arc::new(Recorder::default());
        timer.start(MIN, MIN, ActivityFlag::new(), recorder.clone()).unwrap();
        let err = timer.start(MIN, MIN, ActivityFlag::new(), recorder).unwrap_err();
        assert!(matches!(err, EngineError::TimerAlreadyStarted));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_future_ticks() {
        let timer = SessionTimer::new();
        let recorder = Arc::new(Recorder::default());
        timer.start(10 * MIN, MIN, ActivityFlag::new(), recorder.clone()).unwrap();

        time::sleep(2 * MIN + Duration::from_secs(1)).await;
        timer.stop();
        timer.stop();
        time::sleep(10 * MIN).await;

        assert_eq!(recorder.0.lock().len(), 2);
        assert_eq!(timer.status(), TimerStatus::Stopped);
        assert!(matches!(
            timer.start(MIN, MIN, ActivityFlag::new(), recorder),
            Err(EngineError::TimerAlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn stop_before_start_is_harmless() {
        let timer = SessionTimer::new();
        timer.stop();
        assert_eq!(timer.status(), TimerStatus::Stopped);
        assert_eq!(timer.snapshot(), TimerSnapshot::default());
    }
}
