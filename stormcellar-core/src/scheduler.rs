//! Hour-aligned recurring execution.
//!
//! One invocation runs immediately, the next one lands on the first
//! `HH:02:00` after the current hour, and from then on a fixed one-hour
//! interval takes over. The interval is not re-aligned to the wall clock, so a
//! late tick shifts every following tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use crate::error::Error;
use crate::resolver::hour_start;

/// Grace period after the top of the hour before polling.
pub const SLOT_OFFSET: Duration = Duration::from_secs(2 * 60);

/// Period between ticks once the schedule is aligned.
pub const PERIOD: Duration = Duration::from_secs(60 * 60);

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    AwaitingFirstAlignedTick,
    Running,
}

pub struct HourlyScheduler<Tz: TimeZone> {
    tz: Tz,
    offset: Duration,
    period: Duration,
    clock: Clock,
    state: ScheduleState,
}

impl<Tz: TimeZone> HourlyScheduler<Tz> {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            offset: SLOT_OFFSET,
            period: PERIOD,
            clock: Arc::new(Utc::now),
            state: ScheduleState::AwaitingFirstAlignedTick,
        }
    }

    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    fn now(&self) -> DateTime<Tz> {
        (self.clock)().with_timezone(&self.tz)
    }

    /// Time left until `offset` past the start of the hour after `now`'s hour.
    ///
    /// Always in `(0, 1h + offset]`: at exactly `HH:02:00` the answer is one
    /// hour, never zero.
    pub fn delay_until_next_slot(&self, now: &DateTime<Tz>) -> Duration {
        let Some(start) = hour_start(now) else {
            // unrepresentable local hour; fall back to a full period
            return self.period;
        };

        let offset =
            chrono::Duration::from_std(self.offset).unwrap_or_else(|_| chrono::Duration::zero());
        let next = start + chrono::Duration::hours(1) + offset;

        (next - now.clone()).to_std().unwrap_or(self.period)
    }

    /// Run `initial` now, then `recurring` at the next aligned slot and every
    /// period after that.
    ///
    /// Each invocation is awaited before the next tick is awaited, so two
    /// invocations never overlap. Failures are logged and the schedule keeps
    /// going. This never returns; stop it by dropping the future.
    pub async fn run<I, IFut, R, RFut, T, U>(&mut self, initial: I, mut recurring: R)
    where
        I: FnOnce() -> IFut,
        IFut: Future<Output = Result<T, Error>>,
        R: FnMut() -> RFut,
        RFut: Future<Output = Result<U, Error>>,
    {
        report(initial()).await;

        let delay = self.delay_until_next_slot(&self.now());
        info!(
            minutes = (delay.as_secs_f64() / 60.0).round() as u64,
            "Next run scheduled"
        );
        time::sleep(delay).await;

        self.state = ScheduleState::Running;
        info!(period_secs = self.period.as_secs(), "Schedule aligned, running hourly");
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // the first tick completes immediately, on the aligned slot
            ticker.tick().await;
            report(recurring()).await;
        }
    }
}

async fn report<T>(cycle: impl Future<Output = Result<T, Error>>) {
    if let Err(err) = cycle.await {
        error!(error = %err, "Scheduled cycle failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn zone() -> FixedOffset {
        FixedOffset::west_opt(4 * 3600).unwrap()
    }

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<FixedOffset> {
        zone().with_ymd_and_hms(2025, 6, 1, hour, min, sec).unwrap()
    }

    fn fixed_clock(now: DateTime<FixedOffset>) -> Clock {
        let now = now.with_timezone(&Utc);
        Arc::new(move || now)
    }

    #[test]
    fn delay_targets_two_minutes_past_next_hour() {
        let scheduler = HourlyScheduler::new(zone());

        assert_eq!(
            scheduler.delay_until_next_slot(&at(14, 30, 0)),
            Duration::from_secs(32 * 60)
        );
        assert_eq!(
            scheduler.delay_until_next_slot(&at(14, 0, 0)),
            Duration::from_secs(62 * 60)
        );
        assert_eq!(
            scheduler.delay_until_next_slot(&at(14, 1, 30)),
            Duration::from_secs(60 * 60 + 30)
        );
    }

    #[test]
    fn delay_on_slot_is_a_full_hour() {
        let scheduler = HourlyScheduler::new(zone());

        assert_eq!(scheduler.delay_until_next_slot(&at(14, 2, 0)), PERIOD);
    }

    #[test]
    fn delay_is_positive_and_bounded() {
        let scheduler = HourlyScheduler::new(zone());
        let upper = PERIOD + SLOT_OFFSET;

        for min in 0..60 {
            for sec in [0, 1, 30, 59] {
                let delay = scheduler.delay_until_next_slot(&at(23, min, sec));
                assert!(delay > Duration::ZERO, "{min}:{sec} gave zero delay");
                assert!(delay <= upper, "{min}:{sec} gave {delay:?}");
            }
        }
    }

    #[test]
    fn delay_honours_custom_offset() {
        let scheduler = HourlyScheduler::new(Utc).with_offset(Duration::from_secs(5 * 60));
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 8, 59, 0).unwrap();

        assert_eq!(scheduler.delay_until_next_slot(&now), Duration::from_secs(6 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_aligned_then_hourly() {
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::default();
        let start = Instant::now();
        let mut scheduler = HourlyScheduler::new(zone()).with_clock(fixed_clock(at(14, 30, 0)));

        let recorded = calls.clone();
        let action = move || {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(Instant::now());
                Ok::<_, Error>(())
            }
        };
        let run = scheduler.run(action.clone(), action);
        let limit = Duration::from_secs(32 * 60) + 2 * PERIOD + Duration::from_secs(1);
        assert!(time::timeout(limit, run).await.is_err());

        let offsets: Vec<u64> = calls
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 32 * 60, 92 * 60, 152 * 60]);
        assert_eq!(scheduler.state(), ScheduleState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_schedule() {
        let calls: Arc<Mutex<u32>> = Arc::default();
        let mut scheduler = HourlyScheduler::new(zone()).with_clock(fixed_clock(at(9, 2, 0)));

        let counter = calls.clone();
        let action = move || {
            let counter = counter.clone();
            async move {
                *counter.lock().unwrap() += 1;
                Err::<(), _>(Error::NoDataAvailable)
            }
        };
        let run = scheduler.run(action.clone(), action);
        let limit = PERIOD * 3 + Duration::from_secs(1);
        assert!(time::timeout(limit, run).await.is_err());

        // startup, 10:02, 11:02, 12:02
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycle_does_not_overlap() {
        let in_flight: Arc<Mutex<(u32, u32)>> = Arc::default();
        let mut scheduler = HourlyScheduler::new(zone()).with_clock(fixed_clock(at(9, 59, 0)));

        let state = in_flight.clone();
        let action = move || {
            let state = state.clone();
            async move {
                {
                    let mut s = state.lock().unwrap();
                    s.0 += 1;
                    s.1 = s.1.max(s.0);
                }
                time::sleep(Duration::from_secs(90 * 60)).await;
                state.lock().unwrap().0 -= 1;
                Ok::<_, Error>(())
            }
        };
        let run = scheduler.run(action.clone(), action);
        let _ = time::timeout(PERIOD * 6, run).await;

        assert_eq!(in_flight.lock().unwrap().1, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_action_runs_once_before_recurring() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let mut scheduler = HourlyScheduler::new(zone()).with_clock(fixed_clock(at(14, 30, 0)));
        assert_eq!(scheduler.state(), ScheduleState::AwaitingFirstAlignedTick);

        let first = log.clone();
        let every = log.clone();
        let run = scheduler.run(
            move || async move {
                first.lock().unwrap().push("initial");
                Ok::<_, Error>(())
            },
            move || {
                let every = every.clone();
                async move {
                    every.lock().unwrap().push("recurring");
                    Ok::<_, Error>(())
                }
            },
        );

        let limit = Duration::from_secs(32 * 60) + PERIOD + Duration::from_secs(1);
        assert!(time::timeout(limit, run).await.is_err());

        assert_eq!(*log.lock().unwrap(), vec!["initial", "recurring", "recurring"]);
    }
}
