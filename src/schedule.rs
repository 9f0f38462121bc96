//! Recurring triggers.
//!
//! Two pattern forms are understood:
//! - `@every <n><s|m|h>`: fixed interval measured from the previous firing.
//! - cron expressions with a leading seconds field, as the `cron` crate reads
//!   them (`sec min hour day-of-month month day-of-week [year]`, names like
//!   `MON-FRI`, `?`, and shorthands such as `@daily`).
//!
//! Cron patterns are evaluated in the configured reference offset. A firing
//! the process was not awake for is not replayed.

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use cron::Schedule;
use std::{future::Future, str::FromStr, time::Duration};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("empty pattern")]
    Empty,
    #[error("invalid interval `{0}`, expected e.g. `@every 10m`")]
    Interval(String),
    #[error("invalid cron pattern `{pattern}`: {reason}")]
    Cron { pattern: String, reason: String },
}

#[derive(Debug, Clone)]
pub enum Trigger {
    Every(Duration),
    Cron(Box<Schedule>),
}

impl Trigger {
    pub fn parse(pattern: &str) -> Result<Self, TriggerError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(TriggerError::Empty);
        }
        if let Some(rest) = pattern.strip_prefix("@every") {
            return parse_interval(rest.trim())
                .map(Trigger::Every)
                .ok_or_else(|| TriggerError::Interval(pattern.to_string()));
        }
        Schedule::from_str(pattern)
            .map(|schedule| Trigger::Cron(Box::new(schedule)))
            .map_err(|err| TriggerError::Cron {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            })
    }

    /// First firing strictly after `after`, or `None` if the pattern can
    /// never match again.
    pub fn next_after(&self, after: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        match self {
            Trigger::Every(interval) => {
                let step = TimeDelta::from_std(*interval).ok()?;
                after.checked_add_signed(step)
            }
            Trigger::Cron(schedule) => schedule.after(&after).next(),
        }
    }
}

fn parse_interval(raw: &str) -> Option<Duration> {
    let split = raw.len().checked_sub(1)?;
    let (amount, unit) = raw.split_at_checked(split)?;
    let amount: u64 = amount.parse().ok().filter(|n| *n > 0)?;
    let seconds = match unit {
        "s" => amount,
        "m" => amount.checked_mul(60)?,
        "h" => amount.checked_mul(3600)?,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

/// Runs jobs on their triggers until the cancellation token fires, then waits
/// for in-flight firings to finish.
///
/// Each firing is its own task, so a slow firing does not delay the next
/// tick of the same job and nothing prevents two firings from overlapping.
pub struct Scheduler {
    offset: FixedOffset,
    cancel: CancellationToken,
    loops: JoinSet<()>,
}

impl Scheduler {
    pub fn new(offset: FixedOffset, cancel: CancellationToken) -> Self {
        Self {
            offset,
            cancel,
            loops: JoinSet::new(),
        }
    }

    /// `job` receives the instant it was scheduled for.
    pub fn add<F, Fut>(&mut self, name: &'static str, trigger: Trigger, job: F)
    where
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_loop(name, trigger, false, job);
    }

    /// Like [`Scheduler::add`] but also fires once right away.
    pub fn add_immediate<F, Fut>(&mut self, name: &'static str, trigger: Trigger, job: F)
    where
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_loop(name, trigger, true, job);
    }

    fn spawn_loop<F, Fut>(&mut self, name: &'static str, trigger: Trigger, immediate: bool, job: F)
    where
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let offset = self.offset;
        let cancel = self.cancel.clone();
        self.loops
            .spawn(run_job(name, trigger, offset, immediate, cancel, job));
    }

    pub async fn wait(mut self) {
        while let Some(result) = self.loops.join_next().await {
            if let Err(err) = result {
                error!(target = "avito.schedule", error = %err, "scheduler_loop_panicked");
            }
        }
        info!(target = "avito.schedule", "scheduler_stopped");
    }
}

async fn run_job<F, Fut>(
    name: &'static str,
    trigger: Trigger,
    offset: FixedOffset,
    immediate: bool,
    cancel: CancellationToken,
    job: F,
) where
    F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut firings = JoinSet::new();
    if immediate {
        debug!(target = "avito.schedule", job = name, "job_fired");
        firings.spawn(job(Utc::now()));
    }

    loop {
        let now = Utc::now().with_timezone(&offset);
        let Some(next) = trigger.next_after(now) else {
            warn!(target = "avito.schedule", job = name, "trigger_exhausted");
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        debug!(target = "avito.schedule", job = name, next = %next, "job_scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        while let Some(done) = firings.try_join_next() {
            log_firing(name, done);
        }
        debug!(target = "avito.schedule", job = name, "job_fired");
        firings.spawn(job(next.with_timezone(&Utc)));
    }

    while let Some(done) = firings.join_next().await {
        log_firing(name, done);
    }
}

fn log_firing(name: &'static str, result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        error!(target = "avito.schedule", job = name, error = %err, "job_panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn msk(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, min, s)
            .unwrap()
    }

    fn next(pattern: &str, after: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        Trigger::parse(pattern)
            .expect("valid pattern")
            .next_after(after)
            .expect("has a next firing")
    }

    #[test]
    fn every_pattern_adds_interval() {
        let trigger = Trigger::parse("@every 10m").unwrap();
        assert!(matches!(trigger, Trigger::Every(d) if d == Duration::from_secs(600)));
        assert_eq!(
            trigger.next_after(msk(2026, 10, 15, 12, 0, 0)),
            Some(msk(2026, 10, 15, 12, 10, 0))
        );
        assert!(matches!(
            Trigger::parse("@every 2h").unwrap(),
            Trigger::Every(d) if d == Duration::from_secs(7200)
        ));
    }

    #[test]
    fn rejects_malformed_intervals() {
        assert!(matches!(Trigger::parse("  "), Err(TriggerError::Empty)));
        for bad in ["@every", "@every 0s", "@every 5d", "@every soon", "@every m"] {
            assert!(
                matches!(Trigger::parse(bad), Err(TriggerError::Interval(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn default_patterns_fire_in_reference_offset() {
        // Snapshot save: on the minute, strictly after the given instant.
        assert_eq!(
            next("0 * * * * *", msk(2026, 10, 15, 12, 0, 30)),
            msk(2026, 10, 15, 12, 1, 0)
        );
        assert_eq!(
            next("0 * * * * *", msk(2026, 10, 15, 12, 1, 0)),
            msk(2026, 10, 15, 12, 2, 0)
        );
        // Snapshot clear: midnight UTC+3, rolling over the month.
        assert_eq!(
            next("0 0 0 * * *", msk(2026, 3, 31, 23, 59, 59)),
            msk(2026, 4, 1, 0, 0, 0)
        );
    }

    #[test]
    fn accepts_named_and_shorthand_cron_patterns() {
        // Friday evening to Monday morning.
        assert_eq!(
            next("0 0 9 * * MON-FRI", msk(2026, 10, 16, 17, 30, 0)),
            msk(2026, 10, 19, 9, 0, 0)
        );
        assert_eq!(
            next("0 0 0 ? * *", msk(2026, 10, 15, 8, 0, 0)),
            msk(2026, 10, 16, 0, 0, 0)
        );
        assert_eq!(
            next("0 0 0 1 JAN *", msk(2026, 10, 15, 0, 0, 0)),
            msk(2027, 1, 1, 0, 0, 0)
        );
        assert_eq!(
            next("@daily", msk(2026, 10, 15, 8, 0, 0)),
            msk(2026, 10, 16, 0, 0, 0)
        );
    }

    #[test]
    fn rejects_malformed_cron() {
        for bad in ["60 * * * * *", "0 0 24 * * *", "not a pattern"] {
            assert!(
                matches!(Trigger::parse(bad), Err(TriggerError::Cron { .. })),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn immediate_job_fires_and_stops_on_cancel() {
        let fired = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let mut scheduler = Scheduler::new(FixedOffset::east_opt(0).unwrap(), cancel.clone());
        let counter = fired.clone();
        scheduler.add_immediate("cycle", Trigger::Every(Duration::from_secs(3600)), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), scheduler.wait())
            .await
            .expect("scheduler stops");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn interval_job_keeps_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let mut scheduler = Scheduler::new(FixedOffset::east_opt(0).unwrap(), cancel.clone());
        let counter = fired.clone();
        scheduler.add("tick", Trigger::parse("@every 1s").unwrap(), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        scheduler.wait().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cron_job_receives_its_scheduled_instant() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let mut scheduler = Scheduler::new(FixedOffset::east_opt(3 * 3600).unwrap(), cancel.clone());
        let record = seen.clone();
        scheduler.add("every_second", Trigger::parse("* * * * * *").unwrap(), move |at| {
            let record = record.clone();
            async move {
                record.lock().unwrap().push(at);
            }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        scheduler.wait().await;
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|at| at.timestamp_subsec_nanos() == 0));
    }
}
