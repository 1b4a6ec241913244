// src/scheduler.rs
//! Triggers for the long-running mode.
//!
//! Runs are awaited inline on the scheduler task, so two runs never overlap;
//! interval ticks missed while a run was busy are skipped, not queued.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeZone, Utc};
use tokio::time::MissedTickBehavior;

use crate::config::app::{parse_hhmm, ScheduleMode, SchedulerConfig};
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Interval(Duration),
    /// Local times of day in `offset`, sorted.
    Daily {
        times: Vec<NaiveTime>,
        offset: FixedOffset,
    },
}

impl Trigger {
    pub fn from_config(cfg: &SchedulerConfig, offset: FixedOffset) -> Self {
        match cfg.mode {
            ScheduleMode::Interval => Trigger::Interval(Duration::from_secs(cfg.interval_minutes.max(1) * 60)),
            ScheduleMode::Daily => {
                let mut times: Vec<NaiveTime> = cfg.daily_times.iter().filter_map(|t| parse_hhmm(t)).collect();
                times.sort();
                times.dedup();
                Trigger::Daily { times, offset }
            }
        }
    }
}

/// Earliest configured time strictly after `now`.
pub fn next_daily_fire(now: DateTime<Utc>, times: &[NaiveTime], offset: FixedOffset) -> Option<DateTime<Utc>> {
    let today = now.with_timezone(&offset).date_naive();
    [Some(today), today.checked_add_days(Days::new(1))]
        .into_iter()
        .flatten()
        .flat_map(|day| times.iter().map(move |t| day.and_time(*t)))
        .filter_map(|local| offset.from_local_datetime(&local).single())
        .map(|at| at.with_timezone(&Utc))
        .filter(|at| *at > now)
        .min()
}

fn daily_delay(now: DateTime<Utc>, times: &[NaiveTime], offset: FixedOffset) -> Duration {
    next_daily_fire(now, times, offset)
        .and_then(|at| (at - now).to_std().ok())
        .unwrap_or(Duration::from_secs(24 * 3_600))
}

/// Run at start, then on every trigger, until `shutdown` resolves.
/// A shutdown during a run stops it at the next stage boundary. The ledger
/// is closed on the way out. Returns the number of runs performed.
pub async fn run_scheduler<F>(pipeline: &mut Pipeline, trigger: Trigger, shutdown: F) -> usize
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let flag = pipeline.shutdown_handle();

    let mut interval = match &trigger {
        Trigger::Interval(every) => {
            tracing::info!(target: "scheduler", every_secs = every.as_secs(), "interval schedule");
            let mut i = tokio::time::interval(*every);
            i.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(i)
        }
        Trigger::Daily { times, offset } => {
            let list: Vec<String> = times.iter().map(|t| t.format("%H:%M").to_string()).collect();
            tracing::info!(target: "scheduler", times = ?list, %offset, "daily schedule");
            None
        }
    };

    let mut runs = 0usize;
    let mut first = true;
    loop {
        let wait = async {
            match (&mut interval, &trigger) {
                (Some(i), _) => {
                    i.tick().await;
                }
                (None, Trigger::Daily { times, offset }) if !first => {
                    let d = daily_delay(Utc::now(), times, *offset);
                    tracing::info!(target: "scheduler", wait_secs = d.as_secs(), "waiting for next run");
                    tokio::time::sleep(d).await;
                }
                _ => {}
            }
        };
        tokio::select! {
            _ = wait => {}
            _ = &mut shutdown => {
                tracing::info!(target: "scheduler", "shutdown requested while idle");
                break;
            }
        }
        first = false;

        let mut stopping = false;
        {
            let run = pipeline.run_once();
            tokio::pin!(run);
            tokio::select! {
                _ = &mut run => {}
                _ = &mut shutdown => {
                    tracing::warn!(target: "scheduler", "shutdown requested; stopping after the current stage");
                    flag.store(true, Ordering::SeqCst);
                    stopping = true;
                    run.await;
                }
            }
        }
        runs += 1;
        if stopping || flag.load(Ordering::SeqCst) {
            break;
        }
    }

    pipeline.ledger_mut().close();
    tracing::info!(target: "scheduler", runs, "scheduler stopped");
    runs
}
