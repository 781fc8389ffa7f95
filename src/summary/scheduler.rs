use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use log::{error, info};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    db::DailySummary, scheduling::SingleFlight, utils::timestamps::local_to_utc,
};

use super::SummaryEngine;

/// Next local occurrence of `time` strictly after `now`.
pub fn next_fire(now: DateTime<Local>, time: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(time);
    let candidate = local_to_utc(today);
    if candidate > now.with_timezone(&Utc) {
        return candidate;
    }
    let tomorrow = now
        .date_naive()
        .succ_opt()
        .unwrap_or(now.date_naive())
        .and_time(time);
    local_to_utc(tomorrow)
}

/// Fires the summary engine once a day at a local time that can be moved
/// while running.
#[derive(Clone)]
pub struct DailySummaryScheduler {
    engine: SummaryEngine,
    time_tx: watch::Sender<NaiveTime>,
    flight: SingleFlight,
}

impl DailySummaryScheduler {
    pub fn new(engine: SummaryEngine, time: NaiveTime) -> Self {
        let (time_tx, _) = watch::channel(time);
        Self {
            engine,
            time_tx,
            flight: SingleFlight::new(),
        }
    }

    pub fn engine(&self) -> &SummaryEngine {
        &self.engine
    }

    pub fn daily_time(&self) -> NaiveTime {
        *self.time_tx.borrow()
    }

    /// Moves the daily trigger; a running loop picks it up immediately.
    pub fn reschedule(&self, time: NaiveTime) {
        self.time_tx.send_replace(time);
        info!("daily summary rescheduled to {}", time.format("%H:%M"));
    }

    /// Regenerates the summary for `date` now, waiting for a scheduled run
    /// that is already in progress.
    pub async fn generate_now(&self, date: NaiveDate) -> Result<DailySummary> {
        let _guard = self.flight.acquire().await;
        self.engine.generate(date, None, true).await
    }

    async fn run_scheduled(&self) {
        let Some(_guard) = self.flight.try_acquire() else {
            info!("daily summary already running, skipping");
            return;
        };
        let today = Local::now().date_naive();
        match self.engine.generate(today, None, false).await {
            Ok(summary) => info!("daily summary ready for {}", summary.date),
            Err(err) => error!("daily summary for {today} failed: {err:?}"),
        }
    }

    pub fn start(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        let mut time_rx = self.time_tx.subscribe();

        tokio::spawn(async move {
            loop {
                let time = *time_rx.borrow_and_update();
                let target = next_fire(Local::now(), time);
                let wait = (target - Utc::now()).to_std().unwrap_or_default();
                info!(
                    "next daily summary at {}",
                    target.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                );

                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        info!("daily summary loop shutting down");
                        break;
                    }
                    changed = time_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(wait) => {
                        scheduler.run_scheduled().await;
                    }
                }
            }
        })
    }
}
