// =============================================================================
// Trading scheduler — session clocks and cron-like jobs across two timezones
// =============================================================================
//
// The KRX session runs 09:00–15:30 Asia/Seoul; the US session 09:30–16:00
// America/New_York. Jobs fire on (hour range, minute spec, weekday) triggers
// evaluated once per minute in their own timezone. The scheduler is a
// passive trigger: all work happens in the registered callbacks.
//
// `stop` is cooperative and non-blocking; the tick task observes the flag
// before its next evaluation.
// =============================================================================

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use futures_util::future::BoxFuture;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::error::{Result, TradingError};
use crate::types::Market;

pub const KST: Tz = chrono_tz::Asia::Seoul;
pub const EST: Tz = chrono_tz::America::New_York;

pub fn market_tz(market: Market) -> Tz {
    match market {
        Market::Krx => KST,
        Market::Us => EST,
    }
}

/// Minute component of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinuteSpec {
    /// Fire at this exact minute.
    At(u32),
    /// Fire every N minutes (minute % N == 0).
    Every(u32),
}

impl MinuteSpec {
    fn matches(&self, minute: u32) -> bool {
        match self {
            Self::At(m) => *m == minute,
            Self::Every(n) => *n > 0 && minute % n == 0,
        }
    }
}

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct CronJob {
    pub id: String,
    pub hours: RangeInclusive<u32>,
    pub minute: MinuteSpec,
    /// Minute-precise session bounds. The hour range alone is too coarse for
    /// sessions that open or close mid-hour (09:30 US open, 15:30 KRX close):
    /// a job carrying a window never fires before `open` or after `close`.
    pub window: Option<(NaiveTime, NaiveTime)>,
    /// Monday–Friday only (market jobs always are).
    pub weekdays_only: bool,
    pub tz: Tz,
    callback: JobFn,
}

impl CronJob {
    fn is_due(&self, now_utc: DateTime<Utc>) -> bool {
        let local = now_utc.with_timezone(&self.tz);
        if self.weekdays_only && local.weekday().number_from_monday() > 5 {
            return false;
        }
        if !self.hours.contains(&local.hour()) || !self.minute.matches(local.minute()) {
            return false;
        }
        match self.window {
            Some((open, close)) => {
                // Compare at minute resolution so the tick's second offset
                // cannot skip the boundary firings themselves.
                let t = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0)
                    .expect("clock components are valid");
                t >= open && t <= close
            }
            None => true,
        }
    }
}

pub struct TradingScheduler {
    settings: Arc<Settings>,
    jobs: Vec<CronJob>,
    running: Arc<AtomicBool>,
}

impl TradingScheduler {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            jobs: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a job; a duplicate id replaces the previous registration.
    pub fn add_job<F>(
        &mut self,
        id: &str,
        hours: RangeInclusive<u32>,
        minute: MinuteSpec,
        tz: Tz,
        callback: F,
    ) where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.push_job(CronJob {
            id: id.to_string(),
            hours,
            minute,
            window: None,
            weekdays_only: true,
            tz,
            callback: Arc::new(callback),
        });
    }

    /// Register a job that only fires inside a market session, bounded
    /// minute-precise by `[open, close]`.
    pub fn add_session_job<F>(
        &mut self,
        id: &str,
        open: NaiveTime,
        close: NaiveTime,
        minute: MinuteSpec,
        tz: Tz,
        callback: F,
    ) where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.push_job(CronJob {
            id: id.to_string(),
            hours: open.hour()..=close.hour(),
            minute,
            window: Some((open, close)),
            weekdays_only: true,
            tz,
            callback: Arc::new(callback),
        });
    }

    fn push_job(&mut self, job: CronJob) {
        self.jobs.retain(|j| j.id != job.id);
        info!(job_id = %job.id, session_bound = job.window.is_some(), "job added");
        self.jobs.push(job);
    }

    pub fn remove_job(&mut self, id: &str) {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.id != id);
        if self.jobs.len() != before {
            info!(job_id = id, "job removed");
        }
    }

    pub fn job_ids(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.id.as_str()).collect()
    }

    /// Jobs due at `now`, for the tick loop (and the tests).
    pub fn due_jobs(&self, now_utc: DateTime<Utc>) -> Vec<&CronJob> {
        self.jobs.iter().filter(|j| j.is_due(now_utc)).collect()
    }

    /// Consume the scheduler into a background tick task. Each due job's
    /// callback is spawned so a slow job never delays its neighbours.
    pub fn start(self) -> SchedulerHandle {
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);
        info!(jobs = self.jobs.len(), "scheduler started");

        let handle_running = running.clone();
        let task = tokio::spawn(async move {
            let mut last_fired_minute: Option<i64> = None;
            loop {
                if !running.load(Ordering::SeqCst) {
                    info!("scheduler stopped");
                    break;
                }

                let now = Utc::now();
                let minute_stamp = now.timestamp() / 60;
                if last_fired_minute != Some(minute_stamp) {
                    last_fired_minute = Some(minute_stamp);
                    for job in self.due_jobs(now) {
                        debug!(job_id = %job.id, "job firing");
                        let callback = job.callback.clone();
                        tokio::spawn(async move {
                            callback().await;
                        });
                    }
                }

                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });

        SchedulerHandle {
            running: handle_running,
            task,
        }
    }

    // -------------------------------------------------------------------------
    // Session clocks
    // -------------------------------------------------------------------------

    fn session_times(&self, market: Market) -> Result<(NaiveTime, NaiveTime)> {
        let schedule = match market {
            Market::Krx => &self.settings.schedule.krx,
            Market::Us => &self.settings.schedule.us,
        };
        Ok((schedule.open()?, schedule.close()?))
    }

    /// Is the market in session right now? Weekends are closed; exchange
    /// holidays are not modelled.
    pub fn is_market_open(&self, market: Market) -> Result<bool> {
        self.is_market_open_at(market, Utc::now())
    }

    pub fn is_market_open_at(&self, market: Market, now_utc: DateTime<Utc>) -> Result<bool> {
        let local = now_utc.with_timezone(&market_tz(market));
        if local.weekday().number_from_monday() > 5 {
            return Ok(false);
        }
        let (open, close) = self.session_times(market)?;
        let t = local.time();
        Ok(t >= open && t <= close)
    }

    /// Next business-day open in the market's local timezone.
    pub fn next_market_open(&self, market: Market) -> Result<DateTime<Tz>> {
        self.next_market_open_after(market, Utc::now())
    }

    pub fn next_market_open_after(
        &self,
        market: Market,
        now_utc: DateTime<Utc>,
    ) -> Result<DateTime<Tz>> {
        let tz = market_tz(market);
        let local = now_utc.with_timezone(&tz);
        let (open, _) = self.session_times(market)?;

        let mut candidate = local.date_naive();
        if local.time() >= open {
            candidate = candidate + ChronoDuration::days(1);
        }
        while candidate.weekday().number_from_monday() > 5 {
            candidate = candidate + ChronoDuration::days(1);
        }

        tz.from_local_datetime(&candidate.and_time(open))
            .single()
            .ok_or_else(|| {
                TradingError::Configuration(format!("ambiguous market open for {market}"))
            })
    }
}

/// Handle returned by `start`. Dropping it does NOT stop the scheduler; call
/// `stop` for a cooperative shutdown.
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Non-blocking: the tick task exits before its next evaluation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "scheduler task panicked");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> TradingScheduler {
        TradingScheduler::new(Arc::new(Settings::default()))
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn krx_session_hours() {
        let s = scheduler();
        // 2025-07-09 is a Wednesday. 09:00 KST == 00:00 UTC.
        assert!(s.is_market_open_at(Market::Krx, utc(2025, 7, 9, 0, 0)).unwrap());
        assert!(s.is_market_open_at(Market::Krx, utc(2025, 7, 9, 6, 30)).unwrap()); // 15:30 KST
        assert!(!s.is_market_open_at(Market::Krx, utc(2025, 7, 9, 6, 31)).unwrap());
        assert!(!s.is_market_open_at(Market::Krx, utc(2025, 7, 8, 23, 59)).unwrap()); // 08:59 KST
    }

    #[test]
    fn us_session_hours_respect_dst() {
        let s = scheduler();
        // July (EDT, UTC-4): 09:30 New York == 13:30 UTC.
        assert!(s.is_market_open_at(Market::Us, utc(2025, 7, 9, 13, 30)).unwrap());
        assert!(!s.is_market_open_at(Market::Us, utc(2025, 7, 9, 13, 29)).unwrap());
        // December (EST, UTC-5): 09:30 New York == 14:30 UTC.
        assert!(s.is_market_open_at(Market::Us, utc(2025, 12, 10, 14, 30)).unwrap());
        assert!(!s.is_market_open_at(Market::Us, utc(2025, 12, 10, 13, 30)).unwrap());
    }

    #[test]
    fn weekends_are_closed() {
        let s = scheduler();
        // 2025-07-12 is a Saturday (03:00 UTC = 12:00 KST).
        assert!(!s.is_market_open_at(Market::Krx, utc(2025, 7, 12, 3, 0)).unwrap());
        assert!(!s.is_market_open_at(Market::Us, utc(2025, 7, 12, 14, 0)).unwrap());
    }

    #[test]
    fn next_open_skips_weekend() {
        let s = scheduler();
        // Friday 2025-07-11 10:00 KST (already past the open): next open is
        // Monday 2025-07-14 09:00 KST.
        let next = s
            .next_market_open_after(Market::Krx, utc(2025, 7, 11, 1, 0))
            .unwrap();
        assert_eq!(next.date_naive().to_string(), "2025-07-14");
        assert_eq!(next.time(), NaiveTime::from_hms_opt(9, 0, 0).unwrap());

        // Wednesday before the open: same day.
        let next = s
            .next_market_open_after(Market::Krx, utc(2025, 7, 8, 23, 0))
            .unwrap();
        assert_eq!(next.date_naive().to_string(), "2025-07-09");
    }

    #[test]
    fn job_triggers_match_minute_spec() {
        let mut s = scheduler();
        s.add_job("krx_monitoring", 9..=15, MinuteSpec::Every(5), KST, || {
            Box::pin(async {})
        });
        s.add_job("krx_report", 16..=16, MinuteSpec::At(0), KST, || {
            Box::pin(async {})
        });

        // Wednesday 10:05 KST = 01:05 UTC.
        let due = s.due_jobs(utc(2025, 7, 9, 1, 5));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "krx_monitoring");

        // 10:07 KST: nothing.
        assert!(s.due_jobs(utc(2025, 7, 9, 1, 7)).is_empty());

        // 16:00 KST = 07:00 UTC: the report.
        let due = s.due_jobs(utc(2025, 7, 9, 7, 0));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "krx_report");

        // Saturday: nothing fires.
        assert!(s.due_jobs(utc(2025, 7, 12, 1, 5)).is_empty());
    }

    #[test]
    fn session_jobs_respect_minute_precise_bounds() {
        let mut s = scheduler();
        // US session: opens 09:30, closes 16:00 New York.
        s.add_session_job(
            "us_realtime_signals",
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            MinuteSpec::Every(1),
            EST,
            || Box::pin(async {}),
        );

        // Wednesday 2025-07-09, EDT (UTC-4).
        // 09:15 New York: inside hour 9 but before the open — must not fire.
        assert!(s.due_jobs(utc(2025, 7, 9, 13, 15)).is_empty());
        // 09:30: the opening minute fires.
        assert_eq!(s.due_jobs(utc(2025, 7, 9, 13, 30)).len(), 1);
        // 16:00: the closing minute fires.
        assert_eq!(s.due_jobs(utc(2025, 7, 9, 20, 0)).len(), 1);
        // 16:05: inside hour 16 but past the close — must not fire.
        assert!(s.due_jobs(utc(2025, 7, 9, 20, 5)).is_empty());

        // KRX session: closes mid-hour at 15:30 Seoul (UTC+9).
        let mut s = scheduler();
        s.add_session_job(
            "krx_monitoring",
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            MinuteSpec::Every(5),
            KST,
            || Box::pin(async {}),
        );
        // 15:30 KST fires; 15:35 and 15:55 are past the close.
        assert_eq!(s.due_jobs(utc(2025, 7, 9, 6, 30)).len(), 1);
        assert!(s.due_jobs(utc(2025, 7, 9, 6, 35)).is_empty());
        assert!(s.due_jobs(utc(2025, 7, 9, 6, 55)).is_empty());
    }

    #[test]
    fn duplicate_job_id_replaces() {
        let mut s = scheduler();
        s.add_job("job", 9..=15, MinuteSpec::Every(1), KST, || Box::pin(async {}));
        s.add_job("job", 9..=15, MinuteSpec::Every(2), KST, || Box::pin(async {}));
        assert_eq!(s.job_ids(), vec!["job"]);

        s.remove_job("job");
        assert!(s.job_ids().is_empty());
    }

    #[tokio::test]
    async fn start_and_cooperative_stop() {
        let s = scheduler();
        let handle = s.start();
        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());
        handle.join().await;
    }
}
