//! Time-triggered scheduler.
//!
//! Maintains two jobs per active schedule: the *main job* firing at the cron
//! expression (playback) and the *pre-fetch job* firing five minutes earlier
//! (song lock + stream resolution). A daily maintenance job prunes old chat
//! messages.
//!
//! Cron expressions are the classic five-field dialect (min hr dom mon dow)
//! evaluated in the fixed local zone. Jobs are plain tokio tasks that sleep
//! until the next computed firing; firings of different schedules may overlap
//! freely, firings of one schedule are serialized by its own task.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{AirwaveError, AirwaveResult};
use crate::model::Schedule;
use crate::protocol_constants::{CHAT_RETENTION, MAINTENANCE_CRON, PREFETCH_LEAD};
use crate::services::playback::PlaybackController;
use crate::services::prefetch::PrefetchService;
use crate::store::{ChatStore, ScheduleStore};

// ─────────────────────────────────────────────────────────────────────────────
// Cron helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Rewrites a five-field crontab day-of-week field (0-6, Sunday = 0) into the
/// `cron` crate's numbering (1-7, Sunday = 1), preserving lists, ranges and
/// steps.
fn translate_dow(field: &str) -> String {
    fn shift(token: &str) -> String {
        match token.parse::<u8>() {
            Ok(n) => ((n % 7) + 1).to_string(),
            Err(_) => token.to_string(),
        }
    }

    field
        .split(',')
        .map(|segment| {
            let (range, step) = match segment.split_once('/') {
                Some((r, s)) => (r, Some(s)),
                None => (segment, None),
            };
            let shifted = match range.split_once('-') {
                Some((a, b)) => format!("{}-{}", shift(a), shift(b)),
                None => shift(range),
            };
            match step {
                Some(s) => format!("{}/{}", shifted, s),
                None => shifted,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses a five-field cron expression (min hr dom mon dow).
///
/// The `cron` crate wants a seconds field and numbers Sunday as 1, so this
/// prepends `0` seconds and translates the day-of-week field.
pub fn parse_cron(expr: &str) -> AirwaveResult<cron::Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(AirwaveError::InvalidRequest(format!(
            "cron expression must have 5 fields, got {}: '{}'",
            fields.len(),
            expr
        )));
    }

    let translated = format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        translate_dow(fields[4]),
    );

    cron::Schedule::from_str(&translated)
        .map_err(|e| AirwaveError::InvalidRequest(format!("invalid cron '{}': {}", expr, e)))
}

/// Whether the expression fires every minute (wildcard minute field).
///
/// Such schedules get no pre-fetch job: there is no five-minute lead to work
/// with.
#[must_use]
pub fn has_wildcard_minute(expr: &str) -> bool {
    matches!(expr.split_whitespace().next(), Some("*"))
}

/// Next firing of `expr` strictly after `after`, evaluated in local time.
pub fn next_firing_after(expr: &str, after: DateTime<Utc>) -> AirwaveResult<Option<DateTime<Utc>>> {
    let schedule = parse_cron(expr)?;
    let local = after.with_timezone(&Local);
    Ok(schedule.after(&local).next().map(|dt| dt.with_timezone(&Utc)))
}

/// Next firing of `expr` strictly after now.
pub fn next_firing(expr: &str) -> AirwaveResult<Option<DateTime<Utc>>> {
    next_firing_after(expr, Utc::now())
}

/// Sleeps until `target`, returning `false` if `cancel` fired first.
async fn sleep_until(target: DateTime<Utc>, cancel: &CancellationToken) -> bool {
    let wait = (target - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler service
// ─────────────────────────────────────────────────────────────────────────────

/// Cancellation handles for one schedule's job pair.
struct ScheduleJobs {
    main: CancellationToken,
    prefetch: Option<CancellationToken>,
}

impl ScheduleJobs {
    fn cancel(&self) {
        self.main.cancel();
        if let Some(token) = &self.prefetch {
            token.cancel();
        }
    }
}

/// Owns the cron job registry and the schedule timers.
pub struct Scheduler {
    schedules: Arc<dyn ScheduleStore>,
    chat: Arc<dyn ChatStore>,
    controller: Arc<PlaybackController>,
    prefetch: Arc<PrefetchService>,
    jobs: DashMap<i64, ScheduleJobs>,
    maintenance: Mutex<Option<CancellationToken>>,
    cancel_root: CancellationToken,
}

impl Scheduler {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        chat: Arc<dyn ChatStore>,
        controller: Arc<PlaybackController>,
        prefetch: Arc<PrefetchService>,
        cancel_root: CancellationToken,
    ) -> Self {
        Self {
            schedules,
            chat,
            controller,
            prefetch,
            jobs: DashMap::new(),
            maintenance: Mutex::new(None),
            cancel_root,
        }
    }

    /// Loads all active schedules and registers their job pairs, plus the
    /// daily maintenance job.
    pub async fn initialize(self: &Arc<Self>) -> AirwaveResult<()> {
        let active = self.schedules.list_active().await?;
        log::info!("[Scheduler] Registering {} active schedule(s)", active.len());

        for schedule in &active {
            if let Err(e) = self.add_job(schedule).await {
                // One bad row must not keep the rest of the schedules dark
                log::error!(
                    "[Scheduler] Failed to register schedule {} ('{}'): {}",
                    schedule.id,
                    schedule.name,
                    e
                );
            }
        }

        self.start_maintenance_job();
        Ok(())
    }

    /// Registers (or re-registers) the job pair for one schedule and persists
    /// its `next_run`.
    pub async fn add_job(self: &Arc<Self>, schedule: &Schedule) -> AirwaveResult<()> {
        // Validate before cancelling anything
        let next = next_firing(&schedule.cron_expr)?;

        if let Some((_, jobs)) = self.jobs.remove(&schedule.id) {
            jobs.cancel();
        }

        let main_token = self.cancel_root.child_token();
        self.spawn_main_job(schedule, main_token.clone());

        let prefetch_token = if has_wildcard_minute(&schedule.cron_expr) {
            log::warn!(
                "[Scheduler] Schedule {} ('{}') fires every minute; skipping pre-fetch job",
                schedule.id,
                schedule.name
            );
            None
        } else {
            let token = self.cancel_root.child_token();
            self.spawn_prefetch_job(schedule, token.clone());
            Some(token)
        };

        self.jobs.insert(
            schedule.id,
            ScheduleJobs {
                main: main_token,
                prefetch: prefetch_token,
            },
        );

        self.schedules.set_next_run(schedule.id, next).await?;
        log::info!(
            "[Scheduler] Registered schedule {} ('{}'): next firing {:?}",
            schedule.id,
            schedule.name,
            next
        );
        Ok(())
    }

    /// Cancels a schedule's job pair and discards any prepared slot.
    pub async fn remove_job(&self, schedule_id: i64) {
        if let Some((_, jobs)) = self.jobs.remove(&schedule_id) {
            jobs.cancel();
            log::info!("[Scheduler] Cancelled jobs for schedule {}", schedule_id);
        }
        self.prefetch.discard_slot(schedule_id).await;
    }

    /// Cancels all jobs and re-runs initialization.
    pub async fn reload(self: &Arc<Self>) -> AirwaveResult<()> {
        log::info!("[Scheduler] Reloading all schedules");
        for entry in self.jobs.iter() {
            entry.value().cancel();
        }
        self.jobs.clear();
        if let Some(token) = self.maintenance.lock().take() {
            token.cancel();
        }
        self.initialize().await
    }

    /// Number of schedules with registered jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    fn spawn_main_job(self: &Arc<Self>, schedule: &Schedule, token: CancellationToken) {
        let scheduler = Arc::clone(self);
        let id = schedule.id;
        let expr = schedule.cron_expr.clone();
        let volume = schedule.volume;
        let song_count = schedule.song_count;

        tokio::spawn(async move {
            loop {
                let next = match next_firing(&expr) {
                    Ok(Some(next)) => next,
                    Ok(None) => {
                        log::warn!("[Scheduler] Schedule {} has no future firings", id);
                        break;
                    }
                    Err(e) => {
                        log::error!("[Scheduler] Schedule {} became unparsable: {}", id, e);
                        break;
                    }
                };

                if !sleep_until(next, &token).await {
                    break;
                }

                log::info!("[Scheduler] Main firing for schedule {}", id);
                scheduler
                    .controller
                    .execute_schedule(id, volume, song_count)
                    .await;
            }
        });
    }

    fn spawn_prefetch_job(self: &Arc<Self>, schedule: &Schedule, token: CancellationToken) {
        let scheduler = Arc::clone(self);
        let id = schedule.id;
        let expr = schedule.cron_expr.clone();
        let volume = schedule.volume;

        tokio::spawn(async move {
            loop {
                let next = match next_firing(&expr) {
                    Ok(Some(next)) => next,
                    _ => break,
                };
                let lead = chrono::Duration::from_std(PREFETCH_LEAD).expect("lead fits");
                let prefetch_at = next - lead;

                if prefetch_at <= Utc::now() {
                    // Already inside the lead window of this firing; target the
                    // following one once this firing has passed.
                    if !sleep_until(next + chrono::Duration::seconds(1), &token).await {
                        break;
                    }
                    continue;
                }

                if !sleep_until(prefetch_at, &token).await {
                    break;
                }

                log::info!("[Scheduler] Pre-fetch firing for schedule {}", id);
                scheduler.prefetch.prepare_scheduled_song(id, volume).await;

                // Move past this firing before computing the next one
                if !sleep_until(next + chrono::Duration::seconds(1), &token).await {
                    break;
                }
            }
        });
    }

    fn start_maintenance_job(self: &Arc<Self>) {
        let mut guard = self.maintenance.lock();
        if let Some(token) = guard.take() {
            token.cancel();
        }
        let token = self.cancel_root.child_token();
        *guard = Some(token.clone());

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let next = match next_firing(MAINTENANCE_CRON) {
                    Ok(Some(next)) => next,
                    _ => break,
                };
                if !sleep_until(next, &token).await {
                    break;
                }

                let retention = chrono::Duration::from_std(CHAT_RETENTION).expect("retention fits");
                let cutoff = Utc::now() - retention;
                match scheduler.chat.delete_older_than(cutoff).await {
                    Ok(removed) if removed > 0 => {
                        log::info!("[Scheduler] Maintenance pruned {} chat message(s)", removed);
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("[Scheduler] Chat maintenance failed: {}", e),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn parse_cron_rejects_wrong_field_count() {
        assert!(parse_cron("0 17 * *").is_err());
        assert!(parse_cron("0 17 * * * *").is_err());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn parse_cron_accepts_five_field_expressions() {
        assert!(parse_cron("0 17 * * 1-5").is_ok());
        assert!(parse_cron("*/15 8-18 * * *").is_ok());
        assert!(parse_cron("30 4 1 1 *").is_ok());
    }

    #[test]
    fn parse_cron_accepts_dow_lists() {
        assert!(parse_cron("0 17 * * 0,1,2,3,4,5,6").is_ok());
        assert!(parse_cron("0 9 * * 0,6").is_ok());
    }

    #[test]
    fn translate_dow_shifts_crontab_numbering() {
        assert_eq!(translate_dow("0"), "1");
        assert_eq!(translate_dow("6"), "7");
        assert_eq!(translate_dow("1-5"), "2-6");
        assert_eq!(translate_dow("0,2,4"), "1,3,5");
        assert_eq!(translate_dow("*"), "*");
        assert_eq!(translate_dow("1-5/2"), "2-6/2");
    }

    #[test]
    fn weekday_expression_never_fires_on_weekends() {
        // Sample a few firings of the Mon-Fri 17:00 schedule
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut at = after;
        for _ in 0..10 {
            let next = next_firing_after("0 17 * * 1-5", at).unwrap().unwrap();
            let local = next.with_timezone(&Local);
            let weekday = local.weekday().number_from_monday();
            assert!((1..=5).contains(&weekday), "fired on {:?}", local.weekday());
            assert_eq!(local.hour(), 17);
            assert_eq!(local.minute(), 0);
            at = next;
        }
    }

    #[test]
    fn next_firing_is_strictly_after_reference() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let next = next_firing_after("0 * * * *", at).unwrap().unwrap();
        assert!(next > at);
    }

    #[test]
    fn wildcard_minute_is_detected() {
        assert!(has_wildcard_minute("* * * * *"));
        assert!(has_wildcard_minute("* 17 * * 1"));
        assert!(!has_wildcard_minute("*/5 * * * *"));
        assert!(!has_wildcard_minute("0 17 * * 1-5"));
    }

    #[test]
    fn prefetch_moment_borrows_across_midnight() {
        // Firing at 00:02 → pre-fetch at 23:57 the previous day
        let after = Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap();
        let next = next_firing_after("2 0 * * *", after).unwrap().unwrap();
        let prefetch_at = next - chrono::Duration::from_std(PREFETCH_LEAD).unwrap();
        assert!(prefetch_at < next);
        assert_eq!((next - prefetch_at).num_minutes(), 5);
    }
}
