//! Cron scheduler for the periodic jobs.
//!
//! Two jobs call the same service API as HTTP callers do: the daily email
//! digest and the weekly retention sweep. Cron expressions are evaluated in
//! the configured time zone, so a 09:00 digest stays at 09:00 local time
//! across daylight saving changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::NotificationError;
use crate::service::NotificationService;
use crate::sweep::DEFAULT_RETENTION;

pub const DEFAULT_DIGEST_CRON: &str = "0 9 * * *";
pub const DEFAULT_SWEEP_CRON: &str = "0 0 * * 0";
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Configuration for the notification scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// When to send the email digest
    pub digest_cron: String,
    /// When to delete long-disabled push recipients
    pub sweep_cron: String,
    /// How long a disabled push recipient is kept before the sweep deletes it
    pub retention: time::Duration,
    /// Zone the cron expressions are evaluated in
    pub timezone: Tz,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            digest_cron: DEFAULT_DIGEST_CRON.to_string(),
            sweep_cron: DEFAULT_SWEEP_CRON.to_string(),
            retention: DEFAULT_RETENTION,
            timezone: DEFAULT_TIMEZONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledJob {
    Digest,
    Sweep { retention: time::Duration },
}

impl ScheduledJob {
    fn name(&self) -> &'static str {
        match self {
            Self::Digest => "digest",
            Self::Sweep { .. } => "sweep",
        }
    }
}

struct CronJob {
    expression: String,
    cron: Cron,
    job: ScheduledJob,
}

/// Runs each scheduled job in its own task, sleeping until the next cron
/// occurrence.
pub struct NotificationScheduler {
    service: Arc<dyn NotificationService>,
    jobs: Vec<CronJob>,
    timezone: Tz,
}

impl NotificationScheduler {
    pub fn new(
        service: Arc<dyn NotificationService>,
        config: &SchedulerConfig,
    ) -> Result<Self, NotificationError> {
        let jobs = vec![
            CronJob {
                expression: config.digest_cron.clone(),
                cron: parse_cron(&config.digest_cron)?,
                job: ScheduledJob::Digest,
            },
            CronJob {
                expression: config.sweep_cron.clone(),
                cron: parse_cron(&config.sweep_cron)?,
                job: ScheduledJob::Sweep {
                    retention: config.retention,
                },
            },
        ];
        Ok(Self {
            service,
            jobs,
            timezone: config.timezone,
        })
    }

    /// Start the scheduler in background tasks.
    ///
    /// Returns a shutdown sender; sending `true` (or dropping it) stops every job.
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let timezone = self.timezone;

        for job in self.jobs {
            let service = self.service.clone();
            let mut shutdown_rx = shutdown_rx.clone();

            tokio::spawn(async move {
                info!(
                    job = job.job.name(),
                    cron_expression = %job.expression,
                    timezone = %timezone,
                    "Scheduled job started"
                );

                loop {
                    let now = Utc::now();
                    let Some(next) = next_run(&job.cron, now, timezone) else {
                        warn!(job = job.job.name(), "Cron expression has no future occurrence");
                        break;
                    };
                    let wait = (next - now).to_std().unwrap_or_default();

                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {
                            run_job(service.as_ref(), job.job).await;
                        }
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                info!(job = job.job.name(), "Scheduled job shutting down");
                                break;
                            }
                        }
                    }
                }
            });
        }

        shutdown_tx
    }
}

/// Parse an IANA zone name such as `America/New_York`.
pub fn parse_timezone(name: &str) -> Result<Tz, NotificationError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| NotificationError::InvalidConfig(format!("unknown time zone '{}'", name)))
}

fn parse_cron(expression: &str) -> Result<Cron, NotificationError> {
    Cron::new(expression).parse().map_err(|e| {
        NotificationError::InvalidConfig(format!("invalid cron expression '{}': {}", expression, e))
    })
}

/// Next occurrence strictly after `after`, with the expression read as
/// wall-clock time in `timezone`
pub fn next_run(cron: &Cron, after: DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
    cron.find_next_occurrence(&after.with_timezone(&timezone), false)
        .ok()
        .map(|next| next.with_timezone(&Utc))
}

/// Execute one job, logging the result. Errors never escape the scheduler.
pub async fn run_job(service: &dyn NotificationService, job: ScheduledJob) {
    match job {
        ScheduledJob::Digest => match service.send_digest().await {
            Ok(result) => info!(
                sent = result.email_success_count,
                failed = result.email_failure_count,
                "Daily digest job finished"
            ),
            Err(e) => error!(error = %e, "Error sending daily digest"),
        },
        ScheduledJob::Sweep { retention } => {
            match service.sweep_stale_recipients(retention).await {
                Ok(deleted) => info!(deleted, "Cleanup job finished"),
                Err(e) => error!(error = %e, "Error cleaning up subscriptions"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::adapters::{LogEmailSender, LogPushSender};
    use crate::dispatcher::{DispatcherConfig, FanoutDispatcher};
    use crate::memory::InMemoryDirectory;
    use crate::service::NotificationHub;
    use crate::templates::TemplateRenderer;
    use crate::types::EmailRecipient;

    #[test]
    fn test_default_expressions_parse() {
        assert!(parse_cron(DEFAULT_DIGEST_CRON).is_ok());
        assert!(parse_cron(DEFAULT_SWEEP_CRON).is_ok());
    }

    #[test]
    fn test_invalid_cron() {
        for expr in ["", "invalid", "* * *", "60 * * * *"] {
            assert!(
                matches!(parse_cron(expr), Err(NotificationError::InvalidConfig(_))),
                "Should fail: {}",
                expr
            );
        }
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("America/New_York").unwrap(), DEFAULT_TIMEZONE);
        assert_eq!(parse_timezone(" UTC ").unwrap(), Tz::UTC);
        assert!(matches!(
            parse_timezone("Mars/Olympus_Mons"),
            Err(NotificationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_next_run_of_digest() {
        let cron = parse_cron(DEFAULT_DIGEST_CRON).unwrap();
        let before = Utc.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap();
        assert_eq!(
            next_run(&cron, before, Tz::UTC),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap())
        );

        // Exactly on the occurrence rolls over to the next day
        let on_time = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        assert_eq!(
            next_run(&cron, on_time, Tz::UTC),
            Some(Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_next_run_of_sweep_is_sunday_midnight() {
        let cron = parse_cron(DEFAULT_SWEEP_CRON).unwrap();
        // 2026-03-04 is a Wednesday
        let wednesday = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        assert_eq!(
            next_run(&cron, wednesday, Tz::UTC),
            Some(Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_digest_follows_new_york_across_dst() {
        let cron = parse_cron(DEFAULT_DIGEST_CRON).unwrap();

        // Saturday 2026-03-07 is still EST (UTC-5)
        let friday_after_digest = Utc.with_ymd_and_hms(2026, 3, 6, 15, 0, 0).unwrap();
        assert_eq!(
            next_run(&cron, friday_after_digest, DEFAULT_TIMEZONE),
            Some(Utc.with_ymd_and_hms(2026, 3, 7, 14, 0, 0).unwrap())
        );

        // Clocks go forward on Sunday 2026-03-08, 09:00 EDT is 13:00 UTC
        let saturday_after_digest = Utc.with_ymd_and_hms(2026, 3, 7, 15, 0, 0).unwrap();
        assert_eq!(
            next_run(&cron, saturday_after_digest, DEFAULT_TIMEZONE),
            Some(Utc.with_ymd_and_hms(2026, 3, 8, 13, 0, 0).unwrap())
        );

        // And back on Sunday 2026-11-01
        let saturday_in_november = Utc.with_ymd_and_hms(2026, 10, 31, 14, 0, 0).unwrap();
        assert_eq!(
            next_run(&cron, saturday_in_november, DEFAULT_TIMEZONE),
            Some(Utc.with_ymd_and_hms(2026, 11, 1, 14, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_sweep_runs_at_local_midnight() {
        let cron = parse_cron(DEFAULT_SWEEP_CRON).unwrap();
        let wednesday = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        // Sunday midnight comes before the 02:00 switch, so it is still EST
        assert_eq!(
            next_run(&cron, wednesday, DEFAULT_TIMEZONE),
            Some(Utc.with_ymd_and_hms(2026, 3, 8, 5, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_run_digest_job_reaches_subscribers() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory
            .insert_email([EmailRecipient::new(
                "a@example.com",
                Some("Ada".into()),
                time::OffsetDateTime::now_utc(),
            )])
            .await;

        let dispatcher = FanoutDispatcher::new(
            directory.clone(),
            Arc::new(LogPushSender),
            Arc::new(LogEmailSender),
            Arc::new(TemplateRenderer::with_defaults()),
            DispatcherConfig::default(),
        );
        let hub = NotificationHub::new(directory.clone(), dispatcher);

        run_job(&hub, ScheduledJob::Digest).await;
        run_job(
            &hub,
            ScheduledJob::Sweep {
                retention: DEFAULT_RETENTION,
            },
        )
        .await;

        // Neither job changes email subscriptions
        assert_eq!(directory.all_email().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let directory = Arc::new(InMemoryDirectory::new());
        let dispatcher = FanoutDispatcher::new(
            directory.clone(),
            Arc::new(LogPushSender),
            Arc::new(LogEmailSender),
            Arc::new(TemplateRenderer::with_defaults()),
            DispatcherConfig::default(),
        );
        let hub: Arc<dyn NotificationService> =
            Arc::new(NotificationHub::new(directory, dispatcher));

        let scheduler = NotificationScheduler::new(hub, &SchedulerConfig::default()).unwrap();
        let shutdown = scheduler.start();
        assert!(shutdown.send(true).is_ok());
    }
}
