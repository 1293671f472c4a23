use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::UpdateReport;
use crate::retention::RetentionReport;

/// Work performed on every scheduler tick.
pub trait MaintenanceJob: Send + Sync {
    /// Read-only change check. Never fails; empty lists on total failure.
    fn check(&self) -> impl Future<Output = UpdateReport> + Send;

    /// Called when the check found changed or new pages. Must not act on
    /// the drift beyond recording it.
    fn drift_found(&self, report: &UpdateReport) -> impl Future<Output = ()> + Send;

    fn cleanup(&self) -> impl Future<Output = Result<RetentionReport, AppError>> + Send;
}

impl<T: MaintenanceJob> MaintenanceJob for Arc<T> {
    fn check(&self) -> impl Future<Output = UpdateReport> + Send {
        (**self).check()
    }

    fn drift_found(&self, report: &UpdateReport) -> impl Future<Output = ()> + Send {
        (**self).drift_found(report)
    }

    fn cleanup(&self) -> impl Future<Output = Result<RetentionReport, AppError>> + Send {
        (**self).cleanup()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<'a> {
    Started { interval: Duration },
    TickStarted { tick: u64 },
    DriftDetected { report: &'a UpdateReport },
    NoDrift { removed: usize },
    CheckAbandoned,
    CleanupCompleted { report: &'a RetentionReport },
    CleanupFailed { error: &'a str },
    Stopped { ticks: u64 },
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::Started { interval } => {
                tracing::info!(interval_secs = interval.as_secs(), "Scheduler started");
            }
            SchedulerEvent::TickStarted { tick } => {
                tracing::debug!(%tick, "Scheduler tick");
            }
            SchedulerEvent::DriftDetected { report } => {
                tracing::info!(
                    changed = report.changed.len(),
                    new = report.new.len(),
                    removed = report.removed.len(),
                    "Remote changes detected; run an update to capture them"
                );
            }
            SchedulerEvent::NoDrift { removed } => {
                tracing::info!(%removed, "No remote changes");
            }
            SchedulerEvent::CheckAbandoned => {
                tracing::info!("Change check abandoned on shutdown");
            }
            SchedulerEvent::CleanupCompleted { report } => {
                tracing::info!(
                    aged_out = report.aged_out,
                    over_cap = report.over_cap,
                    "Retention pass finished"
                );
            }
            SchedulerEvent::CleanupFailed { error } => {
                tracing::error!(%error, "Retention pass failed");
            }
            SchedulerEvent::Stopped { ticks } => {
                tracing::info!(%ticks, "Scheduler stopped");
            }
        }
    }
}

/// Long-lived loop: sleep, check for drift, prune history.
pub struct Scheduler<J: MaintenanceJob> {
    job: J,
    config: SchedulerConfig,
}

impl<J: MaintenanceJob> Scheduler<J> {
    pub fn new(job: J, config: SchedulerConfig) -> Self {
        Self { job, config }
    }

    /// Run until cancellation. Errors inside a tick never end the loop.
    pub async fn run<R: SchedulerReporter>(&self, cancel_token: CancellationToken, reporter: &R) {
        reporter.report(SchedulerEvent::Started {
            interval: self.config.interval,
        });

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => {}
                () = cancel_token.cancelled() => break,
            }

            ticks += 1;
            reporter.report(SchedulerEvent::TickStarted { tick: ticks });

            // The check writes nothing, so it can be dropped mid-flight.
            let report = tokio::select! {
                report = self.job.check() => report,
                () = cancel_token.cancelled() => {
                    reporter.report(SchedulerEvent::CheckAbandoned);
                    break;
                }
            };
            self.finish_tick(&report, reporter).await;
        }

        reporter.report(SchedulerEvent::Stopped { ticks });
    }

    /// One tick without the leading sleep.
    pub async fn tick<R: SchedulerReporter>(&self, reporter: &R) {
        let report = self.job.check().await;
        self.finish_tick(&report, reporter).await;
    }

    async fn finish_tick<R: SchedulerReporter>(&self, report: &UpdateReport, reporter: &R) {
        if report.has_drift() {
            reporter.report(SchedulerEvent::DriftDetected { report });
            self.job.drift_found(report).await;
        } else {
            reporter.report(SchedulerEvent::NoDrift {
                removed: report.removed.len(),
            });
        }

        match self.job.cleanup().await {
            Ok(retention) => reporter.report(SchedulerEvent::CleanupCompleted {
                report: &retention,
            }),
            Err(e) => {
                let error = e.to_string();
                reporter.report(SchedulerEvent::CleanupFailed { error: &error });
            }
        }
    }
}
