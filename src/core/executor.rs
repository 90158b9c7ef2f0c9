use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::agent::{AgentClient, AgentResult, AnalysisAgent, build_analysis_prompt};
use crate::core::config::RunConfig;
use crate::core::delivery::{DeliveryClient, SmtpDelivery, UnavailableDelivery};
use crate::core::report::{self, RenderedEmail};
use crate::core::subscription::{SqliteSubscriptionSource, Subscription, SubscriptionSource};
use crate::core::summary::{self, RunSummary};

/// One subscription selected for the current run. Lives only for the
/// duration of the run; the job id correlates logs and the admin report.
#[derive(Debug, Clone)]
pub struct AlertJob {
    pub job_id: Uuid,
    pub subscription: Subscription,
    pub recipient: String,
}

/// Terminal record for one job. Exactly one per AlertJob, merged back in
/// submission order before reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    AgentFailed { detail: String },
    RenderFailed { detail: String },
    SendFailed { detail: String },
}

impl DeliveryOutcome {
    pub fn kind_label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::AgentFailed { .. } => "agent_failed",
            DeliveryOutcome::RenderFailed { .. } => "render_failed",
            DeliveryOutcome::SendFailed { .. } => "send_failed",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::AgentFailed { detail }
            | DeliveryOutcome::RenderFailed { detail }
            | DeliveryOutcome::SendFailed { detail } => Some(detail),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: AlertJob,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub worker_count: usize,
    pub preview: bool,
    pub preview_recipient: String,
    pub preview_max_jobs: usize,
    pub max_jobs: Option<usize>,
}

/// Resolve the jobs for a run: preview mode redirects every recipient to
/// the preview address and caps the batch so test runs cannot mass-email.
pub fn build_jobs(mut subscriptions: Vec<Subscription>, opts: &BatchOptions) -> Vec<AlertJob> {
    if let Some(max) = opts.max_jobs {
        if subscriptions.len() > max {
            info!("Limiting run to {} jobs", max);
            subscriptions.truncate(max);
        }
    }
    if opts.preview && subscriptions.len() > opts.preview_max_jobs {
        info!("Preview mode: limiting run to {} jobs", opts.preview_max_jobs);
        subscriptions.truncate(opts.preview_max_jobs);
    }

    subscriptions
        .into_iter()
        .map(|subscription| {
            let recipient = if opts.preview {
                opts.preview_recipient.clone()
            } else {
                subscription.user_email.clone()
            };
            AlertJob {
                job_id: Uuid::new_v4(),
                subscription,
                recipient,
            }
        })
        .collect()
}

/// Produce one DeliveryOutcome per job: bounded parallel agent+render,
/// a join barrier, then strictly serial delivery in submission order.
pub async fn run_alert_batch(
    jobs: Vec<AlertJob>,
    agent: Arc<dyn AnalysisAgent>,
    delivery: Arc<dyn DeliveryClient>,
    opts: &BatchOptions,
    now: NaiveDateTime,
) -> Vec<JobReport> {
    let total = jobs.len();
    info!(
        "Fanning out {} jobs across {} workers",
        total, opts.worker_count
    );

    // Phase: parallel agent calls + rendering. No delivery happens here;
    // the phase materializes fully before any email is sent.
    let semaphore = Arc::new(Semaphore::new(opts.worker_count.max(1)));
    let mut set = JoinSet::new();
    let mut task_slots: HashMap<tokio::task::Id, usize> = HashMap::new();

    for (idx, job) in jobs.iter().enumerate() {
        let agent = agent.clone();
        let semaphore = semaphore.clone();
        let subscription = job.subscription.clone();
        let preview = opts.preview;
        let job_id = job.job_id;
        let prompt = build_analysis_prompt(
            &subscription.overall_question,
            &subscription.sql_statement,
            now.date(),
        );

        let handle = set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            info!(
                "Job {} ({}/{}): running analysis for {}",
                job_id,
                idx + 1,
                total,
                subscription.user_email
            );
            let result = match agent.run(&prompt).await {
                AgentResult::Failure { kind, detail } => {
                    let detail = if detail.is_empty() {
                        kind.as_label()
                    } else if detail == "timeout" {
                        detail
                    } else {
                        format!("{}: {}", kind.as_label(), detail)
                    };
                    error!("Job {}: agent analysis failed: {}", job_id, detail);
                    Err(DeliveryOutcome::AgentFailed { detail })
                }
                AgentResult::Success { text } => {
                    match report::render(&subscription, &text, preview, now) {
                        Ok(email) => Ok(email),
                        Err(e) => {
                            error!("Job {}: rendering failed: {}", job_id, e);
                            Err(DeliveryOutcome::RenderFailed {
                                detail: e.to_string(),
                            })
                        }
                    }
                }
            };
            (idx, result)
        });
        task_slots.insert(handle.id(), idx);
    }

    // Join barrier: delivery never starts while analysis is in flight.
    let mut slots: Vec<Option<std::result::Result<RenderedEmail, DeliveryOutcome>>> =
        (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((_id, (idx, result))) => slots[idx] = Some(result),
            Err(join_err) => {
                // A panicking task resolves its own job only.
                if let Some(&idx) = task_slots.get(&join_err.id()) {
                    error!("Job task panicked: {}", join_err);
                    slots[idx] = Some(Err(DeliveryOutcome::AgentFailed {
                        detail: format!("task panicked: {}", join_err),
                    }));
                }
            }
        }
    }

    // Serial delivery phase, in submission order. The email transport is
    // not safe for concurrent invocation; a failed send never aborts the
    // remaining sends.
    let mut reports = Vec::with_capacity(total);
    for (idx, job) in jobs.into_iter().enumerate() {
        let outcome = match slots[idx].take() {
            Some(Ok(email)) => {
                match delivery.send(&job.recipient, &email.subject, &email.html).await {
                    Ok(()) => {
                        info!("Job {} ({}/{}): delivered", job.job_id, idx + 1, total);
                        DeliveryOutcome::Delivered
                    }
                    Err(e) => {
                        error!("Job {}: send failed: {}", job.job_id, e);
                        DeliveryOutcome::SendFailed {
                            detail: e.to_string(),
                        }
                    }
                }
            }
            Some(Err(outcome)) => outcome,
            None => DeliveryOutcome::AgentFailed {
                detail: "task produced no result".to_string(),
            },
        };

        if opts.preview && !outcome.is_delivered() && !opts.preview_recipient.is_empty() {
            notify_preview_failure(&job, &outcome, delivery.as_ref(), now).await;
        }

        reports.push(JobReport { job, outcome });
    }
    reports
}

/// Preview runs get a best-effort error notification so test operators
/// see failures in their inbox, not just the logs.
async fn notify_preview_failure(
    job: &AlertJob,
    outcome: &DeliveryOutcome,
    delivery: &dyn DeliveryClient,
    now: NaiveDateTime,
) {
    let detail = format!(
        "Alert processing failed: {}: {}",
        outcome.kind_label(),
        outcome.detail().unwrap_or("unknown")
    );
    let email = report::render_error(&job.subscription, &detail, now);
    if let Err(e) = delivery.send(&job.recipient, &email.subject, &email.html).await {
        warn!("Preview error notification failed: {}", e);
    }
}

/// The run entry point: load due subscriptions, execute the batch, and
/// send the admin summary. Only a missing subscription list or a failed
/// client initialization aborts the run.
pub async fn process_alerts(
    config: &RunConfig,
    preview: bool,
    max_jobs: Option<usize>,
) -> Result<RunSummary> {
    let started_at = Local::now();
    info!("Starting scheduled alert processing");
    info!("Preview mode: {}", preview);

    let source = SqliteSubscriptionSource::open(&config.store.db_path)
        .with_context(|| format!("Failed to open subscription store {}", config.store.db_path))?;
    let agent = Arc::new(AgentClient::new(&config.agent, &config.run)?);
    let delivery: Arc<dyn DeliveryClient> = match SmtpDelivery::new(&config.smtp) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!("SMTP client unavailable, jobs will be recorded as send failures: {}", e);
            Arc::new(UnavailableDelivery::new(e.to_string()))
        }
    };

    let subscriptions = source
        .list_due(started_at)
        .await
        .context("Failed to load due subscriptions")?;

    let opts = BatchOptions {
        worker_count: config.run.worker_count,
        preview,
        preview_recipient: config.preview.recipient.clone(),
        preview_max_jobs: config.preview.max_jobs,
        max_jobs,
    };
    let jobs = build_jobs(subscriptions, &opts);
    if jobs.is_empty() {
        info!("No subscriptions due; nothing to process");
        let finished_at = Local::now();
        return Ok(summary::summarize(&[], started_at, finished_at));
    }

    let reports = run_alert_batch(jobs, agent, delivery.clone(), &opts, started_at.naive_local()).await;

    let finished_at = Local::now();
    let run_summary = summary::summarize(&reports, started_at, finished_at);
    info!(
        "Processing complete: {} total, {} delivered, {} failed",
        run_summary.total,
        run_summary.delivered,
        run_summary.total - run_summary.delivered
    );

    summary::deliver_summary(
        &run_summary,
        &reports,
        delivery.as_ref(),
        &config.report.admin_recipients,
    )
    .await;

    Ok(run_summary)
}
