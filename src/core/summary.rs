use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::core::delivery::DeliveryClient;
use crate::core::executor::JobReport;
use crate::core::report::{escape_html, truncate};

const QUESTION_COLUMN_LIMIT: usize = 60;
const ERROR_COLUMN_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct FailureEntry {
    pub job_id: String,
    pub user_email: String,
    pub question: String,
    pub kind: &'static str,
    pub detail: String,
}

/// Aggregate over all outcomes of a run. Built once at the end and
/// consumed only by the admin report.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub delivered: usize,
    pub agent_failed: usize,
    pub render_failed: usize,
    pub send_failed: usize,
    pub failures: Vec<FailureEntry>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunSummary {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

pub fn summarize(
    reports: &[JobReport],
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
) -> RunSummary {
    let mut summary = RunSummary {
        total: reports.len(),
        delivered: 0,
        agent_failed: 0,
        render_failed: 0,
        send_failed: 0,
        failures: Vec::new(),
        started_at,
        finished_at,
    };

    for report in reports {
        use crate::core::executor::DeliveryOutcome::*;
        match &report.outcome {
            Delivered => summary.delivered += 1,
            AgentFailed { .. } => summary.agent_failed += 1,
            RenderFailed { .. } => summary.render_failed += 1,
            SendFailed { .. } => summary.send_failed += 1,
        }
        if let Some(detail) = report.outcome.detail() {
            summary.failures.push(FailureEntry {
                job_id: report.job.job_id.to_string(),
                user_email: report.job.subscription.user_email.clone(),
                question: report.job.subscription.overall_question.clone(),
                kind: report.outcome.kind_label(),
                detail: detail.to_string(),
            });
        }
    }
    summary
}

/// Tabular admin report: one row per job with status and failure detail.
pub fn render_summary(summary: &RunSummary, reports: &[JobReport]) -> String {
    let mut html = format!(
        r#"<html>
<body style="font-family: sans-serif;">
<h1>Scheduled Alerts Status Report</h1>
<p><strong>Started:</strong> {started}</p>
<p><strong>Duration:</strong> {duration}s</p>
<p><strong>Total Processed:</strong> {total}</p>
<p><strong>Delivered:</strong> {delivered}</p>
<p><strong>Failed:</strong> {failed}</p>
<h2>Details</h2>
<table border="1" style="border-collapse: collapse; width: 100%;">
<tr style="background-color: #f0f0f0;">
<th style="padding: 8px;">Job</th>
<th style="padding: 8px;">User Email</th>
<th style="padding: 8px;">Question</th>
<th style="padding: 8px;">Status</th>
<th style="padding: 8px;">Error</th>
</tr>
"#,
        started = summary.started_at.format("%Y-%m-%d %H:%M:%S"),
        duration = summary.duration().num_seconds(),
        total = summary.total,
        delivered = summary.delivered,
        failed = summary.total - summary.delivered,
    );

    for report in reports {
        let error = report
            .outcome
            .detail()
            .map(|d| truncate(d, ERROR_COLUMN_LIMIT))
            .unwrap_or_else(|| "-".to_string());
        html.push_str(&format!(
            "<tr>\
<td style=\"padding: 8px;\">{job}</td>\
<td style=\"padding: 8px;\">{email}</td>\
<td style=\"padding: 8px;\">{question}</td>\
<td style=\"padding: 8px;\">{status}</td>\
<td style=\"padding: 8px; font-size: 0.9em;\">{error}</td>\
</tr>\n",
            job = report.job.job_id,
            email = escape_html(&report.job.subscription.user_email),
            question = escape_html(&truncate(
                &report.job.subscription.overall_question,
                QUESTION_COLUMN_LIMIT
            )),
            status = report.outcome.kind_label(),
            error = escape_html(&error),
        ));
    }

    html.push_str("</table>\n</body>\n</html>");
    html
}

/// Best-effort: the admin summary never fails the run. The per-subscriber
/// emails are the primary output; this is operator visibility.
pub async fn deliver_summary(
    summary: &RunSummary,
    reports: &[JobReport],
    delivery: &dyn DeliveryClient,
    admin_recipients: &[String],
) {
    if admin_recipients.is_empty() {
        info!("No admin recipients configured; skipping summary report");
        return;
    }
    let recipients = admin_recipients.join(", ");
    let subject = format!(
        "Scheduled Alerts Status - {}",
        summary.started_at.format("%Y-%m-%d")
    );
    let html = render_summary(summary, reports);

    info!("Sending summary report to {}", recipients);
    match delivery.send(&recipients, &subject, &html).await {
        Ok(()) => info!("Summary report sent"),
        Err(e) => warn!("Failed to send summary report: {}", e),
    }
}
