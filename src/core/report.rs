use anyhow::{Result, bail};
use chrono::NaiveDateTime;

use crate::core::subscription::Subscription;

/// Subject + HTML body, ready for the delivery client. All CSS is already
/// inlined; downstream email transports drop `<style>` blocks.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

const SUBJECT_PREFIX: &str = "Intelligence Alert: ";
const SUBJECT_QUESTION_LIMIT: usize = 50;
const EMPTY_TEXT_FALLBACK: &str =
    "The analysis agent returned no content for this run. Your subscription \
is still active and will be retried on the next scheduled cycle.";

// Element-level styles for the report template.
const STYLE_BODY: &str =
    "font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; \
color: #333; margin: 0; padding: 0;";
const STYLE_CONTAINER: &str = "max-width: 800px; margin: 0 auto; padding: 20px;";
const STYLE_HEADER: &str =
    "background-color: #f8f9fa; padding: 30px; border-radius: 8px; margin-bottom: 30px;";
const STYLE_HEADER_TITLE: &str = "margin: 0 0 10px 0; color: #1976d2; font-size: 24px;";
const STYLE_HEADER_META: &str = "margin: 0; color: #666; font-size: 14px;";
const STYLE_CONTENT: &str =
    "background-color: white; padding: 30px; border: 1px solid #e0e0e0; border-radius: 8px;";
const STYLE_SECTION_TITLE: &str =
    "color: #424242; font-size: 18px; margin-bottom: 15px; padding-bottom: 10px; \
border-bottom: 2px solid #e0e0e0;";
const STYLE_SUMMARY: &str =
    "background-color: #e3f2fd; padding: 20px; border-radius: 8px; \
border-left: 4px solid #1976d2; font-size: 15px; line-height: 1.8;";
const STYLE_ERROR: &str =
    "background-color: #ffebee; color: #c62828; padding: 20px; border-radius: 8px; \
border-left: 4px solid #d32f2f;";
const STYLE_FOOTER: &str =
    "margin-top: 30px; padding-top: 20px; border-top: 1px solid #e0e0e0; \
font-size: 12px; color: #666; text-align: center;";

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{}...", cut.trim_end())
    }
}

fn apply_bold(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut open = false;
    let mut rest = line;
    while let Some(idx) = rest.find("**") {
        out.push_str(&rest[..idx]);
        out.push_str(if open { "</strong>" } else { "<strong>" });
        open = !open;
        rest = &rest[idx + 2..];
    }
    out.push_str(rest);
    if open {
        out.push_str("</strong>");
    }
    out
}

/// Structure the agent's markdown-shaped text into HTML blocks. Runs on
/// escaped text; only `##` headings, `-` bullets and `**bold**` are
/// recognized, everything else becomes paragraphs.
fn structure_agent_text(escaped: &str) -> String {
    let mut out = String::new();
    let mut bullets: Vec<String> = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();

    fn flush_bullets(out: &mut String, bullets: &mut Vec<String>) {
        if !bullets.is_empty() {
            out.push_str("<ul style=\"margin: 10px 0; padding-left: 20px;\">");
            for item in bullets.drain(..) {
                out.push_str(&format!("<li style=\"margin-bottom: 6px;\">{}</li>", item));
            }
            out.push_str("</ul>");
        }
    }

    fn flush_paragraph(out: &mut String, paragraph: &mut Vec<String>) {
        if !paragraph.is_empty() {
            out.push_str(&format!(
                "<p style=\"margin: 10px 0;\">{}</p>",
                paragraph.join(" ")
            ));
            paragraph.clear();
        }
    }

    for line in escaped.lines() {
        let line = line.trim();
        if line.is_empty() {
            flush_bullets(&mut out, &mut bullets);
            flush_paragraph(&mut out, &mut paragraph);
        } else if let Some(heading) = line.strip_prefix("## ") {
            flush_bullets(&mut out, &mut bullets);
            flush_paragraph(&mut out, &mut paragraph);
            out.push_str(&format!(
                "<h3 style=\"color: #424242; font-size: 16px; margin: 16px 0 8px 0;\">{}</h3>",
                apply_bold(heading)
            ));
        } else if let Some(item) = line.strip_prefix("- ") {
            flush_paragraph(&mut out, &mut paragraph);
            bullets.push(apply_bold(item));
        } else {
            flush_bullets(&mut out, &mut bullets);
            paragraph.push(apply_bold(line));
        }
    }
    flush_bullets(&mut out, &mut bullets);
    flush_paragraph(&mut out, &mut paragraph);
    out
}

pub fn build_subject(question: &str, preview: bool) -> String {
    let subject = format!(
        "{}{}",
        SUBJECT_PREFIX,
        truncate(question, SUBJECT_QUESTION_LIMIT)
    );
    if preview {
        format!("[PREVIEW] {}", subject)
    } else {
        subject
    }
}

fn wrap_document(question: &str, timestamp: NaiveDateTime, content_section: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="{body}">
<div style="{container}">
<div style="{header}">
<h1 style="{header_title}">{question}</h1>
<p style="{header_meta}">Scheduled Intelligence Alert &bull; {timestamp}</p>
</div>
<div style="{content}">
{content_section}
</div>
<div style="{footer}">
<p>This is an automated alert. To modify or unsubscribe, update your
subscription settings in the intelligence app.</p>
</div>
</div>
</body>
</html>"#,
        body = STYLE_BODY,
        container = STYLE_CONTAINER,
        header = STYLE_HEADER,
        header_title = STYLE_HEADER_TITLE,
        header_meta = STYLE_HEADER_META,
        timestamp = timestamp.format("%B %d, %Y at %I:%M %p"),
        content = STYLE_CONTENT,
        content_section = content_section,
        footer = STYLE_FOOTER,
        question = escape_html(question),
    )
}

/// Deterministic, pure rendering of an agent answer into a recipient-ready
/// email. Empty agent text gets a placeholder body rather than an empty
/// document.
pub fn render(
    subscription: &Subscription,
    agent_text: &str,
    preview: bool,
    timestamp: NaiveDateTime,
) -> Result<RenderedEmail> {
    let question = subscription.overall_question.trim();
    if question.is_empty() {
        bail!("subscription question is empty");
    }

    let text = if agent_text.trim().is_empty() {
        EMPTY_TEXT_FALLBACK.to_string()
    } else {
        agent_text.trim().to_string()
    };
    let analysis = structure_agent_text(&escape_html(&text));

    let section = format!(
        "<div style=\"margin-bottom: 30px;\">\
<h2 style=\"{title}\">Analysis</h2>\
<div style=\"{summary}\">{analysis}</div>\
</div>",
        title = STYLE_SECTION_TITLE,
        summary = STYLE_SUMMARY,
        analysis = analysis,
    );

    Ok(RenderedEmail {
        subject: build_subject(question, preview),
        html: wrap_document(question, timestamp, &section),
    })
}

/// Error-notification variant used for preview runs: an error panel in
/// place of the analysis section.
pub fn render_error(
    subscription: &Subscription,
    error_detail: &str,
    timestamp: NaiveDateTime,
) -> RenderedEmail {
    let question = subscription.overall_question.trim();
    let section = format!(
        "<div style=\"margin-bottom: 30px;\"><div style=\"{error}\">\
<strong>Error:</strong><br>{detail}</div></div>",
        error = STYLE_ERROR,
        detail = escape_html(error_detail),
    );
    RenderedEmail {
        subject: format!(
            "[PREVIEW] Error: {}",
            truncate(question, SUBJECT_QUESTION_LIMIT)
        ),
        html: wrap_document(question, timestamp, &section),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::subscription::Frequency;
    use chrono::NaiveDate;

    fn subscription(question: &str) -> Subscription {
        Subscription {
            user_email: "user@example.com".to_string(),
            overall_question: question.to_string(),
            sql_statement: String::new(),
            frequency: Frequency::Daily,
            created_at: fixed_time(),
        }
    }

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 21)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn rendered_html_contains_agent_text_and_no_style_block() {
        let email = render(&subscription("Signups this week?"), "X", false, fixed_time()).unwrap();
        assert!(email.html.contains("X"));
        assert!(!email.html.contains("<style"));
    }

    #[test]
    fn empty_agent_text_gets_fallback_body() {
        let email = render(&subscription("Signups?"), "   \n ", false, fixed_time()).unwrap();
        assert!(email.html.contains("returned no content"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let sub = subscription("Signups?");
        let a = render(&sub, "Same text", false, fixed_time()).unwrap();
        let b = render(&sub, "Same text", false, fixed_time()).unwrap();
        assert_eq!(a.subject, b.subject);
        assert_eq!(a.html, b.html);
    }

    #[test]
    fn agent_markup_is_escaped() {
        let email = render(
            &subscription("Signups?"),
            "<script>alert(1)</script>",
            false,
            fixed_time(),
        )
        .unwrap();
        assert!(!email.html.contains("<script>"));
        assert!(email.html.contains("&lt;script&gt;"));
    }

    #[test]
    fn preview_subject_is_prefixed_and_question_truncated() {
        let long = "Why did weekly active accounts in the EMEA region change so much last week?";
        let email = render(&subscription(long), "fine", true, fixed_time()).unwrap();
        assert!(email.subject.starts_with("[PREVIEW] Intelligence Alert: "));
        assert!(email.subject.len() < long.len() + 40);
        assert!(email.subject.ends_with("..."));
    }

    #[test]
    fn markdown_structure_becomes_inline_styled_html() {
        let text = "## Executive Summary\nSignups grew **12%** week over week.\n\n## Key Insights\n- EMEA drove most growth\n- Churn was flat";
        let email = render(&subscription("Signups?"), text, false, fixed_time()).unwrap();
        assert!(email.html.contains("Executive Summary</h3>"));
        assert!(email.html.contains("<strong>12%</strong>"));
        assert!(email.html.contains("<li style="));
        assert!(email.html.contains("Churn was flat"));
    }

    #[test]
    fn empty_question_is_a_render_error() {
        assert!(render(&subscription("  "), "text", false, fixed_time()).is_err());
    }

    #[test]
    fn error_notification_embeds_detail() {
        let email = render_error(&subscription("Signups?"), "transport: timeout", fixed_time());
        assert!(email.subject.starts_with("[PREVIEW] Error: "));
        assert!(email.html.contains("transport: timeout"));
    }
}
