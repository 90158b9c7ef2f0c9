use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, NaiveDateTime, Weekday};
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How often a subscription is re-answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
}

impl Frequency {
    /// Lenient column parsing: empty means Daily (legacy rows), anything
    /// unrecognized is rejected by the caller.
    pub fn parse(raw: &str) -> Option<Frequency> {
        match raw.trim().to_lowercase().as_str() {
            "" | "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "Daily",
            Frequency::Weekly => "Weekly",
        }
    }
}

/// A stored (user, question, frequency) tuple. Read-only during a run;
/// the orchestrator never mutates the store.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub user_email: String,
    pub overall_question: String,
    /// Optional query context carried into the analysis prompt. Never
    /// executed here; the agent runs its own queries.
    pub sql_statement: String,
    pub frequency: Frequency,
    pub created_at: NaiveDateTime,
}

/// Frequencies due on a given day: Daily always, Weekly on Mondays.
pub fn due_frequencies(weekday: Weekday) -> Vec<Frequency> {
    if weekday == Weekday::Mon {
        vec![Frequency::Daily, Frequency::Weekly]
    } else {
        vec![Frequency::Daily]
    }
}

#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Snapshot of the subscriptions due at `now`. Rows added after the
    /// call starts are not part of the current run.
    async fn list_due(&self, now: DateTime<Local>) -> Result<Vec<Subscription>>;
}

/// Default local store: an append-only sqlite table of alert requests.
pub struct SqliteSubscriptionSource {
    db: Mutex<Connection>,
}

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

fn parse_created_at(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
}

impl SqliteSubscriptionSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path)?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS scheduled_alerts (
                user_email TEXT NOT NULL,
                overall_question TEXT NOT NULL,
                sql_statement TEXT DEFAULT '',
                frequency TEXT DEFAULT 'Daily',
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    async fn fetch_frequency(&self, frequency: Frequency) -> Result<Vec<Subscription>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT user_email, overall_question, sql_statement, frequency, created_at
             FROM scheduled_alerts
             WHERE LOWER(COALESCE(NULLIF(frequency, ''), 'Daily')) = LOWER(?1)
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([frequency.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (user_email, overall_question, sql_statement, raw_frequency, raw_created) = row?;

            if user_email.trim().is_empty() || overall_question.trim().is_empty() {
                warn!("Skipping subscription row with empty email or question");
                continue;
            }
            let Some(frequency) = Frequency::parse(&raw_frequency) else {
                warn!(
                    "Skipping subscription for {} with unknown frequency {:?}",
                    user_email, raw_frequency
                );
                continue;
            };
            let Some(created_at) = parse_created_at(&raw_created) else {
                warn!(
                    "Skipping subscription for {} with unparseable created_at {:?}",
                    user_email, raw_created
                );
                continue;
            };

            results.push(Subscription {
                user_email,
                overall_question,
                sql_statement,
                frequency,
                created_at,
            });
        }
        Ok(results)
    }
}

#[async_trait]
impl SubscriptionSource for SqliteSubscriptionSource {
    async fn list_due(&self, now: DateTime<Local>) -> Result<Vec<Subscription>> {
        let frequencies = due_frequencies(now.weekday());
        let mut all = Vec::new();
        for frequency in frequencies {
            let batch = self.fetch_frequency(frequency).await?;
            info!("Found {} {} subscriptions", batch.len(), frequency.as_str());
            all.extend(batch);
        }
        info!("Total subscriptions due: {}", all.len());
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rusqlite::params;

    fn source_with_rows(
        rows: &[(&str, &str, &str, &str)],
    ) -> (tempfile::TempDir, SqliteSubscriptionSource) {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteSubscriptionSource::open(dir.path().join("alerts.db")).unwrap();
        {
            let db = source.db.try_lock().unwrap();
            for (email, question, frequency, created_at) in rows {
                db.execute(
                    "INSERT INTO scheduled_alerts
                     (user_email, overall_question, sql_statement, frequency, created_at)
                     VALUES (?1, ?2, '', ?3, ?4)",
                    params![email, question, frequency, created_at],
                )
                .unwrap();
            }
        }
        (dir, source)
    }

    fn monday() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 10, 20, 8, 0, 0).unwrap()
    }

    fn tuesday() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 10, 21, 8, 0, 0).unwrap()
    }

    #[test]
    fn weekly_subscriptions_due_only_on_monday() {
        assert_eq!(
            due_frequencies(Weekday::Mon),
            vec![Frequency::Daily, Frequency::Weekly]
        );
        assert_eq!(due_frequencies(Weekday::Thu), vec![Frequency::Daily]);
    }

    #[test]
    fn empty_frequency_defaults_to_daily() {
        assert_eq!(Frequency::parse(""), Some(Frequency::Daily));
        assert_eq!(Frequency::parse("WEEKLY"), Some(Frequency::Weekly));
        assert_eq!(Frequency::parse("fortnightly"), None);
    }

    #[tokio::test]
    async fn lists_daily_rows_and_skips_malformed() {
        let (_dir, source) = source_with_rows(&[
            ("a@example.com", "How many signups yesterday?", "Daily", "2025-10-01T09:00:00"),
            ("", "question without a user", "Daily", "2025-10-01T09:00:00"),
            ("b@example.com", "", "Daily", "2025-10-01T09:00:00"),
            ("c@example.com", "Weekly revenue trend?", "Weekly", "2025-10-02T09:00:00"),
            ("d@example.com", "Bad frequency", "hourly", "2025-10-01T09:00:00"),
            ("e@example.com", "Bad timestamp", "Daily", "not-a-date"),
        ]);

        let due = source.list_due(tuesday()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user_email, "a@example.com");
    }

    #[tokio::test]
    async fn monday_includes_weekly_rows() {
        let (_dir, source) = source_with_rows(&[
            ("a@example.com", "Daily question", "Daily", "2025-10-01T09:00:00"),
            ("c@example.com", "Weekly question", "Weekly", "2025-10-02T09:00:00"),
        ]);

        let due = source.list_due(monday()).await.unwrap();
        assert_eq!(due.len(), 2);
        assert!(due.iter().any(|s| s.frequency == Frequency::Weekly));
    }

    #[tokio::test]
    async fn legacy_empty_frequency_rows_are_daily() {
        let (_dir, source) = source_with_rows(&[(
            "a@example.com",
            "Legacy row",
            "",
            "2025-10-01 09:00:00",
        )]);

        let due = source.list_due(tuesday()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].frequency, Frequency::Daily);
    }
}
