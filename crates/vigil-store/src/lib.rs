//! SQLite persistence for baselines, sample history, rate-limit records and alert audit rows.
//!
//! Every process or thread may open its own [`SqliteStore`] on the same database file; the
//! rate-limit swap is a single `BEGIN IMMEDIATE` transaction, so SQLite's write lock decides
//! the winner across all of them.

pub mod error;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use vigil_core::{
    AlertRecord, AlertStore, Baseline, BaselineProvider, ExternalError, HistoryStore, RateLimitKey,
    RateLimitRecord, RateLimitStore, ResponseRecord, Sample, SessionId, SubjectId, SwapCondition,
    UserResponse, US_PER_SEC,
};

pub use error::{Result, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS baselines (
    subject TEXT PRIMARY KEY,
    baseline_hr REAL NOT NULL,
    updated_at_us INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject TEXT NOT NULL,
    session TEXT NOT NULL,
    ts_us INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_samples_window ON samples(subject, session, ts_us);
CREATE TABLE IF NOT EXISTS rate_limits (
    subject TEXT NOT NULL,
    severity TEXT NOT NULL,
    last_notification_us INTEGER,
    last_response TEXT,
    last_response_us INTEGER,
    PRIMARY KEY (subject, severity)
);
CREATE TABLE IF NOT EXISTS notification_guard (
    subject TEXT PRIMARY KEY,
    last_notification_us INTEGER NOT NULL,
    previous_us INTEGER
);
CREATE TABLE IF NOT EXISTS alerts (
    digest TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    session TEXT NOT NULL,
    evaluated_at_us INTEGER NOT NULL,
    severity TEXT,
    decision TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_subject ON alerts(subject, evaluated_at_us);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        log::debug!("opened vigil store at {}", path.as_ref().display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn set_baseline(&self, subject: &SubjectId, baseline_hr: f64, now_us: i64) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO baselines (subject, baseline_hr, updated_at_us) VALUES (?1, ?2, ?3)
             ON CONFLICT(subject) DO UPDATE SET
                baseline_hr = excluded.baseline_hr,
                updated_at_us = excluded.updated_at_us",
            params![subject.as_str(), baseline_hr, now_us],
        )?;
        Ok(())
    }

    pub fn get_baseline(&self, subject: &SubjectId) -> Result<Option<Baseline>> {
        let hr: Option<f64> = self
            .lock()?
            .query_row(
                "SELECT baseline_hr FROM baselines WHERE subject = ?1",
                params![subject.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hr.map(|baseline_hr| Baseline { subject: subject.clone(), baseline_hr }))
    }

    pub fn insert_sample(&self, subject: &SubjectId, session: &SessionId, sample: &Sample) -> Result<()> {
        let body = serde_json::to_string(sample)?;
        self.lock()?.execute(
            "INSERT INTO samples (subject, session, ts_us, body) VALUES (?1, ?2, ?3, ?4)",
            params![subject.as_str(), session.as_str(), sample.ts_us, body],
        )?;
        Ok(())
    }

    pub fn sample_window(
        &self,
        subject: &SubjectId,
        session: &SessionId,
        from_us: i64,
        to_us: i64,
    ) -> Result<Vec<Sample>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM samples
             WHERE subject = ?1 AND session = ?2 AND ts_us BETWEEN ?3 AND ?4
             ORDER BY ts_us DESC",
        )?;
        let bodies = stmt
            .query_map(params![subject.as_str(), session.as_str(), from_us, to_us], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(StoreError::from))
            .collect()
    }

    pub fn rate_limit_record(&self, key: &RateLimitKey) -> Result<Option<RateLimitRecord>> {
        let row: Option<(Option<i64>, Option<String>, Option<i64>)> = self
            .lock()?
            .query_row(
                "SELECT last_notification_us, last_response, last_response_us
                 FROM rate_limits WHERE subject = ?1 AND severity = ?2",
                params![key.subject.as_str(), key.severity.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((last_notification_us, response, response_us)) = row else {
            return Ok(None);
        };
        let last_response = match (response, response_us) {
            (Some(r), Some(ts_us)) => Some(ResponseRecord {
                ts_us,
                response: r
                    .parse::<UserResponse>()
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            }),
            (None, None) => None,
            _ => return Err(StoreError::Corrupt(format!("half-written response for {}", key.subject))),
        };
        Ok(Some(RateLimitRecord { key: key.clone(), last_notification_us, last_response }))
    }

    /// Both rate-limit layers in one immediate transaction: the bucket must still match the
    /// caller's snapshot and the subject guard must be older than the minimum interval.
    pub fn swap_notification(
        &self,
        key: &RateLimitKey,
        expected: &SwapCondition,
        new_last_notification_us: i64,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(Option<i64>, Option<i64>)> = tx
            .query_row(
                "SELECT last_notification_us, last_response_us
                 FROM rate_limits WHERE subject = ?1 AND severity = ?2",
                params![key.subject.as_str(), key.severity.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (last_notification_us, last_response_us) = current.unwrap_or((None, None));
        if last_notification_us != expected.expected_last_notification_us
            || last_response_us != expected.expected_last_response_us
        {
            log::debug!("{}/{}: snapshot changed, swap rejected", key.subject, key.severity);
            return Ok(false);
        }

        let guard: Option<i64> = tx
            .query_row(
                "SELECT last_notification_us FROM notification_guard WHERE subject = ?1",
                params![key.subject.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(g) = guard {
            if new_last_notification_us - g < expected.min_interval_us {
                log::debug!(
                    "{}: last notification {}s ago, inside guard window",
                    key.subject,
                    (new_last_notification_us - g) / US_PER_SEC
                );
                return Ok(false);
            }
        }

        tx.execute(
            "INSERT INTO rate_limits (subject, severity, last_notification_us) VALUES (?1, ?2, ?3)
             ON CONFLICT(subject, severity) DO UPDATE SET
                last_notification_us = excluded.last_notification_us",
            params![key.subject.as_str(), key.severity.as_str(), new_last_notification_us],
        )?;
        tx.execute(
            "INSERT INTO notification_guard (subject, last_notification_us, previous_us) VALUES (?1, ?2, ?3)
             ON CONFLICT(subject) DO UPDATE SET
                last_notification_us = excluded.last_notification_us,
                previous_us = excluded.previous_us",
            params![key.subject.as_str(), new_last_notification_us, guard],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Roll back a swap made at `granted_us`, in one immediate transaction. Each of the bucket
    /// and the subject guard is restored only if it still holds `granted_us`.
    pub fn release_notification(
        &self,
        key: &RateLimitKey,
        previous_last_notification_us: Option<i64>,
        granted_us: i64,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let restored = tx.execute(
            "UPDATE rate_limits SET last_notification_us = ?3
             WHERE subject = ?1 AND severity = ?2 AND last_notification_us = ?4",
            params![
                key.subject.as_str(),
                key.severity.as_str(),
                previous_last_notification_us,
                granted_us
            ],
        )?;
        tx.execute(
            "DELETE FROM notification_guard
             WHERE subject = ?1 AND last_notification_us = ?2 AND previous_us IS NULL",
            params![key.subject.as_str(), granted_us],
        )?;
        tx.execute(
            "UPDATE notification_guard SET last_notification_us = previous_us, previous_us = NULL
             WHERE subject = ?1 AND last_notification_us = ?2 AND previous_us IS NOT NULL",
            params![key.subject.as_str(), granted_us],
        )?;
        tx.commit()?;
        Ok(restored == 1)
    }

    /// Single-statement upsert; an older response never overwrites a newer one.
    pub fn put_response(&self, key: &RateLimitKey, response: ResponseRecord) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO rate_limits (subject, severity, last_response, last_response_us)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(subject, severity) DO UPDATE SET
                last_response = excluded.last_response,
                last_response_us = excluded.last_response_us
             WHERE rate_limits.last_response_us IS NULL
                OR rate_limits.last_response_us <= excluded.last_response_us",
            params![
                key.subject.as_str(),
                key.severity.as_str(),
                response.response.as_str(),
                response.ts_us
            ],
        )?;
        Ok(())
    }

    /// Insert an audit row. Re-recording an identical alert is a no-op.
    pub fn insert_alert(&self, alert: &AlertRecord) -> Result<bool> {
        let body = serde_json::to_string(alert)?;
        let inserted = self.lock()?.execute(
            "INSERT OR IGNORE INTO alerts
             (digest, subject, session, evaluated_at_us, severity, decision, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                alert.digest(),
                alert.subject.as_str(),
                alert.session.as_str(),
                alert.evaluated_at_us,
                alert.result.severity.map(|s| s.as_str()),
                alert.decision.label(),
                body
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Most recent alerts for a subject, newest first.
    pub fn alerts_for(&self, subject: &SubjectId, limit: usize) -> Result<Vec<AlertRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM alerts WHERE subject = ?1
             ORDER BY evaluated_at_us DESC, digest
             LIMIT ?2",
        )?;
        let bodies = stmt
            .query_map(params![subject.as_str(), limit as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(StoreError::from))
            .collect()
    }
}

impl BaselineProvider for SqliteStore {
    fn baseline(&self, subject: &SubjectId) -> std::result::Result<Option<Baseline>, ExternalError> {
        self.get_baseline(subject).map_err(|e| e.into_external("baselines"))
    }
}

impl HistoryStore for SqliteStore {
    fn window(
        &self,
        subject: &SubjectId,
        session: &SessionId,
        lookback_secs: u64,
        anchor_us: i64,
    ) -> std::result::Result<Vec<Sample>, ExternalError> {
        let from_us = anchor_us - lookback_secs as i64 * US_PER_SEC;
        self.sample_window(subject, session, from_us, anchor_us)
            .map_err(|e| e.into_external("history"))
    }
}

impl RateLimitStore for SqliteStore {
    fn get(&self, key: &RateLimitKey) -> std::result::Result<Option<RateLimitRecord>, ExternalError> {
        self.rate_limit_record(key).map_err(|e| e.into_external("rate_limits"))
    }

    fn compare_and_swap(
        &self,
        key: &RateLimitKey,
        expected: &SwapCondition,
        new_last_notification_us: i64,
    ) -> std::result::Result<bool, ExternalError> {
        self.swap_notification(key, expected, new_last_notification_us)
            .map_err(|e| e.into_external("rate_limits"))
    }

    fn release(
        &self,
        key: &RateLimitKey,
        previous_last_notification_us: Option<i64>,
        granted_us: i64,
    ) -> std::result::Result<bool, ExternalError> {
        self.release_notification(key, previous_last_notification_us, granted_us)
            .map_err(|e| e.into_external("rate_limits"))
    }

    fn record_response(
        &self,
        key: &RateLimitKey,
        response: ResponseRecord,
    ) -> std::result::Result<(), ExternalError> {
        self.put_response(key, response).map_err(|e| e.into_external("rate_limits"))
    }
}

impl AlertStore for SqliteStore {
    fn record(&self, alert: &AlertRecord) -> std::result::Result<(), ExternalError> {
        self.insert_alert(alert)
            .map(|_| ())
            .map_err(|e| e.into_external("alerts"))
    }
}
