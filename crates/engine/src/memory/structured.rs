use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use deepresearch_common::types::{ResearchDomain, ResearchSession};

/// Smoothing factor of the effectiveness moving average.
const EMA_ALPHA: f64 = 0.2;

/// Persisted effectiveness of a (domain, source) pair.
#[derive(Clone, Debug)]
pub struct SourceEffectiveness {
    pub ema: f64,
    pub samples: i64,
    pub updated_at: String,
}

/// Summary row of an archived session, used by the Plan node to consult
/// prior similar work.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub id: String,
    pub query: String,
    pub stop_reason: Option<String>,
}

/// SQLite client for sessions, source effectiveness, access failures and
/// domain-config overrides.
pub struct StructuredStore {
    pool: SqlitePool,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite connection error: {0}")]
    Connection(String),

    #[error("SQLite query error: {0}")]
    Query(String),

    #[error("SQLite migration error: {0}")]
    Migration(String),
}

impl From<StoreError> for deepresearch_common::ResearchError {
    fn from(e: StoreError) -> Self {
        deepresearch_common::ResearchError::Store(e.to_string())
    }
}

impl StructuredStore {
    /// Open (creating if missing) the database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        tracing::info!(path = %path.display(), "Opening structured store");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("src/memory/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))
    }

    /// Verify the connection is alive.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Upsert a session row, including the report JSON once present.
    pub async fn save_session(&self, session: &ResearchSession) -> Result<(), StoreError> {
        let report_json = session
            .report
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO sessions (id, query, domain, phase, stop_reason, report_json, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                 domain = excluded.domain,
                 phase = excluded.phase,
                 stop_reason = excluded.stop_reason,
                 report_json = excluded.report_json,
                 completed_at = excluded.completed_at",
        )
        .bind(session.id.to_string())
        .bind(&session.query)
        .bind(session.domain.as_str())
        .bind(session.phase.as_str())
        .bind(session.stop_reason.map(|r| r.as_str()))
        .bind(report_json)
        .bind(session.created_at.to_rfc3339())
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    /// Stored report JSON for a completed session, if any.
    pub async fn load_report_json(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT report_json FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(row.and_then(|r| r.get::<Option<String>, _>(0)))
    }

    /// Most recent sessions in a domain, newest first.
    pub async fn recent_sessions(
        &self,
        domain: ResearchDomain,
        limit: u32,
    ) -> Result<Vec<SessionSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, query, stop_reason FROM sessions
             WHERE domain = ?1 ORDER BY created_at DESC LIMIT ?2",
        )
        .bind(domain.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| SessionSummary {
                id: row.get(0),
                query: row.get(1),
                stop_reason: row.get(2),
            })
            .collect())
    }

    /// Effectiveness table for one domain: source → EMA score.
    pub async fn effectiveness_for_domain(
        &self,
        domain: ResearchDomain,
    ) -> Result<HashMap<String, SourceEffectiveness>, StoreError> {
        let rows = sqlx::query(
            "SELECT source, ema, samples, updated_at FROM source_effectiveness WHERE domain = ?1",
        )
        .bind(domain.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get::<String, _>(0),
                    SourceEffectiveness {
                        ema: row.get(1),
                        samples: row.get(2),
                        updated_at: row.get(3),
                    },
                )
            })
            .collect())
    }

    /// Fold one observation into the EMA for a (domain, source) pair.
    /// `observed` is 1.0 when the source contributed at least one fact to the
    /// final report, else 0.0.
    pub async fn update_effectiveness(
        &self,
        domain: ResearchDomain,
        source: &str,
        observed: f64,
    ) -> Result<(), StoreError> {
        let existing = sqlx::query(
            "SELECT ema, samples FROM source_effectiveness WHERE domain = ?1 AND source = ?2",
        )
        .bind(domain.as_str())
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let (ema, samples) = match existing {
            Some(row) => {
                let prev_ema: f64 = row.get(0);
                let samples: i64 = row.get(1);
                (EMA_ALPHA * observed + (1.0 - EMA_ALPHA) * prev_ema, samples + 1)
            }
            None => (observed, 1),
        };

        sqlx::query(
            "INSERT INTO source_effectiveness (domain, source, ema, samples, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(domain, source) DO UPDATE SET
                 ema = excluded.ema,
                 samples = excluded.samples,
                 updated_at = excluded.updated_at",
        )
        .bind(domain.as_str())
        .bind(source)
        .bind(ema)
        .bind(samples)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    /// Record (or bump) an access failure for a (url, provider) pair.
    pub async fn record_access_failure(
        &self,
        url: &str,
        provider: &str,
        kind: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO access_failures (url, provider, kind, count, first_seen, last_seen)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)
             ON CONFLICT(url, provider) DO UPDATE SET
                 kind = excluded.kind,
                 count = access_failures.count + 1,
                 last_seen = excluded.last_seen",
        )
        .bind(url)
        .bind(provider)
        .bind(kind)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    /// URLs that have failed at least `min_count` times. Collect consults
    /// this to skip known-dead endpoints.
    pub async fn known_failed_urls(&self, min_count: i64) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT url FROM access_failures WHERE count >= ?1")
            .bind(min_count)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    /// Persisted playbook override for a domain, if any.
    pub async fn domain_override(
        &self,
        domain: ResearchDomain,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query("SELECT config_json FROM domain_overrides WHERE domain = ?1")
            .bind(domain.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let json: String = row.get(0);
                serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| StoreError::Query(e.to_string()))
            }
            None => Ok(None),
        }
    }

    /// Store a playbook override for a domain.
    pub async fn set_domain_override(
        &self,
        domain: ResearchDomain,
        config: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO domain_overrides (domain, config_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(domain) DO UPDATE SET
                 config_json = excluded.config_json,
                 updated_at = excluded.updated_at",
        )
        .bind(domain.as_str())
        .bind(config.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }
}
