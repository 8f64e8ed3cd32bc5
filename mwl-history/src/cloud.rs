//! Cloud history backend
//!
//! Sessions live in `meditation_sessions`, each row tagged with its owner.
//! Every query carries `user_id = ?`, so a `CloudStore` only ever sees the
//! rows of the identity it was opened for.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mwl_common::{DeviceInfo, Error, Result, Session, SessionPatch};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{BackendKind, HistoryBackend};
use crate::filter::HistoryFilter;
use crate::stats::Statistics;

const SESSION_COLUMNS: &str = "id, user_id, script_id, start_time, end_time, completed, \
     duration, rating, notes, device_info, created_at";

/// Insert or replace a row, but never take over another owner's row
const UPSERT_SESSION_SQL: &str = r#"
    INSERT INTO meditation_sessions
        (id, user_id, script_id, start_time, end_time, completed,
         duration, rating, notes, device_info, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        script_id = excluded.script_id,
        start_time = excluded.start_time,
        end_time = excluded.end_time,
        completed = excluded.completed,
        duration = excluded.duration,
        rating = excluded.rating,
        notes = excluded.notes,
        device_info = excluded.device_info
    WHERE meditation_sessions.user_id IS excluded.user_id
"#;

/// Insert only; an existing id is left alone
const INSERT_MISSING_SQL: &str = r#"
    INSERT INTO meditation_sessions
        (id, user_id, script_id, start_time, end_time, completed,
         duration, rating, notes, device_info, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO NOTHING
"#;

/// Stored timestamp form: RFC 3339, UTC, millisecond precision
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Persistence(format!("invalid {} '{}': {}", column, value, e)))
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let id: String = row.try_get("id")?;
    let start_time: String = row.try_get("start_time")?;
    let end_time: Option<String> = row.try_get("end_time")?;
    let duration: i64 = row.try_get("duration")?;
    let rating: Option<i64> = row.try_get("rating")?;
    let device_info: String = row.try_get("device_info")?;

    Ok(Session {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Persistence(format!("invalid session id '{}': {}", id, e)))?,
        script_id: row.try_get("script_id")?,
        start_time: parse_timestamp("start_time", &start_time)?,
        end_time: end_time
            .as_deref()
            .map(|v| parse_timestamp("end_time", v))
            .transpose()?,
        completed: row.try_get("completed")?,
        duration: u32::try_from(duration).unwrap_or(0),
        rating: rating.and_then(|r| u8::try_from(r).ok()),
        notes: row.try_get("notes")?,
        device_info: serde_json::from_str::<DeviceInfo>(&device_info)?,
    })
}

/// Bind a session row and run `sql` (one of the insert statements)
async fn write_session<'e, E>(
    executor: E,
    sql: &'static str,
    session: &Session,
    user_id: &str,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(sql)
        .bind(session.id.to_string())
        .bind(user_id.to_string())
        .bind(session.script_id.clone())
        .bind(format_timestamp(session.start_time))
        .bind(session.end_time.map(format_timestamp))
        .bind(session.completed)
        .bind(session.duration as i64)
        .bind(session.rating.map(|r| r as i64))
        .bind(session.notes.clone())
        .bind(serde_json::to_string(&session.device_info)?)
        .bind(format_timestamp(Utc::now()))
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// SQL history store scoped to one owner
#[derive(Clone)]
pub struct CloudStore {
    pool: SqlitePool,
    user_id: String,
}

impl CloudStore {
    pub fn new(pool: SqlitePool, user_id: impl Into<String>) -> Self {
        Self {
            pool,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert sessions whose ids are not stored yet, `chunk_size` rows per
    /// transaction
    ///
    /// Returns the number of rows actually inserted. Re-running with the same
    /// input inserts nothing.
    pub async fn insert_missing(&self, sessions: &[Session], chunk_size: usize) -> Result<usize> {
        let mut inserted = 0;
        for chunk in sessions.chunks(chunk_size.max(1)) {
            let mut tx = self.pool.begin().await?;
            for session in chunk {
                inserted +=
                    write_session(&mut *tx, INSERT_MISSING_SQL, session, &self.user_id).await?
                        as usize;
            }
            tx.commit().await?;
            debug!("Inserted chunk of {} sessions for {}", chunk.len(), self.user_id);
        }
        Ok(inserted)
    }

    /// Create the owner's profile row if it does not exist
    pub async fn ensure_profile(&self, display_name: Option<&str>) -> Result<()> {
        let now = format_timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO user_profiles (id, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&self.user_id)
        .bind(display_name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cached statistics stored on the profile, `None` without a profile
    pub async fn load_statistics(&self) -> Result<Option<Statistics>> {
        let row = sqlx::query("SELECT statistics FROM user_profiles WHERE id = ?")
            .bind(&self.user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.try_get("statistics")?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    pub async fn save_statistics(&self, stats: &Statistics) -> Result<()> {
        self.ensure_profile(None).await?;
        sqlx::query("UPDATE user_profiles SET statistics = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(stats)?)
            .bind(format_timestamp(Utc::now()))
            .bind(&self.user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_preferences(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let row = sqlx::query("SELECT preferences FROM user_profiles WHERE id = ?")
            .bind(&self.user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.try_get("preferences")?;
                Ok(serde_json::from_str(&json)?)
            }
            None => Ok(BTreeMap::new()),
        }
    }

    /// Add local preference keys the profile does not have yet
    ///
    /// Keys already set in the cloud win.
    pub async fn merge_preferences(
        &self,
        local: &BTreeMap<String, serde_json::Value>,
    ) -> Result<usize> {
        self.ensure_profile(None).await?;
        let mut prefs = self.load_preferences().await?;
        let mut added = 0;
        for (key, value) in local {
            if !prefs.contains_key(key) {
                prefs.insert(key.clone(), value.clone());
                added += 1;
            }
        }
        if added > 0 {
            sqlx::query("UPDATE user_profiles SET preferences = ?, updated_at = ? WHERE id = ?")
                .bind(serde_json::to_string(&prefs)?)
                .bind(format_timestamp(Utc::now()))
                .bind(&self.user_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(added)
    }
}

#[async_trait]
impl HistoryBackend for CloudStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let affected = write_session(&self.pool, UPSERT_SESSION_SQL, session, &self.user_id).await?;
        if affected == 0 {
            return Err(Error::Persistence(format!(
                "session {} belongs to another owner",
                session.id
            )));
        }
        Ok(())
    }

    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<Session>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT ");
        query.push(SESSION_COLUMNS);
        query.push(" FROM meditation_sessions WHERE user_id = ");
        query.push_bind(self.user_id.clone());

        if let Some(from) = filter.from {
            query.push(" AND start_time >= ").push_bind(format_timestamp(from));
        }
        if let Some(to) = filter.to {
            query.push(" AND start_time <= ").push_bind(format_timestamp(to));
        }
        if let Some(script_id) = &filter.script_id {
            query.push(" AND script_id = ").push_bind(script_id.clone());
        }
        if let Some(completed) = filter.completed {
            query.push(" AND completed = ").push_bind(completed);
        }
        query.push(" ORDER BY start_time DESC, id ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM meditation_sessions WHERE id = ? AND user_id = ?",
            SESSION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(&self.user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn update(&self, id: Uuid, patch: &SessionPatch) -> Result<Session> {
        let mut session = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        patch.apply(&mut session)?;

        sqlx::query(
            r#"
            UPDATE meditation_sessions
            SET rating = ?, notes = ?, completed = ?, end_time = ?, duration = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(session.rating.map(|r| r as i64))
        .bind(session.notes.clone())
        .bind(session.completed)
        .bind(session.end_time.map(format_timestamp))
        .bind(session.duration as i64)
        .bind(id.to_string())
        .bind(&self.user_id)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM meditation_sessions WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(&self.user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("session {}", id)));
        }
        Ok(())
    }
}
