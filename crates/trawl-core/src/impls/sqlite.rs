//! SQLite store: every storage port over one embedded database file.
//!
//! Task transitions load the row, apply the `TaskRecord` transition and write
//! it back inside an immediate transaction, so the same rules hold as in the
//! in-memory store. Claims take the write lock up front; a second process
//! claiming at the same time waits for it and then sees the rows as
//! `processing`.
//!
//! rusqlite は同期 API なので、各呼び出しは `spawn_blocking` で blocking
//! pool に逃がす。async worker のスレッドは接続ロック待ちでも止まらない。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use crate::domain::ids::ParseIdError;
use crate::domain::{
    Channel, ChannelWatermark, CrawlState, KnowledgeItem, MakerStats, NewTask, Person,
    PersonFilter, Post, Profile, RecordCounts, StoreError, TaskId, TaskRecord, TaskStatus, TaskType,
};
use crate::ports::{CrawlStateStore, QueueCounts, RecordStore, TaskStore, WatermarkStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    id              TEXT    NOT NULL UNIQUE,
    task_type       TEXT    NOT NULL,
    task_key        TEXT    NOT NULL,
    params          TEXT    NOT NULL,
    priority        INTEGER NOT NULL DEFAULT 0,
    status          TEXT    NOT NULL,
    attempts        INTEGER NOT NULL DEFAULT 0,
    max_attempts    INTEGER NOT NULL,
    error           TEXT,
    created_at_ms   INTEGER NOT NULL,
    started_at_ms   INTEGER,
    completed_at_ms INTEGER,
    UNIQUE (task_type, task_key)
);
CREATE INDEX IF NOT EXISTS idx_tasks_claim
    ON tasks (task_type, status, priority DESC, created_at_ms, seq);

CREATE TABLE IF NOT EXISTS crawl_state (
    source      TEXT PRIMARY KEY,
    status      TEXT NOT NULL,
    oldest_date TEXT NOT NULL,
    newest_date TEXT NOT NULL,
    last_cursor TEXT
);

CREATE TABLE IF NOT EXISTS watermarks (
    entity_id TEXT    NOT NULL,
    channel   TEXT    NOT NULL,
    cutoff_ms INTEGER NOT NULL,
    PRIMARY KEY (entity_id, channel)
);

CREATE TABLE IF NOT EXISTS posts (
    slug           TEXT PRIMARY KEY,
    id             TEXT    NOT NULL,
    name           TEXT    NOT NULL,
    tagline        TEXT,
    url            TEXT,
    website        TEXT,
    votes_count    INTEGER NOT NULL DEFAULT 0,
    comments_count INTEGER NOT NULL DEFAULT 0,
    featured_at_ms INTEGER,
    created_at_ms  INTEGER NOT NULL,
    topics         TEXT    NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS post_people (
    post_slug TEXT NOT NULL,
    username  TEXT NOT NULL,
    PRIMARY KEY (post_slug, username)
);

CREATE TABLE IF NOT EXISTS profiles (
    username TEXT PRIMARY KEY,
    data     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS persons (
    id               TEXT PRIMARY KEY,
    name             TEXT    NOT NULL,
    headline         TEXT,
    twitter          TEXT,
    linkedin         TEXT,
    github           TEXT,
    website          TEXT,
    email            TEXT,
    importance_score INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS knowledge (
    person_id       TEXT NOT NULL,
    content_hash    TEXT NOT NULL,
    channel         TEXT NOT NULL,
    title           TEXT,
    content         TEXT NOT NULL,
    url             TEXT,
    query           TEXT,
    content_type    TEXT,
    content_date_ms INTEGER,
    PRIMARY KEY (person_id, content_hash)
);
"#;

const TASK_COLUMNS: &str = "id, task_type, task_key, params, priority, status, attempts, \
     max_attempts, error, created_at_ms, started_at_ms, completed_at_ms";

const PERSON_COLUMNS: &str =
    "id, name, headline, twitter, linkedin, github, website, email, importance_score";

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite worker: {e}")))?
    }

    /// Runs `f` inside an immediate (write-locked) transaction.
    async fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError> + Send + 'static,
    {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }

    /// Loads a task, applies `transition`, writes it back.
    async fn transition<T, F>(&self, id: TaskId, transition: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut TaskRecord) -> Result<T, StoreError> + Send + 'static,
    {
        self.write(move |tx| {
            let mut record = load_task(tx, id)?;
            let value = transition(&mut record)?;
            save_task(tx, &record)?;
            Ok(value)
        })
        .await
    }
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {ms}")))
}

fn opt_ms_to_dt(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(ms_to_dt).transpose()
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    s.parse()
        .map_err(|e| StoreError::Backend(format!("bad date '{s}': {e}")))
}

fn parse_text<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T, StoreError> {
    s.parse().map_err(StoreError::Backend)
}

/// Raw `tasks` row, decoded into a `TaskRecord` outside the row callback.
struct TaskRow {
    id: String,
    task_type: String,
    task_key: String,
    params: String,
    priority: i64,
    status: String,
    attempts: i64,
    max_attempts: i64,
    error: Option<String>,
    created_at_ms: i64,
    started_at_ms: Option<i64>,
    completed_at_ms: Option<i64>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_type: row.get(1)?,
            task_key: row.get(2)?,
            params: row.get(3)?,
            priority: row.get(4)?,
            status: row.get(5)?,
            attempts: row.get(6)?,
            max_attempts: row.get(7)?,
            error: row.get(8)?,
            created_at_ms: row.get(9)?,
            started_at_ms: row.get(10)?,
            completed_at_ms: row.get(11)?,
        })
    }
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(TaskRecord {
            id: row
                .id
                .parse()
                .map_err(|e: ParseIdError| StoreError::Backend(e.to_string()))?,
            task_type: parse_text(&row.task_type)?,
            task_key: row.task_key,
            params: serde_json::from_str(&row.params)?,
            priority: row.priority,
            status: parse_text(&row.status)?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(0),
            error: row.error,
            created_at: ms_to_dt(row.created_at_ms)?,
            started_at: opt_ms_to_dt(row.started_at_ms)?,
            completed_at: opt_ms_to_dt(row.completed_at_ms)?,
        })
    }
}

fn load_task(tx: &Transaction<'_>, id: TaskId) -> Result<TaskRecord, StoreError> {
    let row = tx
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id.as_ulid().to_string()],
            TaskRow::from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    row.try_into()
}

fn save_task(tx: &Transaction<'_>, record: &TaskRecord) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE tasks
            SET status = ?2, attempts = ?3, error = ?4,
                started_at_ms = ?5, completed_at_ms = ?6
          WHERE id = ?1",
        params![
            record.id.as_ulid().to_string(),
            record.status.as_str(),
            record.attempts as i64,
            record.error,
            record.started_at.map(dt_to_ms),
            record.completed_at.map(dt_to_ms),
        ],
    )?;
    Ok(())
}

fn query_tasks(
    tx: &Transaction<'_>,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<TaskRecord>, StoreError> {
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt.query_map(params, TaskRow::from_row)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?.try_into()?);
    }
    Ok(records)
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert_if_absent(&self, task: NewTask, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let params_json = serde_json::to_string(&task.params)?;
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO tasks (id, task_type, task_key, params, priority, status,
                                    attempts, max_attempts, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?7)
                 ON CONFLICT (task_type, task_key) DO NOTHING",
                params![
                    TaskId::generate().as_ulid().to_string(),
                    task.task_type.as_str(),
                    task.task_key,
                    params_json,
                    task.priority,
                    task.max_attempts as i64,
                    dt_to_ms(now),
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn claim_batch(
        &self,
        task_type: TaskType,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.write(move |tx| {
            let candidates = query_tasks(
                tx,
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                      WHERE task_type = ?1 AND status = 'pending'
                      ORDER BY priority DESC, created_at_ms ASC, seq ASC
                      LIMIT ?2"
                ),
                params![task_type.as_str(), limit as i64],
            )?;

            let mut claimed = Vec::with_capacity(candidates.len());
            for mut record in candidates {
                let changed = tx.execute(
                    "UPDATE tasks SET status = 'processing', started_at_ms = ?2
                      WHERE id = ?1 AND status = 'pending'",
                    params![record.id.as_ulid().to_string(), dt_to_ms(now)],
                )?;
                if changed == 1 {
                    record.claim(now)?;
                    claimed.push(record);
                }
            }
            Ok(claimed)
        })
        .await
    }

    async fn complete(&self, id: TaskId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.transition(id, move |record| record.complete(now)).await
    }

    async fn fail(&self, id: TaskId, error: String) -> Result<TaskStatus, StoreError> {
        self.transition(id, move |record| record.fail(error)).await
    }

    async fn fail_permanently(&self, id: TaskId, error: String) -> Result<(), StoreError> {
        self.transition(id, move |record| record.fail_permanently(error)).await
    }

    async fn release(&self, ids: &[TaskId]) -> Result<usize, StoreError> {
        let ids = ids.to_vec();
        self.write(move |tx| {
            let mut released = 0;
            for id in ids {
                released += tx.execute(
                    "UPDATE tasks SET status = 'pending', started_at_ms = NULL
                      WHERE id = ?1 AND status = 'processing'",
                    params![id.as_ulid().to_string()],
                )?;
            }
            Ok(released)
        })
        .await
    }

    async fn reset_stale(
        &self,
        task_type: TaskType,
        started_before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.call(move |conn| {
            let reset = conn.execute(
                "UPDATE tasks SET status = 'pending', started_at_ms = NULL
                  WHERE task_type = ?1 AND status = 'processing' AND started_at_ms < ?2",
                params![task_type.as_str(), dt_to_ms(started_before)],
            )?;
            Ok(reset)
        })
        .await
    }

    async fn stats(&self, task_type: TaskType) -> Result<QueueCounts, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM tasks WHERE task_type = ?1 GROUP BY status")?;
            let rows = stmt.query_map(params![task_type.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut counts = QueueCounts::default();
            for row in rows {
                let (status, n) = row?;
                counts.add(parse_text(&status)?, usize::try_from(n).unwrap_or(0));
            }
            Ok(counts)
        })
        .await
    }

    async fn retry_failed(&self, task_type: Option<TaskType>) -> Result<usize, StoreError> {
        self.call(move |conn| {
            let sql = "UPDATE tasks
                          SET status = 'pending', attempts = 0, error = NULL,
                              started_at_ms = NULL, completed_at_ms = NULL
                        WHERE status = 'failed'";
            let retried = match task_type {
                Some(task_type) => conn.execute(
                    &format!("{sql} AND task_type = ?1"),
                    params![task_type.as_str()],
                )?,
                None => conn.execute(sql, [])?,
            };
            Ok(retried)
        })
        .await
    }

    async fn get(&self, task_type: TaskType, task_key: &str) -> Result<Option<TaskRecord>, StoreError> {
        let task_key = task_key.to_string();
        self.call(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_type = ?1 AND task_key = ?2"),
                    params![task_type.as_str(), task_key],
                    TaskRow::from_row,
                )
                .optional()?;
            row.map(TaskRecord::try_from).transpose()
        })
        .await
    }

    async fn purge(&self) -> Result<usize, StoreError> {
        self.call(|conn| Ok(conn.execute("DELETE FROM tasks", [])?)).await
    }
}

#[async_trait]
impl CrawlStateStore for SqliteStore {
    async fn load_crawl_state(&self, source: &str) -> Result<Option<CrawlState>, StoreError> {
        let source = source.to_string();
        let row = self
            .call({
                let source = source.clone();
                move |conn| {
                    Ok(conn
                        .query_row(
                            "SELECT status, oldest_date, newest_date, last_cursor
                               FROM crawl_state WHERE source = ?1",
                            params![source],
                            |row| {
                                Ok((
                                    row.get::<_, String>(0)?,
                                    row.get::<_, String>(1)?,
                                    row.get::<_, String>(2)?,
                                    row.get::<_, Option<String>>(3)?,
                                ))
                            },
                        )
                        .optional()?)
                }
            })
            .await?;
        let Some((status, oldest, newest, last_cursor)) = row else {
            return Ok(None);
        };
        Ok(Some(CrawlState {
            source,
            status: parse_text(&status)?,
            oldest_date: parse_date(&oldest)?,
            newest_date: parse_date(&newest)?,
            last_cursor,
        }))
    }

    async fn save_crawl_state(&self, state: &CrawlState) -> Result<(), StoreError> {
        let state = state.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO crawl_state (source, status, oldest_date, newest_date, last_cursor)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (source) DO UPDATE SET
                    status = excluded.status,
                    oldest_date = excluded.oldest_date,
                    newest_date = excluded.newest_date,
                    last_cursor = excluded.last_cursor",
                params![
                    state.source,
                    state.status.as_str(),
                    state.oldest_date.to_string(),
                    state.newest_date.to_string(),
                    state.last_cursor,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl WatermarkStore for SqliteStore {
    async fn cutoff(&self, entity_id: &str, channel: Channel) -> Result<Option<DateTime<Utc>>, StoreError> {
        let entity_id = entity_id.to_string();
        self.call(move |conn| {
            let ms = conn
                .query_row(
                    "SELECT cutoff_ms FROM watermarks WHERE entity_id = ?1 AND channel = ?2",
                    params![entity_id, channel.as_str()],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            opt_ms_to_dt(ms)
        })
        .await
    }

    async fn set_cutoff(&self, watermark: &ChannelWatermark) -> Result<(), StoreError> {
        let watermark = watermark.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO watermarks (entity_id, channel, cutoff_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT (entity_id, channel) DO UPDATE SET cutoff_ms = excluded.cutoff_ms",
                params![
                    watermark.entity_id,
                    watermark.channel.as_str(),
                    dt_to_ms(watermark.cutoff)
                ],
            )?;
            Ok(())
        })
        .await
    }
}

fn person_from_row(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        headline: row.get(2)?,
        twitter: row.get(3)?,
        linkedin: row.get(4)?,
        github: row.get(5)?,
        website: row.get(6)?,
        email: row.get(7)?,
        importance_score: row.get(8)?,
    })
}

fn count(conn: &Connection, table: &str) -> Result<usize, StoreError> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(usize::try_from(n).unwrap_or(0))
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert_post(&self, post: &Post) -> Result<(), StoreError> {
        let topics = serde_json::to_string(&post.topics)?;
        let post = post.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO posts (slug, id, name, tagline, url, website, votes_count,
                                    comments_count, featured_at_ms, created_at_ms, topics)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT (slug) DO UPDATE SET
                    id = excluded.id, name = excluded.name, tagline = excluded.tagline,
                    url = excluded.url, website = excluded.website,
                    votes_count = excluded.votes_count, comments_count = excluded.comments_count,
                    featured_at_ms = excluded.featured_at_ms, created_at_ms = excluded.created_at_ms,
                    topics = excluded.topics",
                params![
                    post.slug,
                    post.id,
                    post.name,
                    post.tagline,
                    post.url,
                    post.website,
                    post.votes_count,
                    post.comments_count,
                    post.featured_at.map(dt_to_ms),
                    dt_to_ms(post.created_at),
                    topics,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn link_post_person(&self, slug: &str, username: &str) -> Result<bool, StoreError> {
        let (slug, username) = (slug.to_string(), username.to_string());
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO post_people (post_slug, username) VALUES (?1, ?2)
                 ON CONFLICT (post_slug, username) DO NOTHING",
                params![slug, username],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let data = serde_json::to_string(profile)?;
        let username = profile.username.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO profiles (username, data) VALUES (?1, ?2)
                 ON CONFLICT (username) DO UPDATE SET data = excluded.data",
                params![username, data],
            )?;
            Ok(())
        })
        .await
    }

    async fn person(&self, id: &str) -> Result<Option<Person>, StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = ?1"),
                    params![id],
                    person_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn upsert_person(&self, person: &Person) -> Result<(), StoreError> {
        let person = person.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO persons (id, name, headline, twitter, linkedin, github, website,
                                      email, importance_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (id) DO UPDATE SET
                    name = excluded.name, headline = excluded.headline,
                    twitter = excluded.twitter, linkedin = excluded.linkedin,
                    github = excluded.github, website = excluded.website,
                    email = excluded.email, importance_score = excluded.importance_score",
                params![
                    person.id,
                    person.name,
                    person.headline,
                    person.twitter,
                    person.linkedin,
                    person.github,
                    person.website,
                    person.email,
                    person.importance_score,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn persons(&self) -> Result<Vec<Person>, StoreError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {PERSON_COLUMNS} FROM persons ORDER BY id"))?;
            let persons = stmt
                .query_map([], person_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(persons)
        })
        .await
    }

    async fn top_persons(&self, filter: &PersonFilter) -> Result<Vec<Person>, StoreError> {
        let filter = *filter;
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PERSON_COLUMNS} FROM persons
                  WHERE importance_score >= ?1
                    AND (?2 = 0 OR COALESCE(email, '') <> '')
                    AND (?3 = 0 OR COALESCE(twitter, '') <> '')
                  ORDER BY importance_score DESC, id ASC
                  LIMIT ?4"
            ))?;
            let persons = stmt
                .query_map(
                    params![filter.min_score, filter.with_email, filter.with_twitter, filter.limit as i64],
                    person_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(persons)
        })
        .await
    }

    async fn maker_stats(&self, username: &str) -> Result<MakerStats, StoreError> {
        let username = username.to_string();
        self.call(move |conn| {
            let (posts, votes) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(p.votes_count), 0)
                   FROM post_people pp
                   LEFT JOIN posts p ON p.slug = pp.post_slug
                  WHERE pp.username = ?1",
                params![username],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )?;
            Ok(MakerStats { posts, votes })
        })
        .await
    }

    async fn insert_knowledge(
        &self,
        person_id: &str,
        item: &KnowledgeItem,
        content_hash: &str,
    ) -> Result<bool, StoreError> {
        let person_id = person_id.to_string();
        let content_hash = content_hash.to_string();
        let item = item.clone();
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO knowledge (person_id, content_hash, channel, title, content, url,
                                        query, content_type, content_date_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (person_id, content_hash) DO NOTHING",
                params![
                    person_id,
                    content_hash,
                    item.channel.as_str(),
                    item.title,
                    item.content,
                    item.url,
                    item.query,
                    item.content_type,
                    item.content_date.map(dt_to_ms),
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn counts(&self) -> Result<RecordCounts, StoreError> {
        self.call(|conn| {
            Ok(RecordCounts {
                posts: count(conn, "posts")?,
                post_people: count(conn, "post_people")?,
                profiles: count(conn, "profiles")?,
                persons: count(conn, "persons")?,
                knowledge: count(conn, "knowledge")?,
            })
        })
        .await
    }

    async fn purge_records(&self) -> Result<(), StoreError> {
        self.call(|conn| {
            conn.execute_batch(
                "DELETE FROM crawl_state;
                 DELETE FROM watermarks;
                 DELETE FROM posts;
                 DELETE FROM post_people;
                 DELETE FROM profiles;
                 DELETE FROM persons;
                 DELETE FROM knowledge;",
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceStatus;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn new_task(task_type: TaskType, key: &str, priority: i64) -> NewTask {
        NewTask {
            task_type,
            task_key: key.into(),
            params: json!({"key": key}),
            priority,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn insert_if_absent_is_keyed_by_type_and_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.insert_if_absent(new_task(TaskType::ScrapePost, "a", 0), now()).await.unwrap());
        assert!(!store.insert_if_absent(new_task(TaskType::ScrapePost, "a", 5), now()).await.unwrap());
        assert!(store.insert_if_absent(new_task(TaskType::ScrapeProfile, "a", 0), now()).await.unwrap());

        let stored = store.get(TaskType::ScrapePost, "a").await.unwrap().unwrap();
        assert_eq!(stored.priority, 0);
        assert_eq!(stored.params, json!({"key": "a"}));
        assert_eq!(stored.created_at, now());
    }

    #[tokio::test]
    async fn claim_orders_and_marks_processing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_if_absent(new_task(TaskType::EnrichPerson, "low", 1), now()).await.unwrap();
        store.insert_if_absent(new_task(TaskType::EnrichPerson, "high", 9), now()).await.unwrap();
        store.insert_if_absent(new_task(TaskType::EnrichPerson, "low2", 1), now()).await.unwrap();

        let claimed = store.claim_batch(TaskType::EnrichPerson, 2, now()).await.unwrap();
        let keys: Vec<_> = claimed.iter().map(|t| t.task_key.as_str()).collect();
        assert_eq!(keys, ["high", "low"]);
        assert!(claimed.iter().all(|t| t.status == TaskStatus::Processing));

        let again = store.claim_batch(TaskType::EnrichPerson, 5, now()).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].task_key, "low2");
    }

    #[tokio::test]
    async fn fail_follows_the_attempt_ceiling() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_if_absent(new_task(TaskType::FetchPosts, "k", 0), now()).await.unwrap();
        let mut statuses = Vec::new();
        for _ in 0..3 {
            let task = store.claim_batch(TaskType::FetchPosts, 1, now()).await.unwrap().remove(0);
            statuses.push(store.fail(task.id, "boom".into()).await.unwrap());
        }
        assert_eq!(statuses, [TaskStatus::Pending, TaskStatus::Pending, TaskStatus::Failed]);
        let task = store.get(TaskType::FetchPosts, "k").await.unwrap().unwrap();
        assert_eq!(task.attempts, 3);
        assert!(store.claim_batch(TaskType::FetchPosts, 1, now()).await.unwrap().is_empty());

        assert_eq!(store.retry_failed(Some(TaskType::FetchPosts)).await.unwrap(), 1);
        let task = store.get(TaskType::FetchPosts, "k").await.unwrap().unwrap();
        assert_eq!((task.status, task.attempts, task.error), (TaskStatus::Pending, 0, None));
    }

    #[tokio::test]
    async fn complete_requires_processing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_if_absent(new_task(TaskType::ScrapePost, "a", 0), now()).await.unwrap();
        let pending = store.get(TaskType::ScrapePost, "a").await.unwrap().unwrap();
        let err = store.complete(pending.id, now()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn reset_stale_and_release() {
        let store = SqliteStore::open_in_memory().unwrap();
        for key in ["a", "b"] {
            store.insert_if_absent(new_task(TaskType::ScrapePost, key, 0), now()).await.unwrap();
        }
        let claimed = store.claim_batch(TaskType::ScrapePost, 2, now()).await.unwrap();

        assert_eq!(store.release(&[claimed[0].id]).await.unwrap(), 1);
        let later = now() + ChronoDuration::minutes(11);
        assert_eq!(store.reset_stale(TaskType::ScrapePost, later - ChronoDuration::minutes(10)).await.unwrap(), 1);

        let counts = store.stats(TaskType::ScrapePost).await.unwrap();
        assert_eq!(counts, QueueCounts { pending: 2, ..Default::default() });
        let b = store.get(TaskType::ScrapePost, &claimed[1].task_key).await.unwrap().unwrap();
        assert_eq!((b.attempts, b.started_at), (0, None));
    }

    #[tokio::test]
    async fn two_handles_on_one_file_never_share_a_claim() {
        let dir = std::env::temp_dir().join(format!("trawl-claim-{}", TaskId::generate()));
        let path = dir.join("trawl.db");
        let first = SqliteStore::open(&path).unwrap();
        let second = SqliteStore::open(&path).unwrap();
        for i in 0..20 {
            first.insert_if_absent(new_task(TaskType::ScrapePost, &format!("p{i}"), 0), now()).await.unwrap();
        }

        let (a, b) = tokio::join!(
            async {
                let mut ids = Vec::new();
                loop {
                    let batch = first.claim_batch(TaskType::ScrapePost, 3, now()).await.unwrap();
                    if batch.is_empty() { break ids; }
                    ids.extend(batch.into_iter().map(|t| t.id));
                    tokio::task::yield_now().await;
                }
            },
            async {
                let mut ids = Vec::new();
                loop {
                    let batch = second.claim_batch(TaskType::ScrapePost, 3, now()).await.unwrap();
                    if batch.is_empty() { break ids; }
                    ids.extend(batch.into_iter().map(|t| t.id));
                    tokio::task::yield_now().await;
                }
            }
        );
        let mut all: Vec<_> = a.into_iter().chain(b).collect();
        all.sort();
        let total = all.len();
        all.dedup();
        assert_eq!(total, 20);
        assert_eq!(all.len(), 20);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn crawl_state_and_watermarks_persist() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut state = CrawlState::new("product_hunt", NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        state.last_cursor = Some("abc".into());
        state.status = SourceStatus::Paused;
        store.save_crawl_state(&state).await.unwrap();
        assert_eq!(store.load_crawl_state("product_hunt").await.unwrap(), Some(state));

        assert_eq!(store.cutoff("ada", Channel::Github).await.unwrap(), None);
        let mark = ChannelWatermark { entity_id: "ada".into(), channel: Channel::Github, cutoff: now() };
        store.set_cutoff(&mark).await.unwrap();
        store.set_cutoff(&ChannelWatermark { cutoff: now() + ChronoDuration::days(1), ..mark }).await.unwrap();
        assert_eq!(
            store.cutoff("ada", Channel::Github).await.unwrap(),
            Some(now() + ChronoDuration::days(1))
        );
    }

    #[tokio::test]
    async fn records_roundtrip_and_dedup() {
        let store = SqliteStore::open_in_memory().unwrap();
        let post = Post {
            id: "1".into(),
            slug: "widget".into(),
            name: "Widget".into(),
            tagline: Some("tiny".into()),
            url: None,
            website: None,
            votes_count: 420,
            comments_count: 3,
            featured_at: Some(now()),
            created_at: now(),
            topics: vec!["dev".into()],
        };
        store.upsert_post(&post).await.unwrap();
        store.upsert_post(&post).await.unwrap();
        assert!(store.link_post_person("widget", "ada").await.unwrap());
        assert!(!store.link_post_person("widget", "ada").await.unwrap());
        assert_eq!(store.maker_stats("ada").await.unwrap(), MakerStats { posts: 1, votes: 420 });
        assert_eq!(store.maker_stats("nobody").await.unwrap(), MakerStats::default());

        let person = Person { id: "ada".into(), name: "Ada".into(), importance_score: 52, ..Person::default() };
        store.upsert_person(&person).await.unwrap();
        assert_eq!(store.person("ada").await.unwrap(), Some(person.clone()));
        assert_eq!(store.top_persons(&PersonFilter::new(60, 10)).await.unwrap(), vec![]);
        assert_eq!(store.top_persons(&PersonFilter::new(50, 10)).await.unwrap(), vec![person]);

        let item = KnowledgeItem::new(Channel::Github, "repo").with_url("https://github.com/ada/x");
        assert!(store.insert_knowledge("ada", &item, &item.content_hash()).await.unwrap());
        assert!(!store.insert_knowledge("ada", &item, &item.content_hash()).await.unwrap());

        store.upsert_profile(&Profile { username: "ada".into(), ..Profile::default() }).await.unwrap();
        let counts = store.counts().await.unwrap();
        assert_eq!(
            counts,
            RecordCounts { posts: 1, post_people: 1, profiles: 1, persons: 1, knowledge: 1 }
        );

        store.purge_records().await.unwrap();
        assert_eq!(store.counts().await.unwrap(), RecordCounts::default());
    }

    #[tokio::test]
    async fn top_persons_can_require_email_and_twitter() {
        let store = SqliteStore::open_in_memory().unwrap();
        let people = [
            ("a", Some("a@example.com"), None, 30),
            ("b", None, Some("b_tw"), 20),
            ("c", Some("c@example.com"), Some("c_tw"), 10),
            ("d", Some(""), Some(""), 40),
        ];
        for (id, email, twitter, score) in people {
            let person = Person {
                id: id.into(),
                name: id.into(),
                email: email.map(Into::into),
                twitter: twitter.map(Into::into),
                importance_score: score,
                ..Person::default()
            };
            store.upsert_person(&person).await.unwrap();
        }
        let ids = |persons: Vec<Person>| persons.into_iter().map(|p| p.id).collect::<Vec<_>>();
        let filter = PersonFilter::new(0, 10);
        assert_eq!(ids(store.top_persons(&filter).await.unwrap()), ["d", "a", "b", "c"]);
        assert_eq!(ids(store.top_persons(&filter.with_email(true)).await.unwrap()), ["a", "c"]);
        assert_eq!(ids(store.top_persons(&filter.with_twitter(true)).await.unwrap()), ["b", "c"]);
        assert_eq!(
            ids(store.top_persons(&PersonFilter::new(15, 1).with_twitter(true)).await.unwrap()),
            ["b"]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn waiting_on_the_connection_leaves_the_runtime_free() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.conn.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(300));
        });
        locked_rx.recv().unwrap();

        let timer_fired = tokio::select! {
            biased;
            _ = store.counts() => false,
            _ = tokio::time::sleep(Duration::from_millis(20)) => true,
        };
        assert!(timer_fired);

        holder.join().unwrap();
        assert_eq!(store.counts().await.unwrap(), RecordCounts::default());
    }
}
