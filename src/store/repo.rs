use super::model::{NewRecord, RecordCounts, RecordRow, RecordStatus};
use super::taxonomy::{
    categories_for_industries, prefectures_for_areas, TAXONOMY_CATEGORY, TAXONOMY_PREFECTURE,
    TAXONOMY_TAG,
};
use crate::model::{Subsidy, SyncHistoryEntry};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::instrument;

pub type Pool = SqlitePool;

const OPTION_SYNC_HISTORY: &str = "sync_history";
const OPTION_LAST_SYNC: &str = "last_sync";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub async fn init_pool(database_url: &str) -> Result<Pool, StoreError> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match path_part.strip_prefix("~/") {
        Some(tail) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), tail),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{expanded}?{q}"),
        None => format!("sqlite://{expanded}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(e.into()))?;
    Ok(())
}

/// Exact-match existence check on the external subsidy identifier.
#[instrument(skip_all)]
pub async fn record_exists(pool: &Pool, subsidy_id: &str) -> Result<bool, StoreError> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM records WHERE subsidy_id = ?")
        .bind(subsidy_id)
        .fetch_optional(pool)
        .await?;
    Ok(id.is_some())
}

#[instrument(skip_all)]
pub async fn find_record_by_subsidy_id(
    pool: &Pool,
    subsidy_id: &str,
) -> Result<Option<RecordRow>, StoreError> {
    let row = sqlx::query("SELECT id, subsidy_id, title, status FROM records WHERE subsidy_id = ?")
        .bind(subsidy_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(row_to_record))
}

#[instrument(skip_all)]
pub async fn get_record(pool: &Pool, record_id: i64) -> Result<Option<RecordRow>, StoreError> {
    let row = sqlx::query("SELECT id, subsidy_id, title, status FROM records WHERE id = ?")
        .bind(record_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(row_to_record))
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> RecordRow {
    let status: String = row.get("status");
    RecordRow {
        id: row.get("id"),
        subsidy_id: row.get("subsidy_id"),
        title: row.get("title"),
        status: RecordStatus::parse_status(&status).unwrap_or(RecordStatus::Draft),
    }
}

/// Insert a new draft record with its meta fields in one transaction and
/// return the new record id.
#[instrument(skip_all)]
pub async fn create_record(pool: &Pool, record: &NewRecord) -> Result<i64, StoreError> {
    let mut tx = pool.begin().await?;
    let record_id: i64 = sqlx::query(
        "INSERT INTO records (subsidy_id, title, body, excerpt, status) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&record.subsidy_id)
    .bind(&record.title)
    .bind(&record.body)
    .bind(&record.excerpt)
    .bind(RecordStatus::Draft.as_str())
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    for (key, value) in &record.meta {
        sqlx::query(
            "INSERT INTO record_meta (record_id, meta_key, meta_value) VALUES (?, ?, ?) \
             ON CONFLICT (record_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value",
        )
        .bind(record_id)
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(record_id)
}

/// Transition a draft record to published. Fails with `NotFound` if the id
/// does not refer to a stored record.
#[instrument(skip_all)]
pub async fn publish_record(pool: &Pool, record_id: i64) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE records SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(RecordStatus::Published.as_str())
    .bind(record_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(record_id));
    }
    Ok(())
}

/// Idempotent term assignment: terms are created by name on demand and the
/// record/term link is inserted at most once.
#[instrument(skip_all)]
pub async fn set_terms(
    pool: &Pool,
    record_id: i64,
    taxonomy: &str,
    names: &[String],
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    for name in names {
        sqlx::query("INSERT OR IGNORE INTO terms (taxonomy, name) VALUES (?, ?)")
            .bind(taxonomy)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let term_id: i64 =
            sqlx::query_scalar("SELECT id FROM terms WHERE taxonomy = ? AND name = ?")
                .bind(taxonomy)
                .bind(name)
                .fetch_one(&mut *tx)
                .await?;
        sqlx::query("INSERT OR IGNORE INTO record_terms (record_id, term_id) VALUES (?, ?)")
            .bind(record_id)
            .bind(term_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Assign category and prefecture terms derived from the subsidy's industry
/// and target-area lists.
#[instrument(skip_all)]
pub async fn assign_taxonomies(
    pool: &Pool,
    record_id: i64,
    subsidy: &Subsidy,
) -> Result<(), StoreError> {
    let categories = categories_for_industries(&subsidy.industry);
    if !categories.is_empty() {
        set_terms(pool, record_id, TAXONOMY_CATEGORY, &categories).await?;
    }
    let prefectures = prefectures_for_areas(&subsidy.target_area);
    if !prefectures.is_empty() {
        set_terms(pool, record_id, TAXONOMY_PREFECTURE, &prefectures).await?;
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_record_tags(
    pool: &Pool,
    record_id: i64,
    tags: &[String],
) -> Result<(), StoreError> {
    if tags.is_empty() {
        return Ok(());
    }
    set_terms(pool, record_id, TAXONOMY_TAG, tags).await
}

#[instrument(skip_all)]
pub async fn term_names(
    pool: &Pool,
    record_id: i64,
    taxonomy: &str,
) -> Result<Vec<String>, StoreError> {
    let names = sqlx::query_scalar(
        "SELECT t.name FROM terms t \
         JOIN record_terms rt ON rt.term_id = t.id \
         WHERE rt.record_id = ? AND t.taxonomy = ? ORDER BY t.id",
    )
    .bind(record_id)
    .bind(taxonomy)
    .fetch_all(pool)
    .await?;
    Ok(names)
}

#[instrument(skip_all)]
pub async fn count_records(pool: &Pool) -> Result<RecordCounts, StoreError> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM records GROUP BY status")
        .fetch_all(pool)
        .await?;
    let mut counts = RecordCounts::default();
    for row in rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        counts.total += n;
        match RecordStatus::parse_status(&status) {
            Some(RecordStatus::Published) => counts.published += n,
            Some(RecordStatus::Draft) => counts.draft += n,
            None => {}
        }
    }
    Ok(counts)
}

async fn get_option(pool: &Pool, name: &str) -> Result<Option<String>, StoreError> {
    let value = sqlx::query_scalar("SELECT value FROM options WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

async fn set_option(pool: &Pool, name: &str, value: &str) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO options (name, value) VALUES (?, ?) \
         ON CONFLICT (name) DO UPDATE SET value = excluded.value",
    )
    .bind(name)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load the persisted sync history, newest first. A missing or corrupt blob
/// reads as empty rather than failing the caller.
#[instrument(skip_all)]
pub async fn load_sync_history(pool: &Pool) -> Result<Vec<SyncHistoryEntry>, StoreError> {
    match get_option(pool, OPTION_SYNC_HISTORY).await? {
        Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
        None => Ok(Vec::new()),
    }
}

#[instrument(skip_all)]
pub async fn save_sync_history(
    pool: &Pool,
    history: &[SyncHistoryEntry],
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(history)?;
    set_option(pool, OPTION_SYNC_HISTORY, &raw).await
}

#[instrument(skip_all)]
pub async fn last_sync(pool: &Pool) -> Result<Option<String>, StoreError> {
    get_option(pool, OPTION_LAST_SYNC).await
}

#[instrument(skip_all)]
pub async fn set_last_sync(pool: &Pool, timestamp: &str) -> Result<(), StoreError> {
    set_option(pool, OPTION_LAST_SYNC, timestamp).await
}
