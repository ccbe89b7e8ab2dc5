//! # Download Log Repository
//!
//! Append-only record of download attempts. The schema's triggers reject
//! any UPDATE or DELETE, so this repository only inserts and reads.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::retry::RetryPolicy;
use folio_core::{DownloadLogEntry, NewDownloadLogEntry};

/// Repository for the download log.
#[derive(Debug, Clone)]
pub struct DownloadLogRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl DownloadLogRepository {
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        DownloadLogRepository { pool, retry }
    }

    /// Appends one entry on its own.
    ///
    /// Paid downloads go through `OrderRepository::record_download`, which
    /// appends in the same transaction as the counter update. This is for
    /// free items and failed attempts, which touch no counter. Not retried,
    /// since a replay after a lost commit would log the attempt twice.
    pub async fn append(&self, entry: &NewDownloadLogEntry) -> DbResult<DownloadLogEntry> {
        let mut conn = self.pool.acquire().await?;
        append_in(&mut conn, entry).await
    }

    /// Entries for one order, oldest first.
    pub async fn list_for_order(&self, order_id: i64) -> DbResult<Vec<DownloadLogEntry>> {
        self.retry
            .run("list_downloads", || async move {
                let entries = sqlx::query_as::<_, DownloadLogEntry>(
                    "SELECT * FROM download_log WHERE order_id = ?1 ORDER BY id",
                )
                .bind(order_id)
                .fetch_all(&self.pool)
                .await?;

                Ok(entries)
            })
            .await
    }

    /// Entries for one user and item, oldest first. Covers free items.
    pub async fn list_for_user_item(&self, user_id: &str, item_id: &str) -> DbResult<Vec<DownloadLogEntry>> {
        self.retry
            .run("list_downloads", || async move {
                let entries = sqlx::query_as::<_, DownloadLogEntry>(
                    "SELECT * FROM download_log WHERE user_id = ?1 AND item_id = ?2 ORDER BY id",
                )
                .bind(user_id)
                .bind(item_id)
                .fetch_all(&self.pool)
                .await?;

                Ok(entries)
            })
            .await
    }
}

/// Inserts an entry on an existing connection or transaction.
pub(crate) async fn append_in(conn: &mut SqliteConnection, entry: &NewDownloadLogEntry) -> DbResult<DownloadLogEntry> {
    let logged = sqlx::query_as::<_, DownloadLogEntry>(
        r#"
        INSERT INTO download_log (order_id, user_id, item_id, ip, user_agent, outcome, detail, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        RETURNING *
        "#,
    )
    .bind(entry.order_id)
    .bind(&entry.user_id)
    .bind(&entry.item_id)
    .bind(&entry.ip)
    .bind(&entry.user_agent)
    .bind(entry.outcome)
    .bind(&entry.detail)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;

    debug!(
        log_id = logged.id,
        order_id = ?logged.order_id,
        user_id = %logged.user_id,
        outcome = %logged.outcome,
        "Download logged"
    );

    Ok(logged)
}
