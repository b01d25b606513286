#[macro_use]
extern crate tracing;

use std::collections::HashMap;

use anyhow::Context as _;
use async_trait::async_trait;
use capture_store::{CaptureStore, EventFilter, EventRecord, FileCaptureRecord, HourCount, SourceCount, Stats};
use libsql::Connection;
use time::OffsetDateTime;
use uuid::Uuid;

pub use libsql;

const MIGRATIONS: &[&str] = &[
    // Migration 0 - initial schema: events + file_captures
    include_str!("../migrations/01_events.sql"),
];

/// libSQL-backed [`CaptureStore`].
///
/// Holds a single connection: libSQL / SQLite connections can't share a transaction across
/// concurrent callers, so a single writer task owns this store and every insert is serialized
/// through it, matching the capture log's single-writer design.
pub struct LibSqlCaptureStore {
    conn: Connection,
}

impl LibSqlCaptureStore {
    /// Opens a libSQL connection at `path` ("`:memory:`" for an in-memory database) and
    /// constructs a store instance. Call [`CaptureStore::setup`] before first use.
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        let conn = libsql::Builder::new_local(path)
            .build()
            .await
            .context("failed to open libSQL connection")?
            .connect()
            .context("failed to connect to libSQL")?;

        Ok(Self { conn })
    }

    async fn apply_pragmas(&self) -> anyhow::Result<()> {
        const PRAGMAS: &str = "
            -- https://www.sqlite.org/pragma.html#pragma_journal_mode
            PRAGMA journal_mode = WAL;

            -- https://www.sqlite.org/pragma.html#pragma_synchronous
            -- WAL mode is safe from corruption with synchronous=NORMAL.
            PRAGMA synchronous = NORMAL;

            -- https://www.sqlite.org/pragma.html#pragma_busy_timeout
            PRAGMA busy_timeout = 15000;

            -- https://www.sqlite.org/pragma.html#pragma_cache_size
            PRAGMA cache_size = -3000;

            -- https://www.sqlite.org/pragma.html#pragma_auto_vacuum
            PRAGMA auto_vacuum = INCREMENTAL;

            -- https://www.sqlite.org/pragma.html#pragma_temp_store
            PRAGMA temp_store = MEMORY;
        ";

        trace!(sql_query = %PRAGMAS, "PRAGMAs query");

        let mut batch_rows = self
            .conn
            .execute_batch(PRAGMAS)
            .await
            .context("failed to batch execute SQL query")?;

        while let Some(rows) = batch_rows.next_stmt_row() {
            let Some(mut rows) = rows else {
                continue;
            };

            while let Ok(Some(row)) = rows.next().await {
                trace!(?row, "PRAGMA row");
            }
        }

        Ok(())
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        let user_version = self.query_user_version().await?;

        match MIGRATIONS.get(user_version..) {
            Some(remaining) if !remaining.is_empty() => {
                info!(
                    user_version,
                    migration_count = MIGRATIONS.len() - user_version,
                    "Start migration"
                );

                for (sql_query, migration_id) in remaining.iter().zip(user_version..MIGRATIONS.len()) {
                    trace!(migration_id, %sql_query, "Apply migration");

                    self.conn
                        .execute_batch(sql_query)
                        .await
                        .with_context(|| format!("failed to execute migration {migration_id}"))?;

                    self.update_user_version(migration_id + 1)
                        .await
                        .context("failed to update user version")?;
                }

                info!("Migration complete");
            }
            None => {
                warn!(user_version, "user_version is set to an unexpected value");
            }
            _ => {
                debug!(user_version, "Database is already up to date");
            }
        }

        Ok(())
    }

    async fn query_user_version(&self) -> anyhow::Result<usize> {
        let row = self
            .conn
            .query("PRAGMA user_version", ())
            .await
            .context("failed to execute SQL query")?
            .next()
            .await
            .context("failed to read the row")?
            .context("no row returned")?;

        let value = row.get::<u64>(0).context("failed to read user_version value")?;

        usize::try_from(value).context("user_version does not fit in usize")
    }

    async fn update_user_version(&self, value: usize) -> anyhow::Result<()> {
        let value = u64::try_from(value).context("migration id does not fit in u64")?;

        self.conn
            .execute(&format!("PRAGMA user_version = {value}"), ())
            .await
            .context("failed to execute SQL query")?;

        Ok(())
    }
}

#[async_trait]
impl CaptureStore for LibSqlCaptureStore {
    async fn setup(&self) -> anyhow::Result<()> {
        self.apply_pragmas().await?;
        self.migrate().await?;
        Ok(())
    }

    async fn insert_event(&self, record: EventRecord) -> anyhow::Result<()> {
        self.conn
            .execute("BEGIN IMMEDIATE", ())
            .await
            .context("failed to begin transaction")?;

        let sql_query = "INSERT INTO events
            (id, timestamp_ms, service, event_type, session_id, source_ip, source_port,
             country, risk_score, risk_level, event_data_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

        let params = (
            record.id,
            timestamp_to_ms(record.timestamp),
            record.service.clone(),
            record.event_type.clone(),
            record.session_id.map(|id| id.as_bytes().to_vec()),
            record.source_ip.clone(),
            i64::from(record.source_port),
            record.country.clone(),
            i64::from(record.risk_score),
            record.risk_level.clone(),
            record.event_data_json.clone(),
        );

        match self.conn.execute(sql_query, params).await {
            Ok(_) => {
                self.conn.execute("COMMIT", ()).await.context("failed to commit transaction")?;
                Ok(())
            }
            Err(e) => {
                let _ = self.conn.execute("ROLLBACK", ()).await;
                Err(e).context("failed to insert event")
            }
        }
    }

    async fn list_events(&self, filter: EventFilter) -> anyhow::Result<(Vec<EventRecord>, u64)> {
        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();

        if let Some(service) = &filter.service {
            where_clauses.push("service = ?".to_owned());
            params.push(libsql::Value::from(service.clone()));
        }
        if let Some(from) = filter.from {
            where_clauses.push("timestamp_ms >= ?".to_owned());
            params.push(libsql::Value::from(timestamp_to_ms(from)));
        }
        if let Some(to) = filter.to {
            where_clauses.push("timestamp_ms <= ?".to_owned());
            params.push(libsql::Value::from(timestamp_to_ms(to)));
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_query = format!("SELECT COUNT(*) FROM events {where_sql}");
        let total: i64 = self
            .conn
            .query(&count_query, params.clone())
            .await
            .context("failed to count events")?
            .next()
            .await
            .context("failed to read count row")?
            .context("no count row returned")?
            .get(0)
            .context("failed to read count value")?;

        let mut select_params = params;
        select_params.push(libsql::Value::from(i64::from(filter.limit)));
        select_params.push(libsql::Value::from(i64::from(filter.offset)));

        let select_query = format!(
            "SELECT id, timestamp_ms, service, event_type, session_id, source_ip, source_port,
                    country, risk_score, risk_level, event_data_json
             FROM events {where_sql}
             ORDER BY timestamp_ms DESC
             LIMIT ? OFFSET ?"
        );

        let mut rows = self
            .conn
            .query(&select_query, select_params)
            .await
            .context("failed to list events")?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.context("failed to read event row")? {
            events.push(row_to_event(&row)?);
        }

        Ok((events, u64::try_from(total).unwrap_or(0)))
    }

    async fn stats(&self, now: OffsetDateTime) -> anyhow::Result<Stats> {
        let total_events: i64 = self
            .conn
            .query("SELECT COUNT(*) FROM events", ())
            .await
            .context("failed to count total events")?
            .next()
            .await
            .context("failed to read row")?
            .context("no row returned")?
            .get(0)
            .context("failed to read value")?;

        let day_ago_ms = timestamp_to_ms(now - time::Duration::hours(24));

        let unique_sources_24h: i64 = self
            .conn
            .query(
                "SELECT COUNT(DISTINCT source_ip) FROM events WHERE timestamp_ms >= ?",
                (day_ago_ms,),
            )
            .await
            .context("failed to count unique sources")?
            .next()
            .await
            .context("failed to read row")?
            .context("no row returned")?
            .get(0)
            .context("failed to read value")?;

        let mut events_by_service = HashMap::new();
        let mut rows = self
            .conn
            .query("SELECT service, COUNT(*) FROM events GROUP BY service", ())
            .await
            .context("failed to aggregate by service")?;
        while let Some(row) = rows.next().await.context("failed to read row")? {
            let service: String = row.get(0).context("failed to read service")?;
            let count: i64 = row.get(1).context("failed to read count")?;
            events_by_service.insert(service, count);
        }

        let mut events_per_hour = Vec::new();
        let mut rows = self
            .conn
            .query(
                "SELECT (timestamp_ms / 3600000) * 3600000 AS hour_ms, COUNT(*)
                 FROM events
                 WHERE timestamp_ms >= ?
                 GROUP BY hour_ms
                 ORDER BY hour_ms ASC",
                (day_ago_ms,),
            )
            .await
            .context("failed to aggregate events per hour")?;
        while let Some(row) = rows.next().await.context("failed to read row")? {
            let hour_ms: i64 = row.get(0).context("failed to read hour")?;
            let count: i64 = row.get(1).context("failed to read count")?;
            events_per_hour.push(HourCount {
                hour: ms_to_timestamp(hour_ms),
                count,
            });
        }

        let mut top_sources = Vec::new();
        let mut rows = self
            .conn
            .query(
                "SELECT source_ip, COUNT(*) AS cnt FROM events GROUP BY source_ip ORDER BY cnt DESC LIMIT 5",
                (),
            )
            .await
            .context("failed to aggregate top sources")?;
        while let Some(row) = rows.next().await.context("failed to read row")? {
            let source_ip: String = row.get(0).context("failed to read source_ip")?;
            let count: i64 = row.get(1).context("failed to read count")?;
            top_sources.push(SourceCount { source_ip, count });
        }

        Ok(Stats {
            total_events,
            unique_sources_24h,
            events_by_service,
            events_per_hour,
            top_sources,
        })
    }

    async fn insert_file_capture(&self, record: FileCaptureRecord) -> anyhow::Result<()> {
        let sql_query = "INSERT OR IGNORE INTO file_captures
            (sha256, original_filename, size, content_type, stored_path, created_at_ms)
            VALUES (?, ?, ?, ?, ?, ?)";

        let params = (
            record.sha256.clone(),
            record.original_filename.clone(),
            i64::try_from(record.size).unwrap_or(i64::MAX),
            record.content_type.clone(),
            record.stored_path.clone(),
            timestamp_to_ms(record.created_at),
        );

        self.conn
            .execute(sql_query, params)
            .await
            .context("failed to insert file capture")?;

        Ok(())
    }

    async fn list_file_captures(&self) -> anyhow::Result<Vec<FileCaptureRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT sha256, original_filename, size, content_type, stored_path, created_at_ms
                 FROM file_captures
                 ORDER BY created_at_ms DESC",
                (),
            )
            .await
            .context("failed to list file captures")?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.context("failed to read row")? {
            records.push(row_to_file_capture(&row)?);
        }

        Ok(records)
    }

    async fn get_file_capture(&self, sha256: &str) -> anyhow::Result<Option<FileCaptureRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT sha256, original_filename, size, content_type, stored_path, created_at_ms
                 FROM file_captures
                 WHERE sha256 = ?",
                (sha256,),
            )
            .await
            .context("failed to query file capture")?;

        match rows.next().await.context("failed to read row")? {
            Some(row) => Ok(Some(row_to_file_capture(&row)?)),
            None => Ok(None),
        }
    }
}

fn row_to_event(row: &libsql::Row) -> anyhow::Result<EventRecord> {
    let id: i64 = row.get(0).context("failed to read id")?;
    let timestamp_ms: i64 = row.get(1).context("failed to read timestamp_ms")?;
    let service: String = row.get(2).context("failed to read service")?;
    let event_type: String = row.get(3).context("failed to read event_type")?;
    let session_id_blob: Option<Vec<u8>> = row.get(4).context("failed to read session_id")?;
    let source_ip: String = row.get(5).context("failed to read source_ip")?;
    let source_port: i64 = row.get(6).context("failed to read source_port")?;
    let country: Option<String> = row.get(7).context("failed to read country")?;
    let risk_score: i64 = row.get(8).context("failed to read risk_score")?;
    let risk_level: String = row.get(9).context("failed to read risk_level")?;
    let event_data_json: String = row.get(10).context("failed to read event_data_json")?;

    let session_id = session_id_blob
        .map(|blob| -> anyhow::Result<Uuid> {
            let bytes: [u8; 16] = blob.try_into().map_err(|_| anyhow::anyhow!("session_id must be 16 bytes"))?;
            Ok(Uuid::from_bytes(bytes))
        })
        .transpose()?;

    Ok(EventRecord {
        id,
        timestamp: ms_to_timestamp(timestamp_ms),
        service,
        event_type,
        session_id,
        source_ip,
        source_port: u16::try_from(source_port).unwrap_or(0),
        country,
        risk_score: i32::try_from(risk_score).unwrap_or(0),
        risk_level,
        event_data_json,
    })
}

fn row_to_file_capture(row: &libsql::Row) -> anyhow::Result<FileCaptureRecord> {
    let sha256: String = row.get(0).context("failed to read sha256")?;
    let original_filename: String = row.get(1).context("failed to read original_filename")?;
    let size: i64 = row.get(2).context("failed to read size")?;
    let content_type: String = row.get(3).context("failed to read content_type")?;
    let stored_path: String = row.get(4).context("failed to read stored_path")?;
    let created_at_ms: i64 = row.get(5).context("failed to read created_at_ms")?;

    Ok(FileCaptureRecord {
        sha256,
        original_filename,
        size: u64::try_from(size).unwrap_or(0),
        content_type,
        stored_path,
        created_at: ms_to_timestamp(created_at_ms),
    })
}

fn timestamp_to_ms(ts: OffsetDateTime) -> i64 {
    i64::try_from(ts.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

fn ms_to_timestamp(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
