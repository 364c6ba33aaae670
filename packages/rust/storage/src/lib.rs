//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding every classified
//! item. It implements [`ItemStore`] for the pipeline.
//!
//! **Access rules:**
//! - `sieve run`: read-write via [`Storage::open`]
//! - `sieve report`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use libsql::{Connection, Database, Rows, params};
use sieve_shared::{InterestLevel, Item, ItemId, ItemStore, Result, SieveError};

const SELECT_ITEM_COLUMNS: &str = "SELECT id, source, title, link, description, content, summary, \
     interest_level, reason, thought, published_at FROM items";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SieveError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SieveError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        SieveError::Storage(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SieveError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Item operations
    // -----------------------------------------------------------------------

    /// Fetch one item by identity.
    pub async fn get_item(&self, id: &ItemId) -> Result<Option<Item>> {
        let mut rows = self
            .conn
            .query(
                &format!("{SELECT_ITEM_COLUMNS} WHERE id = ?1"),
                params![id.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_item(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Number of stored items per interest level.
    pub async fn count_by_level(&self) -> Result<BTreeMap<InterestLevel, u64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT interest_level, COUNT(*) FROM items GROUP BY interest_level",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let level: String = row.get(0).map_err(storage_err)?;
            let count: i64 = row.get(1).map_err(storage_err)?;
            match level.parse::<InterestLevel>() {
                Ok(level) => {
                    counts.insert(level, count as u64);
                }
                Err(_) => tracing::warn!(level = %level, "unknown interest level in database"),
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl ItemStore for Storage {
    async fn exists(&self, id: &ItemId) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM items WHERE id = ?1", params![id.as_str()])
            .await
            .map_err(storage_err)?;

        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }

    async fn save_item(&self, item: &Item) -> Result<()> {
        self.check_writable()?;
        let level = item.interest_level.ok_or_else(|| {
            SieveError::validation(format!("item {} has no interest level", item.id))
        })?;

        self.conn
            .execute(
                "INSERT INTO items (id, source, title, link, description, content, summary,
                                    interest_level, reason, thought, published_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                   source = excluded.source,
                   title = excluded.title,
                   link = excluded.link,
                   description = excluded.description,
                   content = excluded.content,
                   summary = excluded.summary,
                   interest_level = excluded.interest_level,
                   reason = excluded.reason,
                   thought = excluded.thought,
                   published_at = excluded.published_at",
                params![
                    item.id.as_str(),
                    item.source.as_str(),
                    item.title.as_str(),
                    item.link.as_str(),
                    item.description.as_str(),
                    item.content.as_deref(),
                    item.summary.as_deref(),
                    level.as_str(),
                    item.reason.as_str(),
                    item.thought.as_deref(),
                    format_timestamp(&item.published_at),
                ],
            )
            .await
            .map_err(storage_err)?;

        tracing::debug!(id = %item.id, level = %level, "saved item");
        Ok(())
    }

    fn all_items(&self) -> BoxStream<'_, Result<Item>> {
        let conn = self.conn.clone();
        let query = async move {
            conn.query(
                &format!(
                    "{SELECT_ITEM_COLUMNS} WHERE interest_level != ?1 \
                     ORDER BY published_at DESC"
                ),
                params![InterestLevel::Exclude.as_str()],
            )
            .await
            .map_err(storage_err)
        };

        stream::once(query)
            .flat_map(|result| match result {
                Ok(rows) => row_stream(rows).boxed(),
                Err(e) => stream::iter([Err(e)]).boxed(),
            })
            .boxed()
    }
}

/// Lazily pull rows off a cursor. The first error ends the stream.
fn row_stream(rows: Rows) -> impl futures::Stream<Item = Result<Item>> + Send {
    stream::unfold(Some(rows), |state| async move {
        let mut rows = state?;
        match rows.next().await {
            Ok(Some(row)) => Some((row_to_item(&row), Some(rows))),
            Ok(None) => None,
            Err(e) => Some((Err(storage_err(e)), None)),
        }
    })
}

fn storage_err(e: libsql::Error) -> SieveError {
    SieveError::Storage(e.to_string())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Convert a database row to an [`Item`].
fn row_to_item(row: &libsql::Row) -> Result<Item> {
    Ok(Item {
        id: ItemId::from_hex(row.get::<String>(0).map_err(storage_err)?),
        source: row.get::<String>(1).map_err(storage_err)?,
        title: row.get::<String>(2).map_err(storage_err)?,
        link: row.get::<String>(3).map_err(storage_err)?,
        description: row.get::<String>(4).unwrap_or_default(),
        content: row.get::<String>(5).ok(),
        summary: row.get::<String>(6).ok(),
        interest_level: {
            let level: String = row.get(7).map_err(storage_err)?;
            Some(level.parse()?)
        },
        reason: row.get::<String>(8).unwrap_or_default(),
        thought: row.get::<String>(9).ok(),
        published_at: {
            let s: String = row.get(10).map_err(storage_err)?;
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| SieveError::Storage(format!("invalid date: {e}")))?
        },
    })
}
