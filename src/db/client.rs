use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::models::*;
use crate::db::{MetadataStore, MetadataStoreError};

/// Tables the store accepts inserts for, and whether they carry `updated_at`
const KNOWN_TABLES: &[(&str, bool)] = &[
    (TRACKS_TABLE, true),
    (TRACK_TAGS_TABLE, false),
    (TUTORIALS_TABLE, true),
];

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database connection and create tables
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Private in-memory database (single connection, so every query sees the same data)
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                audio_url TEXT NOT NULL,
                cover_url TEXT,
                is_public BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Tags go away with their track
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS track_tags (
                id TEXT PRIMARY KEY,
                track_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (track_id) REFERENCES tracks (id) ON DELETE CASCADE,
                UNIQUE(track_id, tag)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tutorials (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                category TEXT NOT NULL,
                video_url TEXT NOT NULL,
                thumbnail_url TEXT,
                duration INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_user_id ON tracks (user_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_track_tags_track_id ON track_tags (track_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get a single track by ID
    pub async fn get_track_by_id(&self, track_id: &str) -> Result<Option<DbTrack>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM tracks WHERE id = ?")
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(DbTrack {
                id: row.get("id"),
                user_id: row.get("user_id"),
                title: row.get("title"),
                description: row.get("description"),
                audio_url: row.get("audio_url"),
                cover_url: row.get("cover_url"),
                is_public: row.get("is_public"),
                created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
                updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
            })),
            None => Ok(None),
        }
    }

    /// Get tags for a track, alphabetically
    pub async fn get_tags_for_track(&self, track_id: &str) -> Result<Vec<DbTrackTag>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM track_tags WHERE track_id = ? ORDER BY tag")
            .bind(track_id)
            .fetch_all(&self.pool)
            .await?;

        let mut tags = Vec::new();
        for row in rows {
            tags.push(DbTrackTag {
                id: row.get("id"),
                track_id: row.get("track_id"),
                tag: row.get("tag"),
                created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            });
        }

        Ok(tags)
    }

    /// Get a single tutorial by ID
    pub async fn get_tutorial_by_id(
        &self,
        tutorial_id: &str,
    ) -> Result<Option<DbTutorial>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM tutorials WHERE id = ?")
            .bind(tutorial_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(DbTutorial {
                id: row.get("id"),
                user_id: row.get("user_id"),
                title: row.get("title"),
                description: row.get("description"),
                category: row.get("category"),
                video_url: row.get("video_url"),
                thumbnail_url: row.get("thumbnail_url"),
                duration: row.get("duration"),
                created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
                updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
            })),
            None => Ok(None),
        }
    }

    /// Number of rows in a known table (for verification)
    pub async fn count_rows(&self, table: &str) -> Result<i64, MetadataStoreError> {
        let table = known_table(table)?.0;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait::async_trait]
impl MetadataStore for Database {
    async fn insert(
        &self,
        table: &str,
        mut record: Record,
    ) -> Result<StoredRecord, MetadataStoreError> {
        let (table, has_updated_at) = known_table(table)?;
        for column in record.keys() {
            validate_column(column)?;
        }

        let id = match record.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            None | Some(Value::Null) => {
                let id = Uuid::new_v4().to_string();
                record.insert("id".to_string(), Value::String(id.clone()));
                id
            }
            Some(other) => {
                return Err(MetadataStoreError::InvalidColumn(format!(
                    "id must be a non-empty string, got {}",
                    other
                )))
            }
        };

        let now = Utc::now().to_rfc3339();
        stamp_if_missing(&mut record, "created_at", &now);
        if has_updated_at {
            stamp_if_missing(&mut record, "updated_at", &now);
        }

        let columns: Vec<&str> = record.keys().map(String::as_str).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for value in record.values() {
            query = bind_value(query, value);
        }
        query.execute(&self.pool).await?;

        debug!(table, id = %id, "Inserted record");
        Ok(StoredRecord { id, record })
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), MetadataStoreError> {
        let table = known_table(table)?.0;
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", table))
            .bind(id)
            .execute(&self.pool)
            .await?;

        debug!(table, id, "Deleted record");
        Ok(())
    }
}

fn known_table(table: &str) -> Result<(&'static str, bool), MetadataStoreError> {
    KNOWN_TABLES
        .iter()
        .find(|(name, _)| *name == table)
        .copied()
        .ok_or_else(|| MetadataStoreError::UnknownTable(table.to_string()))
}

/// Column names are interpolated into SQL, so only plain identifiers pass
fn validate_column(column: &str) -> Result<(), MetadataStoreError> {
    let mut chars = column.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(MetadataStoreError::InvalidColumn(column.to_string()))
    }
}

fn stamp_if_missing(record: &mut Record, column: &str, now: &str) {
    if matches!(record.get(column), None | Some(Value::Null)) {
        record.insert(column.to_string(), Value::String(now.to_string()));
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        // Nested values are kept as JSON text
        other => query.bind(other.to_string()),
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn insert_track(db: &Database) -> StoredRecord {
        db.insert(
            TRACKS_TABLE,
            record(json!({
                "title": "Night Drive",
                "description": null,
                "audio_url": "https://example.com/tracks/u/1.flac",
                "cover_url": null,
                "user_id": "user-1",
                "is_public": true,
            })),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_timestamps() {
        let db = Database::in_memory().await.unwrap();

        let stored = insert_track(&db).await;

        assert!(Uuid::parse_str(&stored.id).is_ok());
        assert!(stored.record.contains_key("created_at"));
        assert!(stored.record.contains_key("updated_at"));

        let track = db.get_track_by_id(&stored.id).await.unwrap().unwrap();
        assert_eq!(track.title, "Night Drive");
        assert_eq!(track.audio_url, "https://example.com/tracks/u/1.flac");
        assert_eq!(track.cover_url, None);
        assert!(track.is_public);
    }

    #[tokio::test]
    async fn test_insert_keeps_caller_id() {
        let db = Database::in_memory().await.unwrap();
        let mut rec = record(json!({
            "title": "Intro",
            "audio_url": "u",
            "user_id": "user-1",
            "is_public": false,
        }));
        rec.insert("id".to_string(), json!("fixed-id"));

        let stored = db.insert(TRACKS_TABLE, rec).await.unwrap();

        assert_eq!(stored.id, "fixed-id");
        assert!(db.get_track_by_id("fixed-id").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_cascades_tags() {
        let db = Database::in_memory().await.unwrap();
        let track = insert_track(&db).await;

        for tag in ["trap", "dark"] {
            db.insert(
                TRACK_TAGS_TABLE,
                record(json!({ "track_id": track.id, "tag": tag })),
            )
            .await
            .unwrap();
        }
        let tags = db.get_tags_for_track(&track.id).await.unwrap();
        assert_eq!(
            tags.iter().map(|t| t.tag.as_str()).collect::<Vec<_>>(),
            vec!["dark", "trap"]
        );

        db.delete(TRACKS_TABLE, &track.id).await.unwrap();

        assert!(db.get_track_by_id(&track.id).await.unwrap().is_none());
        assert_eq!(db.count_rows(TRACK_TAGS_TABLE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_unknown_table_and_bad_columns() {
        let db = Database::in_memory().await.unwrap();

        let result = db.insert("users", Record::new()).await;
        assert!(matches!(result, Err(MetadataStoreError::UnknownTable(_))));

        let result = db
            .insert(
                TRACKS_TABLE,
                record(json!({ "title; DROP TABLE tracks": "x" })),
            )
            .await;
        assert!(matches!(result, Err(MetadataStoreError::InvalidColumn(_))));
    }

    #[tokio::test]
    async fn test_constraint_violation_is_database_error() {
        let db = Database::in_memory().await.unwrap();

        // audio_url is NOT NULL
        let result = db
            .insert(
                TRACKS_TABLE,
                record(json!({ "title": "x", "user_id": "u", "is_public": true })),
            )
            .await;

        assert!(matches!(result, Err(MetadataStoreError::Database(_))));
        assert_eq!(db.count_rows(TRACKS_TABLE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tutorial_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let stored = db
            .insert(
                TUTORIALS_TABLE,
                record(json!({
                    "title": "Sidechain basics",
                    "description": "Ducking pads under the kick",
                    "category": "mixing",
                    "video_url": "v",
                    "thumbnail_url": "t",
                    "user_id": "user-1",
                    "duration": 0,
                })),
            )
            .await
            .unwrap();

        let tutorial = db.get_tutorial_by_id(&stored.id).await.unwrap().unwrap();
        assert_eq!(tutorial.category, "mixing");
        assert_eq!(tutorial.thumbnail_url.as_deref(), Some("t"));
        assert_eq!(tutorial.duration, 0);
    }
}
