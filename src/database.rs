use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Row without an id for table {0}")]
    MissingId(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {} line {line}: {source}", path.display())]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// SQLite store whose tables grow columns as new fields show up.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database file, creating it and its parent directory if needed.
    pub async fn open(path: &Path) -> Result<Self, LoadError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LoadError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        info!("Opened database at {}", path.display());
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts or replaces `rows` in `table` inside one transaction, creating
    /// the table and any missing columns first. Returns the number of rows written.
    pub async fn upsert_rows(&self, table: &str, rows: &[Map<String, Value>]) -> Result<u64, LoadError> {
        validate_identifier(table)?;

        let mut columns: Vec<&str> = Vec::new();
        let mut seen = HashSet::new();
        for row in rows {
            match row.get("id") {
                Some(Value::String(id)) if !id.is_empty() => {}
                _ => return Err(LoadError::MissingId(table.to_string())),
            }
            for key in row.keys() {
                // SQLite column names are case-insensitive
                if seen.insert(key.to_lowercase()) {
                    validate_identifier(key)?;
                    columns.push(key.as_str());
                }
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" ("id" TEXT PRIMARY KEY)"#
        ))
        .execute(&mut *tx)
        .await?;

        let existing: HashSet<String> = sqlx::query(&format!(r#"PRAGMA table_info("{table}")"#))
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|r| r.get::<String, _>("name").to_lowercase())
            .collect();

        for column in columns
            .iter()
            .filter(|c| !existing.contains(&c.to_lowercase()))
        {
            let declared = column_type(rows, column);
            debug!("Adding column {}.{} {}", table, column, declared);
            sqlx::query(&format!(
                r#"ALTER TABLE "{table}" ADD COLUMN "{column}" {declared}"#
            ))
            .execute(&mut *tx)
            .await?;
        }

        let mut written = 0;
        for row in rows {
            let names: Vec<String> = row.keys().map(|k| format!(r#""{k}""#)).collect();
            let placeholders = vec!["?"; names.len()].join(", ");
            let sql = format!(
                r#"INSERT OR REPLACE INTO "{table}" ({}) VALUES ({placeholders})"#,
                names.join(", ")
            );

            let mut query = sqlx::query(&sql);
            for value in row.values() {
                query = bind_value(query, value);
            }
            written += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    pub async fn tables(&self) -> Result<Vec<String>, LoadError> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("name")).collect())
    }

    pub async fn count(&self, table: &str) -> Result<i64, LoadError> {
        validate_identifier(table)?;
        let row = sqlx::query(&format!(r#"SELECT COUNT(*) AS n FROM "{table}""#))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
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

/// Declared type from the first non-null value of `column`.
fn column_type(rows: &[Map<String, Value>], column: &str) -> &'static str {
    let first = rows
        .iter()
        .filter_map(|row| row.get(column))
        .find(|v| !v.is_null());

    match first {
        Some(Value::Bool(_)) => "INTEGER",
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => "INTEGER",
        Some(Value::Number(_)) => "REAL",
        Some(_) => "TEXT",
        None => "",
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<(), LoadError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(LoadError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    async fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("nested/oura.db")).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn creates_table_and_inserts_rows() {
        let (_dir, db) = open_temp().await;

        let written = db
            .upsert_rows(
                "daily_sleep",
                &[
                    row(json!({ "id": "a", "day": "2024-01-01", "score": 81 })),
                    row(json!({ "id": "b", "day": "2024-01-02", "score": 77 })),
                ],
            )
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(db.count("daily_sleep").await.unwrap(), 2);
        assert_eq!(db.tables().await.unwrap(), vec!["daily_sleep".to_string()]);
    }

    #[tokio::test]
    async fn reloading_replaces_instead_of_duplicating() {
        let (_dir, db) = open_temp().await;
        let rows = [row(json!({ "id": "a", "score": 81 }))];

        db.upsert_rows("daily_sleep", &rows).await.unwrap();
        db.upsert_rows("daily_sleep", &[row(json!({ "id": "a", "score": 90 }))])
            .await
            .unwrap();

        assert_eq!(db.count("daily_sleep").await.unwrap(), 1);
        let score: i64 = sqlx::query(r#"SELECT score FROM "daily_sleep" WHERE id = 'a'"#)
            .fetch_one(db.pool())
            .await
            .unwrap()
            .get("score");
        assert_eq!(score, 90);
    }

    #[tokio::test]
    async fn new_fields_add_columns() {
        let (_dir, db) = open_temp().await;

        db.upsert_rows("workout", &[row(json!({ "id": "w1", "activity": "walking" }))])
            .await
            .unwrap();
        db.upsert_rows(
            "workout",
            &[row(json!({ "id": "w2", "activity": "running", "distance": 5012.5 }))],
        )
        .await
        .unwrap();

        let distance: Option<f64> = sqlx::query(r#"SELECT distance FROM "workout" WHERE id = 'w1'"#)
            .fetch_one(db.pool())
            .await
            .unwrap()
            .get("distance");
        assert_eq!(distance, None);
        assert_eq!(db.count("workout").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn column_names_match_regardless_of_case() {
        let (_dir, db) = open_temp().await;

        db.upsert_rows("tag", &[row(json!({ "id": "a", "Text": "first" }))])
            .await
            .unwrap();
        db.upsert_rows("tag", &[row(json!({ "id": "b", "text": "second" }))])
            .await
            .unwrap();

        assert_eq!(db.count("tag").await.unwrap(), 2);
        let text: String = sqlx::query(r#"SELECT Text FROM "tag" WHERE id = 'b'"#)
            .fetch_one(db.pool())
            .await
            .unwrap()
            .get("Text");
        assert_eq!(text, "second");
    }

    #[tokio::test]
    async fn nested_values_are_stored_as_json_text() {
        let (_dir, db) = open_temp().await;

        db.upsert_rows(
            "enhanced_tag",
            &[row(json!({ "id": "t1", "custom": { "name": "coffee" }, "flag": true }))],
        )
        .await
        .unwrap();

        let stored = sqlx::query(r#"SELECT custom, flag FROM "enhanced_tag""#)
            .fetch_one(db.pool())
            .await
            .unwrap();
        let custom: String = stored.get("custom");
        let flag: i64 = stored.get("flag");
        assert_eq!(
            serde_json::from_str::<Value>(&custom).unwrap(),
            json!({ "name": "coffee" })
        );
        assert_eq!(flag, 1);
    }

    #[tokio::test]
    async fn rejects_unsafe_identifiers_and_missing_ids() {
        let (_dir, db) = open_temp().await;

        let err = db
            .upsert_rows("tag; DROP TABLE x", &[row(json!({ "id": "a" }))])
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidIdentifier(_)));

        let err = db
            .upsert_rows("tag", &[row(json!({ "id": "a", "bad column": 1 }))])
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidIdentifier(_)));

        let err = db
            .upsert_rows("tag", &[row(json!({ "text": "no id" }))])
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::MissingId(_)));
    }

    #[test]
    fn column_types_follow_first_non_null_value() {
        let rows = [
            row(json!({ "id": "a", "score": null, "ratio": 0.5, "label": "x" })),
            row(json!({ "id": "b", "score": 3, "ratio": 1 })),
        ];

        assert_eq!(column_type(&rows, "score"), "INTEGER");
        assert_eq!(column_type(&rows, "ratio"), "REAL");
        assert_eq!(column_type(&rows, "label"), "TEXT");
        assert_eq!(column_type(&rows, "missing"), "");
    }
}
