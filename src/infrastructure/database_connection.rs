// Database connection and pool management
// This module handles SQLite database connections using sqlx

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // Create database file directory if it doesn't exist
        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };
        let db_path = db_path.split('?').next().unwrap_or(db_path);

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating database directory for {db_path}"))?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)
                    .with_context(|| format!("creating database file {db_path}"))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .with_context(|| format!("connecting to {database_url}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_sources_sql = r#"
            CREATE TABLE IF NOT EXISTS content_sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                base_url TEXT NOT NULL,
                search_url TEXT,
                find_rule TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                order_key INTEGER NOT NULL DEFAULT 0,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#;

        let create_order_index_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_content_sources_order_key
            ON content_sources (order_key)
        "#;

        sqlx::query(create_sources_sql)
            .execute(&self.pool)
            .await
            .context("creating content_sources table")?;
        sqlx::query(create_order_index_sql)
            .execute(&self.pool)
            .await
            .context("creating content_sources order index")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn creates_database_file_and_schema() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("sources.db");
        let url = format!("sqlite:{}?mode=rwc", db_path.display());

        let connection = DatabaseConnection::new(&url, 2).await.expect("connect");
        connection.migrate().await.expect("migrate");
        assert!(db_path.exists());

        // Migration is idempotent.
        connection.migrate().await.expect("second migrate");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM content_sources")
            .fetch_one(connection.pool())
            .await
            .expect("count");
        assert_eq!(count.0, 0);
    }
}
