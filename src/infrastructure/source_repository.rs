//! SQLite-backed source repository
//!
//! Stores `ContentSource` rows with tags as a JSON text column. Reads go
//! through a single `row_to_source` mapping helper; writes use
//! INSERT OR REPLACE keyed on the source id.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::domain::repositories::SourceRepository;
use crate::domain::source::ContentSource;

pub struct SqliteSourceRepository {
    pool: SqlitePool,
}

impl SqliteSourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of stored sources.
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_sources")
            .fetch_one(&self.pool)
            .await
            .context("counting content sources")?;
        Ok(count as u64)
    }
}

fn row_to_source(row: &SqliteRow) -> Result<ContentSource> {
    let tags_json: String = row.try_get("tags")?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags_json)
        .with_context(|| format!("decoding tags column: {tags_json}"))?;
    Ok(ContentSource {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        base_url: row.try_get("base_url")?,
        search_url: row.try_get("search_url")?,
        find_rule: row.try_get("find_rule")?,
        tags,
        order_key: row.try_get("order_key")?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl SourceRepository for SqliteSourceRepository {
    async fn list_all(&self) -> Result<Vec<ContentSource>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, base_url, search_url, find_rule, tags,
                   order_key, enabled, created_at, updated_at
            FROM content_sources
            ORDER BY order_key ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("listing content sources")?;

        rows.iter().map(row_to_source).collect()
    }

    async fn upsert(&self, source: &ContentSource) -> Result<()> {
        let tags_json =
            serde_json::to_string(&source.tags).context("encoding tags column")?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO content_sources
                (id, name, base_url, search_url, find_rule, tags,
                 order_key, enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&source.id)
        .bind(&source.name)
        .bind(&source.base_url)
        .bind(&source.search_url)
        .bind(&source.find_rule)
        .bind(tags_json)
        .bind(source.order_key)
        .bind(source.enabled)
        .bind(source.created_at)
        .bind(source.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting content source {}", source.id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::source::INVALID_SOURCE_TAG;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use tempfile::tempdir;

    async fn test_repository() -> (tempfile::TempDir, SqliteSourceRepository) {
        let dir = tempdir().expect("tempdir");
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
        let connection = DatabaseConnection::new(&url, 2).await.expect("connect");
        connection.migrate().await.expect("migrate");
        let repository = SqliteSourceRepository::new(connection.pool().clone());
        (dir, repository)
    }

    fn sample(id: &str, order_key: i64) -> ContentSource {
        let mut source = ContentSource::new(id, format!("Source {id}"), "https://example.com");
        source.search_url = Some("https://example.com/s?q={keyword}".into());
        source.order_key = order_key;
        source
    }

    #[tokio::test]
    async fn upsert_then_list_round_trips_all_fields() {
        let (_dir, repository) = test_repository().await;
        let mut source = sample("src-a", 3);
        source.find_rule = Some("<js>baseUrl + '/top'<map>".into());
        source.add_tag("fiction");
        source.add_tag(INVALID_SOURCE_TAG);
        source.enabled = false;

        repository.upsert(&source).await.expect("upsert");
        let listed = repository.list_all().await.expect("list");
        assert_eq!(listed.len(), 1);
        let stored = &listed[0];
        assert_eq!(stored.id, "src-a");
        assert_eq!(stored.find_rule.as_deref(), Some("<js>baseUrl + '/top'<map>"));
        assert!(stored.has_tag("fiction"));
        assert!(stored.has_tag(INVALID_SOURCE_TAG));
        assert!(!stored.enabled);
        assert_eq!(stored.order_key, 3);
        assert_eq!(stored.created_at.timestamp(), source.created_at.timestamp());
    }

    #[tokio::test]
    async fn replace_updates_the_stored_row() {
        let (_dir, repository) = test_repository().await;
        let mut source = sample("src-a", 1);
        repository.upsert(&source).await.expect("insert");

        source.mark_invalid(INVALID_SOURCE_TAG, 10_004);
        repository.upsert(&source).await.expect("replace");

        let listed = repository.list_all().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].has_tag(INVALID_SOURCE_TAG));
        assert_eq!(listed[0].order_key, 10_004);
    }

    #[tokio::test]
    async fn list_orders_by_order_key_then_id() {
        let (_dir, repository) = test_repository().await;
        repository.upsert(&sample("src-b", 2)).await.expect("b");
        repository.upsert(&sample("src-c", 1)).await.expect("c");
        repository.upsert(&sample("src-a", 2)).await.expect("a");

        let ids: Vec<String> = repository
            .list_all()
            .await
            .expect("list")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["src-c", "src-a", "src-b"]);
    }

    #[tokio::test]
    async fn count_tracks_inserts() {
        let (_dir, repository) = test_repository().await;
        assert_eq!(repository.count().await.expect("empty"), 0);
        repository.upsert(&sample("src-a", 0)).await.expect("a");
        repository.upsert(&sample("src-b", 0)).await.expect("b");
        repository.upsert(&sample("src-b", 9)).await.expect("replace");
        assert_eq!(repository.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn corrupt_tags_column_surfaces_an_error() {
        let (_dir, repository) = test_repository().await;
        sqlx::query(
            "INSERT INTO content_sources (id, name, base_url, tags) VALUES ('x', 'X', 'u', 'not json')",
        )
        .execute(&repository.pool)
        .await
        .expect("raw insert");

        assert!(repository.list_all().await.is_err());
    }
}
