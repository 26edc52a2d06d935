//! Resource repository
//!
//! Storage for the gate's path-prefix flag table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::db::{DynDatabasePool, LastInsertId};
use crate::models::Resource;

const RESOURCE_COLUMNS: &str =
    "id, name, path_prefix, parent_id, is_active, description, created_at, updated_at";

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn create(&self, resource: &Resource) -> Result<Resource>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Resource>>;

    async fn get_by_prefix(&self, path_prefix: &str) -> Result<Option<Resource>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Resource>>;

    /// All resources, parents before children
    async fn list(&self) -> Result<Vec<Resource>>;

    async fn update(&self, resource: &Resource) -> Result<Resource>;

    /// Delete a resource and its children. Returns false if it did not exist.
    async fn delete(&self, id: i64) -> Result<bool>;

    async fn count_children(&self, id: i64) -> Result<i64>;
}

pub struct SqlxResourceRepository {
    pool: DynDatabasePool,
}

impl SqlxResourceRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ResourceRepository> {
        Arc::new(Self::new(pool))
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> Result<Option<Resource>> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE {column} = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Resource>(&sql)
                .bind(value)
                .fetch_optional(db)
                .await
                .with_context(|| format!("Failed to get resource by {}", column))
        })
    }
}

#[async_trait]
impl ResourceRepository for SqlxResourceRepository {
    async fn create(&self, resource: &Resource) -> Result<Resource> {
        let now = Utc::now();
        let id = dispatch!(self.pool, |db| {
            sqlx::query(
                r#"
                INSERT INTO resources (name, path_prefix, parent_id, is_active, description, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&resource.name)
            .bind(&resource.path_prefix)
            .bind(resource.parent_id)
            .bind(resource.is_active)
            .bind(&resource.description)
            .bind(now)
            .bind(now)
            .execute(db)
            .await
            .map(|r| r.last_id())
            .context("Failed to create resource")
        })?;

        Ok(Resource {
            id,
            created_at: now,
            updated_at: now,
            ..resource.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Resource>> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Resource>(&sql)
                .bind(id)
                .fetch_optional(db)
                .await
                .context("Failed to get resource")
        })
    }

    async fn get_by_prefix(&self, path_prefix: &str) -> Result<Option<Resource>> {
        self.fetch_one_by("path_prefix", path_prefix).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Resource>> {
        self.fetch_one_by("name", name).await
    }

    async fn list(&self) -> Result<Vec<Resource>> {
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources ORDER BY CASE WHEN parent_id IS NULL THEN 0 ELSE 1 END, path_prefix"
        );
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Resource>(&sql)
                .fetch_all(db)
                .await
                .context("Failed to list resources")
        })
    }

    async fn update(&self, resource: &Resource) -> Result<Resource> {
        let now = Utc::now();
        dispatch!(self.pool, |db| {
            sqlx::query(
                r#"
                UPDATE resources
                SET name = ?, path_prefix = ?, is_active = ?, description = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&resource.name)
            .bind(&resource.path_prefix)
            .bind(resource.is_active)
            .bind(&resource.description)
            .bind(now)
            .bind(resource.id)
            .execute(db)
            .await
            .map(|_| ())
            .context("Failed to update resource")
        })?;

        Ok(Resource {
            updated_at: now,
            ..resource.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            sqlx::query("DELETE FROM resources WHERE parent_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete child resources")?;
            let affected = sqlx::query("DELETE FROM resources WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete resource")?
                .rows_affected();
            tx.commit().await.context("Failed to commit resource delete")?;
            Ok(affected > 0)
        })
    }

    async fn count_children(&self, id: i64) -> Result<i64> {
        dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM resources WHERE parent_id = ?")
                .bind(id)
                .fetch_one(db)
                .await
                .context("Failed to count child resources")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::setup_pool;

    fn resource(name: &str, prefix: &str, parent_id: Option<i64>) -> Resource {
        let now = Utc::now();
        Resource {
            id: 0,
            name: name.to_string(),
            path_prefix: prefix.to_string(),
            parent_id,
            is_active: true,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let repo = SqlxResourceRepository::new(setup_pool().await);
        let social = repo.create(&resource("social", "/social", None)).await.unwrap();

        assert!(social.id > 0);
        assert_eq!(repo.get_by_prefix("/social").await.unwrap().unwrap().id, social.id);
        assert_eq!(repo.get_by_name("social").await.unwrap().unwrap().id, social.id);
        assert!(repo.get_by_prefix("/wiki").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_puts_parents_first() {
        let repo = SqlxResourceRepository::new(setup_pool().await);
        let social = repo.create(&resource("social", "/social", None)).await.unwrap();
        repo.create(&resource("posts", "/social/posts", Some(social.id))).await.unwrap();
        repo.create(&resource("wiki", "/wiki", None)).await.unwrap();

        let all = repo.list().await.unwrap();
        let names: Vec<_> = all.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["social", "wiki", "posts"]);
    }

    #[tokio::test]
    async fn test_update_flag() {
        let repo = SqlxResourceRepository::new(setup_pool().await);
        let mut wiki = repo.create(&resource("wiki", "/wiki", None)).await.unwrap();

        wiki.is_active = false;
        repo.update(&wiki).await.unwrap();
        assert!(!repo.get_by_id(wiki.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_delete_removes_children() {
        let repo = SqlxResourceRepository::new(setup_pool().await);
        let social = repo.create(&resource("social", "/social", None)).await.unwrap();
        repo.create(&resource("posts", "/social/posts", Some(social.id))).await.unwrap();
        assert_eq!(repo.count_children(social.id).await.unwrap(), 1);

        assert!(repo.delete(social.id).await.unwrap());
        assert!(repo.list().await.unwrap().is_empty());
        assert!(!repo.delete(social.id).await.unwrap());
    }
}
