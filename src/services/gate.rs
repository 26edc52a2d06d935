//! Resource gate
//!
//! Administrators switch whole areas of the site on and off by path prefix.
//! Resources form two levels: a top-level resource (e.g. `/social`) and its
//! children (e.g. `/social/posts`). A child is only effectively active when
//! its parent is.
//!
//! The resolved table is read through the cache under [`GATE_CACHE_KEY`] and
//! rebuilt on a miss. Failures while loading it never block traffic: the
//! request is allowed and a warning is logged.

use crate::cache::{CacheLayer, SharedCache};
use crate::db::repositories::ResourceRepository;
use crate::models::{CreateResourceInput, Resource, UpdateResourceInput};
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const GATE_CACHE_KEY: &str = "gate:table";

/// Error types for gate administration
#[derive(Debug, thiserror::Error)]
pub enum GateServiceError {
    #[error("Resource not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Outcome of a gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// Blocked by the named resource
    Deny { resource: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Canonical form of a path prefix: leading `/`, no trailing `/`, no empty
/// segments. `None` for strings that cannot be a path prefix.
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.contains(|c: char| c.is_whitespace() || c == '?' || c == '#') {
        return None;
    }
    let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Some("/".to_string());
    }
    Some(format!("/{}", segments.join("/")))
}

/// Whether `path` falls under `prefix` on a segment boundary
pub fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEntry {
    pub prefix: String,
    pub resource: String,
    /// Own flag AND the parent's flag
    pub active: bool,
}

/// Resolved flag table, longest prefix first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateTable {
    entries: Vec<GateEntry>,
}

impl GateTable {
    pub fn build(resources: &[Resource]) -> Self {
        let by_id: HashMap<i64, &Resource> = resources.iter().map(|r| (r.id, r)).collect();

        let mut entries: Vec<GateEntry> = resources
            .iter()
            .filter_map(|resource| {
                let prefix = normalize_prefix(&resource.path_prefix)?;
                let parent_active = resource
                    .parent_id
                    .and_then(|id| by_id.get(&id))
                    .map_or(true, |parent| parent.is_active);
                Some(GateEntry {
                    prefix,
                    resource: resource.name.clone(),
                    active: resource.is_active && parent_active,
                })
            })
            .collect();

        entries.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()).then_with(|| a.prefix.cmp(&b.prefix)));
        Self { entries }
    }

    /// The longest matching prefix decides; unregistered paths are allowed
    pub fn check(&self, path: &str) -> GateDecision {
        let path = normalize_prefix(path).unwrap_or_else(|| path.to_string());
        match self.entries.iter().find(|e| matches_prefix(&path, &e.prefix)) {
            Some(entry) if !entry.active => GateDecision::Deny {
                resource: entry.resource.clone(),
            },
            _ => GateDecision::Allow,
        }
    }

    pub fn entries(&self) -> &[GateEntry] {
        &self.entries
    }
}

/// Gate checks and resource administration
pub struct GateService {
    repo: Arc<dyn ResourceRepository>,
    cache: SharedCache,
    cache_ttl: Duration,
}

impl GateService {
    pub fn new(repo: Arc<dyn ResourceRepository>, cache: SharedCache, cache_ttl: Duration) -> Self {
        Self { repo, cache, cache_ttl }
    }

    /// Decide whether `path` (relative to `/api/v1`) may be served
    pub async fn check(&self, path: &str) -> GateDecision {
        match self.table().await {
            Ok(table) => table.check(path),
            Err(e) => {
                tracing::warn!(path, "Gate lookup failed, allowing request: {e:#}");
                GateDecision::Allow
            }
        }
    }

    /// Cached table, rebuilt from the database on a miss
    pub async fn table(&self) -> anyhow::Result<GateTable> {
        if let Some(table) = self
            .cache
            .get::<GateTable>(GATE_CACHE_KEY)
            .await
            .context("Failed to read gate table from cache")?
        {
            return Ok(table);
        }

        let resources = self.repo.list().await.context("Failed to load resources")?;
        let table = GateTable::build(&resources);
        if let Err(e) = self.cache.set(GATE_CACHE_KEY, &table, self.cache_ttl).await {
            tracing::warn!("Failed to cache gate table: {e:#}");
        }
        tracing::debug!(entries = table.entries.len(), "Gate table rebuilt");
        Ok(table)
    }

    pub async fn list(&self) -> Result<Vec<Resource>, GateServiceError> {
        Ok(self.repo.list().await.context("Failed to list resources")?)
    }

    pub async fn get(&self, id: i64) -> Result<Resource, GateServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get resource")?
            .ok_or(GateServiceError::NotFound)
    }

    pub async fn create(&self, input: CreateResourceInput) -> Result<Resource, GateServiceError> {
        let name = validate_name(&input.name)?;
        let prefix = validate_prefix(&input.path_prefix)?;

        if let Some(parent_id) = input.parent_id {
            let parent = self
                .repo
                .get_by_id(parent_id)
                .await
                .context("Failed to get parent resource")?
                .ok_or_else(|| GateServiceError::ValidationError("Parent resource does not exist".to_string()))?;
            if !parent.is_top_level() {
                return Err(GateServiceError::ValidationError(
                    "Resources can only be nested one level deep".to_string(),
                ));
            }
            if !matches_prefix(&prefix, &parent.path_prefix) || prefix == parent.path_prefix {
                return Err(GateServiceError::ValidationError(format!(
                    "Prefix must lie under the parent prefix '{}'",
                    parent.path_prefix
                )));
            }
        }

        self.ensure_unique(&name, &prefix, None).await?;

        let now = Utc::now();
        let resource = Resource {
            id: 0,
            name,
            path_prefix: prefix,
            parent_id: input.parent_id,
            is_active: input.is_active,
            description: input.description,
            created_at: now,
            updated_at: now,
        };
        let created = self.repo.create(&resource).await.context("Failed to create resource")?;
        self.invalidate().await;
        tracing::info!(resource = %created.name, prefix = %created.path_prefix, "Resource created");
        Ok(created)
    }

    pub async fn update(&self, id: i64, input: UpdateResourceInput) -> Result<Resource, GateServiceError> {
        let mut resource = self.get(id).await?;

        if let Some(name) = input.name {
            resource.name = validate_name(&name)?;
        }
        if let Some(prefix) = input.path_prefix {
            let prefix = validate_prefix(&prefix)?;
            if prefix != resource.path_prefix {
                let children = self
                    .repo
                    .count_children(id)
                    .await
                    .context("Failed to count child resources")?;
                if children > 0 {
                    return Err(GateServiceError::Conflict(format!(
                        "Cannot move '{}' while it has {children} child resource(s)",
                        resource.name
                    )));
                }
            }
            if let Some(parent_id) = resource.parent_id {
                let parent = self.get(parent_id).await?;
                if !matches_prefix(&prefix, &parent.path_prefix) || prefix == parent.path_prefix {
                    return Err(GateServiceError::ValidationError(format!(
                        "Prefix must lie under the parent prefix '{}'",
                        parent.path_prefix
                    )));
                }
            }
            resource.path_prefix = prefix;
        }
        if let Some(active) = input.is_active {
            resource.is_active = active;
        }
        if input.description.is_some() {
            resource.description = input.description;
        }

        self.ensure_unique(&resource.name, &resource.path_prefix, Some(id)).await?;

        let updated = self.repo.update(&resource).await.context("Failed to update resource")?;
        self.invalidate().await;
        Ok(updated)
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<Resource, GateServiceError> {
        let resource = self
            .update(
                id,
                UpdateResourceInput {
                    is_active: Some(active),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(resource = %resource.name, active, "Resource toggled");
        Ok(resource)
    }

    /// Delete a resource; children of a top-level resource go with it
    pub async fn delete(&self, id: i64) -> Result<(), GateServiceError> {
        let children = self
            .repo
            .count_children(id)
            .await
            .context("Failed to count child resources")?;
        if !self.repo.delete(id).await.context("Failed to delete resource")? {
            return Err(GateServiceError::NotFound);
        }
        self.invalidate().await;
        tracing::info!(resource_id = id, children, "Resource deleted");
        Ok(())
    }

    async fn ensure_unique(&self, name: &str, prefix: &str, own_id: Option<i64>) -> Result<(), GateServiceError> {
        let taken = |found: Option<Resource>| found.is_some_and(|r| Some(r.id) != own_id);

        if taken(self.repo.get_by_name(name).await.context("Failed to check resource name")?) {
            return Err(GateServiceError::Conflict(format!("Resource '{name}' already exists")));
        }
        if taken(self.repo.get_by_prefix(prefix).await.context("Failed to check resource prefix")?) {
            return Err(GateServiceError::Conflict(format!("Prefix '{prefix}' is already gated")));
        }
        Ok(())
    }

    async fn invalidate(&self) {
        if let Err(e) = self.cache.delete(GATE_CACHE_KEY).await {
            tracing::warn!("Failed to invalidate gate table: {e:#}");
        }
    }
}

fn validate_name(name: &str) -> Result<String, GateServiceError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(GateServiceError::ValidationError(
            "Resource name must be 1-100 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn validate_prefix(prefix: &str) -> Result<String, GateServiceError> {
    normalize_prefix(prefix)
        .filter(|p| p.len() <= 255)
        .ok_or_else(|| GateServiceError::ValidationError(format!("Invalid path prefix '{prefix}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::test_support::setup_pool;
    use crate::db::repositories::SqlxResourceRepository;
    use async_trait::async_trait;

    fn resource(id: i64, name: &str, prefix: &str, parent_id: Option<i64>, active: bool) -> Resource {
        let now = Utc::now();
        Resource {
            id,
            name: name.to_string(),
            path_prefix: prefix.to_string(),
            parent_id,
            is_active: active,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn deny(name: &str) -> GateDecision {
        GateDecision::Deny { resource: name.to_string() }
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("social/"), Some("/social".to_string()));
        assert_eq!(normalize_prefix("//social//posts/"), Some("/social/posts".to_string()));
        assert_eq!(normalize_prefix("/"), Some("/".to_string()));
        assert_eq!(normalize_prefix("  "), None);
        assert_eq!(normalize_prefix("/a b"), None);
        assert_eq!(normalize_prefix("/a?x=1"), None);
    }

    #[test]
    fn test_prefix_matching_respects_segments() {
        assert!(matches_prefix("/wiki", "/wiki"));
        assert!(matches_prefix("/wiki/rules", "/wiki"));
        assert!(!matches_prefix("/wikipedia", "/wiki"));
        assert!(matches_prefix("/anything", "/"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = GateTable::build(&[
            resource(1, "social", "/social", None, true),
            resource(2, "posts", "/social/posts", Some(1), false),
        ]);
        assert_eq!(table.check("/social/feed"), GateDecision::Allow);
        assert_eq!(table.check("/social/posts/5"), deny("posts"));
        assert_eq!(table.check("/social/postsfeed"), GateDecision::Allow);
        assert_eq!(table.check("/news"), GateDecision::Allow);
    }

    #[test]
    fn test_inactive_parent_disables_children() {
        let table = GateTable::build(&[
            resource(2, "posts", "/social/posts", Some(1), true),
            resource(1, "social", "/social", None, false),
        ]);
        assert_eq!(table.check("/social/posts"), deny("posts"));
        assert_eq!(table.check("/social"), deny("social"));
    }

    #[test]
    fn test_check_normalizes_request_path() {
        let table = GateTable::build(&[resource(1, "wiki", "/wiki", None, false)]);
        assert_eq!(table.check("/wiki/"), deny("wiki"));
        assert_eq!(table.check("//wiki"), deny("wiki"));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(20))]

            #[test]
            fn normalized_prefix_is_idempotent(raw in "[a-z/]{0,20}") {
                if let Some(p) = normalize_prefix(&raw) {
                    prop_assert!(p.starts_with('/'));
                    prop_assert!(p == "/" || !p.ends_with('/'));
                    prop_assert_eq!(normalize_prefix(&p), Some(p.clone()));
                }
            }

            #[test]
            fn child_is_active_only_when_both_flags_are(
                parent_active: bool,
                child_active: bool,
                tail in "(/[a-z0-9]{1,8}){0,3}",
            ) {
                let table = GateTable::build(&[
                    resource(1, "parent", "/game", None, parent_active),
                    resource(2, "child", "/game/servers", Some(1), child_active),
                ]);
                let path = format!("/game/servers{tail}");
                prop_assert_eq!(table.check(&path).is_allowed(), parent_active && child_active);
            }

            #[test]
            fn unregistered_paths_are_allowed(
                segment in "[a-z]{1,10}",
                active: bool,
            ) {
                prop_assume!(segment != "game");
                let table = GateTable::build(&[resource(1, "game", "/game", None, active)]);
                let path = format!("/{segment}");
                prop_assert!(table.check(&path).is_allowed());
            }
        }
    }

    async fn setup_service() -> (GateService, SharedCache) {
        let pool = setup_pool().await;
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let service = GateService::new(
            SqlxResourceRepository::boxed(pool),
            cache.clone(),
            Duration::from_secs(60),
        );
        (service, cache)
    }

    fn create_input(name: &str, prefix: &str, parent_id: Option<i64>) -> CreateResourceInput {
        CreateResourceInput {
            name: name.to_string(),
            path_prefix: prefix.to_string(),
            parent_id,
            is_active: true,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_toggle_invalidates_cached_table() {
        let (service, cache) = setup_service().await;
        let social = service.create(create_input("social", "/social", None)).await.unwrap();
        service
            .create(create_input("posts", "/social/posts", Some(social.id)))
            .await
            .unwrap();

        assert!(service.check("/social/posts/1").await.is_allowed());
        assert!(cache.get::<GateTable>(GATE_CACHE_KEY).await.unwrap().is_some());

        service.set_active(social.id, false).await.unwrap();
        assert_eq!(service.check("/social/posts/1").await, deny("posts"));

        service.set_active(social.id, true).await.unwrap();
        assert!(service.check("/social/posts/1").await.is_allowed());
    }

    #[tokio::test]
    async fn test_cached_table_is_served_until_invalidated() {
        let pool = setup_pool().await;
        let repo = SqlxResourceRepository::boxed(pool);
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let service = GateService::new(repo.clone(), cache.clone(), Duration::from_secs(60));

        let wiki = service.create(create_input("wiki", "/wiki", None)).await.unwrap();
        assert!(service.check("/wiki").await.is_allowed());

        // A write that bypasses the service is not seen until the entry goes
        let mut disabled = wiki.clone();
        disabled.is_active = false;
        repo.update(&disabled).await.unwrap();
        assert!(service.check("/wiki").await.is_allowed());

        cache.delete(GATE_CACHE_KEY).await.unwrap();
        assert_eq!(service.check("/wiki").await, deny("wiki"));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (service, _) = setup_service().await;
        let social = service.create(create_input("social", "social/", None)).await.unwrap();
        assert_eq!(social.path_prefix, "/social");

        let posts = service
            .create(create_input("posts", "/social/posts", Some(social.id)))
            .await
            .unwrap();

        let too_deep = service
            .create(create_input("likes", "/social/posts/likes", Some(posts.id)))
            .await;
        assert!(matches!(too_deep, Err(GateServiceError::ValidationError(_))));

        let outside = service.create(create_input("news", "/news", Some(social.id))).await;
        assert!(matches!(outside, Err(GateServiceError::ValidationError(_))));

        let dup_prefix = service.create(create_input("social2", "/social", None)).await;
        assert!(matches!(dup_prefix, Err(GateServiceError::Conflict(_))));

        let dup_name = service.create(create_input("social", "/other", None)).await;
        assert!(matches!(dup_name, Err(GateServiceError::Conflict(_))));

        let bad = service.create(create_input("bad", "/a b", None)).await;
        assert!(matches!(bad, Err(GateServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_delete_parent_removes_children() {
        let (service, _) = setup_service().await;
        let social = service.create(create_input("social", "/social", None)).await.unwrap();
        service
            .create(create_input("posts", "/social/posts", Some(social.id)))
            .await
            .unwrap();
        service.set_active(social.id, false).await.unwrap();
        assert!(!service.check("/social/posts").await.is_allowed());

        service.delete(social.id).await.unwrap();
        assert!(service.list().await.unwrap().is_empty());
        assert!(service.check("/social/posts").await.is_allowed());
        assert!(matches!(service.delete(social.id).await, Err(GateServiceError::NotFound)));
    }

    #[tokio::test]
    async fn test_parent_with_children_keeps_its_prefix() {
        let (service, _) = setup_service().await;
        let social = service.create(create_input("social", "/social", None)).await.unwrap();
        let posts = service
            .create(create_input("posts", "/social/posts", Some(social.id)))
            .await
            .unwrap();

        let moved = service
            .update(
                social.id,
                UpdateResourceInput {
                    path_prefix: Some("/community".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(moved, Err(GateServiceError::Conflict(_))));
        assert_eq!(service.get(social.id).await.unwrap().path_prefix, "/social");

        // Same prefix in another spelling and other fields are fine
        let renamed = service
            .update(
                social.id,
                UpdateResourceInput {
                    name: Some("community".to_string()),
                    path_prefix: Some("/social/".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "community");

        service.delete(posts.id).await.unwrap();
        let moved = service
            .update(
                social.id,
                UpdateResourceInput {
                    path_prefix: Some("/community".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.path_prefix, "/community");
    }

    struct FailingRepository;

    #[async_trait]
    impl ResourceRepository for FailingRepository {
        async fn create(&self, _: &Resource) -> anyhow::Result<Resource> {
            anyhow::bail!("database is down")
        }
        async fn get_by_id(&self, _: i64) -> anyhow::Result<Option<Resource>> {
            anyhow::bail!("database is down")
        }
        async fn get_by_prefix(&self, _: &str) -> anyhow::Result<Option<Resource>> {
            anyhow::bail!("database is down")
        }
        async fn get_by_name(&self, _: &str) -> anyhow::Result<Option<Resource>> {
            anyhow::bail!("database is down")
        }
        async fn list(&self) -> anyhow::Result<Vec<Resource>> {
            anyhow::bail!("database is down")
        }
        async fn update(&self, _: &Resource) -> anyhow::Result<Resource> {
            anyhow::bail!("database is down")
        }
        async fn delete(&self, _: i64) -> anyhow::Result<bool> {
            anyhow::bail!("database is down")
        }
        async fn count_children(&self, _: i64) -> anyhow::Result<i64> {
            anyhow::bail!("database is down")
        }
    }

    #[tokio::test]
    async fn test_database_failure_allows() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let service = GateService::new(Arc::new(FailingRepository), cache, Duration::from_secs(60));
        assert!(service.check("/social").await.is_allowed());
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_allows() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        cache.set(GATE_CACHE_KEY, &"not a table", Duration::from_secs(60)).await.unwrap();
        let service = GateService::new(Arc::new(FailingRepository), cache, Duration::from_secs(60));
        assert!(service.check("/social").await.is_allowed());
    }
}
