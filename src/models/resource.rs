//! Gated resource model
//!
//! A resource maps a path prefix to an on/off flag. Resources form at most
//! two levels: a top-level resource and its children.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Resource {
    pub id: i64,
    /// Unique display name (e.g. "social")
    pub name: String,
    /// Path prefix relative to `/api/v1` (e.g. "/social/posts")
    pub path_prefix: String,
    /// Parent resource; `None` for top-level resources
    pub parent_id: Option<i64>,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateResourceInput {
    pub name: String,
    pub path_prefix: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateResourceInput {
    pub name: Option<String>,
    pub path_prefix: Option<String>,
    pub is_active: Option<bool>,
    pub description: Option<String>,
}
