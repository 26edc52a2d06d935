//! Shared API response types

use serde::{Deserialize, Serialize};

use crate::db::Paged;
use crate::models::User;

/// Account as shown to its owner and to admins; never includes the hash
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub status: String,
    pub display_name: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role.to_string(),
            status: user.status.to_string(),
            display_name: user.display_name,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// Paginated list response
#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> From<Paged<T>> for PageResponse<T> {
    fn from(paged: Paged<T>) -> Self {
        let total_pages = paged.total_pages();
        Self {
            items: paged.items,
            total: paged.total,
            page: paged.page,
            per_page: paged.per_page,
            total_pages,
        }
    }
}

/// Single-count response (`{"count": n}`)
#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;

    #[test]
    fn test_user_response_hides_hash() {
        let user = User::new("alex".into(), "alex@x.io".into(), "secret-hash".into(), UserRole::Moderator);
        let json = serde_json::to_string(&UserResponse::from(user)).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("\"role\":\"moderator\""));
    }

    #[test]
    fn test_page_response_counts_pages() {
        let response: PageResponse<i32> = Paged::new(vec![1, 2], 41, 1, 20).into();
        assert_eq!(response.total_pages, 3);
        assert_eq!(response.items, vec![1, 2]);
    }
}
