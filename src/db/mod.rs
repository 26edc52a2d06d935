//! Database layer
//!
//! SQLite (default, single-file deployments) and MySQL are both supported.
//! The driver is selected from configuration and hidden behind
//! [`DatabasePool`]; repositories use [`dispatch!`] to run the same query
//! text against whichever backend is active.
//!
//! ```ignore
//! use bastion::config::DatabaseConfig;
//! use bastion::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

/// Run a block against the concrete pool behind a [`DynDatabasePool`].
///
/// The block is expanded once per backend, so the binding is a `&SqlitePool`
/// in one arm and a `&MySqlPool` in the other. Must be used inside a
/// function returning `anyhow::Result`.
macro_rules! dispatch {
    ($pool:expr, |$p:ident| $body:expr) => {
        match $pool.driver() {
            $crate::config::DatabaseDriver::Sqlite => {
                let $p = $pool
                    .as_sqlite()
                    .ok_or_else(|| ::anyhow::anyhow!("SQLite pool unavailable"))?;
                $body
            }
            $crate::config::DatabaseDriver::Mysql => {
                let $p = $pool
                    .as_mysql()
                    .ok_or_else(|| ::anyhow::anyhow!("MySQL pool unavailable"))?;
                $body
            }
        }
    };
}

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, LastInsertId, MysqlDatabase,
    SqliteDatabase,
};

/// Page of rows plus the total row count
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        Self { items, total, page, per_page }
    }

    pub fn total_pages(&self) -> i64 {
        if self.per_page <= 0 {
            return 0;
        }
        (self.total + self.per_page - 1) / self.per_page
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Clamp page/per_page and compute the SQL offset
pub fn page_window(page: i64, per_page: i64) -> (i64, i64, i64) {
    let page = page.max(1);
    let per_page = per_page.clamp(1, 100);
    (page, per_page, (page - 1) * per_page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window_clamps() {
        assert_eq!(page_window(0, 0), (1, 1, 0));
        assert_eq!(page_window(3, 20), (3, 20, 40));
        assert_eq!(page_window(2, 500), (2, 100, 100));
    }

    #[test]
    fn test_total_pages() {
        let paged: Paged<i32> = Paged { items: vec![], total: 41, page: 1, per_page: 20 };
        assert_eq!(paged.total_pages(), 3);
        let empty: Paged<i32> = Paged { items: vec![], total: 0, page: 1, per_page: 20 };
        assert_eq!(empty.total_pages(), 0);
    }
}
