//! Storage layer with repository pattern for queue persistence.
//!
//! One repository per table, collected into a [`Storage`] container that
//! the service wires once and shares. Repositories hold `Arc<PgPool>`
//! clones, so the container is cheap to clone across tasks.

pub mod delivery_jobs;
pub mod registrations;

use std::sync::Arc;

use sqlx::PgPool;

use crate::error::Result;

/// Container for all repositories.
#[derive(Clone)]
pub struct Storage {
    /// Webhook registration repository.
    pub registrations: Arc<registrations::Repository>,

    /// Delivery job repository.
    pub delivery_jobs: Arc<delivery_jobs::Repository>,

    pool: Arc<PgPool>,
}

impl Storage {
    /// Creates a storage container over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);
        Self {
            registrations: Arc::new(registrations::Repository::new(pool.clone())),
            delivery_jobs: Arc::new(delivery_jobs::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Verifies database connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if the database is unreachable.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&*self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_builds_from_lazy_pool() {
        let pool = PgPool::connect_lazy("postgresql://localhost/hookwire_test")
            .expect("lazy pool creation should not fail");
        let storage = Storage::new(pool);
        let cloned = storage.clone();

        // Clones share one pool; nothing here touches the network
        assert!(Arc::ptr_eq(&storage.pool, &cloned.pool));
    }
}
