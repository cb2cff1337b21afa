//! Postgres persistence for the task registry.
//!
//! - [`models`] -- row types mapped with `sqlx::FromRow`.
//! - [`repositories`] -- zero-sized repository structs with async queries.
//! - [`registry::PgTaskRegistry`] -- the `TaskRegistry` implementation over the `tasks` table.

pub mod models;
pub mod registry;
pub mod repositories;

use sqlx::postgres::PgPoolOptions;

pub use registry::PgTaskRegistry;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
}

/// Apply all pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
