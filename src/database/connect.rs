use anyhow::Context;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

// create database connection pool with the database url using diesel
pub fn create_db_connection_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .test_on_check_out(true)
        .build(manager)
        .context("failed to create db connection pool")
}

// run diesel migrations
pub fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    let mut conn = pool.get().context("failed to check out a connection for migrations")?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("failed to run migrations: {e}"))?;
    Ok(())
}
