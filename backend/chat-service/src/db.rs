use db_pool::{create_pool as create_pg_pool, DbConfig as DbPoolConfig};
use sqlx::migrate::Migrator;
use sqlx::{Pool, Postgres};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_pool(database_url: &str) -> Result<Pool<Postgres>, sqlx::Error> {
    let cfg = DbPoolConfig::from_env("chat-service", database_url);
    cfg.log_config();
    let pool = create_pg_pool(cfg).await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}
