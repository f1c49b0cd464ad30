//! `carddemo-migrate migrate-db`

use carddemo_loader::db;

use super::load_config;
use crate::error::Result;

pub async fn run() -> Result<bool> {
    let config = load_config()?;
    let pool = db::create_pool(&config.db_config()).await?;
    db::health_check(&pool).await?;
    db::run_migrations(&pool).await?;

    println!("Schema migrations applied");
    Ok(true)
}
