use fred::prelude::*;

use crate::config::RedisConfig;

/// Initialize a Redis connection pool from config.
/// Returns an error if the connection cannot be established.
pub async fn create_redis_pool(
    config: &RedisConfig,
) -> Result<fred::clients::Pool, fred::error::Error> {
    let redis_config = Config::from_url(&config.url)?;
    let pool = fred::clients::Pool::new(redis_config, None, None, None, 5)?;
    pool.init().await?;
    pool.wait_for_connect().await?;
    Ok(pool)
}
