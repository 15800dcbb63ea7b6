use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

pub async fn connect_pool(database_url: &str) -> anyhow::Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::migrate!().run(&pool).await?;

    tracing::info!("✅ Connected to database, migrations applied");

    Ok(pool)
}
