use crate::config::Config;
use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};

/// 数据库服务
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
    pub config: Config,
}

impl Database {
    /// 创建新的数据库实例
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Initializing database connection to {}", config.database_url);

        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;

        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    /// 验证数据库连接
    pub async fn verify_connection(&self) -> Result<()> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => {
                info!("Database connection verified successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to verify database connection: {}", e);
                Err(e.into())
            }
        }
    }

    /// 幂等建表，保证流水线可独立启动
    /// users/blogs 由外部CRUD服务写入，这里只为联表查询兜底
    /// notification_markers.version 使用 BIGSERIAL：版本分配与标记落库
    /// 是同一条原子语句，计数器绝不在应用侧维护
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blogs (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                content     TEXT NOT NULL DEFAULT '',
                author_id   TEXT NOT NULL REFERENCES users(id),
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notification_markers (
                version     BIGSERIAL PRIMARY KEY,
                blog_id     TEXT NOT NULL REFERENCES blogs(id),
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS read_cursors (
                user_id            TEXT PRIMARY KEY,
                last_seen_version  BIGINT NOT NULL DEFAULT 0,
                updated_at         TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database schema ensured");
        Ok(())
    }
}
