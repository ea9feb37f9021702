use crate::{
    error::Result,
    models::{blog::BlogWithAuthor, user::User},
    services::Database,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 博客查询服务（只读，创作与编辑由外部服务负责）
#[derive(Clone)]
pub struct BlogService {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct BlogRow {
    id: String,
    title: String,
    content: String,
    created_at: DateTime<Utc>,
    author_id: String,
    author_username: String,
    author_created_at: DateTime<Utc>,
}

impl From<BlogRow> for BlogWithAuthor {
    fn from(row: BlogRow) -> Self {
        BlogWithAuthor {
            id: row.id,
            title: row.title,
            content: row.content,
            created_at: row.created_at,
            author: User {
                id: row.author_id,
                username: row.author_username,
                created_at: row.author_created_at,
            },
        }
    }
}

impl BlogService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    /// 按ID取完整博客（含作者），工作循环物化标记前用它确认博客仍然存在
    pub async fn get_by_id(&self, id: &str) -> Result<Option<BlogWithAuthor>> {
        let row = sqlx::query_as::<_, BlogRow>(
            r#"
            SELECT b.id, b.title, b.content, b.created_at,
                   u.id AS author_id, u.username AS author_username, u.created_at AS author_created_at
            FROM blogs b
            JOIN users u ON u.id = b.author_id
            WHERE b.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(row.map(BlogWithAuthor::from))
    }
}
