use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::user::User;

/// 博客记录（由外部创作服务写入，本服务只读）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Blog {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
}

/// 带完整作者信息的博客引用
/// 通知标记的载荷必须携带可解析的作者，下游过滤依赖它
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogWithAuthor {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: User,
}
