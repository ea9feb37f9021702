use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 用户记录（由Rainbow-Auth注册流程写入，本服务只读）
/// created_at 即注册时间，用于通知历史的可见性过滤
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}
