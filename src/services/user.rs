use crate::{error::Result, models::user::User, services::Database};
use std::sync::Arc;

/// 用户查询服务（只读，注册由Rainbow-Auth负责）
#[derive(Clone)]
pub struct UserService {
    db: Arc<Database>,
}

impl UserService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(user)
    }
}
