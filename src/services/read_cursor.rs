use crate::{
    error::Result,
    models::{
        notification::{MarkSeenResponse, ReadCursor},
        user::User,
    },
    services::{Database, MarkerService},
};
use std::sync::Arc;
use tracing::debug;

/// 已读游标存储：每用户一行，只由"标记已读"更新
#[derive(Clone)]
pub struct ReadCursorService {
    db: Arc<Database>,
    marker_service: MarkerService,
}

impl ReadCursorService {
    pub async fn new(db: Arc<Database>, marker_service: MarkerService) -> Result<Self> {
        Ok(Self { db, marker_service })
    }

    /// 取用户游标，首次读取时在0处懒建
    pub async fn get(&self, user: &User) -> Result<ReadCursor> {
        sqlx::query("INSERT INTO read_cursors (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(&user.id)
            .execute(&self.db.pool)
            .await?;

        let cursor = sqlx::query_as::<_, ReadCursor>(
            "SELECT user_id, last_seen_version, updated_at FROM read_cursors WHERE user_id = $1",
        )
        .bind(&user.id)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(cursor)
    }

    /// 标记已读：取当前值与提交值的较大者，乱序到达的旧版本不会让游标回退
    /// GREATEST 在数据库侧求值，并发调用也不会出现读-改-写竞态
    pub async fn mark_seen(&self, user: &User, version: i64) -> Result<MarkSeenResponse> {
        let cursor = sqlx::query_as::<_, ReadCursor>(
            r#"
            INSERT INTO read_cursors (user_id, last_seen_version, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (user_id) DO UPDATE
            SET last_seen_version = GREATEST(read_cursors.last_seen_version, EXCLUDED.last_seen_version),
                updated_at = now()
            RETURNING user_id, last_seen_version, updated_at
            "#,
        )
        .bind(&user.id)
        .bind(version.max(0))
        .fetch_one(&self.db.pool)
        .await?;

        debug!(
            "Cursor for user {} now at version {}",
            user.id, cursor.last_seen_version
        );

        let unread_count = self.marker_service.get_unread_count(user).await?;

        Ok(MarkSeenResponse {
            cursor,
            unread_count,
        })
    }
}
