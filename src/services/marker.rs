use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        blog::BlogWithAuthor,
        notification::NotificationMarker,
        user::User,
    },
    services::Database,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// 标记存储：通知标记的唯一写入方是工作循环，插入后永不更新或删除
///
/// version 来自 notification_markers 的 BIGSERIAL 序列。分配与落库是同一条
/// INSERT，所以不存在"分配了版本却没有标记行"的状态，也不存在重复版本。
/// 提交顺序即版本顺序。
#[derive(Clone)]
pub struct MarkerService {
    db: Arc<Database>,
    config: Config,
}

/// 标记与博客、作者联表后的扁平行
#[derive(sqlx::FromRow)]
struct MarkerRow {
    version: i64,
    created_at: DateTime<Utc>,
    blog_id: String,
    blog_title: String,
    blog_content: String,
    blog_created_at: DateTime<Utc>,
    author_id: String,
    author_username: String,
    author_created_at: DateTime<Utc>,
}

impl From<MarkerRow> for NotificationMarker {
    fn from(row: MarkerRow) -> Self {
        NotificationMarker {
            version: row.version,
            created_at: row.created_at,
            blog: BlogWithAuthor {
                id: row.blog_id,
                title: row.blog_title,
                content: row.blog_content,
                created_at: row.blog_created_at,
                author: User {
                    id: row.author_id,
                    username: row.author_username,
                    created_at: row.author_created_at,
                },
            },
        }
    }
}

const MARKER_SELECT: &str = r#"
SELECT m.version, m.created_at,
       b.id AS blog_id, b.title AS blog_title, b.content AS blog_content,
       b.created_at AS blog_created_at,
       u.id AS author_id, u.username AS author_username, u.created_at AS author_created_at
FROM notification_markers m
JOIN blogs b ON b.id = m.blog_id
JOIN users u ON u.id = b.author_id
"#;

impl MarkerService {
    pub async fn new(db: Arc<Database>, config: &Config) -> Result<Self> {
        Ok(Self {
            db,
            config: config.clone(),
        })
    }

    /// 创建通知标记并返回完整载荷
    ///
    /// 落库后重新联表读取，保证返回的标记带有可解析的作者。联表第一次
    /// 不完整时重读一次；仍然不完整则硬失败——标记行已经存在却没有可用
    /// 载荷，这是构造错误，不是可重试状况。
    pub async fn create_marker(&self, blog: &BlogWithAuthor) -> Result<NotificationMarker> {
        let version: i64 = sqlx::query_scalar(
            "INSERT INTO notification_markers (blog_id) VALUES ($1) RETURNING version",
        )
        .bind(&blog.id)
        .fetch_one(&self.db.pool)
        .await?;

        debug!("Allocated marker version {} for blog {}", version, blog.id);

        match self.fetch_by_version(version).await? {
            Some(marker) => Ok(marker),
            None => {
                warn!("Marker {} read back incomplete, retrying once", version);
                self.fetch_by_version(version).await?.ok_or_else(|| {
                    AppError::Internal(format!(
                        "marker {} persisted without resolvable blog/author",
                        version
                    ))
                })
            }
        }
    }

    async fn fetch_by_version(&self, version: i64) -> Result<Option<NotificationMarker>> {
        let row = sqlx::query_as::<_, MarkerRow>(&format!("{} WHERE m.version = $1", MARKER_SELECT))
            .bind(version)
            .fetch_optional(&self.db.pool)
            .await?;

        Ok(row.map(NotificationMarker::from))
    }

    /// 未读标记：version 大于用户游标，升序
    /// 游标不存在时视为0（首次读取前尚未懒建）
    pub async fn get_unread_markers(&self, user: &User) -> Result<Vec<NotificationMarker>> {
        let rows = sqlx::query_as::<_, MarkerRow>(&format!(
            r#"{}
            WHERE m.version > COALESCE(
                (SELECT last_seen_version FROM read_cursors WHERE user_id = $1), 0)
            ORDER BY m.version ASC
            "#,
            MARKER_SELECT
        ))
        .bind(&user.id)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(rows.into_iter().map(NotificationMarker::from).collect())
    }

    /// 历史标记：按注册视界过滤，版本降序
    ///
    /// 视界每次调用都基于用户的真实注册时间重新计算，不信任任何缓存的
    /// 声明。1秒宽限是启发式规则，边界不承载精确因果语义。
    pub async fn get_all_markers(&self, user: &User) -> Result<Vec<NotificationMarker>> {
        let horizon = self.registration_horizon(user);
        let rows = sqlx::query_as::<_, MarkerRow>(&format!(
            "{} WHERE b.created_at > $1 ORDER BY m.version DESC",
            MARKER_SELECT
        ))
        .bind(horizon)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(rows.into_iter().map(NotificationMarker::from).collect())
    }

    /// 未读数：同时满足未读过滤与注册视界过滤
    pub async fn get_unread_count(&self, user: &User) -> Result<i64> {
        let horizon = self.registration_horizon(user);
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM notification_markers m
            JOIN blogs b ON b.id = m.blog_id
            WHERE m.version > COALESCE(
                (SELECT last_seen_version FROM read_cursors WHERE user_id = $1), 0)
              AND b.created_at > $2
            "#,
        )
        .bind(&user.id)
        .bind(horizon)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(count)
    }

    fn registration_horizon(&self, user: &User) -> DateTime<Utc> {
        horizon_from(user.created_at, self.config.registration_grace_seconds)
    }
}

/// 注册视界 = 注册时间 - 宽限窗口
/// 基于存储里的注册时间纯计算，不读任何时钟
fn horizon_from(registered_at: DateTime<Utc>, grace_seconds: i64) -> DateTime<Utc> {
    registered_at - Duration::seconds(grace_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_horizon_applies_grace_window() {
        let registered_at = Utc::now();
        let horizon = horizon_from(registered_at, 1);

        // 注册前2秒创建的博客在视界之外，注册后1毫秒的在视界之内
        // （过滤条件是 created_at > horizon）
        let before = registered_at - Duration::seconds(2);
        let after = registered_at + Duration::milliseconds(1);
        assert!(before <= horizon);
        assert!(after > horizon);
    }

    #[test]
    fn test_horizon_with_zero_grace_is_registration_time() {
        let registered_at = Utc::now();
        assert_eq!(horizon_from(registered_at, 0), registered_at);
    }
}
