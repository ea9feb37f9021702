use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::{blog::BlogWithAuthor, user::User},
};

/// 博客创建事件，经由事件队列传递
/// 队列两端（入队与出队）都必须校验，拒绝而不是容忍缺损数据
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogCreatedEvent {
    pub blog_id: String,
    pub title: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
}

impl BlogCreatedEvent {
    pub fn validate(&self) -> Result<()> {
        if self.blog_id.trim().is_empty() {
            return Err(AppError::validation("blog created event is missing blog id"));
        }
        if self.author_id.trim().is_empty() {
            return Err(AppError::validation("blog created event is missing author id"));
        }
        Ok(())
    }
}

/// 通知标记：不可变，一经创建永不更新
/// version 由标记存储的序列分配，是全局唯一的排序与去重键
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMarker {
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub blog: BlogWithAuthor,
}

/// 每用户已读游标，只增不减
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReadCursor {
    pub user_id: String,
    pub last_seen_version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct MarkSeenRequest {
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkSeenResponse {
    pub cursor: ReadCursor,
    pub unread_count: i64,
}

/// 标记的线上格式：客户端依赖的稳定结构
/// 时间戳序列化为ISO-8601字符串，cursor 与 markerVersion 恒等，
/// 供客户端做增量过滤
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerPayload {
    pub marker_version: i64,
    pub created_at: DateTime<Utc>,
    pub cursor: i64,
    pub blog: BlogPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPayload {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: AuthorPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorPayload {
    pub id: String,
    pub username: String,
}

impl MarkerPayload {
    pub fn from_marker(marker: &NotificationMarker) -> Self {
        Self {
            marker_version: marker.version,
            created_at: marker.created_at,
            cursor: marker.version,
            blog: BlogPayload {
                id: marker.blog.id.clone(),
                title: marker.blog.title.clone(),
                content: marker.blog.content.clone(),
                created_at: marker.blog.created_at,
                author: AuthorPayload {
                    id: marker.blog.author.id.clone(),
                    username: marker.blog.author.username.clone(),
                },
            },
        }
    }

    /// 把线上格式还原为内部标记
    /// 作者的注册时间不在线上格式中传递，对广播路径也没有意义，补零值即可
    pub fn into_marker(self) -> NotificationMarker {
        NotificationMarker {
            version: self.marker_version,
            created_at: self.created_at,
            blog: BlogWithAuthor {
                id: self.blog.id,
                title: self.blog.title,
                content: self.blog.content,
                created_at: self.blog.created_at,
                author: User {
                    id: self.blog.author.id,
                    username: self.blog.author.username,
                    created_at: self.blog.created_at,
                },
            },
        }
    }

    /// 发布与接收两端共用的契约校验
    /// 构造期的契约破坏必须报错给调用方，不能悄悄丢弃
    pub fn validate(&self) -> Result<()> {
        if self.marker_version <= 0 {
            return Err(AppError::validation(&format!(
                "marker version must be positive, got {}",
                self.marker_version
            )));
        }
        if self.blog.id.trim().is_empty() {
            return Err(AppError::validation("marker payload is missing blog id"));
        }
        if self.blog.author.id.trim().is_empty() {
            return Err(AppError::validation("marker payload has no resolvable author"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_marker() -> NotificationMarker {
        NotificationMarker {
            version: 7,
            created_at: Utc::now(),
            blog: BlogWithAuthor {
                id: "blog_1".to_string(),
                title: "Intro".to_string(),
                content: "Hello".to_string(),
                created_at: Utc::now(),
                author: User {
                    id: "user_1".to_string(),
                    username: "alice".to_string(),
                    created_at: Utc::now(),
                },
            },
        }
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let payload = MarkerPayload::from_marker(&sample_marker());
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["markerVersion"], json!(7));
        assert_eq!(value["cursor"], json!(7));
        assert!(value["createdAt"].is_string());
        assert_eq!(value["blog"]["id"], json!("blog_1"));
        assert_eq!(value["blog"]["author"]["username"], json!("alice"));
        // 时间戳必须是ISO-8601字符串
        let ts = value["createdAt"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_wire_round_trip() {
        let payload = MarkerPayload::from_marker(&sample_marker());
        let text = serde_json::to_string(&payload).unwrap();
        let parsed: MarkerPayload = serde_json::from_str(&text).unwrap();
        let marker = parsed.into_marker();

        assert_eq!(marker.version, 7);
        assert_eq!(marker.blog.id, "blog_1");
        assert_eq!(marker.blog.author.id, "user_1");
    }

    #[test]
    fn test_validate_rejects_non_positive_version() {
        let mut payload = MarkerPayload::from_marker(&sample_marker());
        payload.marker_version = 0;
        assert!(payload.validate().is_err());

        payload.marker_version = -3;
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_blog_id() {
        let mut payload = MarkerPayload::from_marker(&sample_marker());
        payload.blog.id = "  ".to_string();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_author() {
        let mut payload = MarkerPayload::from_marker(&sample_marker());
        payload.blog.author.id = String::new();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_malformed_timestamp_is_rejected_by_serde() {
        let raw = json!({
            "markerVersion": 1,
            "createdAt": "not-a-timestamp",
            "cursor": 1,
            "blog": {
                "id": "blog_1",
                "title": "t",
                "content": "c",
                "createdAt": "2024-01-01T00:00:00Z",
                "author": { "id": "user_1", "username": "alice" }
            }
        });
        assert!(serde_json::from_value::<MarkerPayload>(raw).is_err());
    }

    #[test]
    fn test_event_validation() {
        let event = BlogCreatedEvent {
            blog_id: "blog_1".to_string(),
            title: "Intro".to_string(),
            author_id: "user_1".to_string(),
            created_at: Utc::now(),
        };
        assert!(event.validate().is_ok());

        let missing_blog = BlogCreatedEvent {
            blog_id: String::new(),
            ..event.clone()
        };
        assert!(missing_blog.validate().is_err());

        let missing_author = BlogCreatedEvent {
            author_id: String::new(),
            ..event
        };
        assert!(missing_author.validate().is_err());
    }

    #[test]
    fn test_event_uses_camel_case_on_the_wire() {
        let event = BlogCreatedEvent {
            blog_id: "blog_1".to_string(),
            title: "Intro".to_string(),
            author_id: "user_1".to_string(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("blogId").is_some());
        assert!(value.get("authorId").is_some());
        assert!(value.get("createdAt").is_some());
    }
}
