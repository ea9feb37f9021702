use crate::{
    config::Config,
    error::Result,
    models::notification::{MarkerPayload, NotificationMarker},
    services::FanoutService,
};
use futures_util::StreamExt;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::{
    cmp,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// 广播总线：跨实例的发布/订阅，单一公共频道
///
/// 发布与订阅各用一条连接。连接一旦进入订阅模式就不能再发普通命令，
/// 所以两端永远不共享。每个实例恰好持有一个订阅连接。
pub struct BroadcastService {
    channel: String,
    publish_conn: ConnectionManager,
    client: redis::Client,
    fanout: Arc<FanoutService>,
    reconnect_base: Duration,
    reconnect_max: Duration,
}

impl BroadcastService {
    pub async fn new(
        client: &redis::Client,
        fanout: Arc<FanoutService>,
        config: &Config,
    ) -> Result<Self> {
        let publish_conn = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            channel: config.broadcast_channel.clone(),
            publish_conn,
            client: client.clone(),
            fanout,
            reconnect_base: Duration::from_secs(config.bus_reconnect_base_delay),
            reconnect_max: Duration::from_secs(config.bus_reconnect_max_delay),
        })
    }

    /// 把标记序列化成线上格式并发布
    ///
    /// 发送前必须校验；校验不过说明构造期契约已被破坏，错误返回给
    /// 调用方（工作循环），绝不悄悄丢弃。
    pub async fn publish(&self, marker: &NotificationMarker) -> Result<()> {
        let payload = MarkerPayload::from_marker(marker);
        payload.validate()?;
        let body = serde_json::to_string(&payload)?;

        let mut conn = self.publish_conn.clone();
        let _: i64 = conn.publish(&self.channel, body).await?;

        debug!(
            "Published marker {} to channel {}",
            marker.version, self.channel
        );
        Ok(())
    }

    /// 订阅循环：断线后按有界指数退避重连，重连即重订阅
    ///
    /// 总线自身不回放消息，断连期间错过的标记由客户端走历史拉取补齐。
    pub async fn run_subscriber(self: Arc<Self>, shutdown: Arc<AtomicBool>) {
        let mut attempt: u32 = 0;
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            if let Err(e) = self.subscribe_once(&mut attempt).await {
                warn!("Broadcast subscriber connection lost: {}", e);
            }

            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            attempt += 1;
            let delay = cmp::min(self.reconnect_base * attempt, self.reconnect_max);
            warn!(
                "Reconnecting broadcast subscriber in {:?} (attempt {})",
                delay, attempt
            );
            tokio::time::sleep(delay).await;
        }
        info!("Broadcast subscriber stopped");
    }

    async fn subscribe_once(&self, attempt: &mut u32) -> Result<()> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(&self.channel).await?;
        *attempt = 0;
        info!("Subscribed to broadcast channel {}", self.channel);

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    error!("Unreadable broadcast message: {}", e);
                    continue;
                }
            };

            // 解码失败只丢这一条消息，订阅循环继续为本实例的客户端服务
            match decode_message(&payload) {
                Ok(marker) => {
                    debug!("Received marker {} from broadcast channel", marker.version);
                    self.fanout.publish(&marker);
                }
                Err(e) => error!("Dropping broadcast message: {}", e),
            }
        }
        Ok(())
    }
}

/// 订阅端的解码：反序列化、校验、把时间戳还原为时刻
fn decode_message(payload: &str) -> Result<NotificationMarker> {
    let wire: MarkerPayload = serde_json::from_str(payload)?;
    wire.validate()?;
    Ok(wire.into_marker())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{blog::BlogWithAuthor, user::User};
    use chrono::Utc;

    fn marker(version: i64) -> NotificationMarker {
        NotificationMarker {
            version,
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
    fn test_decode_valid_message() {
        let payload = MarkerPayload::from_marker(&marker(3));
        let body = serde_json::to_string(&payload).unwrap();

        let decoded = decode_message(&body).unwrap();
        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.blog.author.username, "alice");
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(decode_message("not json at all").is_err());
        assert!(decode_message("{\"markerVersion\": 1}").is_err());
    }

    #[test]
    fn test_decode_rejects_contract_violations() {
        let mut payload = MarkerPayload::from_marker(&marker(3));
        payload.marker_version = 0;
        let body = serde_json::to_string(&payload).unwrap();
        assert!(decode_message(&body).is_err());

        let mut payload = MarkerPayload::from_marker(&marker(3));
        payload.blog.author.id = String::new();
        let body = serde_json::to_string(&payload).unwrap();
        assert!(decode_message(&body).is_err());
    }

    #[test]
    fn test_decoded_message_reaches_fanout() {
        let fanout = FanoutService::new();
        let (_id, mut rx) = fanout.subscribe(None);

        let body = serde_json::to_string(&MarkerPayload::from_marker(&marker(9))).unwrap();
        let decoded = decode_message(&body).unwrap();
        fanout.publish(&decoded);

        assert_eq!(rx.try_recv().unwrap().version, 9);
    }
}
