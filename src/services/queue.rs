use crate::{config::Config, error::Result, models::notification::BlogCreatedEvent};
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// 事件队列：Redis列表上的持久FIFO，固定队列名
///
/// 入队走共享命令连接；阻塞弹出用独立连接，BLPOP 不能和普通命令
/// 复用一条多路复用连接。工作循环是唯一的出队方。
pub struct EventQueueService {
    queue_key: String,
    command_conn: ConnectionManager,
    pop_conn: Mutex<ConnectionManager>,
}

impl EventQueueService {
    pub async fn new(client: &redis::Client, config: &Config) -> Result<Self> {
        let command_conn = ConnectionManager::new(client.clone()).await?;
        let pop_conn = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            queue_key: config.event_queue_key.clone(),
            command_conn,
            pop_conn: Mutex::new(pop_conn),
        })
    }

    /// 博客创建后入队一个事件
    ///
    /// 契约是尽力而为：博客本身已经落库，调用方对入队失败只记日志、
    /// 不回滚也不向用户报错。错误仍然返回给调用方，由它决定怎么降级。
    pub async fn enqueue(&self, event: &BlogCreatedEvent) -> Result<()> {
        event.validate()?;
        let payload = serde_json::to_string(event)?;

        let mut conn = self.command_conn.clone();
        let _: i64 = conn.rpush(&self.queue_key, payload).await?;

        debug!("Enqueued blog created event for blog {}", event.blog_id);
        Ok(())
    }

    /// 有界阻塞弹出：超时返回空，绝不无限阻塞，工作循环靠它轮询停机标志
    ///
    /// 队列后端不可用时同样返回空——先睡满一个轮询间隔再返回，
    /// 避免工作循环在断连期间空转。坏载荷记错误日志后丢弃。
    pub async fn dequeue(&self, timeout_secs: u64) -> Result<Option<BlogCreatedEvent>> {
        let mut conn = self.pop_conn.lock().await;

        let reply: Option<(String, String)> =
            match conn.blpop(&self.queue_key, timeout_secs as f64).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Event queue unavailable, degrading to empty poll: {}", e);
                    drop(conn);
                    tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
                    return Ok(None);
                }
            };

        let Some((_, payload)) = reply else {
            return Ok(None);
        };

        match serde_json::from_str::<BlogCreatedEvent>(&payload) {
            Ok(event) => match event.validate() {
                Ok(()) => Ok(Some(event)),
                Err(e) => {
                    error!("Dropping invalid queue payload: {}", e);
                    Ok(None)
                }
            },
            Err(e) => {
                error!("Dropping malformed queue payload: {}", e);
                Ok(None)
            }
        }
    }
}
