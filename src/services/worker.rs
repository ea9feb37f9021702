use crate::{
    config::Config,
    error::Result,
    models::notification::BlogCreatedEvent,
    services::{BlogService, BroadcastService, EventQueueService, MarkerService},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info};

/// 通知工作循环：每个实例各跑一个，无实例间协调
///
/// 循环体：出队 → 查博客 → 落标记 → 发广播。单个事件的任何失败只记
/// 日志，循环继续处理下一个事件；事件不回队，一次出队只处理一次。
pub struct NotificationWorker {
    queue: Arc<EventQueueService>,
    blog_service: BlogService,
    marker_service: MarkerService,
    broadcast: Arc<BroadcastService>,
    dequeue_timeout: u64,
    stop: Arc<AtomicBool>,
}

impl NotificationWorker {
    pub fn new(
        queue: Arc<EventQueueService>,
        blog_service: BlogService,
        marker_service: MarkerService,
        broadcast: Arc<BroadcastService>,
        config: &Config,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue,
            blog_service,
            marker_service,
            broadcast,
            dequeue_timeout: config.worker_dequeue_timeout,
            stop,
        }
    }

    /// 停机标志在每轮迭代之间检查，置位后在途事件仍会处理完
    pub async fn run(&self) {
        info!("Notification worker started");

        while !self.stop.load(Ordering::Relaxed) {
            // 出队自带短超时，空轮询的节奏由它决定，不会忙转
            let event = match self.queue.dequeue(self.dequeue_timeout).await {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    error!("Event queue dequeue failed: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.process_event(&event).await {
                error!(
                    "Failed to process blog created event for blog {}: {}",
                    event.blog_id, e
                );
            }
        }

        info!("Notification worker stopped");
    }

    async fn process_event(&self, event: &BlogCreatedEvent) -> Result<()> {
        // 博客存在是生产方担保的前置条件，查不到说明删除竞态或数据损坏，
        // 丢弃事件，不消耗版本号
        let Some(blog) = self.blog_service.get_by_id(&event.blog_id).await? else {
            error!(
                "Dropping event for blog {}: blog no longer exists",
                event.blog_id
            );
            return Ok(());
        };

        let marker = self.marker_service.create_marker(&blog).await?;
        info!(
            "Created notification marker {} for blog {}",
            marker.version, blog.id
        );

        self.broadcast.publish(&marker).await?;
        Ok(())
    }
}
