use std::sync::Arc;

use crate::{
    config::Config,
    services::{
        blog::BlogService,
        broadcast::BroadcastService,
        database::Database,
        fanout::FanoutService,
        marker::MarkerService,
        queue::EventQueueService,
        read_cursor::ReadCursorService,
        user::UserService,
    },
};

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 数据库连接
    pub db: Database,

    /// 用户查询服务
    pub user_service: UserService,

    /// 博客查询服务
    pub blog_service: BlogService,

    /// 标记存储
    pub marker_service: MarkerService,

    /// 已读游标存储
    pub read_cursor_service: ReadCursorService,

    /// 事件队列
    pub event_queue: Arc<EventQueueService>,

    /// 广播总线
    pub broadcast_service: Arc<BroadcastService>,

    /// 本地多播
    pub fanout_service: Arc<FanoutService>,
}

impl AppState {
    /// 检查是否为生产环境
    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }

    /// 检查是否为开发环境
    pub fn is_development(&self) -> bool {
        self.config.is_development()
    }
}
