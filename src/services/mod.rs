pub mod blog;
pub mod broadcast;
pub mod database;
pub mod fanout;
pub mod marker;
pub mod queue;
pub mod read_cursor;
pub mod user;
pub mod worker;

// 重新导出常用类型
pub use blog::BlogService;
pub use broadcast::BroadcastService;
pub use database::Database;
pub use fanout::FanoutService;
pub use marker::MarkerService;
pub use queue::EventQueueService;
pub use read_cursor::ReadCursorService;
pub use user::UserService;
pub use worker::NotificationWorker;
