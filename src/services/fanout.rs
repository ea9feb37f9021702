use crate::models::notification::NotificationMarker;
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// 单实例内的本地多播：把广播总线送来的标记分发给每个在线监听者
///
/// 这一层不缓冲也不回放，订阅晚于发布的监听者看不到那次发布。
/// 断线期间的缺口由监听者自己走历史拉取补齐。
pub struct FanoutService {
    listeners: DashMap<String, Listener>,
}

struct Listener {
    tx: mpsc::UnboundedSender<NotificationMarker>,
    cursor: Option<i64>,
    // 按版本去重：总线重连与在线发布赛跑时，同一标记可能送达两次
    delivered: HashSet<i64>,
}

impl FanoutService {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
        }
    }

    /// 注册监听者。带游标的只收 version > cursor 的标记，
    /// 不带游标的收注册之后发布的全部标记。
    pub fn subscribe(
        &self,
        cursor: Option<i64>,
    ) -> (String, mpsc::UnboundedReceiver<NotificationMarker>) {
        let id = format!("listener_{}", Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();

        self.listeners.insert(
            id.clone(),
            Listener {
                tx,
                cursor,
                delivered: HashSet::new(),
            },
        );

        debug!("Registered fanout listener {} (cursor: {:?})", id, cursor);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &str) {
        if self.listeners.remove(id).is_some() {
            debug!("Removed fanout listener {}", id);
        }
    }

    /// 把一个标记投递给当前全部监听者
    /// 接收端已关闭的监听者在这里顺手清掉
    pub fn publish(&self, marker: &NotificationMarker) {
        let mut dead = Vec::new();

        for mut entry in self.listeners.iter_mut() {
            if let Some(cursor) = entry.cursor {
                if marker.version <= cursor {
                    continue;
                }
            }
            if !entry.delivered.insert(marker.version) {
                debug!(
                    "Skipping duplicate delivery of marker {} to {}",
                    marker.version,
                    entry.key()
                );
                continue;
            }
            if entry.tx.send(marker.clone()).is_err() {
                dead.push(entry.key().clone());
            }
        }

        for id in dead {
            self.listeners.remove(&id);
            debug!("Pruned dead fanout listener {}", id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for FanoutService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{blog::BlogWithAuthor, user::User};
    use chrono::Utc;
    use proptest::prelude::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn marker(version: i64) -> NotificationMarker {
        NotificationMarker {
            version,
            created_at: Utc::now(),
            blog: BlogWithAuthor {
                id: format!("blog_{}", version),
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

    fn drain(rx: &mut mpsc::UnboundedReceiver<NotificationMarker>) -> Vec<i64> {
        let mut versions = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(m) => versions.push(m.version),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        versions
    }

    #[test]
    fn test_listener_without_cursor_receives_everything() {
        let fanout = FanoutService::new();
        let (_id, mut rx) = fanout.subscribe(None);

        fanout.publish(&marker(1));
        fanout.publish(&marker(2));

        assert_eq!(drain(&mut rx), vec![1, 2]);
    }

    #[test]
    fn test_cursor_filters_older_versions() {
        let fanout = FanoutService::new();
        let (_id, mut rx) = fanout.subscribe(Some(5));

        for v in 3..=7 {
            fanout.publish(&marker(v));
        }

        assert_eq!(drain(&mut rx), vec![6, 7]);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_publish() {
        let fanout = FanoutService::new();
        fanout.publish(&marker(1));

        let (_id, mut rx) = fanout.subscribe(None);
        assert_eq!(drain(&mut rx), Vec::<i64>::new());

        fanout.publish(&marker(2));
        assert_eq!(drain(&mut rx), vec![2]);
    }

    #[test]
    fn test_duplicate_delivery_is_deduplicated() {
        let fanout = FanoutService::new();
        let (_id, mut rx) = fanout.subscribe(Some(0));

        // 重连补偿与在线发布赛跑，同一标记到达两次
        fanout.publish(&marker(1));
        fanout.publish(&marker(1));

        assert_eq!(drain(&mut rx), vec![1]);
    }

    #[test]
    fn test_out_of_order_versions_are_still_delivered() {
        let fanout = FanoutService::new();
        let (_id, mut rx) = fanout.subscribe(None);

        fanout.publish(&marker(3));
        fanout.publish(&marker(2));

        // 总线不保证顺序，version 才是权威排序键，两条都要送达
        assert_eq!(drain(&mut rx), vec![3, 2]);
    }

    #[test]
    fn test_dead_listener_is_pruned() {
        let fanout = FanoutService::new();
        let (_id, rx) = fanout.subscribe(None);
        drop(rx);

        assert_eq!(fanout.listener_count(), 1);
        fanout.publish(&marker(1));
        assert_eq!(fanout.listener_count(), 0);
    }

    #[test]
    fn test_multiple_listeners_each_get_one_copy() {
        let fanout = FanoutService::new();
        let (_a, mut rx_a) = fanout.subscribe(None);
        let (_b, mut rx_b) = fanout.subscribe(Some(1));

        fanout.publish(&marker(1));
        fanout.publish(&marker(2));

        assert_eq!(drain(&mut rx_a), vec![1, 2]);
        assert_eq!(drain(&mut rx_b), vec![2]);
    }

    proptest! {
        // 任意到达顺序、任意重复，监听者收到的都是大于游标的去重版本集
        #[test]
        fn prop_delivery_is_deduplicated_and_cursor_filtered(
            versions in proptest::collection::vec(1i64..40, 0..60),
            cursor in 0i64..20,
        ) {
            let fanout = FanoutService::new();
            let (_id, mut rx) = fanout.subscribe(Some(cursor));

            for v in &versions {
                fanout.publish(&marker(*v));
            }

            let delivered = drain(&mut rx);

            let mut expected: Vec<i64> = versions
                .iter()
                .copied()
                .filter(|v| *v > cursor)
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();

            let mut sorted = delivered.clone();
            sorted.sort_unstable();
            sorted.dedup();

            // 无重复投递
            prop_assert_eq!(sorted.len(), delivered.len());
            // 恰好是大于游标的版本集合
            expected.sort_unstable();
            prop_assert_eq!(sorted, expected);
        }
    }
}
