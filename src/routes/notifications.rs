use crate::{
    error::{AppError, Result},
    models::notification::{BlogCreatedEvent, MarkSeenRequest, MarkSeenResponse, MarkerPayload},
    state::AppState,
    utils::middleware::AuthUser,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_all_markers))
        .route("/unread", get(get_unread_markers))
        .route("/unread/count", get(get_unread_count))
        .route("/seen", post(mark_seen))
        .route("/ws", get(subscribe))
        .route("/events", post(publish_event))
}

/// 博客服务在自己的写入提交后调用，即发即忘
///
/// 入队失败不影响博客创建的结果：博客已经落库，这里只记日志并照常
/// 返回202。畸形载荷是另一回事，按契约违规拒掉。
async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<BlogCreatedEvent>,
) -> Result<StatusCode> {
    match state.event_queue.enqueue(&event).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(e @ AppError::Validation(_)) => Err(e),
        Err(e) => {
            error!(
                "Best-effort enqueue failed for blog {}: {}",
                event.blog_id, e
            );
            Ok(StatusCode::ACCEPTED)
        }
    }
}

/// 历史通知：按注册视界过滤，版本降序
async fn get_all_markers(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<MarkerPayload>>> {
    let markers = state.marker_service.get_all_markers(&user).await?;
    Ok(Json(markers.iter().map(MarkerPayload::from_marker).collect()))
}

/// 未读通知：版本大于游标，升序
async fn get_unread_markers(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<MarkerPayload>>> {
    let markers = state.marker_service.get_unread_markers(&user).await?;
    Ok(Json(markers.iter().map(MarkerPayload::from_marker).collect()))
}

async fn get_unread_count(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>> {
    let count = state.marker_service.get_unread_count(&user).await?;
    Ok(Json(json!({ "unread_count": count })))
}

/// 标记已读：游标只进不退，返回更新后的游标和重新计算的未读数
async fn mark_seen(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<MarkSeenRequest>,
) -> Result<Json<MarkSeenResponse>> {
    let response = state
        .read_cursor_service
        .mark_seen(&user, req.version)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    cursor: Option<i64>,
}

/// 实时订阅：由本地多播供给
/// 断线期间的缺口不在这里补，客户端重连后走历史接口对账
async fn subscribe(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(params): Query<SubscribeParams>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    info!(
        "User {} opening notification subscription (cursor: {:?})",
        user.id, params.cursor
    );
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, params.cursor)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, cursor: Option<i64>) {
    let (listener_id, mut rx) = state.fanout_service.subscribe(cursor);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            maybe_marker = rx.recv() => {
                let Some(marker) = maybe_marker else { break };
                let payload = MarkerPayload::from_marker(&marker);
                match serde_json::to_string(&payload) {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to serialize marker {}: {}", marker.version, e);
                    }
                }
            }
            maybe_msg = receiver.next() => {
                match maybe_msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error for listener {}: {}", listener_id, e);
                        break;
                    }
                }
            }
        }
    }

    state.fanout_service.unsubscribe(&listener_id);
    info!("Notification listener {} disconnected", listener_id);
}
