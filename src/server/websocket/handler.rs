//! WebSocket 路由处理器

use crate::server::websocket::message::{WsClientMessage, WsServerMessage};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket 路由处理器
///
/// 连接建立后依次推送 connected、当前快照，之后转发所有上传事件
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// 处理 WebSocket 连接
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!("新的 WebSocket 连接: {}", connection_id);

    // 先订阅再取快照，避免两者之间的事件丢失
    let mut events = state.scheduler.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let greeting = [
        WsServerMessage::connected(connection_id.clone()),
        WsServerMessage::snapshot(state.scheduler.snapshot()),
    ];
    for message in &greeting {
        if let Err(e) = send_message(&mut sender, message).await {
            error!("发送初始消息失败: {} - {}", connection_id, e);
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let message = match event {
                    Ok(event) => WsServerMessage::event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        // 客户端跟不上，丢弃积压事件，改发最新快照
                        warn!("WebSocket 连接落后 {} 条事件，重新推送快照: {}", skipped, connection_id);
                        WsServerMessage::snapshot(state.scheduler.snapshot())
                    }
                    Err(RecvError::Closed) => break,
                };
                if send_message(&mut sender, &message).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        info!("收到关闭消息: {}", connection_id);
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("接收消息失败: {} - {}", connection_id, e);
                        break;
                    }
                    None => break,
                };

                let reply = handle_client_message(&state, &connection_id, &text);
                if send_message(&mut sender, &reply).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("WebSocket 连接已关闭: {}", connection_id);
}

/// 处理客户端消息，返回需要回复的消息
fn handle_client_message(state: &AppState, connection_id: &str, text: &str) -> WsServerMessage {
    match serde_json::from_str::<WsClientMessage>(text) {
        Ok(WsClientMessage::Ping { timestamp }) => WsServerMessage::pong(Some(timestamp)),
        Ok(WsClientMessage::RequestSnapshot) => {
            debug!("收到状态快照请求: {}", connection_id);
            WsServerMessage::snapshot(state.scheduler.snapshot())
        }
        Err(e) => {
            warn!("解析客户端消息失败: {} - {}", connection_id, e);
            WsServerMessage::error("PARSE_ERROR", format!("消息解析失败: {}", e))
        }
    }
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &WsServerMessage,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(message)?;
    sender.send(Message::Text(json)).await?;
    Ok(())
}
